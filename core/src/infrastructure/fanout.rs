// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! One producer, many writers: the sink behind broadcast image loads.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// Duplicates every byte to all writers. A logical write completes only
/// once every writer has accepted the whole buffer; the first failure
/// aborts the copy. Relies on the `AsyncWrite` contract that the caller
/// re-presents the same buffer until the write resolves.
pub struct FanoutWriter<W> {
    writers: Vec<W>,
    index: usize,
    offset: usize,
    shutdown_index: usize,
}

impl<W> FanoutWriter<W> {
    pub fn new(writers: Vec<W>) -> Self {
        Self {
            writers,
            index: 0,
            offset: 0,
            shutdown_index: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for FanoutWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        while this.index < this.writers.len() {
            let writer = Pin::new(&mut this.writers[this.index]);
            match writer.poll_write(cx, &buf[this.offset..]) {
                Poll::Ready(Ok(0)) if this.offset < buf.len() => {
                    this.index = 0;
                    this.offset = 0;
                    return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                }
                Poll::Ready(Ok(n)) => {
                    this.offset += n;
                    if this.offset >= buf.len() {
                        this.index += 1;
                        this.offset = 0;
                    }
                }
                Poll::Ready(Err(err)) => {
                    this.index = 0;
                    this.offset = 0;
                    return Poll::Ready(Err(err));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
        this.index = 0;
        this.offset = 0;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut pending = false;
        for writer in &mut this.writers {
            match Pin::new(writer).poll_flush(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Pending => pending = true,
            }
        }
        if pending {
            Poll::Pending
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        while this.shutdown_index < this.writers.len() {
            match Pin::new(&mut this.writers[this.shutdown_index]).poll_shutdown(cx) {
                Poll::Ready(Ok(())) => this.shutdown_index += 1,
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn duplicates_bytes_to_every_writer() {
        let mut fanout = FanoutWriter::new(vec![Vec::new(), Vec::new(), Vec::new()]);
        fanout.write_all(b"image bytes").await.unwrap();
        fanout.write_all(b" and more").await.unwrap();
        fanout.flush().await.unwrap();
        for writer in &fanout.writers {
            assert_eq!(writer.as_slice(), b"image bytes and more");
        }
    }

    #[tokio::test]
    async fn copy_through_fanout() {
        let mut fanout = FanoutWriter::new(vec![Vec::new(), Vec::new()]);
        let mut source: &[u8] = b"payload";
        tokio::io::copy(&mut source, &mut fanout).await.unwrap();
        assert_eq!(fanout.writers[0], b"payload");
        assert_eq!(fanout.writers[1], b"payload");
    }
}
