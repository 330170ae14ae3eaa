// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! A token-bucket write throttle for image transfers.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tokio::time::{Duration, Instant, Sleep};

/// Wraps a writer and paces it to `rate` bytes per second with a burst of
/// one second's worth of tokens.
pub struct ThrottledWriter<W> {
    inner: W,
    rate: f64,
    capacity: f64,
    tokens: f64,
    refilled: Instant,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl<W> ThrottledWriter<W> {
    pub fn new(inner: W, rate: u64) -> Self {
        let rate = rate.max(1) as f64;
        Self {
            inner,
            rate,
            capacity: rate,
            tokens: rate,
            refilled: Instant::now(),
            sleep: None,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.refilled).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.refilled = now;
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ThrottledWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            if let Some(sleep) = this.sleep.as_mut() {
                match sleep.as_mut().poll(cx) {
                    Poll::Ready(()) => this.sleep = None,
                    Poll::Pending => return Poll::Pending,
                }
            }
            this.refill();
            if this.tokens < 1.0 {
                let wait = Duration::from_secs_f64((1.0 - this.tokens) / this.rate);
                this.sleep = Some(Box::pin(tokio::time::sleep(wait)));
                continue;
            }
            let quota = (this.tokens as usize).min(buf.len()).max(1);
            return match Pin::new(&mut this.inner).poll_write(cx, &buf[..quota]) {
                Poll::Ready(Ok(written)) => {
                    this.tokens -= written as f64;
                    Poll::Ready(Ok(written))
                }
                other => other,
            };
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test(start_paused = true)]
    async fn paces_writes_to_the_configured_rate() {
        let start = Instant::now();
        let mut writer = ThrottledWriter::new(tokio::io::sink(), 1000);
        writer.write_all(&vec![0u8; 3000]).await.unwrap();
        writer.flush().await.unwrap();
        let elapsed = start.elapsed();
        // One second of burst is free; the remaining 2000 bytes take ~2 s.
        assert!(elapsed >= Duration::from_millis(1500), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(3500), "{elapsed:?}");
    }

    #[tokio::test]
    async fn small_writes_pass_through() {
        let mut writer = ThrottledWriter::new(Vec::new(), 1_000_000);
        writer.write_all(b"hello").await.unwrap();
        assert_eq!(writer.inner, b"hello");
    }
}
