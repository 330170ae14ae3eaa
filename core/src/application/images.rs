// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Image distribution: pull fan-outs, broadcast tarball loads and the
//! chained pipeline mode where each agent forwards to the next.

use anyhow::{Context, Result};
use async_compression::tokio::bufread::Lz4Decoder;
use async_compression::tokio::write::Lz4Encoder;
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::io::StreamReader;
use tracing::{info, warn};

use crate::infrastructure::engine::Engine;
use crate::infrastructure::fanout::FanoutWriter;
use crate::infrastructure::throttle::ThrottledWriter;
use crate::infrastructure::transport::{
    call_all, open_stream, AggregateError, Client, ListImagesResponse, LoadImageRequest,
    PullImageRequest,
};

use super::progress::ProgressPrinter;

const CHUNK_SIZE: usize = 32 * 1024;

pub async fn pull(addrs: &[String], image: &str) -> Option<AggregateError> {
    let printer = ProgressPrinter::new();
    let image = image.to_string();
    let attach = printer.clone();
    let (_, errors) = call_all(addrs, move |mut client, addr| {
        let image = image.clone();
        let printer = attach.clone();
        async move {
            let (stream_id, conn) = open_stream(&mut client, &addr).await?;
            printer.attach(conn, addr.clone());
            client.pull_image(PullImageRequest { image, stream_id }).await
        }
    })
    .await;
    printer.wait().await;
    errors
}

pub async fn list(
    addrs: &[String],
) -> (BTreeMap<String, ListImagesResponse>, Option<AggregateError>) {
    call_all(addrs, |mut client, _addr| async move {
        client.list_images().await
    })
    .await
}

pub async fn remove(addrs: &[String], image: &str) -> Option<AggregateError> {
    let image = image.to_string();
    let (_, errors) = call_all(addrs, move |mut client, addr| {
        let image = image.clone();
        async move {
            match client.remove_image(&image).await {
                Err(crate::infrastructure::transport::TransportError::Remote(message))
                    if message.contains("no such image") || message.contains("No such image") =>
                {
                    Ok(())
                }
                other => {
                    if other.is_ok() {
                        info!(agent = %addr, image = %image, "image removed");
                    }
                    other
                }
            }
        }
    })
    .await;
    errors
}

/// Broadcast mode: every agent gets its own stream and the source is
/// copied once through (optional) LZ4 and a shared bandwidth budget.
///
/// This carries its own fan-out loop instead of `call_all`: the pump may
/// only start once every address has reported ready, and that includes
/// addresses whose dial failed before any call could be made.
pub async fn load<R>(
    addrs: &[String],
    reader: R,
    compress: bool,
    bwlimit: u64,
) -> Result<Option<AggregateError>>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    if addrs.is_empty() {
        return Ok(None);
    }

    let (tx, mut rx) = mpsc::channel::<TcpStream>(addrs.len());
    // The queue closes once every agent has either enrolled its writer or
    // failed; only then does the pump know the full fan-out width.
    let queue = Arc::new(Mutex::new(Some(tx)));
    let remaining = Arc::new(AtomicUsize::new(addrs.len()));

    let pump = tokio::spawn(async move {
        let mut writers = Vec::new();
        while let Some(conn) = rx.recv().await {
            writers.push(conn);
        }
        if writers.is_empty() {
            return Ok::<_, io::Error>(());
        }
        let share = if bwlimit > 0 {
            bwlimit / writers.len() as u64
        } else {
            0
        };
        let mut sink: Box<dyn AsyncWrite + Send + Unpin> = Box::new(FanoutWriter::new(writers));
        if share > 0 {
            sink = Box::new(ThrottledWriter::new(sink, share));
        }
        if compress {
            sink = Box::new(Lz4Encoder::new(sink));
        }
        let mut reader = reader;
        tokio::io::copy(&mut reader, &mut sink).await?;
        sink.shutdown().await
    });

    let mut join = tokio::task::JoinSet::new();
    for addr in addrs {
        let addr = addr.clone();
        let queue = queue.clone();
        let remaining = remaining.clone();
        join.spawn(async move {
            let ready = || {
                if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                    queue.lock().unwrap().take();
                }
            };
            let mut client = match Client::dial(&addr).await {
                Ok(client) => client,
                Err(err) => {
                    warn!(agent = %addr, error = %err, "failed to connect");
                    ready();
                    return (addr, None);
                }
            };
            let sender = queue.lock().unwrap().as_ref().cloned();
            let stream_id = match open_stream(&mut client, &addr).await {
                Ok((stream_id, conn)) => {
                    if let Some(sender) = sender {
                        let _ = sender.send(conn).await;
                    }
                    ready();
                    stream_id
                }
                Err(err) => {
                    ready();
                    return (addr, Some(Err(err)));
                }
            };
            let result = client
                .load_image(LoadImageRequest {
                    stream_id,
                    compress,
                    rest: Vec::new(),
                })
                .await;
            (addr, Some(result))
        });
    }

    let mut failures = Vec::new();
    while let Some(joined) = join.join_next().await {
        match joined {
            Ok((addr, Some(Err(err)))) => failures.push((addr, err)),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "load task panicked"),
        }
    }

    pump.await.context("image pump task")??;
    if failures.is_empty() {
        Ok(None)
    } else {
        Ok(Some(AggregateError::new(failures)))
    }
}

/// Pipeline mode: hand the whole stream to the first agent together with
/// the remaining addresses; each hop loads locally and forwards.
///
/// `compress` encodes the source here; `compressed` marks bytes that are
/// already LZ4-framed by an upstream hop and must be forwarded as-is.
pub async fn load_pipeline<R>(
    addrs: &[String],
    reader: R,
    compress: bool,
    compressed: bool,
    bwlimit: u64,
) -> Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let (next, rest) = addrs.split_first().context("no agents configured")?;
    let mut client = Client::dial(next).await?;
    let (stream_id, conn) = open_stream(&mut client, next).await?;
    info!(next = %next, "sending the image using pipeline");

    let pump = tokio::spawn(pump_single(conn, reader, compress, bwlimit));
    let call = client
        .load_image(LoadImageRequest {
            stream_id,
            compress: compress || compressed,
            rest: rest.to_vec(),
        })
        .await;
    let pumped = pump.await.context("image pump task")?;
    call?;
    pumped?;
    Ok(())
}

async fn pump_single<R>(
    conn: TcpStream,
    mut reader: R,
    compress: bool,
    bwlimit: u64,
) -> io::Result<()>
where
    R: AsyncRead + Send + Unpin,
{
    let mut sink: Box<dyn AsyncWrite + Send + Unpin> = Box::new(conn);
    if bwlimit > 0 {
        sink = Box::new(ThrottledWriter::new(sink, bwlimit));
    }
    if compress {
        sink = Box::new(Lz4Encoder::new(sink));
    }
    tokio::io::copy(&mut reader, &mut sink).await?;
    sink.shutdown().await
}

/// Wrap a stream in the LZ4 frame decoder when the bytes are compressed.
pub fn maybe_decompress<R>(reader: R, compressed: bool) -> Box<dyn AsyncRead + Send + Unpin>
where
    R: AsyncBufRead + Send + Unpin + 'static,
{
    if compressed {
        Box::new(Lz4Decoder::new(reader))
    } else {
        Box::new(reader)
    }
}

/// A pipeline hop with more addresses to serve: split the inbound bytes
/// into a local load and a raw forward to the next agent. Both branches
/// run to completion; a local failure never truncates the forward.
pub async fn tee_load(
    engine: Engine,
    mut conn: TcpStream,
    compressed: bool,
    rest: Vec<String>,
) -> Result<()> {
    let (fwd_tx, fwd_rx) = mpsc::channel::<Bytes>(16);
    let (load_tx, load_rx) = mpsc::channel::<Bytes>(16);

    let reader = tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        loop {
            buf.reserve(CHUNK_SIZE);
            let n = conn.read_buf(&mut buf).await?;
            if n == 0 {
                return Ok::<_, io::Error>(());
            }
            let chunk = buf.split().freeze();
            // A dead branch stops consuming; the other must still see
            // every byte.
            let forwarded = fwd_tx.send(chunk.clone()).await.is_ok();
            let loaded = load_tx.send(chunk).await.is_ok();
            if !forwarded && !loaded {
                return Ok(());
            }
        }
    });

    let local = tokio::spawn(async move {
        let body = StreamReader::new(ReceiverStream::new(load_rx).map(Ok::<_, io::Error>));
        engine.load_image(maybe_decompress(body, compressed)).await
    });

    let forward = tokio::spawn(async move {
        let body = StreamReader::new(ReceiverStream::new(fwd_rx).map(Ok::<_, io::Error>));
        load_pipeline(&rest, body, false, compressed, 0).await
    });

    let (read_result, local_result, forward_result) =
        tokio::join!(reader, local, forward);
    // Local load failures take precedence; the forward has already been
    // driven to completion either way.
    local_result.context("local load task")??;
    forward_result.context("pipeline forward task")??;
    // Both branches can finish on a truncated stream; a source read
    // failure still fails the hop.
    read_result
        .context("pipeline reader task")?
        .context("reading pipelined image stream")?;
    Ok(())
}
