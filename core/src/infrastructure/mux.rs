// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Connection multiplexing over a single listener.
//!
//! The first byte of every accepted connection names a logical channel;
//! the mux hands the rest of the stream to the handler registered for
//! that byte. Dialers write the tag as their first byte, so one TCP port
//! serves both synchronous RPC and auxiliary byte streams.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Synchronous request/response calls.
pub const CHAN_RPC: u8 = 0x00;
/// Auxiliary stream attach: a 4-byte big-endian id, then raw bytes.
pub const CHAN_NEW_STREAM: u8 = 0x01;

pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, conn: TcpStream);
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(TcpStream) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, conn: TcpStream) {
        self(conn).await;
    }
}

/// Handler table keyed by channel tag. Filled during startup, read-only
/// once the listener loop starts.
#[derive(Default)]
pub struct Mux {
    handlers: HashMap<u8, Arc<dyn Handler>>,
}

impl Mux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, tag: u8, handler: Arc<dyn Handler>) {
        self.handlers.insert(tag, handler);
    }

    /// Read the channel tag and hand the connection off. Unknown tags
    /// close the connection and surface an error to the caller.
    pub async fn dispatch(&self, mut conn: TcpStream) -> io::Result<()> {
        let tag = conn.read_u8().await?;
        match self.handlers.get(&tag) {
            Some(handler) => {
                handler.handle(conn).await;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown channel tag: {tag:#04x}"),
            )),
        }
    }
}

/// Connect to a peer with the dial timeout and announce the channel tag.
pub async fn dial(addr: &str, tag: u8) -> io::Result<TcpStream> {
    let mut conn = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("dialing {addr}")))??;
    conn.write_u8(tag).await?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn echo(mut conn: TcpStream, repeat: usize) {
        let mut buf = [0u8; 1024];
        let n = conn.read(&mut buf).await.unwrap();
        for _ in 0..repeat {
            conn.write_all(&buf[..n]).await.unwrap();
        }
    }

    #[tokio::test]
    async fn dispatches_by_tag() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut mux = Mux::new();
        mux.handle(0x00, Arc::new(|conn| echo(conn, 1)));
        mux.handle(0x01, Arc::new(|conn| echo(conn, 2)));
        let mux = Arc::new(mux);

        let server = mux.clone();
        tokio::spawn(async move {
            loop {
                let Ok((conn, _)) = listener.accept().await else {
                    return;
                };
                let server = server.clone();
                tokio::spawn(async move {
                    let _ = server.dispatch(conn).await;
                });
            }
        });

        let mut conn = dial(&addr, 0x00).await.unwrap();
        conn.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        let mut conn = dial(&addr, 0x01).await.unwrap();
        conn.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 10];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hellohello");
    }

    #[tokio::test]
    async fn unknown_tag_is_an_error() {
        let mux = Mux::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let client = tokio::spawn(async move { dial(&addr, 0x7f).await });
        let (conn, _) = listener.accept().await.unwrap();
        assert!(mux.dispatch(conn).await.is_err());
        client.await.unwrap().unwrap();
    }
}
