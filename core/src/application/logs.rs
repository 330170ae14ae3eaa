// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Multi-agent log attach: every agent's stdout/stderr streams are read
//! line-by-line and reprinted with an `[addr]` prefix. In follow mode the
//! command unwinds on ctrl-c/SIGTERM by closing the attached streams and
//! abandoning the in-flight calls.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::infrastructure::transport::{call_all, open_stream, AggregateError, LogsRequest};

pub async fn logs(
    addrs: &[String],
    container: &str,
    follow: bool,
    tail: &str,
) -> Option<AggregateError> {
    let cancel = CancellationToken::new();
    if follow {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("closing log streams");
            cancel.cancel();
        });
    }

    let tracker = TaskTracker::new();
    let container = container.to_string();
    let tail = tail.to_string();
    let reader_tracker = tracker.clone();
    let call_cancel = cancel.clone();

    let (_, errors) = call_all(addrs, move |mut client, addr| {
        let container = container.clone();
        let tail = tail.clone();
        let tracker = reader_tracker.clone();
        let cancel = call_cancel.clone();
        async move {
            let (out_stream_id, out_conn) = open_stream(&mut client, &addr).await?;
            let (err_stream_id, err_conn) = open_stream(&mut client, &addr).await?;
            let prefix = format!("[{addr}] ");
            tracker.spawn(read_stream(out_conn, prefix.clone(), false, cancel.child_token()));
            tracker.spawn(read_stream(err_conn, prefix, true, cancel.child_token()));

            let request = LogsRequest {
                container,
                follow,
                tail,
                out_stream_id,
                err_stream_id,
            };
            tokio::select! {
                result = client.logs(request) => result,
                // Signal-driven unwind: the read streams are closed by
                // cancellation, the call itself is abandoned.
                _ = cancel.cancelled() => Ok(()),
            }
        }
    })
    .await;

    tracker.close();
    tracker.wait().await;
    errors
}

async fn read_stream(conn: TcpStream, prefix: String, to_stderr: bool, cancel: CancellationToken) {
    let mut lines = BufReader::new(conn).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if to_stderr {
                        eprintln!("{prefix}{line}");
                    } else {
                        println!("{prefix}{line}");
                    }
                }
                _ => return,
            },
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
