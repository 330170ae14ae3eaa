// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Remote exec: stdio wired over auxiliary streams. TTY raw-mode handling
//! stays outside; the terminal size travels with the request so the agent
//! can size the pty.

use tokio_util::task::TaskTracker;

use crate::infrastructure::transport::{call_all, open_stream, AggregateError, ExecRequest};

pub async fn exec(
    addrs: &[String],
    container: &str,
    cmd: Vec<String>,
    interactive: bool,
    tty: bool,
) -> Option<AggregateError> {
    let (tty_w, tty_h) = terminal_size();
    let tracker = TaskTracker::new();
    let container = container.to_string();
    let reader_tracker = tracker.clone();

    let (_, errors) = call_all(addrs, move |mut client, addr| {
        let container = container.clone();
        let cmd = cmd.clone();
        let tracker = reader_tracker.clone();
        async move {
            let (out_stream_id, out_conn) = open_stream(&mut client, &addr).await?;
            tracker.spawn(async move {
                let mut conn = out_conn;
                let _ = tokio::io::copy(&mut conn, &mut tokio::io::stdout()).await;
            });

            // With a TTY the engine merges both streams; otherwise stderr
            // gets its own channel.
            let err_stream_id = if tty {
                None
            } else {
                let (id, err_conn) = open_stream(&mut client, &addr).await?;
                tracker.spawn(async move {
                    let mut conn = err_conn;
                    let _ = tokio::io::copy(&mut conn, &mut tokio::io::stderr()).await;
                });
                Some(id)
            };

            let in_stream_id = if interactive {
                let (id, mut in_conn) = open_stream(&mut client, &addr).await?;
                // Detached: stdin has no async close, the task dies with
                // the process.
                tokio::spawn(async move {
                    let _ = tokio::io::copy(&mut tokio::io::stdin(), &mut in_conn).await;
                });
                Some(id)
            } else {
                None
            };

            client
                .exec(ExecRequest {
                    container,
                    cmd,
                    interactive,
                    tty,
                    tty_w,
                    tty_h,
                    in_stream_id,
                    out_stream_id,
                    err_stream_id,
                })
                .await
        }
    })
    .await;

    tracker.close();
    tracker.wait().await;
    errors
}

/// Terminal dimensions from the environment; zero means "unknown" and the
/// agent skips the resize.
fn terminal_size() -> (u16, u16) {
    let parse = |key: &str| {
        std::env::var(key)
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(0)
    };
    (parse("COLUMNS"), parse("LINES"))
}
