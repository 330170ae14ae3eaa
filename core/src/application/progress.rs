// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Consumes progress streams (pull/submit) and prints plain status lines.

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::task::TaskTracker;

/// The subset of the engine's JSON progress messages worth showing.
#[derive(Debug, Default, Deserialize)]
struct ProgressMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    progress: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Fans progress streams from several agents into stdout, one line per
/// status transition, `[addr]`-prefixed.
#[derive(Clone, Default)]
pub struct ProgressPrinter {
    tracker: TaskTracker,
}

impl ProgressPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, conn: TcpStream, addr: String) {
        self.tracker.spawn(async move {
            let mut lines = BufReader::new(conn).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<ProgressMessage>(&line) {
                    Ok(message) => print_message(&addr, &message),
                    Err(_) => println!("[{addr}] {line}"),
                }
            }
        });
    }

    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

fn print_message(addr: &str, message: &ProgressMessage) {
    if let Some(error) = &message.error {
        eprintln!("[{addr}] {error}");
        return;
    }
    // Byte-level progress updates arrive far too often to be useful as
    // lines; status transitions carry the signal.
    if message.progress.as_deref().unwrap_or("").is_empty() {
        if let Some(status) = &message.status {
            match &message.id {
                Some(id) if !id.is_empty() => println!("[{addr}] {id}: {status}"),
                _ => println!("[{addr}] {status}"),
            }
        }
    }
}
