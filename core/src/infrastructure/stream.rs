// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Rendezvous registry for auxiliary stream connections.
//!
//! An RPC handler that wants an out-of-band byte stream allocates an id;
//! the peer dials back on the NEW_STREAM channel and announces that id;
//! the registry parks the connection until the handler claims it. Slots
//! are single-use and evicted after a deadline, closing any parked
//! connection and removing the entry in one step so an id can never be
//! released twice.

use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::oneshot;

pub const CLAIM_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("acquiring stream connection: {0}")]
    Timeout(u32),
    #[error("invalid stream id: {0}")]
    InvalidId(u32),
}

enum Slot {
    /// Allocated, nothing arrived, nobody waiting.
    Vacant,
    /// The peer connected before the handler asked.
    Parked(TcpStream),
    /// The handler is waiting for the peer.
    Claimed(oneshot::Sender<TcpStream>),
}

pub struct StreamRegistry {
    slots: Mutex<HashMap<u32, Slot>>,
    timeout: Duration,
}

impl StreamRegistry {
    pub fn new() -> Arc<Self> {
        Self::with_timeout(CLAIM_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(HashMap::new()),
            timeout,
        })
    }

    /// Allocate an unused id and schedule its eviction.
    pub fn alloc(self: &Arc<Self>) -> u32 {
        let id = {
            let mut slots = self.slots.lock().unwrap();
            let mut rng = rand::thread_rng();
            loop {
                let id = rng.gen::<u32>();
                if !slots.contains_key(&id) {
                    slots.insert(id, Slot::Vacant);
                    break id;
                }
            }
        };
        let registry = Arc::downgrade(self);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(registry) = registry.upgrade() {
                registry.release(id);
            }
        });
        id
    }

    /// Deposit an inbound connection for its announced id. The connection
    /// is dropped (closed) on any error: unknown id, or a second
    /// connection for a slot that already holds one.
    pub fn put(&self, id: u32, conn: TcpStream) -> Result<(), StreamError> {
        let mut slots = self.slots.lock().unwrap();
        match slots.remove(&id) {
            None => Err(StreamError::InvalidId(id)),
            Some(Slot::Vacant) => {
                slots.insert(id, Slot::Parked(conn));
                Ok(())
            }
            Some(parked @ Slot::Parked(_)) => {
                // The slot accepts one connection ever; the newcomer is
                // dropped, the first stays parked.
                slots.insert(id, parked);
                Err(StreamError::InvalidId(id))
            }
            Some(Slot::Claimed(tx)) => {
                // A closed receiver drops (closes) the connection with it.
                let _ = tx.send(conn);
                Ok(())
            }
        }
    }

    /// Claim the connection for an id, waiting for the peer if it has not
    /// arrived yet. Eviction wakes the waiter with the timeout error; in
    /// every outcome the id is gone from the registry afterwards.
    pub async fn get(&self, id: u32) -> Result<TcpStream, StreamError> {
        let rx = {
            let mut slots = self.slots.lock().unwrap();
            match slots.remove(&id) {
                None => return Err(StreamError::InvalidId(id)),
                Some(Slot::Parked(conn)) => return Ok(conn),
                Some(claimed @ Slot::Claimed(_)) => {
                    slots.insert(id, claimed);
                    return Err(StreamError::InvalidId(id));
                }
                Some(Slot::Vacant) => {
                    let (tx, rx) = oneshot::channel();
                    slots.insert(id, Slot::Claimed(tx));
                    rx
                }
            }
        };
        rx.await.map_err(|_| StreamError::Timeout(id))
    }

    /// Remove an id, closing a parked connection or failing a waiting
    /// `get`. Safe to call more than once.
    pub fn release(&self, id: u32) {
        let mut slots = self.slots.lock().unwrap();
        slots.remove(&id);
    }
}
