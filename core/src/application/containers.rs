// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Container lifecycle fan-outs: the same call against every agent, with
//! per-agent success logging and aggregated failures.

use std::collections::BTreeMap;
use tracing::info;

use crate::infrastructure::transport::{
    call_all, AggregateError, ListContainersResponse, TransportError,
};

/// Remote errors for operations that are idempotent by design: a missing
/// container or image means the desired state already holds.
fn already_gone(result: Result<(), TransportError>) -> Result<(), TransportError> {
    match result {
        Err(TransportError::Remote(message))
            if message.contains("No such container") || message.contains("no such image") =>
        {
            Ok(())
        }
        other => other,
    }
}

pub async fn list(
    addrs: &[String],
    all: bool,
) -> (BTreeMap<String, ListContainersResponse>, Option<AggregateError>) {
    call_all(addrs, move |mut client, _addr| async move {
        client.list_containers(all).await
    })
    .await
}

pub async fn start(addrs: &[String], container: &str) -> Option<AggregateError> {
    let container = container.to_string();
    let (_, errors) = call_all(addrs, move |mut client, addr| {
        let container = container.clone();
        async move {
            client.start_container(&container).await?;
            info!(agent = %addr, container = %container, "container started");
            Ok(())
        }
    })
    .await;
    errors
}

pub async fn stop(addrs: &[String], container: &str, timeout: u64) -> Option<AggregateError> {
    let container = container.to_string();
    let (_, errors) = call_all(addrs, move |mut client, addr| {
        let container = container.clone();
        async move {
            already_gone(client.stop_container(&container, timeout).await)?;
            info!(agent = %addr, container = %container, "container stopped");
            Ok(())
        }
    })
    .await;
    errors
}

pub async fn restart(addrs: &[String], container: &str, timeout: u64) -> Option<AggregateError> {
    let container = container.to_string();
    let (_, errors) = call_all(addrs, move |mut client, addr| {
        let container = container.clone();
        async move {
            client.restart_container(&container, timeout).await?;
            info!(agent = %addr, container = %container, "container restarted");
            Ok(())
        }
    })
    .await;
    errors
}

pub async fn remove(addrs: &[String], container: &str, force: bool) -> Option<AggregateError> {
    let container = container.to_string();
    let (_, errors) = call_all(addrs, move |mut client, addr| {
        let container = container.clone();
        async move {
            already_gone(client.remove_container(&container, force).await)?;
            info!(agent = %addr, container = %container, "container removed");
            Ok(())
        }
    })
    .await;
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_container_counts_as_success() {
        let err = Err(TransportError::Remote(
            "No such container: api".to_string(),
        ));
        assert!(already_gone(err).is_ok());
        let err = Err(TransportError::Remote("no such image: nginx".to_string()));
        assert!(already_gone(err).is_ok());
        let err = Err(TransportError::Remote("engine exploded".to_string()));
        assert!(already_gone(err).is_err());
    }
}
