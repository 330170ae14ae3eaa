// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Capability gathering: probe every configured agent in parallel and
//! assemble the capability set placement works from.

use anyhow::Result;
use tracing::{info, warn};

use crate::domain::capability::CapabilitySet;
use crate::domain::filter;
use crate::infrastructure::transport::call_all;

/// Probe all agents. Probe failures exclude the agent and are logged;
/// agents whose admission slot is held report `available=false` and are
/// excluded quietly. The probe itself never fails.
pub async fn gather_capabilities(agents: &[String]) -> CapabilitySet {
    let (results, errors) = call_all(agents, |mut client, _addr| async move {
        client.capability().await
    })
    .await;
    if let Some(errors) = errors {
        errors.each(|addr, err| warn!(agent = %addr, error = %err, "capability probe failed"));
    }

    let mut caps = CapabilitySet::new();
    for (addr, capability) in results {
        if capability.available {
            caps.insert(addr, capability);
        } else {
            info!(agent = %addr, "agent temporarily unavailable");
        }
    }
    caps
}

/// The addresses an operation should fan out to: every configured agent,
/// or, when a filter expression is given, only those whose capabilities
/// match it.
pub async fn resolve_agents(agents: &[String], filter: Option<&str>) -> Result<Vec<String>> {
    let Some(expr) = filter else {
        return Ok(agents.to_vec());
    };
    let expr = filter::parse(expr)?;
    let mut caps = gather_capabilities(agents).await;
    caps.retain(|capability| expr.eval(capability));
    Ok(caps.addresses())
}
