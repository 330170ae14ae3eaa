// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent capability snapshots consumed by the placement engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::manifest::PortSpec;

/// One agent's live self-description. Produced on demand by a probe and
/// already stale by the time it reaches the placement engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Capability {
    /// The admission slot was free at snapshot time.
    pub available: bool,
    /// Display name of the agent.
    pub agent: String,
    pub labels: BTreeMap<String, String>,
    /// Host addresses ordered private-first, link-local last.
    pub ip_addrs: Vec<String>,
    /// Every container name known to the engine, running or not.
    pub all_names: Vec<String>,
    /// Names of running containers.
    pub used_names: Vec<String>,
    /// Host ports published by running containers.
    pub used_ports: Vec<i64>,
    /// Published ports per running container, keyed by canonical name.
    pub containers: BTreeMap<String, ContainerInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub ports: Vec<PortSpec>,
}

impl Capability {
    pub fn has_name(&self, name: &str) -> bool {
        self.all_names.iter().any(|n| n == name)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.used_names.iter().any(|n| n == name)
    }

    pub fn port_in_use(&self, port: i64) -> bool {
        self.used_ports.contains(&port)
    }
}

/// Capabilities keyed by agent address. Ordered so iteration (and with it
/// the least-load tie-break) follows sorted address order.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    inner: BTreeMap<String, Capability>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, addr: String, capability: Capability) {
        self.inner.insert(addr, capability);
    }

    pub fn get(&self, addr: &str) -> Option<&Capability> {
        self.inner.get(addr)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.inner.contains_key(addr)
    }

    /// Drop every agent the predicate rejects.
    pub fn retain(&mut self, mut predicate: impl FnMut(&Capability) -> bool) {
        self.inner.retain(|_, capability| predicate(capability));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Capability)> {
        self.inner.iter()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.inner.keys().cloned().collect()
    }
}

impl FromIterator<(String, Capability)> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = (String, Capability)>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}
