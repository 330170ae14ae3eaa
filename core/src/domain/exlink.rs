// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! External links: references to containers on other agents, materialized
//! as Docker-style environment variables on the submitted container.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::capability::CapabilitySet;
use super::manifest::Link;

#[derive(Debug, Error)]
pub enum ExLinkError {
    #[error("no linkable containers")]
    NoCandidates,
    #[error("malformed exposed port: {0}")]
    MalformedExposed(String),
}

/// A resolved external link: one published port of a container hosted on
/// some other agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExLink {
    pub name: String,
    pub exposed: String,
    pub addr: String,
    pub port: i64,
}

impl ExLink {
    /// The Docker-compatible env var set: exactly five entries, with
    /// `NAME_PORT` equal to the fully-qualified `NAME_PORT_p_PROTO`.
    pub fn env(&self) -> Result<BTreeMap<String, String>, ExLinkError> {
        let name = self.name.to_uppercase();
        let (port, proto) = self
            .exposed
            .split_once('/')
            .ok_or_else(|| ExLinkError::MalformedExposed(self.exposed.clone()))?;
        let prefix = format!("{}_PORT_{}_{}", name, port, proto.to_uppercase());
        let url = format!("{}://{}:{}", proto, self.addr, self.port);
        let mut env = BTreeMap::new();
        env.insert(format!("{name}_PORT"), url.clone());
        env.insert(prefix.clone(), url);
        env.insert(format!("{prefix}_ADDR"), self.addr.clone());
        env.insert(format!("{prefix}_PORT"), self.port.to_string());
        env.insert(format!("{prefix}_PROTO"), proto.to_string());
        Ok(env)
    }
}

/// Candidate selection seam; the production sampler is pseudo-random,
/// tests substitute a deterministic one.
pub trait Sampler {
    /// An index in `0..len`, `len > 0`.
    fn pick(&mut self, len: usize) -> usize;
}

pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn pick(&mut self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// A fixed-index sampler for deterministic tests.
pub struct FixedSampler(pub usize);

impl Sampler for FixedSampler {
    fn pick(&mut self, len: usize) -> usize {
        self.0 % len
    }
}

/// Resolve every external link of a manifest against the capability set.
///
/// For each link the hosting candidates are agents that run the target
/// container and advertise at least one address; one is sampled from the
/// sorted candidate list, and every published port of the container yields
/// a link record. An unspecified host ip is replaced by the agent's first
/// address.
pub fn resolve(
    exlinks: &[Link],
    caps: &CapabilitySet,
    sampler: &mut dyn Sampler,
) -> Result<Vec<ExLink>, ExLinkError> {
    let mut out = Vec::new();
    for link in exlinks {
        let mut candidates = caps.clone();
        candidates.retain(|cap| cap.is_running(&link.name) && !cap.ip_addrs.is_empty());
        if candidates.is_empty() {
            return Err(ExLinkError::NoCandidates);
        }
        let addresses = candidates.addresses();
        let chosen = &addresses[sampler.pick(addresses.len())];
        let capability = candidates.get(chosen).expect("sampled address present");
        if let Some(info) = capability.containers.get(&link.name) {
            for port in &info.ports {
                let addr = if port.host_ip == "0.0.0.0" || port.host_ip.is_empty() {
                    capability.ip_addrs[0].clone()
                } else {
                    port.host_ip.clone()
                };
                out.push(ExLink {
                    name: link.alias.clone(),
                    exposed: port.exposed.clone(),
                    addr,
                    port: port.host_port,
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::capability::{Capability, ContainerInfo};
    use crate::domain::manifest::PortSpec;

    #[test]
    fn env_has_exactly_five_entries() {
        let link = ExLink {
            name: "api".into(),
            exposed: "80/tcp".into(),
            addr: "192.168.1.1".into(),
            port: 80,
        };
        let env = link.env().unwrap();
        assert_eq!(env.len(), 5);
        assert_eq!(env["API_PORT"], "tcp://192.168.1.1:80");
        assert_eq!(env["API_PORT_80_TCP"], "tcp://192.168.1.1:80");
        assert_eq!(env["API_PORT_80_TCP_ADDR"], "192.168.1.1");
        assert_eq!(env["API_PORT_80_TCP_PORT"], "80");
        assert_eq!(env["API_PORT_80_TCP_PROTO"], "tcp");
    }

    fn host(name: &str, ip: &str, ports: Vec<PortSpec>) -> Capability {
        Capability {
            available: true,
            used_names: vec![name.to_string()],
            all_names: vec![name.to_string()],
            ip_addrs: vec![ip.to_string()],
            containers: [(name.to_string(), ContainerInfo { ports })].into(),
            ..Default::default()
        }
    }

    #[test]
    fn resolves_unspecified_address_to_agent_ip() {
        let mut caps = CapabilitySet::new();
        caps.insert(
            "a1:7300".into(),
            host(
                "db",
                "10.0.0.5",
                vec![PortSpec {
                    exposed: "5432/tcp".into(),
                    host_ip: "0.0.0.0".into(),
                    host_port: 5432,
                }],
            ),
        );
        let links = vec![Link { name: "db".into(), alias: "DB".into() }];
        let resolved = resolve(&links, &caps, &mut FixedSampler(0)).unwrap();
        assert_eq!(
            resolved,
            vec![ExLink {
                name: "DB".into(),
                exposed: "5432/tcp".into(),
                addr: "10.0.0.5".into(),
                port: 5432,
            }]
        );
        let env = resolved[0].env().unwrap();
        assert_eq!(env["DB_PORT"], "tcp://10.0.0.5:5432");
        assert_eq!(env["DB_PORT_5432_TCP_ADDR"], "10.0.0.5");
    }

    #[test]
    fn explicit_host_ip_is_kept() {
        let mut caps = CapabilitySet::new();
        caps.insert(
            "a1:7300".into(),
            host(
                "db",
                "10.0.0.5",
                vec![PortSpec {
                    exposed: "5432/tcp".into(),
                    host_ip: "192.168.1.9".into(),
                    host_port: 5432,
                }],
            ),
        );
        let links = vec![Link { name: "db".into(), alias: "db".into() }];
        let resolved = resolve(&links, &caps, &mut FixedSampler(0)).unwrap();
        assert_eq!(resolved[0].addr, "192.168.1.9");
    }

    #[test]
    fn no_candidates_is_an_error() {
        let mut caps = CapabilitySet::new();
        caps.insert("a1:7300".into(), Capability::default());
        let links = vec![Link { name: "db".into(), alias: "db".into() }];
        assert!(matches!(
            resolve(&links, &caps, &mut FixedSampler(0)),
            Err(ExLinkError::NoCandidates)
        ));
    }

    #[test]
    fn sampler_picks_from_sorted_candidates() {
        let mut caps = CapabilitySet::new();
        for (addr, ip) in [("b:7300", "10.0.0.2"), ("a:7300", "10.0.0.1")] {
            caps.insert(
                addr.into(),
                host(
                    "db",
                    ip,
                    vec![PortSpec {
                        exposed: "5432/tcp".into(),
                        host_ip: String::new(),
                        host_port: 5432,
                    }],
                ),
            );
        }
        let links = vec![Link { name: "db".into(), alias: "db".into() }];
        let first = resolve(&links, &caps, &mut FixedSampler(0)).unwrap();
        assert_eq!(first[0].addr, "10.0.0.1");
        let second = resolve(&links, &caps, &mut FixedSampler(1)).unwrap();
        assert_eq!(second[0].addr, "10.0.0.2");
    }
}
