// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! The placement engine: an ordered chain of filter stages narrowing a
//! capability set down to the single best agent for a manifest.
//!
//! Every stage only removes agents; the one exception is the name-
//! uniqueness fallback, which restores the pre-stage snapshot when the
//! manifest replaces a container of the same name on the same host.

use regex::Regex;

use super::capability::CapabilitySet;
use super::config::ConfigError;
use super::manifest::{Manifest, Restrict};

/// Restriction regexes compiled once per manifest rather than inside the
/// per-agent loop.
#[derive(Debug, Default)]
pub struct CompiledRestrict {
    agent: Option<Regex>,
    conflicts: Vec<Regex>,
}

impl CompiledRestrict {
    pub fn compile(restrict: &Restrict) -> Result<Self, ConfigError> {
        let agent = if restrict.agent.is_empty() {
            None
        } else {
            Some(Regex::new(&restrict.agent)?)
        };
        let conflicts = restrict
            .conflicts
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<_, _>>()?;
        Ok(Self { agent, conflicts })
    }
}

/// Choose the best agent for the manifest, or `None` when no agent
/// survives the filter chain.
pub fn find_best_agent(
    manifest: &Manifest,
    restrict: &CompiledRestrict,
    mut caps: CapabilitySet,
) -> Option<String> {
    // An agent can replace only a container it already hosts.
    if !manifest.replace.is_empty() {
        caps.retain(|cap| cap.has_name(&manifest.replace));
    }

    // Name uniqueness. Replacing a container under its own name is allowed
    // on the host that runs it, so restore the snapshot in that case.
    // Without a replace target the name must not exist at all.
    let snapshot = caps.clone();
    if manifest.replace.is_empty() {
        caps.retain(|cap| !cap.has_name(&manifest.name));
    } else {
        caps.retain(|cap| !cap.is_running(&manifest.name));
        if caps.is_empty() && manifest.name == manifest.replace {
            caps = snapshot;
        }
    }

    // Port availability; ports freed by the replaced container count as
    // available.
    caps.retain(|cap| {
        manifest.ports.iter().all(|port| {
            let freed = cap
                .containers
                .get(&manifest.replace)
                .map(|info| info.ports.iter().any(|p| p.host_port == port.host_port))
                .unwrap_or(false);
            freed || !cap.port_in_use(port.host_port)
        })
    });

    // Linked containers must be running locally.
    caps.retain(|cap| manifest.links.iter().all(|link| cap.is_running(&link.name)));

    // volumes_from targets must exist, running or not.
    caps.retain(|cap| {
        manifest
            .volumes_from
            .iter()
            .all(|name| cap.has_name(name))
    });

    // A shared network namespace needs its owner running.
    if let Some(name) = manifest.network_container() {
        caps.retain(|cap| cap.is_running(name));
    }

    if let Some(re) = &restrict.agent {
        caps.retain(|cap| re.is_match(&cap.agent));
    }

    caps.retain(|cap| {
        manifest
            .restrict
            .labels
            .iter()
            .all(|(key, value)| cap.labels.get(key) == Some(value))
    });

    caps.retain(|cap| {
        !restrict
            .conflicts
            .iter()
            .any(|re| cap.used_names.iter().any(|name| re.is_match(name)))
    });

    // Least-loaded survivor; ties go to the first address in sorted order.
    caps.iter()
        .min_by_key(|(_, cap)| cap.used_names.len())
        .map(|(addr, _)| addr.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::capability::{Capability, ContainerInfo};
    use crate::domain::manifest::PortSpec;

    fn manifest(json: &str) -> (Manifest, CompiledRestrict) {
        let mut m: Manifest = serde_json::from_str(json).unwrap();
        m.validate().unwrap();
        let restrict = CompiledRestrict::compile(&m.restrict).unwrap();
        (m, restrict)
    }

    fn cap(used: &[&str]) -> Capability {
        Capability {
            available: true,
            all_names: used.iter().map(|s| s.to_string()).collect(),
            used_names: used.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn set(entries: Vec<(&str, Capability)>) -> CapabilitySet {
        entries
            .into_iter()
            .map(|(addr, cap)| (addr.to_string(), cap))
            .collect()
    }

    #[test]
    fn picks_least_loaded_agent() {
        let (m, r) = manifest(r#"{"name": "api", "image": "nginx"}"#);
        let caps = set(vec![
            ("a1:7300", cap(&["x", "y"])),
            ("a2:7300", cap(&["z"])),
        ]);
        assert_eq!(find_best_agent(&m, &r, caps), Some("a2:7300".into()));
    }

    #[test]
    fn tie_breaks_by_sorted_address_order() {
        let (m, r) = manifest(r#"{"name": "api", "image": "nginx"}"#);
        let caps = set(vec![
            ("b:7300", cap(&["x"])),
            ("a:7300", cap(&["y"])),
        ]);
        assert_eq!(find_best_agent(&m, &r, caps), Some("a:7300".into()));
    }

    #[test]
    fn name_collision_excludes_agent() {
        let (m, r) = manifest(r#"{"name": "api", "image": "nginx"}"#);
        let caps = set(vec![
            ("a1:7300", cap(&["api"])),
            ("a2:7300", cap(&["db"])),
        ]);
        assert_eq!(find_best_agent(&m, &r, caps), Some("a2:7300".into()));
    }

    #[test]
    fn fresh_name_checked_against_stopped_containers_too() {
        let (m, r) = manifest(r#"{"name": "api", "image": "nginx"}"#);
        let mut stopped = cap(&[]);
        stopped.all_names = vec!["api".to_string()];
        let caps = set(vec![("a1:7300", stopped)]);
        assert_eq!(find_best_agent(&m, &r, caps), None);
    }

    #[test]
    fn replace_requires_existing_container() {
        let (m, r) = manifest(r#"{"name": "api-v2", "image": "nginx", "replace": "api"}"#);
        let caps = set(vec![
            ("a1:7300", cap(&["api"])),
            ("a2:7300", cap(&[])),
        ]);
        assert_eq!(find_best_agent(&m, &r, caps), Some("a1:7300".into()));
    }

    #[test]
    fn replace_by_same_name_with_port_carryover() {
        let (m, r) = manifest(
            r#"{"name": "api", "image": "nginx", "replace": "api",
                "ports": ["80 -> 80/tcp"]}"#,
        );
        let mut agent = cap(&["api"]);
        agent.used_ports = vec![80];
        agent.containers.insert(
            "api".to_string(),
            ContainerInfo {
                ports: vec![PortSpec {
                    exposed: "80/tcp".into(),
                    host_ip: "0.0.0.0".into(),
                    host_port: 80,
                }],
            },
        );
        let caps = set(vec![("a1:7300", agent)]);
        assert_eq!(find_best_agent(&m, &r, caps), Some("a1:7300".into()));
    }

    #[test]
    fn occupied_port_excludes_agent() {
        let (m, r) = manifest(
            r#"{"name": "api", "image": "nginx", "ports": ["80 -> 80/tcp"]}"#,
        );
        let mut busy = cap(&["web"]);
        busy.used_ports = vec![80];
        let caps = set(vec![
            ("a1:7300", busy),
            ("a2:7300", cap(&["db"])),
        ]);
        assert_eq!(find_best_agent(&m, &r, caps), Some("a2:7300".into()));
    }

    #[test]
    fn link_target_must_be_running() {
        let (m, r) = manifest(r#"{"name": "api", "image": "nginx", "links": ["db"]}"#);
        let caps = set(vec![
            ("a1:7300", cap(&["db"])),
            ("a2:7300", cap(&[])),
        ]);
        assert_eq!(find_best_agent(&m, &r, caps), Some("a1:7300".into()));
    }

    #[test]
    fn volumes_from_target_may_be_stopped() {
        let (m, r) = manifest(
            r#"{"name": "api", "image": "nginx", "volumes_from": ["data"]}"#,
        );
        let mut holder = cap(&[]);
        holder.all_names = vec!["data".to_string()];
        let caps = set(vec![
            ("a1:7300", holder),
            ("a2:7300", cap(&[])),
        ]);
        assert_eq!(find_best_agent(&m, &r, caps), Some("a1:7300".into()));
    }

    #[test]
    fn network_container_must_be_running() {
        let (m, r) = manifest(
            r#"{"name": "api", "image": "nginx", "network_mode": "container:db"}"#,
        );
        let caps = set(vec![
            ("a1:7300", cap(&["db"])),
            ("a2:7300", cap(&["web"])),
        ]);
        assert_eq!(find_best_agent(&m, &r, caps), Some("a1:7300".into()));
    }

    #[test]
    fn agent_restriction_applies() {
        let (m, r) = manifest(
            r#"{"name": "api", "image": "nginx", "restrict": {"agent": "^worker-"}}"#,
        );
        let mut worker = cap(&["a", "b"]);
        worker.agent = "worker-1".to_string();
        let mut db = cap(&[]);
        db.agent = "db-1".to_string();
        let caps = set(vec![("a1:7300", worker), ("a2:7300", db)]);
        assert_eq!(find_best_agent(&m, &r, caps), Some("a1:7300".into()));
    }

    #[test]
    fn label_restriction_is_exact_submap() {
        let (m, r) = manifest(
            r#"{"name": "api", "image": "nginx",
                "restrict": {"labels": {"env": "prd", "ssd": "yes"}}}"#,
        );
        let mut full = cap(&[]);
        full.labels.insert("env".into(), "prd".into());
        full.labels.insert("ssd".into(), "yes".into());
        let mut partial = cap(&[]);
        partial.labels.insert("env".into(), "prd".into());
        let caps = set(vec![("a1:7300", partial), ("a2:7300", full)]);
        assert_eq!(find_best_agent(&m, &r, caps), Some("a2:7300".into()));
    }

    #[test]
    fn conflict_regex_excludes_agent() {
        let (m, r) = manifest(
            r#"{"name": "api-new", "image": "nginx",
                "restrict": {"conflicts": ["^api-"]}}"#,
        );
        let caps = set(vec![
            ("a1:7300", cap(&["api-old"])),
            ("a2:7300", cap(&["db"])),
        ]);
        assert_eq!(find_best_agent(&m, &r, caps), Some("a2:7300".into()));
    }

    #[test]
    fn empty_set_yields_none() {
        let (m, r) = manifest(r#"{"name": "api", "image": "nginx"}"#);
        assert_eq!(find_best_agent(&m, &r, CapabilitySet::new()), None);
    }

    #[test]
    fn result_is_a_member_of_the_input_set() {
        let (m, r) = manifest(r#"{"name": "api", "image": "nginx"}"#);
        let caps = set(vec![
            ("a1:7300", cap(&["x"])),
            ("a2:7300", cap(&[])),
        ]);
        let chosen = find_best_agent(&m, &r, caps.clone()).unwrap();
        assert!(caps.contains(&chosen));
    }

    #[test]
    fn placement_is_idempotent_on_unchanged_capabilities() {
        let (m, r) = manifest(r#"{"name": "api", "image": "nginx"}"#);
        let caps = set(vec![
            ("a1:7300", cap(&["x", "y"])),
            ("a2:7300", cap(&["z"])),
        ]);
        let first = find_best_agent(&m, &r, caps.clone());
        let second = find_best_agent(&m, &r, caps);
        assert_eq!(first, second);
    }
}
