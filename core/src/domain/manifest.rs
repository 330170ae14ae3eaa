// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! The declarative container manifest submitted by the controller.
//!
//! Ports, mounts and links use compact string forms in the JSON file
//! (`"8080 -> 80/tcp"`, `"/data -> /var/lib/data"`, `"db:primary"`) and are
//! expanded to structured records at parse time. A manifest is immutable
//! after validation except for the controller-side name/replace suffixes
//! and the ex-link env merge performed on the target agent.

use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use super::config::ConfigError;

const DEFAULT_REPLACE_WAIT: u64 = 10;

fn image_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)(:[\w][\w.-]{0,127})?$").unwrap())
}

fn network_mode_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(bridge|none|host|container:[\w][\w.-]*)$").unwrap())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub name: String,
    pub image: String,
    pub image_hash: String,
    pub ports: Vec<PortSpec>,
    pub mounts: Vec<MountSpec>,
    pub volumes: Vec<String>,
    pub volumes_from: Vec<String>,
    pub links: Vec<Link>,
    pub exlinks: Vec<Link>,
    pub env: Env,
    pub cmd: Vec<String>,
    pub dns: Vec<String>,
    pub network_mode: String,
    pub restrict: Restrict,
    pub start_wait: u64,
    pub replace: String,
    pub replace_wait: u64,
}

impl Manifest {
    /// Read, parse and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let mut manifest: Manifest =
            serde_json::from_slice(&bytes).map_err(|source| ConfigError::Json {
                path: display,
                source,
            })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if !image_tag_re().is_match(&self.image) {
            return Err(ConfigError::InvalidImage(self.image.clone()));
        }
        if !self.network_mode.is_empty() && !network_mode_re().is_match(&self.network_mode) {
            return Err(ConfigError::InvalidNetworkMode(self.network_mode.clone()));
        }
        if self.replace_wait == 0 {
            self.replace_wait = DEFAULT_REPLACE_WAIT;
        }
        self.restrict.validate()
    }

    /// Exposed port set in the engine's `"port/proto"` key form.
    pub fn exposed_ports(&self) -> Vec<String> {
        self.ports.iter().map(|p| p.exposed.clone()).collect()
    }

    pub fn merge_env(&mut self, env: BTreeMap<String, String>) {
        for (key, value) in env {
            self.env.0.insert(key, value);
        }
    }

    /// The target container name when `network_mode` is `container:<name>`.
    pub fn network_container(&self) -> Option<&str> {
        self.network_mode.strip_prefix("container:")
    }
}

/// A published port: `"[host_ip:]host_port -> exposed/proto"` or a bare
/// `"exposed/proto"` when the engine should pick the host port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSpec {
    pub exposed: String,
    pub host_ip: String,
    pub host_port: i64,
}

impl PortSpec {
    fn parse(s: &str) -> Result<Self, String> {
        let mut spec = PortSpec::default();
        match s.split_once("->") {
            None => spec.exposed = s.trim().to_string(),
            Some((host, exposed)) => {
                spec.exposed = exposed.trim().to_string();
                let host = host.trim();
                let (ip, port) = match host.rsplit_once(':') {
                    Some((ip, port)) => (ip, port),
                    None => ("", host),
                };
                spec.host_ip = ip.to_string();
                spec.host_port = port
                    .parse()
                    .map_err(|_| format!("invalid host port: {host}"))?;
            }
        }
        Ok(spec)
    }
}

impl std::fmt::Display for PortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host_port == 0 {
            return write!(f, "{}", self.exposed);
        }
        if self.host_ip.is_empty() {
            write!(f, "{} -> {}", self.host_port, self.exposed)
        } else {
            write!(f, "{}:{} -> {}", self.host_ip, self.host_port, self.exposed)
        }
    }
}

impl Serialize for PortSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PortSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PortSpec::parse(&s).map_err(D::Error::custom)
    }
}

/// A bind mount: `"path -> target"`, or `"path"` for the same path on both
/// sides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountSpec {
    pub path: String,
    pub target: String,
}

impl std::fmt::Display for MountSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.path, self.target)
    }
}

impl Serialize for MountSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.path == self.target {
            serializer.serialize_str(&self.path)
        } else {
            serializer.collect_str(&format_args!("{} -> {}", self.path, self.target))
        }
    }
}

impl<'de> Deserialize<'de> for MountSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let (path, target) = match s.split_once("->") {
            Some((path, target)) => (path.trim().to_string(), target.trim().to_string()),
            None => (s.trim().to_string(), s.trim().to_string()),
        };
        Ok(MountSpec { path, target })
    }
}

/// A container link: `"name:alias"`, alias defaulting to the name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub alias: String,
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.alias)
    }
}

impl Serialize for Link {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Link {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let (name, alias) = match s.split_once(':') {
            Some((name, alias)) => (name.to_string(), alias.to_string()),
            None => (s.clone(), s),
        };
        Ok(Link { name, alias })
    }
}

/// Environment variables; ordered so `pairs()` output is stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Env(pub BTreeMap<String, String>);

impl Env {
    pub fn pairs(&self) -> Vec<String> {
        self.0.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// Placement restrictions carried by a manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Restrict {
    pub agent: String,
    pub labels: BTreeMap<String, String>,
    pub conflicts: Vec<String>,
}

impl Restrict {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.agent.is_empty() {
            Regex::new(&self.agent)?;
        }
        for conflict in &self.conflicts {
            Regex::new(conflict)?;
        }
        Ok(())
    }
}

/// Split an image reference into repository and tag, defaulting to `latest`.
pub fn split_image_tag(image: &str) -> (String, String) {
    if let Some(captures) = image_tag_re().captures(image) {
        if let Some(tag) = captures.get(2) {
            return (
                captures[1].to_string(),
                tag.as_str()[1..].to_string(),
            );
        }
        return (captures[1].to_string(), "latest".to_string());
    }
    (image.to_string(), "latest".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Manifest {
        let mut m: Manifest = serde_json::from_str(json).unwrap();
        m.validate().unwrap();
        m
    }

    #[test]
    fn port_spec_forms() {
        let m = parse(
            r#"{"name": "api", "image": "nginx",
                "ports": ["80/tcp", "8080 -> 80/tcp", "127.0.0.1:8443 -> 443/tcp"]}"#,
        );
        assert_eq!(m.ports[0], PortSpec { exposed: "80/tcp".into(), host_ip: "".into(), host_port: 0 });
        assert_eq!(m.ports[1], PortSpec { exposed: "80/tcp".into(), host_ip: "".into(), host_port: 8080 });
        assert_eq!(m.ports[2], PortSpec { exposed: "443/tcp".into(), host_ip: "127.0.0.1".into(), host_port: 8443 });
    }

    #[test]
    fn port_spec_round_trip() {
        let spec = PortSpec { exposed: "80/tcp".into(), host_ip: "".into(), host_port: 8080 };
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, "\"8080 -> 80/tcp\"");
        assert_eq!(serde_json::from_str::<PortSpec>(&json).unwrap(), spec);
    }

    #[test]
    fn mount_and_link_forms() {
        let m = parse(
            r#"{"name": "api", "image": "nginx",
                "mounts": ["/data", "/host/logs -> /var/log"],
                "links": ["db", "cache:redis"]}"#,
        );
        assert_eq!(m.mounts[0].to_string(), "/data:/data");
        assert_eq!(m.mounts[1].to_string(), "/host/logs:/var/log");
        assert_eq!(m.links[0], Link { name: "db".into(), alias: "db".into() });
        assert_eq!(m.links[1], Link { name: "cache".into(), alias: "redis".into() });
    }

    #[test]
    fn replace_wait_defaults() {
        let m = parse(r#"{"name": "api", "image": "nginx"}"#);
        assert_eq!(m.replace_wait, 10);
    }

    #[test]
    fn invalid_network_mode_rejected() {
        let mut m: Manifest =
            serde_json::from_str(r#"{"name": "a", "image": "nginx", "network_mode": "weird"}"#)
                .unwrap();
        assert!(matches!(m.validate(), Err(ConfigError::InvalidNetworkMode(_))));
    }

    #[test]
    fn bad_restriction_regex_rejected() {
        let mut m: Manifest = serde_json::from_str(
            r#"{"name": "a", "image": "nginx", "restrict": {"conflicts": ["^api["]}}"#,
        )
        .unwrap();
        assert!(matches!(m.validate(), Err(ConfigError::Regex(_))));
    }

    #[test]
    fn network_container_target() {
        let m = parse(r#"{"name": "a", "image": "nginx", "network_mode": "container:db"}"#);
        assert_eq!(m.network_container(), Some("db"));
        let m = parse(r#"{"name": "a", "image": "nginx", "network_mode": "host"}"#);
        assert_eq!(m.network_container(), None);
    }

    #[test]
    fn merge_env_overrides() {
        let mut m = parse(r#"{"name": "a", "image": "nginx", "env": {"A": "1", "B": "2"}}"#);
        m.merge_env(BTreeMap::from([
            ("B".to_string(), "3".to_string()),
            ("C".to_string(), "4".to_string()),
        ]));
        assert_eq!(m.env.pairs(), vec!["A=1", "B=3", "C=4"]);
    }

    #[test]
    fn image_tag_splitting() {
        assert_eq!(split_image_tag("nginx"), ("nginx".into(), "latest".into()));
        assert_eq!(split_image_tag("nginx:1.25"), ("nginx".into(), "1.25".into()));
        assert_eq!(
            split_image_tag("registry:5000/app:v2"),
            ("registry:5000/app".into(), "v2".into())
        );
    }
}
