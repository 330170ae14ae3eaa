// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent/controller configuration file handling.
//!
//! A single JSON file shared by both modes; every key has a default so a
//! missing file is a valid (single-host) deployment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:7300";
pub const DEFAULT_DOCKER: &str = "unix:///var/run/docker.sock";
pub const DEFAULT_AGENT: &str = "localhost:7300";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid image name: {0}")]
    InvalidImage(String),
    #[error("invalid network mode: {0}")]
    InvalidNetworkMode(String),
    #[error("invalid restriction regex: {0}")]
    Regex(#[from] regex::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TCP bind address for agent mode.
    pub listen: String,
    /// Container engine endpoint URI.
    pub docker: String,
    /// Display name reported in capabilities; hostname when empty.
    pub agent_name: String,
    /// Peer agent addresses the controller fans out to.
    pub agents: Vec<String>,
    /// Free-form labels matched by restrictions and the filter DSL.
    pub labels: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            docker: DEFAULT_DOCKER.to_string(),
            agent_name: String::new(),
            agents: Vec::new(),
            labels: HashMap::new(),
        }
    }
}

impl Config {
    /// Load the configuration, filling defaults for every missing key.
    /// `path = None` yields the all-defaults configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let display = path.display().to_string();
                let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
                    path: display.clone(),
                    source,
                })?;
                serde_json::from_slice(&bytes).map_err(|source| ConfigError::Json {
                    path: display,
                    source,
                })?
            }
            None => Config::default(),
        };
        config.fill_defaults();
        Ok(config)
    }

    fn fill_defaults(&mut self) {
        if self.listen.is_empty() {
            self.listen = DEFAULT_LISTEN.to_string();
        }
        if self.docker.is_empty() {
            self.docker = DEFAULT_DOCKER.to_string();
        }
        if self.agent_name.is_empty() {
            self.agent_name = hostname::get()
                .ok()
                .and_then(|name| name.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string());
        }
        if self.agents.is_empty() {
            self.agents.push(DEFAULT_AGENT.to_string());
        }
    }
}
