// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent;
pub mod containers;
pub mod exec;
pub mod images;
pub mod load;
pub mod logs;
pub mod ps;
pub mod submit;

pub use containers::{NameCommand, RmCommand, StopCommand};
pub use exec::ExecCommand;
pub use images::{ImagesCommand, PullCommand, RmiCommand};
pub use load::LoadCommand;
pub use logs::LogsCommand;
pub use ps::PsCommand;
pub use submit::SubmitCommand;

use anyhow::{bail, Result};
use colored::Colorize;
use flotilla_core::application::probe;
use flotilla_core::domain::config::Config;
use flotilla_core::infrastructure::transport::AggregateError;

/// Everything a subcommand needs from the global flags.
pub struct Context {
    pub config: Config,
    pub agents_override: Vec<String>,
    pub filter: Option<String>,
}

impl Context {
    /// The configured fleet, before filtering.
    pub fn configured_agents(&self) -> &[String] {
        if self.agents_override.is_empty() {
            &self.config.agents
        } else {
            &self.agents_override
        }
    }

    /// The addresses an operation fans out to, honoring `--filter`.
    pub async fn agents(&self) -> Result<Vec<String>> {
        let agents = probe::resolve_agents(self.configured_agents(), self.filter.as_deref()).await?;
        if agents.is_empty() {
            bail!("no agents match");
        }
        Ok(agents)
    }
}

/// Print a fan-out's per-agent failures and turn them into a non-zero
/// exit.
pub fn finish(errors: Option<AggregateError>) -> Result<()> {
    match errors {
        None => Ok(()),
        Some(errors) => {
            errors.each(|addr, err| {
                eprintln!("{} {}", format!("[{addr}]").red(), err);
            });
            bail!("{} agent(s) failed", errors.len());
        }
    }
}
