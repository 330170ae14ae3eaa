// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

use flotilla_core::application::submit::submit_manifest;
use flotilla_core::domain::filter;
use flotilla_core::domain::manifest::Manifest;

use super::Context;

#[derive(Args)]
pub struct SubmitCommand {
    /// Manifest file describing the container
    #[arg(value_name = "MANIFEST")]
    pub manifest: PathBuf,

    /// Append a suffix to the container name
    #[arg(long, value_name = "S")]
    pub name_suffix: Option<String>,

    /// Append a suffix to the replace target
    #[arg(long, value_name = "S")]
    pub replace_suffix: Option<String>,
}

pub async fn run(ctx: &Context, cmd: SubmitCommand) -> Result<()> {
    let mut manifest = Manifest::load(&cmd.manifest).context("could not parse manifest")?;
    if let Some(suffix) = &cmd.name_suffix {
        manifest.name.push_str(suffix);
    }
    if let Some(suffix) = &cmd.replace_suffix {
        if !manifest.replace.is_empty() {
            manifest.replace.push_str(suffix);
        }
    }

    let expr = match ctx.filter.as_deref() {
        Some(raw) => Some(filter::parse(raw)?),
        None => None,
    };

    let name = manifest.name.clone();
    let response = submit_manifest(ctx.configured_agents(), manifest, expr.as_ref()).await?;
    info!(container = %name, agent = %response.agent, "container running");
    Ok(())
}
