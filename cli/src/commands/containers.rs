// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use clap::Args;

use flotilla_core::application::containers;

use super::{finish, Context};

#[derive(Args)]
pub struct NameCommand {
    /// Container name
    #[arg(value_name = "CONTAINER")]
    pub container: String,
}

#[derive(Args)]
pub struct StopCommand {
    /// Wait for the container to stop, in seconds
    #[arg(short = 't', long = "time", default_value = "10", value_name = "SECS")]
    pub timeout: u64,

    /// Container name
    #[arg(value_name = "CONTAINER")]
    pub container: String,
}

#[derive(Args)]
pub struct RmCommand {
    /// Force remove a running container
    #[arg(short, long)]
    pub force: bool,

    /// Container name
    #[arg(value_name = "CONTAINER")]
    pub container: String,
}

pub async fn start(ctx: &Context, cmd: NameCommand) -> Result<()> {
    let agents = ctx.agents().await?;
    finish(containers::start(&agents, &cmd.container).await)
}

pub async fn stop(ctx: &Context, cmd: StopCommand) -> Result<()> {
    let agents = ctx.agents().await?;
    finish(containers::stop(&agents, &cmd.container, cmd.timeout).await)
}

pub async fn restart(ctx: &Context, cmd: StopCommand) -> Result<()> {
    let agents = ctx.agents().await?;
    finish(containers::restart(&agents, &cmd.container, cmd.timeout).await)
}

pub async fn rm(ctx: &Context, cmd: RmCommand) -> Result<()> {
    let agents = ctx.agents().await?;
    finish(containers::remove(&agents, &cmd.container, cmd.force).await)
}
