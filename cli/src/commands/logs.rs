// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use clap::Args;

use flotilla_core::application::logs;

use super::{finish, Context};

#[derive(Args)]
pub struct LogsCommand {
    /// Keep following the logs
    #[arg(short, long)]
    pub follow: bool,

    /// Number of recent lines to show
    #[arg(long, default_value = "all", value_name = "N")]
    pub tail: String,

    /// Container name
    #[arg(value_name = "CONTAINER")]
    pub container: String,
}

pub async fn run(ctx: &Context, cmd: LogsCommand) -> Result<()> {
    let agents = ctx.agents().await?;
    finish(logs::logs(&agents, &cmd.container, cmd.follow, &cmd.tail).await)
}
