// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{bail, Result};
use clap::Args;

use flotilla_core::application::{exec, probe};

use super::{finish, Context};

#[derive(Args)]
pub struct ExecCommand {
    /// Interactive mode (attach stdin)
    #[arg(short, long)]
    pub interactive: bool,

    /// Allocate a pseudo-TTY
    #[arg(short, long)]
    pub tty: bool,

    /// Container name
    #[arg(value_name = "CONTAINER")]
    pub container: String,

    /// Command and arguments
    #[arg(
        value_name = "CMD",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub cmd: Vec<String>,
}

pub async fn run(ctx: &Context, cmd: ExecCommand) -> Result<()> {
    let mut agents = ctx.agents().await?;

    // Interactive stdin can only go to one place; narrow the fleet down
    // to the agent hosting the container and refuse ambiguity.
    if cmd.interactive && agents.len() > 1 {
        let mut caps = probe::gather_capabilities(&agents).await;
        caps.retain(|capability| capability.is_running(&cmd.container));
        if caps.len() > 1 {
            bail!("unique agent required for interactive mode");
        }
        agents = caps.addresses();
        if agents.is_empty() {
            bail!("no agent runs container {}", cmd.container);
        }
    }

    finish(exec::exec(&agents, &cmd.container, cmd.cmd, cmd.interactive, cmd.tty).await)
}
