// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use clap::Args;

use flotilla_core::application::containers;
use flotilla_core::infrastructure::engine::canonical_name;
use flotilla_core::infrastructure::netinfo::short_hostname;

use super::{finish, Context};
use crate::output::{format_ports, humanize_age, Table};

const COMMAND_WIDTH: usize = 20;

#[derive(Args)]
pub struct PsCommand {
    /// Show all containers
    #[arg(short, long)]
    pub all: bool,

    /// Show the full command
    #[arg(long)]
    pub full: bool,

    /// Only show the named containers
    #[arg(value_name = "CONTAINER")]
    pub containers: Vec<String>,
}

pub async fn run(ctx: &Context, cmd: PsCommand) -> Result<()> {
    let agents = ctx.agents().await?;
    let (results, errors) = containers::list(&agents, cmd.all).await;

    for (agent, response) in &results {
        println!("[{}]", short_hostname(agent, false));
        let matching: Vec<_> = response
            .containers
            .iter()
            .filter(|container| {
                let name = canonical_name(container.names.as_deref().unwrap_or(&[]));
                cmd.containers.is_empty()
                    || name.map(|n| cmd.containers.contains(&n)).unwrap_or(false)
            })
            .collect();
        if matching.is_empty() {
            println!();
            continue;
        }

        let mut table = Table::new();
        table.append(&[
            "CONTAINER ID",
            "NAME",
            "IMAGE",
            "COMMAND",
            "CREATED",
            "STATUS",
            "PORTS",
        ]);
        for container in matching {
            let id = container.id.as_deref().unwrap_or("");
            let mut command = container.command.clone().unwrap_or_default();
            if !cmd.full && command.len() > COMMAND_WIDTH {
                command.truncate(COMMAND_WIDTH);
            }
            table.append(&[
                &id[..id.len().min(12)],
                &canonical_name(container.names.as_deref().unwrap_or(&[])).unwrap_or_default(),
                container.image.as_deref().unwrap_or(""),
                &command,
                &humanize_age(container.created.unwrap_or(0)),
                container.status.as_deref().unwrap_or(""),
                &format_ports(container.ports.as_deref().unwrap_or(&[])),
            ]);
        }
        table.write("  ");
        println!();
    }

    finish(errors)
}
