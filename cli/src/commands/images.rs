// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use clap::Args;

use flotilla_core::application::images;
use flotilla_core::domain::manifest::split_image_tag;
use flotilla_core::infrastructure::netinfo::short_hostname;

use super::{finish, Context};
use crate::output::{format_bytes, humanize_age, Table};

#[derive(Args)]
pub struct PullCommand {
    /// Image reference, e.g. nginx:1.25
    #[arg(value_name = "IMAGE")]
    pub image: String,
}

#[derive(Args)]
pub struct RmiCommand {
    /// Image reference
    #[arg(value_name = "IMAGE")]
    pub image: String,
}

#[derive(Args)]
pub struct ImagesCommand {}

pub async fn pull(ctx: &Context, cmd: PullCommand) -> Result<()> {
    let agents = ctx.agents().await?;
    finish(images::pull(&agents, &cmd.image).await)
}

pub async fn rmi(ctx: &Context, cmd: RmiCommand) -> Result<()> {
    let agents = ctx.agents().await?;
    finish(images::remove(&agents, &cmd.image).await)
}

pub async fn list(ctx: &Context, _cmd: ImagesCommand) -> Result<()> {
    let agents = ctx.agents().await?;
    let (results, errors) = images::list(&agents).await;

    for (agent, response) in &results {
        println!("[{}]", short_hostname(agent, false));
        if response.images.is_empty() {
            println!();
            continue;
        }
        let mut table = Table::new();
        table.append(&["REPOSITORY", "TAG", "IMAGE ID", "CREATED", "SIZE"]);
        for image in &response.images {
            let (repo, tag) = match image.repo_tags.first().map(String::as_str) {
                None | Some("<none>:<none>") => ("<none>".to_string(), "<none>".to_string()),
                Some(reference) => split_image_tag(reference),
            };
            let id = image.id.strip_prefix("sha256:").unwrap_or(&image.id);
            table.append(&[
                &repo,
                &tag,
                &id[..id.len().min(12)],
                &humanize_age(image.created),
                &format_bytes(image.size.max(0) as u64),
            ]);
        }
        table.write("  ");
        println!();
    }

    finish(errors)
}
