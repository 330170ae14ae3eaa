// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;

use flotilla_core::application::images;

use super::{finish, Context};
use crate::output::parse_bytes;

#[derive(Args)]
pub struct LoadCommand {
    /// Input file; `-` reads the tarball from stdin
    #[arg(short, long, default_value = "-", value_name = "FILE")]
    pub input: PathBuf,

    /// Send the image through an agent-to-agent pipeline instead of
    /// broadcasting from here
    #[arg(long)]
    pub pipeline: bool,

    /// Compress the transfer with LZ4
    #[arg(long)]
    pub compress: bool,

    /// Limit bandwidth, e.g. 10MB or 1GiB
    #[arg(long, value_parser = parse_bytes, value_name = "BYTES")]
    pub bwlimit: Option<u64>,
}

pub async fn run(ctx: &Context, cmd: LoadCommand) -> Result<()> {
    let agents = ctx.agents().await?;
    let bwlimit = cmd.bwlimit.unwrap_or(0);

    if cmd.input.to_str() == Some("-") {
        let reader = tokio::io::stdin();
        dispatch(&agents, reader, cmd.pipeline, cmd.compress, bwlimit).await
    } else {
        let file = tokio::fs::File::open(&cmd.input)
            .await
            .with_context(|| format!("opening {}", cmd.input.display()))?;
        dispatch(&agents, file, cmd.pipeline, cmd.compress, bwlimit).await
    }
}

async fn dispatch<R>(
    agents: &[String],
    reader: R,
    pipeline: bool,
    compress: bool,
    bwlimit: u64,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Send + Unpin + 'static,
{
    if pipeline {
        images::load_pipeline(agents, reader, compress, false, bwlimit).await
    } else {
        finish(images::load(agents, reader, compress, bwlimit).await?)
    }
}
