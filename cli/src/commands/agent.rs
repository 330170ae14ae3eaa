// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use flotilla_core::application::agent;

use super::Context;

pub async fn run(ctx: &Context) -> Result<()> {
    agent::serve(&ctx.config).await
}
