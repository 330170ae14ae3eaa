// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! The submit flow: probe, filter, place, resolve external links, then
//! hand the manifest to the chosen agent with a progress stream attached.

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use crate::domain::exlink::{self, RandomSampler};
use crate::domain::filter::Expr;
use crate::domain::manifest::Manifest;
use crate::domain::placement::{find_best_agent, CompiledRestrict};
use crate::infrastructure::transport::{open_stream, Client, SubmitRequest, SubmitResponse};

use super::probe::gather_capabilities;
use super::progress::ProgressPrinter;

/// Pick the best agent for the manifest and submit it there. Fails fast
/// when no agent fits or an external link cannot be resolved.
pub async fn submit_manifest(
    agents: &[String],
    manifest: Manifest,
    filter: Option<&Expr>,
) -> Result<SubmitResponse> {
    let mut caps = gather_capabilities(agents).await;
    if let Some(expr) = filter {
        caps.retain(|capability| expr.eval(capability));
    }

    let restrict = CompiledRestrict::compile(&manifest.restrict)
        .context("compiling manifest restrictions")?;
    let agent = find_best_agent(&manifest, &restrict, caps.clone())
        .ok_or_else(|| anyhow!("no available agents"))?;
    debug!(agent = %agent, container = %manifest.name, "placement decided");

    let exlinks = exlink::resolve(&manifest.exlinks, &caps, &mut RandomSampler)
        .context("resolving external links")?;

    let response = submit_to(&agent, manifest, exlinks).await?;
    Ok(response)
}

/// Submit a manifest to one agent, wiring the progress stream.
pub async fn submit_to(
    addr: &str,
    manifest: Manifest,
    exlinks: Vec<crate::domain::exlink::ExLink>,
) -> Result<SubmitResponse> {
    let mut client = Client::dial(addr).await?;
    let (stream_id, conn) = open_stream(&mut client, addr).await?;

    let printer = ProgressPrinter::new();
    printer.attach(conn, addr.to_string());

    let result = client
        .submit(SubmitRequest {
            manifest,
            exlinks,
            stream_id,
        })
        .await;
    printer.wait().await;
    Ok(result?)
}
