// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! The agent service: a single TCP listener serving the RPC channel and
//! the auxiliary stream channel, in front of the local container engine.
//!
//! All per-process state lives in `AgentContext`, constructed once in
//! `serve` and shared by the connection handlers. Mutating operations are
//! serialized by a capacity-1 admission semaphore so that capability
//! snapshots are consistent with the in-flight submit.

use anyhow::{Context, Result};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::domain::capability::Capability;
use crate::domain::config::Config;
use crate::domain::manifest::split_image_tag;
use crate::infrastructure::engine::Engine;
use crate::infrastructure::mux::{Mux, CHAN_NEW_STREAM, CHAN_RPC};
use crate::infrastructure::netinfo;
use crate::infrastructure::stream::StreamRegistry;
use crate::infrastructure::transport::{
    read_frame, write_frame, AllocResponse, ExecRequest, ListContainersResponse,
    ListImagesResponse, LoadImageRequest, LogsRequest, Reply, Request, SubmitRequest,
    SubmitResponse,
};

use super::images;

pub struct AgentContext {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub ip_addrs: Vec<String>,
    pub engine: Engine,
    admission: Semaphore,
    streams: Arc<StreamRegistry>,
}

/// Run the agent until the process is stopped.
pub async fn serve(config: &Config) -> Result<()> {
    let engine = Engine::connect(&config.docker)
        .with_context(|| format!("connecting to engine at {}", config.docker))?;
    engine
        .ping()
        .await
        .context("engine did not answer the initial ping")?;

    let ip_addrs = netinfo::list_ip_addrs().context("enumerating host addresses")?;
    let ctx = Arc::new(AgentContext {
        name: config.agent_name.clone(),
        labels: config.labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        ip_addrs,
        engine,
        admission: Semaphore::new(1),
        streams: StreamRegistry::new(),
    });

    let mut mux = Mux::new();
    let rpc_ctx = ctx.clone();
    mux.handle(
        CHAN_RPC,
        Arc::new(move |conn: TcpStream| {
            let ctx = rpc_ctx.clone();
            async move { rpc_loop(ctx, conn).await }
        }),
    );
    let stream_ctx = ctx.clone();
    mux.handle(
        CHAN_NEW_STREAM,
        Arc::new(move |mut conn: TcpStream| {
            let ctx = stream_ctx.clone();
            async move {
                match conn.read_u32().await {
                    Ok(id) => {
                        if let Err(err) = ctx.streams.put(id, conn) {
                            warn!(error = %err, "rejecting stream connection");
                        }
                    }
                    Err(err) => warn!(error = %err, "reading stream id"),
                }
            }
        }),
    );
    let mux = Arc::new(mux);

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!(listen = %config.listen, agent = %ctx.name, "agent listening");

    loop {
        let (conn, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!(error = %err, "accept failed");
                continue;
            }
        };
        debug!(peer = %peer, "connection accepted");
        let mux = mux.clone();
        tokio::spawn(async move {
            if let Err(err) = mux.dispatch(conn).await {
                warn!(error = %err, "dispatch failed");
            }
        });
    }
}

/// One RPC connection: sequential framed call/reply exchanges until EOF.
async fn rpc_loop(ctx: Arc<AgentContext>, mut conn: TcpStream) {
    loop {
        let request = match read_frame::<_, Request>(&mut conn).await {
            Ok(request) => request,
            Err(_) => return,
        };
        let reply = match handle(&ctx, request).await {
            Ok(value) => Reply::Ok(value),
            Err(err) => {
                warn!(error = %err, "rpc call failed");
                Reply::Err(format!("{err:#}"))
            }
        };
        if write_frame(&mut conn, &reply).await.is_err() {
            return;
        }
    }
}

async fn handle(ctx: &Arc<AgentContext>, request: Request) -> Result<serde_json::Value> {
    use serde_json::to_value;
    match request {
        Request::Capability => Ok(to_value(ctx.capability().await?)?),
        Request::Submit(req) => Ok(to_value(ctx.submit(req).await?)?),
        Request::ListContainers(req) => Ok(to_value(ListContainersResponse {
            containers: ctx.engine.list_containers(req.all).await?,
        })?),
        Request::StartContainer(name) => {
            ctx.engine.start_container(&name).await?;
            Ok(serde_json::Value::Null)
        }
        Request::StopContainer(req) => {
            ctx.engine.stop_container(&req.id, req.timeout).await?;
            Ok(serde_json::Value::Null)
        }
        Request::RestartContainer(req) => {
            ctx.engine.restart(&req.id, req.timeout).await?;
            Ok(serde_json::Value::Null)
        }
        Request::RemoveContainer(req) => {
            ctx.engine.remove_container(&req.id, req.force).await?;
            Ok(serde_json::Value::Null)
        }
        Request::PullImage(req) => {
            let mut progress = ctx.streams.get(req.stream_id).await?;
            let (image, tag) = split_image_tag(&req.image);
            let result = ctx.engine.pull_image(&image, &tag, &mut progress).await;
            let _ = progress.shutdown().await;
            result?;
            Ok(serde_json::Value::Null)
        }
        Request::ListImages => Ok(to_value(ListImagesResponse {
            images: ctx.engine.list_images().await?,
        })?),
        Request::LoadImage(req) => {
            ctx.load_image(req).await?;
            Ok(serde_json::Value::Null)
        }
        Request::RemoveImage(image) => {
            ctx.engine.remove_image(&image).await?;
            Ok(serde_json::Value::Null)
        }
        Request::Logs(req) => {
            ctx.logs(req).await?;
            Ok(serde_json::Value::Null)
        }
        Request::Exec(req) => {
            ctx.exec(req).await?;
            Ok(serde_json::Value::Null)
        }
        Request::AllocStream => Ok(to_value(AllocResponse {
            id: ctx.streams.alloc(),
        })?),
    }
}

impl AgentContext {
    /// Snapshot the local usage. When the admission slot is held by a
    /// running submit, report unavailable instead of waiting.
    async fn capability(&self) -> Result<Capability> {
        let Ok(_permit) = self.admission.try_acquire() else {
            return Ok(Capability::default());
        };
        let usage = self.engine.usage().await?;
        Ok(Capability {
            available: true,
            agent: self.name.clone(),
            labels: self.labels.clone(),
            ip_addrs: self.ip_addrs.clone(),
            all_names: usage.all_names,
            used_names: usage.used_names,
            used_ports: usage.used_ports,
            containers: usage.containers,
        })
    }

    /// Run a manifest under the admission slot, streaming progress back to
    /// the controller.
    async fn submit(&self, req: SubmitRequest) -> Result<SubmitResponse> {
        let _permit = self.admission.acquire().await?;
        let mut progress = self.streams.get(req.stream_id).await?;

        let mut manifest = req.manifest;
        for exlink in &req.exlinks {
            manifest.merge_env(exlink.env()?);
        }

        let result = self.engine.run(&manifest, &mut progress).await;
        let _ = progress.shutdown().await;
        result?;
        info!(container = %manifest.name, "container running");
        Ok(SubmitResponse {
            agent: self.name.clone(),
        })
    }

    /// Load an image from the stream; with remaining pipeline hops, tee
    /// the raw bytes onward while loading locally.
    async fn load_image(&self, req: LoadImageRequest) -> Result<()> {
        let conn = self.streams.get(req.stream_id).await?;
        if req.rest.is_empty() {
            let reader = images::maybe_decompress(BufReader::new(conn), req.compress);
            self.engine.load_image(reader).await?;
        } else {
            images::tee_load(self.engine.clone(), conn, req.compress, req.rest).await?;
        }
        info!("image loaded");
        Ok(())
    }

    /// Stream container logs to the attached connections. The copy ends
    /// when the log stream does, or as soon as the peer closes a stream
    /// (the follow-mode unwind path).
    async fn logs(&self, req: LogsRequest) -> Result<()> {
        let mut out = self.streams.get(req.out_stream_id).await?;
        let mut err_conn = self.streams.get(req.err_stream_id).await?;
        let mut stream = self.engine.logs(&req.container, req.follow, &req.tail);
        while let Some(item) = stream.next().await {
            use bollard::container::LogOutput;
            let written = match item? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    out.write_all(&message).await
                }
                LogOutput::StdErr { message } => err_conn.write_all(&message).await,
                LogOutput::StdIn { .. } => Ok(()),
            };
            if written.is_err() {
                debug!(container = %req.container, "log peer went away");
                break;
            }
        }
        Ok(())
    }

    /// Execute a command in a container with stdio over the attached
    /// streams.
    async fn exec(&self, req: ExecRequest) -> Result<()> {
        let mut out = self.streams.get(req.out_stream_id).await?;
        let mut err_conn = match req.err_stream_id {
            Some(id) => Some(self.streams.get(id).await?),
            None => None,
        };
        let in_conn = match req.in_stream_id {
            Some(id) => Some(self.streams.get(id).await?),
            None => None,
        };

        let exec_id = self
            .engine
            .create_exec(&req.container, req.cmd, req.interactive, req.tty)
            .await?;
        let started = self.engine.start_exec(&exec_id).await?;
        if req.tty && req.tty_w > 0 && req.tty_h > 0 {
            let _ = self.engine.resize_exec(&exec_id, req.tty_w, req.tty_h).await;
        }

        if let bollard::exec::StartExecResults::Attached { mut output, mut input } = started {
            let stdin_task = in_conn.map(|mut conn| {
                tokio::spawn(async move {
                    let _ = tokio::io::copy(&mut conn, &mut input).await;
                })
            });
            while let Some(item) = output.next().await {
                use bollard::container::LogOutput;
                let written = match item? {
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        out.write_all(&message).await
                    }
                    LogOutput::StdErr { message } => match err_conn.as_mut() {
                        Some(conn) => conn.write_all(&message).await,
                        None => out.write_all(&message).await,
                    },
                    LogOutput::StdIn { .. } => Ok(()),
                };
                if written.is_err() {
                    break;
                }
            }
            if let Some(task) = stdin_task {
                task.abort();
            }
        }
        Ok(())
    }
}
