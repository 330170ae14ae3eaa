// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Synchronous RPC over the mux's RPC channel.
//!
//! Frames are a 4-byte big-endian length followed by JSON. Requests are a
//! single enum, one variant per method, tagged with the stable wire
//! names, so dispatch is exhaustive at build time. A connection carries
//! any number of sequential call/reply exchanges.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::warn;

use crate::domain::capability::Capability;
use crate::domain::exlink::ExLink;
use crate::domain::manifest::Manifest;

use super::mux::{self, CHAN_NEW_STREAM, CHAN_RPC};
use super::stream::StreamError;

/// Upper bound for a single RPC frame; streams carry the bulk data.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("dialing {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("decoding frame: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("frame too large: {0} bytes")]
    Oversize(usize),
    #[error("{0}")]
    Remote(String),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Every RPC method. The serde tag is the stable identifier on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Request {
    #[serde(rename = "Craft.Capability")]
    Capability,
    #[serde(rename = "Craft.Submit")]
    Submit(SubmitRequest),
    #[serde(rename = "Docker.ListContainers")]
    ListContainers(ListContainersRequest),
    #[serde(rename = "Docker.StartContainer")]
    StartContainer(String),
    #[serde(rename = "Docker.StopContainer")]
    StopContainer(StopContainerRequest),
    #[serde(rename = "Docker.RestartContainer")]
    RestartContainer(RestartContainerRequest),
    #[serde(rename = "Docker.RemoveContainer")]
    RemoveContainer(RemoveContainerRequest),
    #[serde(rename = "Docker.PullImage")]
    PullImage(PullImageRequest),
    #[serde(rename = "Docker.ListImages")]
    ListImages,
    #[serde(rename = "Docker.LoadImage")]
    LoadImage(LoadImageRequest),
    #[serde(rename = "Docker.RemoveImage")]
    RemoveImage(String),
    #[serde(rename = "Docker.Logs")]
    Logs(LogsRequest),
    #[serde(rename = "Docker.Exec")]
    Exec(ExecRequest),
    #[serde(rename = "StreamConn.Alloc")]
    AllocStream,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub manifest: Manifest,
    pub exlinks: Vec<ExLink>,
    pub stream_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListContainersRequest {
    pub all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListContainersResponse {
    pub containers: Vec<bollard::models::ContainerSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListImagesResponse {
    pub images: Vec<bollard::models::ImageSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopContainerRequest {
    pub id: String,
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartContainerRequest {
    pub id: String,
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveContainerRequest {
    pub id: String,
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullImageRequest {
    pub image: String,
    pub stream_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadImageRequest {
    pub stream_id: u32,
    pub compress: bool,
    /// Remaining hops of a pipelined load; empty for broadcast mode.
    #[serde(default)]
    pub rest: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsRequest {
    pub container: String,
    pub follow: bool,
    pub tail: String,
    pub out_stream_id: u32,
    pub err_stream_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    pub container: String,
    pub cmd: Vec<String>,
    pub interactive: bool,
    pub tty: bool,
    pub tty_w: u16,
    pub tty_h: u16,
    pub in_stream_id: Option<u32>,
    pub out_stream_id: u32,
    pub err_stream_id: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocResponse {
    pub id: u32,
}

/// A call outcome: `{"ok": value}` or `{"err": message}` on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub enum Reply {
    #[serde(rename = "ok")]
    Ok(serde_json::Value),
    #[serde(rename = "err")]
    Err(String),
}

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(value)?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(TransportError::Oversize(bytes.len()));
    }
    writer.write_u32(bytes.len() as u32).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::Oversize(len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}

/// A typed RPC client over one muxed connection.
pub struct Client {
    conn: TcpStream,
    addr: String,
}

impl Client {
    pub async fn dial(addr: &str) -> Result<Self, TransportError> {
        let conn = mux::dial(addr, CHAN_RPC)
            .await
            .map_err(|source| TransportError::Dial {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            conn,
            addr: addr.to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call<T: DeserializeOwned>(&mut self, request: &Request) -> Result<T, TransportError> {
        write_frame(&mut self.conn, request).await?;
        match read_frame::<_, Reply>(&mut self.conn).await? {
            Reply::Ok(value) => Ok(serde_json::from_value(value)?),
            Reply::Err(message) => Err(TransportError::Remote(message)),
        }
    }

    pub async fn capability(&mut self) -> Result<Capability, TransportError> {
        self.call(&Request::Capability).await
    }

    pub async fn submit(&mut self, req: SubmitRequest) -> Result<SubmitResponse, TransportError> {
        self.call(&Request::Submit(req)).await
    }

    pub async fn list_containers(
        &mut self,
        all: bool,
    ) -> Result<ListContainersResponse, TransportError> {
        self.call(&Request::ListContainers(ListContainersRequest { all }))
            .await
    }

    pub async fn start_container(&mut self, container: &str) -> Result<(), TransportError> {
        self.call(&Request::StartContainer(container.to_string()))
            .await
    }

    pub async fn stop_container(
        &mut self,
        container: &str,
        timeout: u64,
    ) -> Result<(), TransportError> {
        self.call(&Request::StopContainer(StopContainerRequest {
            id: container.to_string(),
            timeout,
        }))
        .await
    }

    pub async fn restart_container(
        &mut self,
        container: &str,
        timeout: u64,
    ) -> Result<(), TransportError> {
        self.call(&Request::RestartContainer(RestartContainerRequest {
            id: container.to_string(),
            timeout,
        }))
        .await
    }

    pub async fn remove_container(
        &mut self,
        container: &str,
        force: bool,
    ) -> Result<(), TransportError> {
        self.call(&Request::RemoveContainer(RemoveContainerRequest {
            id: container.to_string(),
            force,
        }))
        .await
    }

    pub async fn pull_image(&mut self, req: PullImageRequest) -> Result<(), TransportError> {
        self.call(&Request::PullImage(req)).await
    }

    pub async fn list_images(&mut self) -> Result<ListImagesResponse, TransportError> {
        self.call(&Request::ListImages).await
    }

    pub async fn load_image(&mut self, req: LoadImageRequest) -> Result<(), TransportError> {
        self.call(&Request::LoadImage(req)).await
    }

    pub async fn remove_image(&mut self, image: &str) -> Result<(), TransportError> {
        self.call(&Request::RemoveImage(image.to_string())).await
    }

    pub async fn logs(&mut self, req: LogsRequest) -> Result<(), TransportError> {
        self.call(&Request::Logs(req)).await
    }

    pub async fn exec(&mut self, req: ExecRequest) -> Result<(), TransportError> {
        self.call(&Request::Exec(req)).await
    }

    pub async fn alloc_stream(&mut self) -> Result<u32, TransportError> {
        let resp: AllocResponse = self.call(&Request::AllocStream).await?;
        Ok(resp.id)
    }
}

/// Allocate a stream id on the remote agent and open the matching
/// NEW_STREAM connection, announcing the id.
pub async fn open_stream(
    client: &mut Client,
    addr: &str,
) -> Result<(u32, TcpStream), TransportError> {
    let id = client.alloc_stream().await?;
    let mut conn = mux::dial(addr, CHAN_NEW_STREAM)
        .await
        .map_err(|source| TransportError::Dial {
            addr: addr.to_string(),
            source,
        })?;
    conn.write_u32(id).await?;
    Ok((id, conn))
}

/// Per-address failures of a fan-out call.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<(String, TransportError)>,
}

impl AggregateError {
    pub fn new(mut errors: Vec<(String, TransportError)>) -> Self {
        errors.sort_by(|a, b| a.0.cmp(&b.0));
        Self { errors }
    }

    pub fn each(&self, mut f: impl FnMut(&str, &TransportError)) {
        for (addr, err) in &self.errors {
            f(addr, err);
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} agent(s) failed", self.errors.len())?;
        for (addr, err) in &self.errors {
            write!(f, "\n  {addr}: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Call one operation on every address in parallel.
///
/// Connect failures are logged and excluded; per-call failures accumulate
/// into the aggregate; successes populate the result map either way. The
/// call returns only after every per-address task has finished.
pub async fn call_all<T, F, Fut>(
    addrs: &[String],
    f: F,
) -> (BTreeMap<String, T>, Option<AggregateError>)
where
    T: Send + 'static,
    F: Fn(Client, String) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T, TransportError>> + Send + 'static,
{
    let mut join = JoinSet::new();
    for addr in addrs {
        let addr = addr.clone();
        let f = f.clone();
        join.spawn(async move {
            let client = match Client::dial(&addr).await {
                Ok(client) => client,
                Err(err) => {
                    warn!(agent = %addr, error = %err, "failed to connect");
                    return (addr, None);
                }
            };
            let result = f(client, addr.clone()).await;
            (addr, Some(result))
        });
    }

    let mut results = BTreeMap::new();
    let mut errors = Vec::new();
    while let Some(joined) = join.join_next().await {
        match joined {
            Ok((addr, Some(Ok(value)))) => {
                results.insert(addr, value);
            }
            Ok((addr, Some(Err(err)))) => errors.push((addr, err)),
            Ok((_, None)) => {}
            Err(err) => warn!(error = %err, "fan-out task panicked"),
        }
    }
    let aggregate = if errors.is_empty() {
        None
    } else {
        Some(AggregateError::new(errors))
    };
    (results, aggregate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    /// A minimal agent stub: answers Capability with a fixed name and
    /// errors every other method.
    async fn stub_agent(name: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let Ok((mut conn, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let tag = conn.read_u8().await.unwrap();
                    assert_eq!(tag, CHAN_RPC);
                    while let Ok(request) = read_frame::<_, Request>(&mut conn).await {
                        let reply = match request {
                            Request::Capability => {
                                let capability = Capability {
                                    available: true,
                                    agent: name.to_string(),
                                    ..Default::default()
                                };
                                Reply::Ok(serde_json::to_value(capability).unwrap())
                            }
                            other => Reply::Err(format!("unsupported: {other:?}")),
                        };
                        if write_frame(&mut conn, &reply).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn request_tag_is_the_wire_method_name() {
        let json = serde_json::to_value(&Request::Capability).unwrap();
        assert_eq!(json["method"], "Craft.Capability");
        let json = serde_json::to_value(&Request::StartContainer("api".into())).unwrap();
        assert_eq!(json["method"], "Docker.StartContainer");
        assert_eq!(json["params"], "api");
        let json = serde_json::to_value(&Request::AllocStream).unwrap();
        assert_eq!(json["method"], "StreamConn.Alloc");
    }

    #[tokio::test]
    async fn call_round_trip_and_remote_error() {
        let addr = stub_agent("stub-1").await;
        let mut client = Client::dial(&addr).await.unwrap();
        let capability = client.capability().await.unwrap();
        assert_eq!(capability.agent, "stub-1");
        // The same connection serves the next call.
        let err = client.list_images().await.unwrap_err();
        assert!(matches!(err, TransportError::Remote(_)));
    }

    #[tokio::test]
    async fn call_all_aggregates_per_address_failures() {
        let good = stub_agent("good").await;
        let bad = stub_agent("bad").await;
        let unreachable = "127.0.0.1:1".to_string();
        let addrs = vec![good.clone(), bad.clone(), unreachable];

        let bad_for_closure = Arc::new(bad.clone());
        let (results, aggregate) = call_all(&addrs, move |mut client, addr| {
            let bad = bad_for_closure.clone();
            async move {
                if addr == *bad {
                    client.list_images().await.map(|_| ())
                } else {
                    client.capability().await.map(|_| ())
                }
            }
        })
        .await;

        // The unreachable agent is logged, not aggregated.
        assert!(results.contains_key(&good));
        assert!(!results.contains_key(&bad));
        let aggregate = aggregate.unwrap();
        assert_eq!(aggregate.len(), 1);
        aggregate.each(|addr, err| {
            assert_eq!(addr, bad);
            assert!(matches!(err, TransportError::Remote(_)));
        });
    }
}
