// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! The container engine seam, wrapping the Docker API client.
//!
//! Everything the agent service needs from Docker goes through here: the
//! usage snapshot behind capabilities, the manifest run sequence, and the
//! byte-stream plumbing for pull/load/logs/exec.

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, ImportImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::models::{ContainerSummary, HostConfig, ImageSummary, PortBinding};
use bollard::Docker;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::domain::capability::ContainerInfo;
use crate::domain::manifest::{split_image_tag, Manifest, PortSpec};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),
    #[error("container {0} is not running")]
    NotRunning(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The usage snapshot advertised through capabilities.
#[derive(Debug, Default)]
pub struct UsageInfo {
    pub all_names: Vec<String>,
    pub used_names: Vec<String>,
    pub used_ports: Vec<i64>,
    pub containers: BTreeMap<String, ContainerInfo>,
}

#[derive(Clone)]
pub struct Engine {
    docker: Docker,
}

impl Engine {
    /// Connect to the engine endpoint: `unix://` sockets, `tcp://`/`http://`
    /// addresses, or the platform default when the scheme is unknown.
    pub fn connect(endpoint: &str) -> Result<Self, EngineError> {
        let docker = if let Some(path) = endpoint.strip_prefix("unix://") {
            Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION)?
        } else if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") {
            Docker::connect_with_http(endpoint, 120, bollard::API_DEFAULT_VERSION)?
        } else {
            Docker::connect_with_local_defaults()?
        };
        Ok(Self { docker })
    }

    pub async fn ping(&self) -> Result<(), EngineError> {
        self.docker.ping().await?;
        Ok(())
    }

    /// Snapshot container names and published ports. Containers count as
    /// "used" when their status reports them up.
    pub async fn usage(&self) -> Result<UsageInfo, EngineError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await?;
        let mut usage = UsageInfo::default();
        for container in containers {
            let Some(name) = canonical_name(container.names.as_deref().unwrap_or(&[])) else {
                continue;
            };
            usage.all_names.push(name.clone());
            let running = container
                .status
                .as_deref()
                .map(|status| status.starts_with("Up"))
                .unwrap_or(false);
            if !running {
                continue;
            }
            usage.used_names.push(name.clone());
            let mut ports = Vec::new();
            for port in container.ports.unwrap_or_default() {
                let Some(public) = port.public_port else {
                    continue;
                };
                usage.used_ports.push(public as i64);
                let proto = port
                    .typ
                    .map(|typ| typ.to_string())
                    .unwrap_or_else(|| "tcp".to_string());
                ports.push(PortSpec {
                    exposed: format!("{}/{}", port.private_port, proto),
                    host_ip: port.ip.unwrap_or_default(),
                    host_port: public as i64,
                });
            }
            usage.containers.insert(name, ContainerInfo { ports });
        }
        Ok(usage)
    }

    /// Run a manifest: pull when the local image hash does not prefix-match,
    /// honor the replace semantics, create and start the container, then
    /// optionally wait and verify it stayed up.
    pub async fn run<W>(&self, manifest: &Manifest, progress: &mut W) -> Result<(), EngineError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let (image, tag) = split_image_tag(&manifest.image);
        let local = self.image_hash(&image, &tag).await;
        if needs_pull(local.as_deref(), &manifest.image_hash) {
            self.pull_image(&image, &tag, progress).await?;
        }

        if manifest.name == manifest.replace {
            if let Err(err) = self.remove(&manifest.name, manifest.replace_wait).await {
                debug!(container = %manifest.name, error = %err, "pre-replace remove failed");
            }
        }

        let (options, config) = container_config(manifest);
        let created = self.docker.create_container(Some(options), config).await?;

        if !manifest.replace.is_empty() && manifest.replace != manifest.name {
            self.stop(&manifest.replace, manifest.replace_wait).await?;
        }

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;

        if manifest.start_wait > 0 {
            tokio::time::sleep(std::time::Duration::from_secs(manifest.start_wait)).await;
            let inspected = self.docker.inspect_container(&created.id, None).await?;
            let running = inspected
                .state
                .and_then(|state| state.running)
                .unwrap_or(false);
            if !running {
                return Err(EngineError::NotRunning(created.id));
            }
        }
        Ok(())
    }

    pub async fn image_hash(&self, image: &str, tag: &str) -> Option<String> {
        self.docker
            .inspect_image(&format!("{image}:{tag}"))
            .await
            .ok()
            .and_then(|inspected| inspected.id)
    }

    /// Pull an image, forwarding progress messages as JSON lines.
    pub async fn pull_image<W>(
        &self,
        image: &str,
        tag: &str,
        progress: &mut W,
    ) -> Result<(), EngineError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(item) = stream.next().await {
            let info = item?;
            let mut line = serde_json::to_vec(&info).unwrap_or_default();
            line.push(b'\n');
            // A slow or gone progress consumer must not fail the pull.
            let _ = progress.write_all(&line).await;
        }
        Ok(())
    }

    /// Load an image tarball from a byte stream.
    pub async fn load_image<R>(&self, reader: R) -> Result<(), EngineError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut buf = Vec::new();
        let mut reader = reader;
        reader.read_to_end(&mut buf).await?;
        let body = Bytes::from(buf);
        let mut stream = self
            .docker
            .import_image(ImportImageOptions { quiet: false }, body, None);
        while let Some(item) = stream.next().await {
            item?;
        }
        Ok(())
    }

    pub async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, EngineError> {
        Ok(self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all,
                ..Default::default()
            }))
            .await?)
    }

    pub async fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError> {
        Ok(self
            .docker
            .list_images(Some(ListImagesOptions::<String>::default()))
            .await?)
    }

    pub async fn start_container(&self, name: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    /// Stop a container, surfacing the engine error verbatim. The
    /// controller decides which errors are benign.
    pub async fn stop_container(&self, name: &str, wait: u64) -> Result<(), EngineError> {
        let options = StopContainerOptions { t: wait as i64 };
        self.docker.stop_container(name, Some(options)).await?;
        Ok(())
    }

    /// Stop a container; already-stopped and already-gone are fine.
    pub async fn stop(&self, name: &str, wait: u64) -> Result<(), EngineError> {
        let options = StopContainerOptions { t: wait as i64 };
        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn restart(&self, name: &str, wait: u64) -> Result<(), EngineError> {
        let options = RestartContainerOptions { t: wait as isize };
        self.docker.restart_container(name, Some(options)).await?;
        Ok(())
    }

    /// Force-remove a container after stopping it; absence is fine.
    pub async fn remove(&self, name: &str, wait: u64) -> Result<(), EngineError> {
        self.stop(name, wait).await?;
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn remove_container(&self, name: &str, force: bool) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker.remove_container(name, Some(options)).await?;
        Ok(())
    }

    pub async fn remove_image(&self, image: &str) -> Result<(), EngineError> {
        self.docker
            .remove_image(image, Some(RemoveImageOptions::default()), None)
            .await?;
        Ok(())
    }

    pub fn logs(
        &self,
        container: &str,
        follow: bool,
        tail: &str,
    ) -> impl Stream<Item = Result<LogOutput, bollard::errors::Error>> {
        self.docker.logs(
            container,
            Some(LogsOptions::<String> {
                follow,
                stdout: true,
                stderr: true,
                tail: tail.to_string(),
                ..Default::default()
            }),
        )
    }

    pub async fn create_exec(
        &self,
        container: &str,
        cmd: Vec<String>,
        interactive: bool,
        tty: bool,
    ) -> Result<String, EngineError> {
        let options = CreateExecOptions::<String> {
            attach_stdin: Some(interactive),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(tty),
            cmd: Some(cmd),
            ..Default::default()
        };
        let created = self.docker.create_exec(container, options).await?;
        Ok(created.id)
    }

    pub async fn start_exec(&self, exec_id: &str) -> Result<StartExecResults, EngineError> {
        Ok(self
            .docker
            .start_exec(
                exec_id,
                Some(StartExecOptions {
                    detach: false,
                    ..Default::default()
                }),
            )
            .await?)
    }

    pub async fn resize_exec(&self, exec_id: &str, width: u16, height: u16) -> Result<(), EngineError> {
        self.docker
            .resize_exec(exec_id, ResizeExecOptions { height, width })
            .await?;
        Ok(())
    }
}

/// Pull is needed when there is no local image, or when the local hash
/// does not start with the manifest's (possibly empty) hash prefix.
fn needs_pull(local: Option<&str>, wanted_prefix: &str) -> bool {
    match local {
        None => true,
        Some(hash) => !hash.starts_with(wanted_prefix),
    }
}

fn container_config(manifest: &Manifest) -> (CreateContainerOptions<String>, Config<String>) {
    let options = CreateContainerOptions {
        name: manifest.name.clone(),
        platform: None,
    };

    let exposed_ports = (!manifest.ports.is_empty()).then(|| {
        manifest
            .ports
            .iter()
            .map(|port| (port.exposed.clone(), HashMap::new()))
            .collect::<HashMap<String, HashMap<(), ()>>>()
    });

    let port_bindings = (!manifest.ports.is_empty()).then(|| {
        let mut bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        for port in &manifest.ports {
            bindings
                .entry(port.exposed.clone())
                .or_insert_with(|| Some(Vec::new()))
                .get_or_insert_with(Vec::new)
                .push(PortBinding {
                    host_ip: (!port.host_ip.is_empty()).then(|| port.host_ip.clone()),
                    host_port: Some(port.host_port.to_string()),
                });
        }
        bindings
    });

    let binds = (!manifest.mounts.is_empty())
        .then(|| manifest.mounts.iter().map(|m| m.to_string()).collect());
    let links = (!manifest.links.is_empty())
        .then(|| manifest.links.iter().map(|l| l.to_string()).collect());

    let host_config = HostConfig {
        binds,
        port_bindings,
        links,
        dns: (!manifest.dns.is_empty()).then(|| manifest.dns.clone()),
        network_mode: (!manifest.network_mode.is_empty()).then(|| manifest.network_mode.clone()),
        volumes_from: (!manifest.volumes_from.is_empty()).then(|| manifest.volumes_from.clone()),
        ..Default::default()
    };

    let volumes = (!manifest.volumes.is_empty()).then(|| {
        manifest
            .volumes
            .iter()
            .map(|volume| (volume.clone(), HashMap::new()))
            .collect::<HashMap<String, HashMap<(), ()>>>()
    });

    let config = Config {
        image: Some(manifest.image.clone()),
        env: Some(manifest.env.pairs()),
        cmd: (!manifest.cmd.is_empty()).then(|| manifest.cmd.clone()),
        exposed_ports,
        volumes,
        host_config: Some(host_config),
        ..Default::default()
    };
    (options, config)
}

/// The display name of a container: the first name without a path
/// separator once the leading slash is stripped (the others are link
/// aliases).
pub fn canonical_name(names: &[String]) -> Option<String> {
    for name in names {
        let trimmed = name.strip_prefix('/').unwrap_or(name);
        if !trimmed.contains('/') {
            return Some(trimmed.to_string());
        }
    }
    None
}
