//! Docker runtime implementation.
//!
//! This module drives a local Docker daemon through the bollard API.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, InspectContainerOptions,
    LogsOptions, NetworkingConfig, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::network::CreateNetworkOptions;
use bollard::service::{EndpointSettings, HostConfig, PortBinding};
use bollard::Docker;
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::{
    ByteStream, ContainerInfo, ContainerRuntime, CreateContainerRequest, ExecSession, ExecStatus,
    OutputFrame,
};
use crate::container::ContainerImage;
use crate::error::{OrchestratorError, Result};
use crate::topology::NetworkSpec;

/// Container runtime backed by the Docker daemon.
///
/// The client is cheap to clone; every clone shares the same connection.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    host_address: String,
    pull_images: bool,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon and verifies it responds.
    ///
    /// Mapped ports are reported as reachable on `host_address`.
    pub async fn connect(host_address: impl Into<String>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;

        docker
            .ping()
            .await
            .map_err(|e| OrchestratorError::runtime(format!("Docker daemon unreachable: {e}")))?;

        let host_address = host_address.into();
        info!(host = %host_address, "Connected to Docker daemon");

        Ok(Self {
            docker,
            host_address,
            pull_images: true,
        })
    }

    /// Sets whether an image missing from the daemon is pulled on create.
    pub fn with_image_pull(mut self, pull: bool) -> Self {
        self.pull_images = pull;
        self
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        let image = ContainerImage::new(reference);
        let (from_image, tag) = pull_target(&image);
        info!(image = %image, "Pulling image");

        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    return Err(OrchestratorError::image_pull_failed(reference, e.to_string()));
                }
            }
        }

        Ok(())
    }
}

/// Splits an image reference into the `fromImage` and `tag` parameters of a
/// pull. A digest takes precedence over a tag; neither means `latest`.
fn pull_target(image: &ContainerImage) -> (&str, &str) {
    let tag = image.digest().or_else(|| image.tag()).unwrap_or("latest");
    (image.name(), tag)
}

fn is_missing_image(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code: 404, message }
            if message.contains("No such image")
    )
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    fn host_address(&self) -> &str {
        &self.host_address
    }

    async fn is_ready(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<String> {
        let labels: HashMap<&str, &str> = spec
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let options = CreateNetworkOptions {
            name: spec.name.as_str(),
            driver: spec.driver.as_str(),
            internal: spec.internal,
            labels,
            ..Default::default()
        };

        let response = self
            .docker
            .create_network(options)
            .await
            .map_err(|e| OrchestratorError::network_creation_failed(&spec.name, e.to_string()))?;

        let id = response.id.unwrap_or_default();
        if id.is_empty() {
            return Err(OrchestratorError::network_creation_failed(
                &spec.name,
                "no ID returned",
            ));
        }

        info!(network = %spec.name, id = %id, "Created network");
        Ok(id)
    }

    async fn remove_network(&self, network_id: &str) -> Result<()> {
        self.docker.remove_network(network_id).await?;
        info!(network = %network_id, "Removed network");
        Ok(())
    }

    async fn create_container(&self, request: &CreateContainerRequest) -> Result<String> {
        let env: Vec<String> = request
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let exposed_ports: HashMap<String, HashMap<(), ()>> = request
            .exposed_ports
            .iter()
            .map(|p| (format!("{}/tcp", p), HashMap::new()))
            .collect();

        // No host port: the daemon picks a free ephemeral one.
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = request
            .exposed_ports
            .iter()
            .map(|p| {
                let binding = PortBinding {
                    host_ip: None,
                    host_port: None,
                };
                (format!("{}/tcp", p), Some(vec![binding]))
            })
            .collect();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            network_mode: request.network.clone(),
            ..Default::default()
        };

        let networking_config = request.network.as_ref().map(|network| {
            let endpoint = EndpointSettings {
                aliases: Some(request.aliases.clone()),
                ..Default::default()
            };
            NetworkingConfig {
                endpoints_config: [(network.clone(), endpoint)].into_iter().collect(),
            }
        });

        let config = Config {
            image: Some(request.image.clone()),
            hostname: Some(request.hostname.clone()),
            env: Some(env),
            labels: Some(request.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            entrypoint: request.entrypoint.clone(),
            cmd: request.command.clone(),
            networking_config,
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: request.name.as_str(),
            platform: None,
        };

        let response = match self
            .docker
            .create_container(Some(options.clone()), config.clone())
            .await
        {
            Err(e) if self.pull_images && is_missing_image(&e) => {
                self.pull_image(&request.image).await?;
                self.docker.create_container(Some(options), config).await?
            }
            other => other?,
        };

        info!(
            container = %request.name,
            id = %response.id,
            "Created container"
        );

        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;
        debug!(container = %container_id, "Started container");
        Ok(())
    }

    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()> {
        let options = StopContainerOptions {
            t: timeout_secs as i64,
        };
        self.docker.stop_container(container_id, Some(options)).await?;
        debug!(container = %container_id, "Stopped container");
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(container_id, Some(options))
            .await?;
        info!(container = %container_id, "Removed container");
        Ok(())
    }

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerInfo> {
        let inspect = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => OrchestratorError::container_not_found(container_id),
                other => OrchestratorError::DockerApi(other),
            })?;

        let running = inspect
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);

        let labels = inspect
            .config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default();

        let mut port_mappings = HashMap::new();
        let mut ip_address = None;

        if let Some(settings) = &inspect.network_settings {
            if let Some(ports) = &settings.ports {
                for (key, bindings) in ports {
                    let container_port = key.split('/').next().and_then(|p| p.parse::<u16>().ok());
                    let host_port = bindings
                        .as_ref()
                        .and_then(|b| b.iter().find_map(|b| b.host_port.as_ref()))
                        .and_then(|p| p.parse::<u16>().ok());

                    if let (Some(container_port), Some(host_port)) = (container_port, host_port) {
                        port_mappings.insert(container_port, host_port);
                    }
                }
            }

            if let Some(networks) = &settings.networks {
                ip_address = networks
                    .values()
                    .filter_map(|n| n.ip_address.clone())
                    .find(|ip| !ip.is_empty());
            }
        }

        Ok(ContainerInfo {
            id: inspect.id.unwrap_or_else(|| container_id.to_string()),
            name: inspect.name.unwrap_or_default(),
            running,
            ip_address,
            labels,
            port_mappings,
        })
    }

    async fn start_exec(&self, container_id: &str, cmd: &[String]) -> Result<ExecSession> {
        debug!(container = %container_id, cmd = ?cmd, "Executing command");

        let exec_options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self.docker.create_exec(container_id, exec_options).await?;

        let output = match self.docker.start_exec(&exec.id, None).await? {
            StartExecResults::Attached { output, .. } => output
                .map_err(OrchestratorError::from)
                .try_filter_map(|frame| async move {
                    Ok(match frame {
                        bollard::container::LogOutput::StdOut { message } => {
                            Some(OutputFrame::Stdout(message))
                        }
                        bollard::container::LogOutput::StdErr { message } => {
                            Some(OutputFrame::Stderr(message))
                        }
                        _ => None,
                    })
                })
                .boxed(),
            StartExecResults::Detached => {
                warn!(container = %container_id, exec = %exec.id, "Exec started detached");
                futures::stream::empty().boxed()
            }
        };

        Ok(ExecSession {
            exec_id: exec.id,
            output,
        })
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecStatus> {
        let inspect = self.docker.inspect_exec(exec_id).await?;
        Ok(ExecStatus {
            running: inspect.running.unwrap_or(false),
            exit_code: inspect.exit_code,
        })
    }

    fn logs(&self, container_id: &str, follow: bool) -> ByteStream {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            timestamps: true,
            follow,
            ..Default::default()
        };

        self.docker
            .logs(container_id, Some(options))
            .map_ok(|frame| frame.into_bytes())
            .map_err(OrchestratorError::from)
            .boxed()
    }

    fn download(&self, container_id: &str, path: &str) -> ByteStream {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };

        self.docker
            .download_from_container(container_id, Some(options))
            .map_err(OrchestratorError::from)
            .boxed()
    }
}
