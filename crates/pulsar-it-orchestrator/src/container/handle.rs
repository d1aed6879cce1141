//! Container handles.
//!
//! A [`ContainerHandle`] is one process-in-a-container with a stable identity
//! (`<cluster>-<hostname>`) and a create/start/stop/exec lifecycle. Role
//! specifics are plain data set by the cluster when the handle is built.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::probe::ReadinessProbe;
use super::role::NodeRole;
use super::spec::ContainerImage;
use crate::config::OrchestratorConfig;
use crate::diagnostics::{CommandRunner, ExecResult, CLUSTER_LABEL};
use crate::error::{OrchestratorError, Result};
use crate::runtime::{ByteStream, CreateContainerRequest};

/// Lifecycle state of a container handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    /// Built but not started.
    Created,

    /// Start requested, waiting for readiness.
    Starting,

    /// Ready to serve.
    Running,

    /// Stopped and removed.
    Stopped,

    /// Creation, start or readiness failed.
    Failed,
}

impl ContainerState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

/// Timing and capture settings shared by every handle of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSettings {
    /// Readiness timeout.
    pub startup_timeout: Duration,

    /// Delay between readiness probe attempts.
    pub readiness_poll_interval: Duration,

    /// Grace period given on stop, in seconds.
    pub stop_timeout_secs: u64,

    /// Whether container output is re-emitted as tracing events while running.
    pub follow_logs: bool,
}

impl ContainerSettings {
    /// Derives the settings from the orchestrator configuration.
    pub fn from_config(config: &OrchestratorConfig, follow_logs: bool) -> Self {
        Self {
            startup_timeout: config.startup_timeout(),
            readiness_poll_interval: config.readiness_poll_interval(),
            stop_timeout_secs: config.stop_timeout_secs,
            follow_logs,
        }
    }
}

/// Handle to one container of a cluster.
pub struct ContainerHandle {
    role: NodeRole,
    cluster_name: String,
    hostname: String,
    image: ContainerImage,
    entrypoint: Option<Vec<String>>,
    command: Option<Vec<String>>,
    service_port: Option<u16>,
    http_port: Option<u16>,
    health_path: String,
    log_dir: Option<String>,
    aliases: BTreeSet<String>,
    env: BTreeMap<String, String>,
    labels: HashMap<String, String>,
    exposed_ports: Vec<u16>,
    configured: bool,
    state: ContainerState,
    container_id: Option<String>,
    port_mappings: HashMap<u16, u16>,
    log_follower: Option<JoinHandle<()>>,
    settings: ContainerSettings,
    runner: CommandRunner,
}

impl std::fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("name", &self.container_name())
            .field("role", &self.role)
            .field("state", &self.state)
            .field("container_id", &self.container_id)
            .finish()
    }
}

impl ContainerHandle {
    /// Creates a handle in the `Created` state. Nothing is sent to the runtime.
    pub fn new(
        role: NodeRole,
        cluster_name: impl Into<String>,
        hostname: impl Into<String>,
        image: impl Into<ContainerImage>,
        runner: CommandRunner,
        settings: ContainerSettings,
    ) -> Self {
        Self {
            role,
            cluster_name: cluster_name.into(),
            hostname: hostname.into(),
            image: image.into(),
            entrypoint: None,
            command: None,
            service_port: None,
            http_port: None,
            health_path: "/metrics".to_string(),
            log_dir: None,
            aliases: BTreeSet::new(),
            env: BTreeMap::new(),
            labels: HashMap::new(),
            exposed_ports: Vec::new(),
            configured: false,
            state: ContainerState::Created,
            container_id: None,
            port_mappings: HashMap::new(),
            log_follower: None,
            settings,
            runner,
        }
    }

    /// Sets the service and HTTP ports.
    pub fn with_ports(&mut self, service_port: Option<u16>, http_port: Option<u16>) -> &mut Self {
        self.service_port = service_port;
        self.http_port = http_port;
        self
    }

    /// Sets the path probed when only an HTTP port is declared.
    pub fn with_health_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.health_path = path.into();
        self
    }

    /// Overrides the image entrypoint.
    pub fn with_entrypoint<I, S>(&mut self, entrypoint: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoint = Some(entrypoint.into_iter().map(Into::into).collect());
        self
    }

    /// Overrides the image command.
    pub fn with_command<I, S>(&mut self, command: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the in-container directory captured on stop.
    pub fn with_log_dir(&mut self, dir: impl Into<String>) -> &mut Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Sets an environment variable. Only effective before `start()`.
    pub fn with_env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Declares the ports to expose and the identity labels and aliases.
    ///
    /// Runs once; later calls are no-ops.
    pub fn configure(&mut self) {
        if self.configured {
            return;
        }

        for port in self.service_port.into_iter().chain(self.http_port) {
            if !self.exposed_ports.contains(&port) {
                self.exposed_ports.push(port);
            }
        }
        self.labels
            .insert(CLUSTER_LABEL.to_string(), self.cluster_name.clone());
        self.aliases.insert(self.hostname.clone());
        self.configured = true;
    }

    /// Creates and starts the container, then waits until its readiness
    /// probe succeeds.
    ///
    /// On probe expiry the handle is marked `Failed` and
    /// [`OrchestratorError::StartupTimeout`] is returned. The container is
    /// left in place for `stop()` to capture and remove.
    pub async fn start(&mut self, network: Option<&str>) -> Result<()> {
        match self.state {
            ContainerState::Running => return Ok(()),
            ContainerState::Created => {}
            other => {
                return Err(OrchestratorError::runtime(format!(
                    "cannot start {} in state {:?}",
                    self.container_name(),
                    other
                )))
            }
        }

        self.configure();
        self.state = ContainerState::Starting;

        match self.launch(network).await {
            Ok(()) => {
                self.state = ContainerState::Running;
                info!(
                    container = %self.container_name(),
                    role = %self.role,
                    ports = ?self.port_mappings,
                    "Container ready"
                );
                Ok(())
            }
            Err(e) => {
                self.state = ContainerState::Failed;
                Err(e)
            }
        }
    }

    async fn launch(&mut self, network: Option<&str>) -> Result<()> {
        let runtime = self.runner.runtime().clone();
        let request = CreateContainerRequest {
            name: self.container_name(),
            hostname: self.hostname.clone(),
            image: self.image.reference().to_string(),
            entrypoint: self.entrypoint.clone(),
            command: self.command.clone(),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            exposed_ports: self.exposed_ports.clone(),
            network: network.map(str::to_string),
            aliases: self.aliases.iter().cloned().collect(),
            labels: self.labels.clone(),
        };

        let id = runtime.create_container(&request).await?;
        self.container_id = Some(id.clone());

        runtime.start_container(&id).await?;
        info!(container = %request.name, image = %self.image, "Started container");

        let inspect = runtime.inspect_container(&id).await?;
        self.port_mappings = inspect.port_mappings;

        if self.settings.follow_logs {
            let stream = runtime.logs(&id, true);
            self.log_follower = Some(spawn_log_follower(stream, request.name.clone()));
        }

        self.wait_until_ready(runtime.host_address()).await
    }

    async fn wait_until_ready(&self, host: &str) -> Result<()> {
        let probe = ReadinessProbe::for_ports(self.service_port, self.http_port, &self.health_path);
        let client = reqwest::Client::builder().build()?;
        let timeout = self.settings.startup_timeout;
        let start = Instant::now();

        loop {
            if probe.check(host, &self.port_mappings, &client).await
                && self.listening_inside(&probe).await
            {
                return Ok(());
            }

            if start.elapsed() > timeout {
                warn!(
                    container = %self.container_name(),
                    timeout = ?timeout,
                    "Container did not become ready"
                );
                return Err(OrchestratorError::startup_timeout(
                    self.container_name(),
                    timeout,
                ));
            }

            debug!(container = %self.container_name(), probe = ?probe, "Waiting for readiness");
            tokio::time::sleep(self.settings.readiness_poll_interval).await;
        }
    }

    async fn listening_inside(&self, probe: &ReadinessProbe) -> bool {
        let Some(id) = self.container_id.as_deref() else {
            return false;
        };
        for check in probe.listening_checks() {
            let argv: Vec<&str> = check.iter().map(String::as_str).collect();
            match self.runner.run_command(id, &argv).await {
                Ok(result) if result.success() => {}
                Ok(result) => {
                    debug!(
                        container = %self.container_name(),
                        exit_code = result.exit_code,
                        "Port mapped but nothing listening yet"
                    );
                    return false;
                }
                Err(e) => {
                    debug!(container = %self.container_name(), error = %e, "Listening check failed");
                    return false;
                }
            }
        }
        true
    }

    /// Captures diagnostics, then stops and removes the container.
    ///
    /// Never fails. Calling it again, or on a handle that was never started,
    /// is a no-op.
    pub async fn stop(&mut self) {
        if self.state == ContainerState::Stopped {
            return;
        }

        let Some(id) = self.container_id.clone() else {
            self.state = ContainerState::Stopped;
            return;
        };

        if let Some(follower) = self.log_follower.take() {
            follower.abort();
        }

        self.runner.dump_container_log(&id).await;
        if let Some(dir) = &self.log_dir {
            self.runner.dump_container_dir(&id, dir).await;
        }

        let runtime = self.runner.runtime();
        if let Err(e) = runtime
            .stop_container(&id, self.settings.stop_timeout_secs)
            .await
        {
            warn!(container = %self.container_name(), error = %e, "Failed to stop container");
        }
        if let Err(e) = runtime.remove_container(&id).await {
            warn!(container = %self.container_name(), error = %e, "Failed to remove container");
        }

        self.port_mappings.clear();
        self.state = ContainerState::Stopped;
        info!(container = %self.container_name(), "Stopped container");
    }

    /// Runs a command in the container. A non-zero exit is returned as data.
    pub async fn exec_cmd(&self, cmd: &[&str]) -> Result<ExecResult> {
        let id = self.require_id()?;
        self.runner.run_command(id, cmd).await
    }

    /// Runs a command in the container, failing on a non-zero exit.
    pub async fn exec_cmd_checked(&self, cmd: &[&str]) -> Result<ExecResult> {
        let id = self.require_id()?;
        self.runner.run_command_checked(id, cmd).await
    }

    /// Returns the container's address on the cluster network.
    pub async fn ip_address(&self) -> Result<String> {
        let id = self.require_id()?;
        self.runner.container_ip(id).await
    }

    fn require_id(&self) -> Result<&str> {
        match (&self.container_id, self.state) {
            (Some(id), ContainerState::Running | ContainerState::Starting) => Ok(id.as_str()),
            _ => Err(OrchestratorError::container_not_found(self.container_name())),
        }
    }

    /// Returns the fully-qualified name, `<cluster>-<hostname>`.
    pub fn container_name(&self) -> String {
        format!("{}-{}", self.cluster_name, self.hostname)
    }

    /// Returns the role.
    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Returns the owning cluster's name.
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Returns the hostname inside the cluster network.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Returns the image.
    pub fn image(&self) -> &ContainerImage {
        &self.image
    }

    /// Returns the entrypoint override.
    pub fn entrypoint(&self) -> Option<&[String]> {
        self.entrypoint.as_deref()
    }

    /// Returns the command override.
    pub fn command(&self) -> Option<&[String]> {
        self.command.as_deref()
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Returns true if the container is ready to serve.
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }

    /// Returns the runtime id once the container has been created.
    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// Returns the service port.
    pub fn service_port(&self) -> Option<u16> {
        self.service_port
    }

    /// Returns the HTTP port.
    pub fn http_port(&self) -> Option<u16> {
        self.http_port
    }

    /// Returns the network aliases.
    pub fn aliases(&self) -> &BTreeSet<String> {
        &self.aliases
    }

    /// Returns the environment.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Returns the labels.
    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    /// Returns the ports declared by `configure()`.
    pub fn exposed_ports(&self) -> &[u16] {
        &self.exposed_ports
    }

    /// Returns the in-container directory captured on stop.
    pub fn log_dir(&self) -> Option<&str> {
        self.log_dir.as_deref()
    }

    /// Returns the host port mapped to a container port.
    pub fn mapped_port(&self, container_port: u16) -> Option<u16> {
        self.port_mappings.get(&container_port).copied()
    }

    /// Returns `host:port` for a container port as reachable from the test
    /// process.
    pub fn external_address(&self, container_port: u16) -> Option<String> {
        let host_port = self.mapped_port(container_port)?;
        Some(format!("{}:{}", self.runner.runtime().host_address(), host_port))
    }
}

impl PartialEq for ContainerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.cluster_name == other.cluster_name && self.hostname == other.hostname
    }
}

impl Eq for ContainerHandle {}

impl Hash for ContainerHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.container_name().hash(state);
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        if let Some(follower) = self.log_follower.take() {
            follower.abort();
        }
    }
}

fn spawn_log_follower(mut stream: ByteStream, container: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    pending.extend_from_slice(&bytes);
                    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        emit_line(&container, &line);
                    }
                }
                Err(e) => {
                    debug!(container = %container, error = %e, "Log stream ended");
                    break;
                }
            }
        }

        if !pending.is_empty() {
            emit_line(&container, &pending);
        }
    })
}

fn emit_line(container: &str, line: &[u8]) {
    let line = String::from_utf8_lossy(line);
    info!(target: "container_log", container = %container, "{}", line.trim_end());
}
