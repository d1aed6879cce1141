//! Container runtime abstraction.
//!
//! The orchestrator drives containers exclusively through the
//! [`ContainerRuntime`] trait. [`DockerRuntime`] talks to a Docker daemon;
//! [`InMemoryRuntime`] is a scripted stand-in used by the test suites.

mod docker;
mod memory;

pub use docker::DockerRuntime;
pub use memory::{ExecHandler, InMemoryRuntime, RuntimeEvent, RuntimeEventKind};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;

use crate::error::Result;
use crate::topology::NetworkSpec;

/// A stream of raw bytes read out of a container.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Core trait for container runtimes.
///
/// Implementations must be `Send + Sync`; a single runtime is shared by every
/// container handle of a cluster.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Returns the name of this runtime.
    fn name(&self) -> &str;

    /// Returns the address on which mapped container ports are reachable.
    fn host_address(&self) -> &str;

    /// Checks if the runtime is reachable.
    async fn is_ready(&self) -> bool {
        true
    }

    /// Creates an isolated network and returns its id.
    async fn create_network(&self, spec: &NetworkSpec) -> Result<String>;

    /// Removes a network.
    async fn remove_network(&self, network_id: &str) -> Result<()>;

    /// Creates a container and returns its id. The container is not started.
    async fn create_container(&self, request: &CreateContainerRequest) -> Result<String>;

    /// Starts a created container.
    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Stops a running container, waiting up to `timeout_secs` before killing it.
    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()>;

    /// Removes a container.
    async fn remove_container(&self, container_id: &str) -> Result<()>;

    /// Returns the current state of a container.
    async fn inspect_container(&self, container_id: &str) -> Result<ContainerInfo>;

    /// Starts a command in a running container.
    ///
    /// The returned session yields output frames until the command exits.
    async fn start_exec(&self, container_id: &str, cmd: &[String]) -> Result<ExecSession>;

    /// Returns the status of an exec session.
    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecStatus>;

    /// Streams the container's stdout and stderr log.
    ///
    /// With `follow` the stream stays open until the container stops.
    fn logs(&self, container_id: &str, follow: bool) -> ByteStream;

    /// Streams a tar archive of `path` inside the container.
    fn download(&self, container_id: &str, path: &str) -> ByteStream;
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateContainerRequest {
    /// Fully-qualified container name.
    pub name: String,

    /// Hostname inside the cluster network.
    pub hostname: String,

    /// Image reference.
    pub image: String,

    /// Entrypoint override.
    pub entrypoint: Option<Vec<String>>,

    /// Command override.
    pub command: Option<Vec<String>>,

    /// Environment variables.
    pub env: Vec<(String, String)>,

    /// Container ports to publish on ephemeral host ports.
    pub exposed_ports: Vec<u16>,

    /// Network to attach to.
    pub network: Option<String>,

    /// Network aliases.
    pub aliases: Vec<String>,

    /// Container labels.
    pub labels: HashMap<String, String>,
}

/// Observed state of a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerInfo {
    /// Container id.
    pub id: String,

    /// Container name, as reported by the runtime (may have a leading `/`).
    pub name: String,

    /// Whether the container is running.
    pub running: bool,

    /// Address on the cluster network.
    pub ip_address: Option<String>,

    /// Container labels.
    pub labels: HashMap<String, String>,

    /// Container port to host port.
    pub port_mappings: HashMap<u16, u16>,
}

impl ContainerInfo {
    /// Returns the container name without the runtime's leading slash.
    pub fn bare_name(&self) -> &str {
        self.name.trim_start_matches('/')
    }
}

/// A frame of command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFrame {
    /// Bytes written to stdout.
    Stdout(Bytes),

    /// Bytes written to stderr.
    Stderr(Bytes),
}

/// A started exec session.
pub struct ExecSession {
    /// Exec id, used with [`ContainerRuntime::inspect_exec`].
    pub exec_id: String,

    /// Output frames in the order they were produced.
    pub output: BoxStream<'static, Result<OutputFrame>>,
}

impl std::fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecSession")
            .field("exec_id", &self.exec_id)
            .finish_non_exhaustive()
    }
}

/// Status of an exec session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecStatus {
    /// Whether the command is still running.
    pub running: bool,

    /// Exit code, once the command has finished.
    pub exit_code: Option<i64>,
}
