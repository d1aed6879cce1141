//! In-process container runtime for tests.
//!
//! [`InMemoryRuntime`] keeps container state in memory and opens a loopback
//! listener for every exposed port, so readiness probes, exec polling and
//! diagnostic capture all run their real code paths without a Docker daemon.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{
    ByteStream, ContainerInfo, ContainerRuntime, CreateContainerRequest, ExecSession, ExecStatus,
    OutputFrame,
};
use crate::container::listening_check_command;
use crate::diagnostics::ExecResult;
use crate::error::{OrchestratorError, Result};
use crate::topology::NetworkSpec;

const HTTP_OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Scripted command behaviour: `(container name, argv) -> result`.
pub type ExecHandler = Arc<dyn Fn(&str, &[String]) -> ExecResult + Send + Sync>;

/// Kind of a recorded runtime call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeEventKind {
    /// A network was created.
    NetworkCreated,
    /// A network was removed.
    NetworkRemoved,
    /// A container was created.
    ContainerCreated,
    /// A container was started.
    ContainerStarted,
    /// A container was stopped.
    ContainerStopped,
    /// A container was removed.
    ContainerRemoved,
    /// A command was run in a container.
    Exec,
}

/// A runtime call recorded by [`InMemoryRuntime`].
#[derive(Debug, Clone)]
pub struct RuntimeEvent {
    /// What happened.
    pub kind: RuntimeEventKind,
    /// Network or container name; for execs, `<container>: <argv>`.
    pub target: String,
    /// When it happened.
    pub at: Instant,
}

struct MemoryContainer {
    request: CreateContainerRequest,
    running: bool,
    port_mappings: HashMap<u16, u16>,
    listeners: Vec<JoinHandle<()>>,
    listening_checks: usize,
    log: Vec<u8>,
}

impl MemoryContainer {
    fn shut_listeners(&mut self) {
        for task in self.listeners.drain(..) {
            task.abort();
        }
    }
}

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    networks: HashMap<String, String>,
    containers: HashMap<String, MemoryContainer>,
    created: Vec<CreateContainerRequest>,
    execs: HashMap<String, i64>,
    events: Vec<RuntimeEvent>,
}

impl MemoryState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:06}", prefix, self.next_id)
    }

    fn record(&mut self, kind: RuntimeEventKind, target: impl Into<String>) {
        self.events.push(RuntimeEvent {
            kind,
            target: target.into(),
            at: Instant::now(),
        });
    }

    fn container_mut(&mut self, id: &str) -> Result<&mut MemoryContainer> {
        self.containers
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::container_not_found(id))
    }
}

/// A container runtime that never leaves the test process.
pub struct InMemoryRuntime {
    state: Mutex<MemoryState>,
    exec_handler: ExecHandler,
    unready: HashSet<String>,
    late_listeners: HashMap<String, usize>,
    failing_downloads: bool,
}

impl Default for InMemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRuntime {
    /// Creates a runtime whose containers all become ready.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            exec_handler: Arc::new(default_exec),
            unready: HashSet::new(),
            late_listeners: HashMap::new(),
            failing_downloads: false,
        }
    }

    /// Replaces the command handler.
    pub fn with_exec_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &[String]) -> ExecResult + Send + Sync + 'static,
    {
        self.exec_handler = Arc::new(handler);
        self
    }

    /// Makes the container with this fully-qualified name never accept
    /// connections on its ports.
    pub fn with_unready_container(mut self, name: impl Into<String>) -> Self {
        self.unready.insert(name.into());
        self
    }

    /// Keeps the container's ports mapped and reachable from the host while
    /// its first `failed_checks` in-container listening checks fail, like a
    /// process that has not bound its sockets yet.
    pub fn with_late_listener(mut self, name: impl Into<String>, failed_checks: usize) -> Self {
        self.late_listeners.insert(name.into(), failed_checks);
        self
    }

    /// Makes every directory download fail after the first chunk.
    pub fn with_failing_downloads(mut self) -> Self {
        self.failing_downloads = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns every recorded call, oldest first.
    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.state().events.clone()
    }

    /// Returns the names of started containers in start order.
    pub fn started_order(&self) -> Vec<String> {
        self.events_of(RuntimeEventKind::ContainerStarted)
    }

    /// Returns the names of created networks.
    pub fn networks_created(&self) -> Vec<String> {
        self.events_of(RuntimeEventKind::NetworkCreated)
    }

    /// Returns the names of removed networks.
    pub fn networks_removed(&self) -> Vec<String> {
        self.events_of(RuntimeEventKind::NetworkRemoved)
    }

    /// Returns the names of containers that are currently running.
    pub fn running_containers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state()
            .containers
            .values()
            .filter(|c| c.running)
            .map(|c| c.request.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Returns the number of containers that have not been removed.
    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    /// Returns the create request of a container by name, even after removal.
    pub fn created_request(&self, name: &str) -> Option<CreateContainerRequest> {
        self.state()
            .created
            .iter()
            .rev()
            .find(|r| r.name == name)
            .cloned()
    }

    fn events_of(&self, kind: RuntimeEventKind) -> Vec<String> {
        self.state()
            .events
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.target.clone())
            .collect()
    }
}

fn default_exec(_container: &str, cmd: &[String]) -> ExecResult {
    match cmd.first().map(String::as_str) {
        Some("echo") => ExecResult::new(0, format!("{}\n", cmd[1..].join(" ")), ""),
        Some("false") => ExecResult::new(1, "", ""),
        _ => ExecResult::new(0, "", ""),
    }
}

async fn serve_port(listener: TcpListener) {
    loop {
        let Ok((mut socket, _)) = listener.accept().await else {
            break;
        };
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(HTTP_OK).await;
            let _ = socket.shutdown().await;
        });
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn host_address(&self) -> &str {
        "127.0.0.1"
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<String> {
        let mut state = self.state();
        let id = state.next_id("net");
        state.networks.insert(id.clone(), spec.name.clone());
        state.record(RuntimeEventKind::NetworkCreated, &spec.name);
        Ok(id)
    }

    async fn remove_network(&self, network_id: &str) -> Result<()> {
        let mut state = self.state();
        let name = state.networks.remove(network_id).ok_or_else(|| {
            OrchestratorError::runtime(format!("no such network: {network_id}"))
        })?;
        state.record(RuntimeEventKind::NetworkRemoved, name);
        Ok(())
    }

    async fn create_container(&self, request: &CreateContainerRequest) -> Result<String> {
        let mut state = self.state();
        if state
            .containers
            .values()
            .any(|c| c.request.name == request.name)
        {
            return Err(OrchestratorError::runtime(format!(
                "container name {} is already in use",
                request.name
            )));
        }

        let id = state.next_id("ctr");
        state.containers.insert(
            id.clone(),
            MemoryContainer {
                request: request.clone(),
                running: false,
                port_mappings: HashMap::new(),
                listeners: Vec::new(),
                listening_checks: 0,
                log: Vec::new(),
            },
        );
        state.created.push(request.clone());
        state.record(RuntimeEventKind::ContainerCreated, &request.name);
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        let (name, ports) = {
            let mut state = self.state();
            let container = state.container_mut(container_id)?;
            (
                container.request.name.clone(),
                container.request.exposed_ports.clone(),
            )
        };

        let unready = self.unready.contains(&name);
        let mut port_mappings = HashMap::new();
        let mut listeners = Vec::new();

        for port in ports {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            let host_port = listener.local_addr()?.port();
            port_mappings.insert(port, host_port);

            // Dropping the listener leaves a mapped but closed port.
            if !unready {
                listeners.push(tokio::spawn(serve_port(listener)));
            }
        }

        let mut state = self.state();
        let container = state.container_mut(container_id)?;
        container.running = true;
        container.port_mappings = port_mappings;
        container.listeners = listeners;
        container
            .log
            .extend_from_slice(format!("{name} started\n").as_bytes());
        state.record(RuntimeEventKind::ContainerStarted, &name);
        debug!(container = %name, "Started in-memory container");
        Ok(())
    }

    async fn stop_container(&self, container_id: &str, _timeout_secs: u64) -> Result<()> {
        let mut state = self.state();
        let container = state.container_mut(container_id)?;
        container.shut_listeners();
        container.running = false;
        container
            .log
            .extend_from_slice(format!("{} stopped\n", container.request.name).as_bytes());
        let name = container.request.name.clone();
        state.record(RuntimeEventKind::ContainerStopped, name);
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let mut state = self.state();
        let mut container = state
            .containers
            .remove(container_id)
            .ok_or_else(|| OrchestratorError::container_not_found(container_id))?;
        container.shut_listeners();
        state.record(RuntimeEventKind::ContainerRemoved, container.request.name);
        Ok(())
    }

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerInfo> {
        let mut state = self.state();
        let network_ip = |index: usize| format!("10.88.0.{}", index + 2);
        let container = state.container_mut(container_id)?;
        let index = container_id
            .rsplit('-')
            .next()
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);

        Ok(ContainerInfo {
            id: container_id.to_string(),
            name: format!("/{}", container.request.name),
            running: container.running,
            ip_address: container.running.then(|| network_ip(index)),
            labels: container.request.labels.clone(),
            port_mappings: container.port_mappings.clone(),
        })
    }

    async fn start_exec(&self, container_id: &str, cmd: &[String]) -> Result<ExecSession> {
        let (name, listening) = {
            let mut state = self.state();
            let container = state.container_mut(container_id)?;
            if !container.running {
                return Err(OrchestratorError::runtime(format!(
                    "container {} is not running",
                    container.request.name
                )));
            }
            let is_check = container
                .request
                .exposed_ports
                .iter()
                .any(|p| listening_check_command(*p) == cmd);
            let listening = is_check.then(|| {
                container.listening_checks += 1;
                let name = &container.request.name;
                let late = self.late_listeners.get(name).copied().unwrap_or(0);
                !self.unready.contains(name) && container.listening_checks > late
            });
            (container.request.name.clone(), listening)
        };

        let result = match listening {
            Some(true) => ExecResult::new(0, "", ""),
            Some(false) => ExecResult::new(1, "", ""),
            None => (self.exec_handler)(&name, cmd),
        };

        let exec_id = {
            let mut state = self.state();
            let exec_id = state.next_id("exec");
            state.execs.insert(exec_id.clone(), result.exit_code as i64);
            state.record(RuntimeEventKind::Exec, format!("{}: {}", name, cmd.join(" ")));
            exec_id
        };

        let mut frames = Vec::new();
        if !result.stdout.is_empty() {
            frames.push(Ok(OutputFrame::Stdout(Bytes::from(result.stdout))));
        }
        if !result.stderr.is_empty() {
            frames.push(Ok(OutputFrame::Stderr(Bytes::from(result.stderr))));
        }

        Ok(ExecSession {
            exec_id,
            output: futures::stream::iter(frames).boxed(),
        })
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecStatus> {
        let state = self.state();
        let exit_code = state
            .execs
            .get(exec_id)
            .copied()
            .ok_or_else(|| OrchestratorError::runtime(format!("no such exec: {exec_id}")))?;
        Ok(ExecStatus {
            running: false,
            exit_code: Some(exit_code),
        })
    }

    fn logs(&self, container_id: &str, _follow: bool) -> ByteStream {
        let item = match self.state().containers.get(container_id) {
            Some(container) => Ok(Bytes::from(container.log.clone())),
            None => Err(OrchestratorError::container_not_found(container_id)),
        };
        futures::stream::iter(vec![item]).boxed()
    }

    fn download(&self, container_id: &str, path: &str) -> ByteStream {
        let exists = self.state().containers.contains_key(container_id);
        let items = if !exists {
            vec![Err(OrchestratorError::container_not_found(container_id))]
        } else if self.failing_downloads {
            vec![
                Ok(Bytes::from_static(b"partial")),
                Err(OrchestratorError::runtime(format!(
                    "connection reset while copying {path}"
                ))),
            ]
        } else {
            vec![Ok(Bytes::from(format!("archive of {path}\n")))]
        };
        futures::stream::iter(items).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn request(name: &str, ports: Vec<u16>) -> CreateContainerRequest {
        CreateContainerRequest {
            name: name.to_string(),
            hostname: name.to_string(),
            image: "apachepulsar/pulsar:latest".to_string(),
            exposed_ports: ports,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_opens_ports() {
        let runtime = InMemoryRuntime::new();
        let id = runtime
            .create_container(&request("it-broker-0", vec![6650]))
            .await
            .unwrap();
        runtime.start_container(&id).await.unwrap();

        let info = runtime.inspect_container(&id).await.unwrap();
        assert!(info.running);
        let host_port = info.port_mappings[&6650];
        tokio::net::TcpStream::connect(("127.0.0.1", host_port))
            .await
            .unwrap();

        runtime.stop_container(&id, 1).await.unwrap();
        assert!(runtime.running_containers().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let runtime = InMemoryRuntime::new();
        runtime
            .create_container(&request("dup", vec![]))
            .await
            .unwrap();
        assert!(runtime
            .create_container(&request("dup", vec![]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_exec_frames() {
        let runtime = InMemoryRuntime::new();
        let id = runtime
            .create_container(&request("c", vec![]))
            .await
            .unwrap();
        runtime.start_container(&id).await.unwrap();

        let cmd = vec!["echo".to_string(), "hi".to_string()];
        let session = runtime.start_exec(&id, &cmd).await.unwrap();
        let frames: Vec<OutputFrame> = session.output.try_collect().await.unwrap();
        assert_eq!(frames, vec![OutputFrame::Stdout(Bytes::from("hi\n"))]);

        let status = runtime.inspect_exec(&session.exec_id).await.unwrap();
        assert_eq!(status.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_late_listener() {
        let runtime = InMemoryRuntime::new().with_late_listener("late", 2);
        let id = runtime
            .create_container(&request("late", vec![2181]))
            .await
            .unwrap();
        runtime.start_container(&id).await.unwrap();

        let host_port = runtime.inspect_container(&id).await.unwrap().port_mappings[&2181];
        tokio::net::TcpStream::connect(("127.0.0.1", host_port))
            .await
            .unwrap();

        let check = listening_check_command(2181);
        let mut exit_codes = Vec::new();
        for _ in 0..3 {
            let session = runtime.start_exec(&id, &check).await.unwrap();
            let status = runtime.inspect_exec(&session.exec_id).await.unwrap();
            exit_codes.push(status.exit_code);
        }
        assert_eq!(exit_codes, vec![Some(1), Some(1), Some(0)]);
    }

    #[tokio::test]
    async fn test_exec_requires_running_container() {
        let runtime = InMemoryRuntime::new();
        let id = runtime
            .create_container(&request("c", vec![]))
            .await
            .unwrap();
        assert!(runtime.start_exec(&id, &["true".to_string()]).await.is_err());
    }
}
