//! Cluster orchestration.
//!
//! A [`Cluster`] owns one network and every container handle built from a
//! [`ClusterSpec`]. `for_spec` is pure construction; `start` brings the
//! containers up stage by stage; `stop` tears everything down and never fails.

use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::OrchestratorConfig;
use crate::container::{
    ContainerHandle, ContainerSettings, NodeRole, RoleDefaults, BROKER_HTTP_PORT, BROKER_PORT,
    ZK_PORT,
};
use crate::diagnostics::{CommandRunner, ExecResult, CLUSTER_LABEL};
use crate::error::{OrchestratorError, Result};
use crate::runtime::ContainerRuntime;
use crate::topology::compose::render_compose;
use crate::topology::spec::{ClusterSpec, ExternalService, FunctionRuntime};
use crate::topology::NetworkSpec;

/// Admin CLI inside the image.
pub const ADMIN_SCRIPT: &str = "/pulsar/bin/pulsar-admin";

/// Client CLI inside the image.
pub const CLIENT_SCRIPT: &str = "/pulsar/bin/pulsar-client";

/// General-purpose CLI inside the image.
pub const PULSAR_SCRIPT: &str = "/pulsar/bin/pulsar";

/// Lifecycle state of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    /// Built, nothing started.
    Created,

    /// `start()` in progress.
    Starting,

    /// Every container is ready.
    Running,

    /// `start()` failed; some containers may still be running.
    Failed,

    /// Torn down.
    Stopped,
}

/// A running (or runnable) test cluster.
pub struct Cluster {
    spec: ClusterSpec,
    config: OrchestratorConfig,
    runner: CommandRunner,
    settings: ContainerSettings,
    network: NetworkSpec,
    network_id: Option<String>,
    handles: Vec<ContainerHandle>,
    state: ClusterState,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("name", &self.spec.name)
            .field("state", &self.state)
            .field("network_id", &self.network_id)
            .field("containers", &self.handles.len())
            .finish()
    }
}

impl Cluster {
    /// Builds the network and container handles for `spec`. Nothing is sent
    /// to the runtime.
    pub fn for_spec(
        spec: ClusterSpec,
        runtime: Arc<dyn ContainerRuntime>,
        config: OrchestratorConfig,
    ) -> Self {
        let runner = CommandRunner::new(runtime, &config);
        let settings = ContainerSettings::from_config(&config, spec.log_capture_enabled);
        let network = NetworkSpec::builder(spec.name.clone())
            .label(CLUSTER_LABEL, spec.name.clone())
            .build();

        let mut cluster = Self {
            spec,
            config,
            runner,
            settings,
            network,
            network_id: None,
            handles: Vec::new(),
            state: ClusterState::Created,
        };

        let managed = [
            (NodeRole::Coordination, cluster.spec.coordination_count),
            (NodeRole::Storage, cluster.spec.storage_count),
            (NodeRole::Broker, cluster.spec.broker_count),
            (NodeRole::Proxy, cluster.spec.proxy_count),
        ];
        for (role, count) in managed {
            let Some(defaults) = role.defaults() else {
                continue;
            };
            for index in 0..count {
                let handle = cluster.managed_handle(role, &defaults, index);
                cluster.handles.push(handle);
            }
        }

        let externals: Vec<(String, ExternalService)> = cluster
            .spec
            .external_services
            .iter()
            .map(|(name, service)| (name.clone(), service.clone()))
            .collect();
        for (name, service) in externals {
            let handle = cluster.external_handle(&name, &service);
            cluster.handles.push(handle);
        }

        let runtime_mode = cluster.spec.function_runtime;
        for index in 0..cluster.spec.function_worker_count {
            if let Some(handle) = cluster.worker_handle(index, runtime_mode) {
                cluster.handles.push(handle);
            }
        }

        cluster
    }

    fn new_handle(&self, role: NodeRole, hostname: String, image: &str) -> ContainerHandle {
        ContainerHandle::new(
            role,
            self.spec.name.clone(),
            hostname,
            image,
            self.runner.clone(),
            self.settings.clone(),
        )
    }

    fn managed_handle(&self, role: NodeRole, defaults: &RoleDefaults, index: usize) -> ContainerHandle {
        let mut handle = self.new_handle(role, defaults.hostname(index), &self.config.image);
        handle
            .with_ports(defaults.service_port, defaults.http_port)
            .with_health_path(defaults.health_path)
            .with_command(["sh", "-c", defaults.entrypoint])
            .with_log_dir(self.config.log_dir.clone())
            .with_env("clusterName", self.spec.name.clone());

        let zk_servers = self.zk_servers();
        match role {
            NodeRole::Storage => {
                handle
                    .with_env("zkServers", zk_servers)
                    .with_env("useHostNameAsBookieID", "true");
            }
            NodeRole::Broker | NodeRole::Proxy => {
                handle
                    .with_env("zkServers", zk_servers.clone())
                    .with_env("configurationStoreServers", zk_servers);
            }
            NodeRole::Coordination | NodeRole::FunctionWorker | NodeRole::External => {}
        }
        handle
    }

    fn external_handle(&self, name: &str, service: &ExternalService) -> ContainerHandle {
        let mut handle = self.new_handle(NodeRole::External, name.to_string(), &service.image);
        handle
            .with_ports(service.service_port, service.http_port)
            .with_health_path(service.health_path.clone());
        for (key, value) in &service.env {
            handle.with_env(key.clone(), value.clone());
        }
        if let Some(entrypoint) = &service.entrypoint {
            handle.with_entrypoint(entrypoint.clone());
        }
        if let Some(command) = &service.command {
            handle.with_command(command.clone());
        }
        if let Some(dir) = &service.log_dir {
            handle.with_log_dir(dir.clone());
        }
        handle
    }

    fn worker_handle(&self, index: usize, mode: FunctionRuntime) -> Option<ContainerHandle> {
        let defaults = NodeRole::FunctionWorker.defaults()?;
        let mut handle = self.managed_handle(NodeRole::FunctionWorker, &defaults, index);

        // Workers reach brokers through the proxy when there is one.
        let front = self
            .handles
            .iter()
            .find(|h| h.role() == NodeRole::Proxy)
            .or_else(|| self.handles.iter().find(|h| h.role() == NodeRole::Broker))
            .map(|h| h.hostname().to_string())
            .unwrap_or_else(|| "pulsar-broker-0".to_string());

        handle
            .with_env("zkServers", self.zk_servers())
            .with_env("PF_zookeeperServers", self.zk_servers())
            .with_env("PF_pulsarServiceUrl", format!("pulsar://{}:{}", front, BROKER_PORT))
            .with_env(
                "PF_pulsarWebServiceUrl",
                format!("http://{}:{}", front, BROKER_HTTP_PORT),
            );
        if mode == FunctionRuntime::Thread {
            handle.with_env("PF_functionRuntimeFactoryClassName", mode.factory_class_name());
        }
        Some(handle)
    }

    fn zk_servers(&self) -> String {
        let Some(defaults) = NodeRole::Coordination.defaults() else {
            return String::new();
        };
        (0..self.spec.coordination_count)
            .map(|i| format!("{}:{}", defaults.hostname(i), ZK_PORT))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Creates the network and starts every container in dependency order.
    ///
    /// Each stage is ready before the next begins. On failure the cluster is
    /// left as-is; call [`Cluster::stop`] to clean up.
    pub async fn start(&mut self) -> Result<()> {
        match self.state {
            ClusterState::Created => {}
            ClusterState::Running => return Ok(()),
            other => {
                return Err(OrchestratorError::runtime(format!(
                    "cannot start cluster {} in state {:?}",
                    self.spec.name, other
                )))
            }
        }

        self.state = ClusterState::Starting;
        info!(
            cluster = %self.spec.name,
            containers = self.handles.len(),
            runtime = %self.runner.runtime().name(),
            "Starting cluster"
        );

        match self.start_stages().await {
            Ok(()) => {
                self.state = ClusterState::Running;
                info!(cluster = %self.spec.name, "Cluster ready");
                Ok(())
            }
            Err(e) => {
                self.state = ClusterState::Failed;
                error!(cluster = %self.spec.name, error = %e, "Cluster failed to start");
                Err(e)
            }
        }
    }

    async fn start_stages(&mut self) -> Result<()> {
        if self.config.write_compose_file {
            self.write_compose_file();
        }

        let network_id = self.runner.runtime().create_network(&self.network).await?;
        info!(cluster = %self.spec.name, network = %network_id, "Created cluster network");
        self.network_id = Some(network_id);

        for role in NodeRole::STARTUP_ORDER {
            self.start_stage(role).await?;
            if role == NodeRole::Coordination {
                self.initialize_metadata().await?;
            }
        }
        Ok(())
    }

    async fn start_stage(&mut self, role: NodeRole) -> Result<()> {
        let network = self.network.name.clone();
        for handle in self.handles.iter_mut().filter(|h| h.role() == role) {
            handle.start(Some(network.as_str())).await?;
        }
        Ok(())
    }

    async fn initialize_metadata(&self) -> Result<()> {
        if self.config.cluster_init_command.is_empty() {
            return Ok(());
        }
        let Some(coordinator) = self.handles.iter().find(|h| h.role() == NodeRole::Coordination)
        else {
            return Ok(());
        };

        let cmd: Vec<&str> = self
            .config
            .cluster_init_command
            .iter()
            .map(String::as_str)
            .collect();
        coordinator.exec_cmd_checked(&cmd).await?;
        info!(cluster = %self.spec.name, "Initialized cluster metadata");
        Ok(())
    }

    fn write_compose_file(&self) {
        let dir = self.config.container_logs_dir().join(&self.spec.name);
        let path = dir.join("docker-compose.yml");

        let written = render_compose(&self.network, &self.handles).and_then(|yaml| {
            std::fs::create_dir_all(&dir)?;
            std::fs::write(&path, yaml)?;
            Ok(())
        });

        match written {
            Ok(()) => info!(path = %path.display(), "Generated docker-compose.yml"),
            Err(e) => warn!(cluster = %self.spec.name, error = %e, "Failed to write compose file"),
        }
    }

    /// Stops every container in reverse start order and releases the network.
    ///
    /// Never fails; per-container problems are logged. Safe to call twice
    /// and on a cluster whose `start()` failed or never ran.
    pub async fn stop(&mut self) {
        if self.state == ClusterState::Stopped {
            return;
        }

        info!(cluster = %self.spec.name, "Stopping cluster");
        for handle in self.handles.iter_mut().rev() {
            handle.stop().await;
        }

        if let Some(network_id) = self.network_id.take() {
            if let Err(e) = self.runner.runtime().remove_network(&network_id).await {
                warn!(network = %network_id, error = %e, "Failed to remove network");
            } else {
                info!(network = %network_id, "Removed cluster network");
            }
        }

        self.state = ClusterState::Stopped;
        info!(cluster = %self.spec.name, "Cluster teardown complete");
    }

    /// Adds `count` function workers to a running cluster and starts them.
    pub async fn start_function_workers(&mut self, count: usize, mode: FunctionRuntime) -> Result<()> {
        if self.state != ClusterState::Running {
            return Err(OrchestratorError::runtime(format!(
                "cluster {} is not running",
                self.spec.name
            )));
        }

        let first = self.get_all_of(NodeRole::FunctionWorker).len();
        let network = self.network.name.clone();
        info!(cluster = %self.spec.name, count, mode = ?mode, "Starting function workers");

        for index in first..first + count {
            let Some(mut handle) = self.worker_handle(index, mode) else {
                continue;
            };
            let started = handle.start(Some(network.as_str())).await;
            self.handles.push(handle);
            started?;
            self.spec.function_worker_count += 1;
        }
        Ok(())
    }

    /// Returns the cluster name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Returns the specification the cluster was built from.
    pub fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> ClusterState {
        self.state
    }

    /// Returns the network specification.
    pub fn network(&self) -> &NetworkSpec {
        &self.network
    }

    /// Returns the runtime id of the network while it exists.
    pub fn network_id(&self) -> Option<&str> {
        self.network_id.as_deref()
    }

    /// Returns the command runner shared by every container.
    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    /// Returns every handle in start order.
    pub fn handles(&self) -> &[ContainerHandle] {
        &self.handles
    }

    /// Returns every handle of `role` in index order.
    pub fn get_all_of(&self, role: NodeRole) -> Vec<&ContainerHandle> {
        self.handles.iter().filter(|h| h.role() == role).collect()
    }

    /// Returns the brokers in index order.
    pub fn get_brokers(&self) -> Vec<&ContainerHandle> {
        self.get_all_of(NodeRole::Broker)
    }

    /// Returns the brokers for mutation before `start()`.
    pub fn brokers_mut(&mut self) -> impl Iterator<Item = &mut ContainerHandle> {
        self.handles
            .iter_mut()
            .filter(|h| h.role() == NodeRole::Broker)
    }

    /// Returns the first proxy, if any.
    pub fn proxy(&self) -> Option<&ContainerHandle> {
        self.handles.iter().find(|h| h.role() == NodeRole::Proxy)
    }

    /// Returns the first proxy for mutation before `start()`.
    pub fn proxy_mut(&mut self) -> Option<&mut ContainerHandle> {
        self.handles
            .iter_mut()
            .find(|h| h.role() == NodeRole::Proxy)
    }

    /// Returns the external service registered under `name`.
    pub fn get_external_service(&self, name: &str) -> Option<&ContainerHandle> {
        self.handles
            .iter()
            .find(|h| h.role() == NodeRole::External && h.hostname() == name)
    }

    fn get_any_of(&self, role: NodeRole) -> Result<&ContainerHandle> {
        self.get_all_of(role)
            .choose(&mut rand::thread_rng())
            .copied()
            .ok_or_else(|| {
                OrchestratorError::container_not_found(format!(
                    "no {} in cluster {}",
                    role, self.spec.name
                ))
            })
    }

    /// Returns a randomly chosen broker.
    pub fn get_any_broker(&self) -> Result<&ContainerHandle> {
        self.get_any_of(NodeRole::Broker)
    }

    /// Returns a randomly chosen storage node.
    pub fn get_any_storage_node(&self) -> Result<&ContainerHandle> {
        self.get_any_of(NodeRole::Storage)
    }

    /// Returns a randomly chosen function worker.
    pub fn get_any_worker(&self) -> Result<&ContainerHandle> {
        self.get_any_of(NodeRole::FunctionWorker)
    }

    fn front_door(&self) -> Result<&ContainerHandle> {
        match self.proxy() {
            Some(proxy) => Ok(proxy),
            None => self.get_any_broker(),
        }
    }

    fn external_address(&self, handle: &ContainerHandle, port: u16) -> Result<String> {
        handle.external_address(port).ok_or_else(|| {
            OrchestratorError::runtime(format!(
                "port {} of {} is not mapped; is the cluster running?",
                port,
                handle.container_name()
            ))
        })
    }

    /// Returns `pulsar://host:port` of the proxy, or of a broker without one.
    pub fn get_plain_text_service_url(&self) -> Result<String> {
        let handle = self.front_door()?;
        Ok(format!("pulsar://{}", self.external_address(handle, BROKER_PORT)?))
    }

    /// Returns `http://host:port` of the proxy, or of a broker without one.
    pub fn get_http_service_url(&self) -> Result<String> {
        let handle = self.front_door()?;
        Ok(format!("http://{}", self.external_address(handle, BROKER_HTTP_PORT)?))
    }

    /// Runs the admin CLI with `args` on a randomly chosen broker.
    pub async fn run_admin_command_on_any_broker(&self, args: &[&str]) -> Result<ExecResult> {
        self.run_script_on_any_broker(ADMIN_SCRIPT, args).await
    }

    /// Runs the client CLI with `args` on a randomly chosen broker.
    pub async fn run_client_command_on_any_broker(&self, args: &[&str]) -> Result<ExecResult> {
        self.run_script_on_any_broker(CLIENT_SCRIPT, args).await
    }

    async fn run_script_on_any_broker(&self, script: &str, args: &[&str]) -> Result<ExecResult> {
        let broker = self.get_any_broker()?;
        let mut cmd = Vec::with_capacity(args.len() + 1);
        cmd.push(script);
        cmd.extend_from_slice(args);
        broker.exec_cmd(&cmd).await
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        let live = self.handles.iter().any(|h| h.container_id().is_some() && !h.state().is_terminal())
            || self.network_id.is_some();
        if live {
            warn!(cluster = %self.spec.name, "Cluster dropped without stop(); containers may leak");
        }
    }
}
