//! Cluster specification.
//!
//! A [`ClusterSpec`] is the immutable, validated description of a test
//! cluster: how many nodes of each role, which function runtime the workers
//! use and which third-party services run next to the cluster.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::container::NodeRole;
use crate::error::{OrchestratorError, Result};

/// Default number of coordination nodes.
pub const DEFAULT_COORDINATION_COUNT: usize = 1;

/// Default number of storage nodes.
pub const DEFAULT_STORAGE_COUNT: usize = 3;

/// Default number of brokers.
pub const DEFAULT_BROKER_COUNT: usize = 2;

/// Default number of proxies.
pub const DEFAULT_PROXY_COUNT: usize = 1;

/// How function workers run user functions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionRuntime {
    /// One OS process per function instance.
    #[default]
    Process,

    /// One thread per function instance inside the worker.
    Thread,
}

impl FunctionRuntime {
    /// Returns the worker's runtime factory class name.
    pub fn factory_class_name(&self) -> &'static str {
        match self {
            Self::Process => "org.apache.pulsar.functions.runtime.ProcessRuntimeFactory",
            Self::Thread => "org.apache.pulsar.functions.runtime.ThreadRuntimeFactory",
        }
    }
}

/// Descriptor of a third-party container started alongside the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalService {
    /// Image reference.
    pub image: String,

    /// Environment variables.
    pub env: BTreeMap<String, String>,

    /// Service port, probed with a TCP connect.
    pub service_port: Option<u16>,

    /// HTTP port.
    pub http_port: Option<u16>,

    /// Path probed when only an HTTP port is declared.
    pub health_path: String,

    /// Entrypoint override.
    pub entrypoint: Option<Vec<String>>,

    /// Command override.
    pub command: Option<Vec<String>>,

    /// In-container directory captured on stop.
    pub log_dir: Option<String>,
}

impl ExternalService {
    /// Creates a descriptor for `image` with no ports.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            env: BTreeMap::new(),
            service_port: None,
            http_port: None,
            health_path: "/".to_string(),
            entrypoint: None,
            command: None,
            log_dir: None,
        }
    }

    /// Sets the service port.
    pub fn with_service_port(mut self, port: u16) -> Self {
        self.service_port = Some(port);
        self
    }

    /// Sets the HTTP port and the path probed on it.
    pub fn with_http_port(mut self, port: u16, health_path: impl Into<String>) -> Self {
        self.http_port = Some(port);
        self.health_path = health_path.into();
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Overrides the command.
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the directory captured on stop.
    pub fn with_log_dir(mut self, dir: impl Into<String>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

/// Immutable description of a test cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Cluster name; namespaces the network and every container.
    pub name: String,

    /// Number of coordination nodes.
    pub coordination_count: usize,

    /// Number of storage nodes.
    pub storage_count: usize,

    /// Number of brokers.
    pub broker_count: usize,

    /// Number of proxies.
    pub proxy_count: usize,

    /// Number of function workers.
    pub function_worker_count: usize,

    /// Function runtime used by workers.
    pub function_runtime: FunctionRuntime,

    /// Third-party services keyed by hostname.
    pub external_services: BTreeMap<String, ExternalService>,

    /// Whether container output is followed into the test log while running.
    pub log_capture_enabled: bool,
}

impl ClusterSpec {
    /// Creates a new cluster specification builder.
    pub fn builder(name: impl Into<String>) -> ClusterSpecBuilder {
        ClusterSpecBuilder::new(name)
    }

    /// Returns the total number of containers the cluster will run.
    pub fn container_count(&self) -> usize {
        self.coordination_count
            + self.storage_count
            + self.broker_count
            + self.proxy_count
            + self.function_worker_count
            + self.external_services.len()
    }
}

/// Builder for `ClusterSpec`.
///
/// Counts are accepted as signed integers so that invalid input is reported
/// by `build()` rather than silently wrapped.
#[derive(Debug, Clone)]
pub struct ClusterSpecBuilder {
    name: String,
    coordination_count: i32,
    storage_count: i32,
    broker_count: i32,
    proxy_count: i32,
    function_worker_count: i32,
    function_runtime: FunctionRuntime,
    external_services: BTreeMap<String, ExternalService>,
    log_capture_enabled: bool,
}

impl ClusterSpecBuilder {
    /// Creates a new builder with default counts.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            coordination_count: DEFAULT_COORDINATION_COUNT as i32,
            storage_count: DEFAULT_STORAGE_COUNT as i32,
            broker_count: DEFAULT_BROKER_COUNT as i32,
            proxy_count: DEFAULT_PROXY_COUNT as i32,
            function_worker_count: 0,
            function_runtime: FunctionRuntime::default(),
            external_services: BTreeMap::new(),
            log_capture_enabled: false,
        }
    }

    /// Returns the cluster name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the number of coordination nodes.
    pub fn with_coordination_count(mut self, n: i32) -> Self {
        self.coordination_count = n;
        self
    }

    /// Sets the number of storage nodes.
    pub fn with_storage_count(mut self, n: i32) -> Self {
        self.storage_count = n;
        self
    }

    /// Sets the number of brokers.
    pub fn with_broker_count(mut self, n: i32) -> Self {
        self.broker_count = n;
        self
    }

    /// Sets the number of proxies.
    pub fn with_proxy_count(mut self, n: i32) -> Self {
        self.proxy_count = n;
        self
    }

    /// Sets the number of function workers.
    pub fn with_function_worker_count(mut self, n: i32) -> Self {
        self.function_worker_count = n;
        self
    }

    /// Sets the function runtime.
    pub fn with_function_runtime(mut self, runtime: FunctionRuntime) -> Self {
        self.function_runtime = runtime;
        self
    }

    /// Adds a third-party service reachable under `name` on the cluster network.
    pub fn with_external_service(mut self, name: impl Into<String>, service: ExternalService) -> Self {
        self.external_services.insert(name.into(), service);
        self
    }

    /// Enables following container output into the test log.
    pub fn with_log_capture(mut self, enabled: bool) -> Self {
        self.log_capture_enabled = enabled;
        self
    }

    /// Validates and builds the specification.
    ///
    /// External service names share the network with managed nodes, so a
    /// name equal to a generated hostname such as `zookeeper-0` is rejected.
    pub fn build(self) -> Result<ClusterSpec> {
        validate_name("cluster name", &self.name)?;

        let managed = [
            (NodeRole::Coordination, count("coordination", self.coordination_count)?),
            (NodeRole::Storage, count("storage", self.storage_count)?),
            (NodeRole::Broker, count("broker", self.broker_count)?),
            (NodeRole::Proxy, count("proxy", self.proxy_count)?),
            (NodeRole::FunctionWorker, count("function worker", self.function_worker_count)?),
        ];

        for (name, service) in &self.external_services {
            validate_name("external service name", name)?;
            if service.image.trim().is_empty() {
                return Err(OrchestratorError::validation(format!(
                    "external service {name} has no image"
                )));
            }
            if let Some(role) = managed_role_with_hostname(&managed, name) {
                return Err(OrchestratorError::validation(format!(
                    "external service name {name} collides with a {role} hostname"
                )));
            }
        }

        let [coordination, storage, broker, proxy, worker] = managed.map(|(_, n)| n);
        Ok(ClusterSpec {
            coordination_count: coordination,
            storage_count: storage,
            broker_count: broker,
            proxy_count: proxy,
            function_worker_count: worker,
            name: self.name,
            function_runtime: self.function_runtime,
            external_services: self.external_services,
            log_capture_enabled: self.log_capture_enabled,
        })
    }
}

fn managed_role_with_hostname(managed: &[(NodeRole, usize)], name: &str) -> Option<NodeRole> {
    managed.iter().find_map(|(role, n)| {
        let defaults = role.defaults()?;
        (0..*n)
            .any(|i| defaults.hostname(i) == name)
            .then_some(*role)
    })
}

fn count(what: &str, n: i32) -> Result<usize> {
    usize::try_from(n).map_err(|_| {
        OrchestratorError::validation(format!("{what} count must not be negative, got {n}"))
    })
}

fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(OrchestratorError::validation(format!(
            "{what} must not be empty"
        )));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid || name.starts_with(|c: char| c == '-' || c == '.') {
        return Err(OrchestratorError::validation(format!(
            "{what} {name:?} is not a valid container name"
        )));
    }
    Ok(())
}
