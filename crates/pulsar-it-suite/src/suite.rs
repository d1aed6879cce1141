//! One-cluster-per-suite scaffolding.
//!
//! A [`ClusterTestBase`] is owned by the suite. It builds and starts one
//! cluster in setup, hands it to each scenario and always tears it down,
//! whether or not the start succeeded.

use std::sync::Arc;
use tracing::{info, warn};

use pulsar_it_orchestrator::{
    Cluster, ClusterSpec, ContainerRuntime, DockerRuntime, OrchestratorConfig,
};
use pulsar_it_orchestrator::topology::ClusterSpecBuilder;

use crate::error::{Result, SuiteError};
use crate::naming::{join_name_parts, random_name};

/// Length of the random suffix appended to cluster names.
pub const CLUSTER_SUFFIX_LEN: usize = 5;

/// Setup and teardown of a suite's cluster.
pub struct ClusterTestBase {
    suite_name: String,
    runtime: Arc<dyn ContainerRuntime>,
    config: OrchestratorConfig,
    cluster: Option<Cluster>,
}

impl std::fmt::Debug for ClusterTestBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterTestBase")
            .field("suite_name", &self.suite_name)
            .field("runtime", &self.runtime.name())
            .field("cluster", &self.cluster)
            .finish()
    }
}

impl ClusterTestBase {
    /// Creates a suite base on an explicit runtime and configuration.
    pub fn with_runtime(
        suite_name: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            suite_name: suite_name.into(),
            runtime,
            config,
            cluster: None,
        }
    }

    /// Creates a suite base on the local Docker daemon, configured from the
    /// environment.
    pub async fn docker(suite_name: impl Into<String>) -> Result<Self> {
        let config = OrchestratorConfig::from_env()?;
        let runtime = DockerRuntime::connect(&config.docker_host_address)
            .await?
            .with_image_pull(config.pull_images);
        Ok(Self::with_runtime(suite_name, Arc::new(runtime), config))
    }

    /// Returns the suite name.
    pub fn suite_name(&self) -> &str {
        &self.suite_name
    }

    /// Returns the shared runtime.
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Returns the orchestrator configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns `<suite>-<prefix>-<random>`, skipping empty parts.
    pub fn cluster_name(&self, prefix: &str) -> String {
        let suffix = random_name(CLUSTER_SUFFIX_LEN);
        join_name_parts([self.suite_name.as_str(), prefix, suffix.as_str()])
    }

    /// Builds the default specification and starts the cluster.
    pub async fn setup_cluster(&mut self, prefix: &str) -> Result<&Cluster> {
        self.setup_cluster_with(prefix, |builder| builder).await
    }

    /// Like [`setup_cluster`](Self::setup_cluster), letting `hook` adjust the
    /// specification before it is built.
    pub async fn setup_cluster_with<F>(&mut self, prefix: &str, hook: F) -> Result<&Cluster>
    where
        F: FnOnce(ClusterSpecBuilder) -> ClusterSpecBuilder,
    {
        let name = self.cluster_name(prefix);
        let spec = hook(ClusterSpec::builder(name)).build()?;
        self.setup_cluster_prepared(spec, |_| {}).await
    }

    /// Starts a cluster for `spec`, calling `prepare` on it before `start()`.
    ///
    /// The cluster is kept even when the start fails so that
    /// [`tear_down_cluster`](Self::tear_down_cluster) can clean it up.
    pub async fn setup_cluster_prepared<F>(&mut self, spec: ClusterSpec, prepare: F) -> Result<&Cluster>
    where
        F: FnOnce(&mut Cluster),
    {
        if self.cluster.is_some() {
            warn!(suite = %self.suite_name, "Replacing an existing cluster");
            self.tear_down_cluster().await;
        }

        info!(
            suite = %self.suite_name,
            cluster = %spec.name,
            storage = spec.storage_count,
            brokers = spec.broker_count,
            "Setting up cluster"
        );

        let runtime = self.runtime.clone();
        let config = self.config.clone();
        let cluster = self
            .cluster
            .insert(Cluster::for_spec(spec, runtime, config));

        prepare(cluster);
        cluster.start().await?;

        info!(cluster = %cluster.name(), "Cluster is set up");
        Ok(cluster)
    }

    /// Returns the suite's cluster.
    pub fn cluster(&self) -> Result<&Cluster> {
        self.cluster
            .as_ref()
            .ok_or_else(|| SuiteError::NoCluster(self.suite_name.clone()))
    }

    /// Returns the suite's cluster mutably.
    pub fn cluster_mut(&mut self) -> Result<&mut Cluster> {
        match self.cluster.as_mut() {
            Some(cluster) => Ok(cluster),
            None => Err(SuiteError::NoCluster(self.suite_name.clone())),
        }
    }

    /// Stops the cluster if one was created. Never fails.
    pub async fn tear_down_cluster(&mut self) {
        if let Some(mut cluster) = self.cluster.take() {
            cluster.stop().await;
        }
    }
}
