//! Container orchestration for Pulsar integration tests.
//!
//! This crate builds a declarative cluster description into a running,
//! addressable set of containers (coordination, storage, broker, proxy,
//! function-worker and third-party nodes), drives commands inside them, and
//! tears them down with diagnostics captured to disk.
//!
//! # Overview
//!
//! The orchestrator handles:
//! - **Cluster specification**: Validated node counts, function runtime and external services
//! - **Startup ordering**: Each role stage is ready before the next begins
//! - **Readiness**: TCP or HTTP probes with a bounded timeout
//! - **Command execution**: Exit code, stdout and stderr of in-container commands
//! - **Diagnostics**: Container logs and directories captured on teardown
//! - **Teardown**: Idempotent, never fails, releases the network exactly once
//!
//! # Architecture
//!
//! - [`topology`]: Cluster specification, network and the [`Cluster`] orchestrator
//! - [`container`]: Container handles, roles and readiness probes
//! - [`diagnostics`]: Command runner and log/directory capture
//! - [`runtime`]: Container runtime trait with Docker and in-memory implementations
//! - [`config`]: Ambient settings shared by a test run
//! - [`error`]: Error types for orchestration operations
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pulsar_it_orchestrator::{
//!     Cluster, ClusterSpec, DockerRuntime, OrchestratorConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = OrchestratorConfig::from_env()?;
//!     let runtime = Arc::new(DockerRuntime::connect(&config.docker_host_address).await?);
//!
//!     let spec = ClusterSpec::builder("smoke-abcde")
//!         .with_storage_count(1)
//!         .build()?;
//!
//!     let mut cluster = Cluster::for_spec(spec, runtime, config);
//!     let started = cluster.start().await;
//!
//!     if started.is_ok() {
//!         let result = cluster
//!             .run_admin_command_on_any_broker(&["tenants", "list"])
//!             .await?;
//!         println!("{}", result.stdout);
//!     }
//!
//!     // Always stop, even after a failed start.
//!     cluster.stop().await;
//!     started?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod container;
pub mod diagnostics;
pub mod error;
pub mod runtime;
pub mod topology;

// Re-export commonly used types at the crate root
pub use config::OrchestratorConfig;
pub use container::{ContainerHandle, ContainerImage, ContainerState, NodeRole};
pub use diagnostics::{CommandRunner, ExecResult};
pub use error::{OrchestratorError, Result};
pub use runtime::{ContainerRuntime, DockerRuntime, InMemoryRuntime};
pub use topology::{Cluster, ClusterSpec, ClusterState, ExternalService, FunctionRuntime, NetworkSpec};
