//! Cluster specification and orchestration.
//!
//! This module turns a declarative [`ClusterSpec`] into a [`Cluster`]: one
//! network plus every container handle, started in dependency order and torn
//! down safely.

mod cluster;
mod compose;
mod network;
mod spec;

pub use cluster::{Cluster, ClusterState, ADMIN_SCRIPT, CLIENT_SCRIPT, PULSAR_SCRIPT};
pub use compose::render_compose;
pub use network::{NetworkSpec, NetworkSpecBuilder};
pub use spec::{
    ClusterSpec, ClusterSpecBuilder, ExternalService, FunctionRuntime, DEFAULT_BROKER_COUNT,
    DEFAULT_COORDINATION_COUNT, DEFAULT_PROXY_COUNT, DEFAULT_STORAGE_COUNT,
};
