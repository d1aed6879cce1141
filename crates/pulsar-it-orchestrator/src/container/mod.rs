//! Container identity, role tables and lifecycle.
//!
//! A [`ContainerHandle`] is one process-in-a-container with a role, a
//! cluster-unique hostname and a start/stop/exec contract. Role-specific
//! settings (ports, entrypoint, log directory) come from [`RoleDefaults`].

mod handle;
mod probe;
mod role;
mod spec;

pub use handle::{ContainerHandle, ContainerSettings, ContainerState};
pub use probe::{listening_check_command, ReadinessProbe};
pub use role::{
    NodeRole, RoleDefaults, BOOKIE_PORT, BROKER_HTTP_PORT, BROKER_PORT, WORKER_HTTP_PORT, ZK_PORT,
};
pub use spec::ContainerImage;
