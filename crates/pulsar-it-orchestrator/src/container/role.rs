//! Node roles and their per-role container settings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordination (ZooKeeper) client port.
pub const ZK_PORT: u16 = 2181;

/// Storage (BookKeeper) bookie port.
pub const BOOKIE_PORT: u16 = 3181;

/// Binary protocol port of brokers and proxies.
pub const BROKER_PORT: u16 = 6650;

/// Admin/HTTP port of brokers and proxies.
pub const BROKER_HTTP_PORT: u16 = 8080;

/// HTTP port of function workers.
pub const WORKER_HTTP_PORT: u16 = 6750;

/// The role a container plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeRole {
    /// Cluster-membership/consensus service used for discovery.
    Coordination,

    /// Node holding durable message log segments.
    Storage,

    /// Node terminating client protocol connections.
    Broker,

    /// Stateless front-end redirecting clients to brokers.
    Proxy,

    /// Node hosting user-supplied stream-processing logic.
    FunctionWorker,

    /// Third-party service started alongside the cluster.
    External,
}

impl NodeRole {
    /// Roles in startup order. Each stage must be ready before the next begins.
    pub const STARTUP_ORDER: [NodeRole; 6] = [
        NodeRole::Coordination,
        NodeRole::Storage,
        NodeRole::Broker,
        NodeRole::Proxy,
        NodeRole::External,
        NodeRole::FunctionWorker,
    ];

    /// Returns the name of this role.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Coordination => "coordination",
            Self::Storage => "storage",
            Self::Broker => "broker",
            Self::Proxy => "proxy",
            Self::FunctionWorker => "function-worker",
            Self::External => "external",
        }
    }

    /// Returns the built-in settings for managed roles.
    ///
    /// External services carry their own descriptor and have no defaults.
    pub fn defaults(&self) -> Option<RoleDefaults> {
        let defaults = match self {
            Self::Coordination => RoleDefaults {
                base_hostname: "zookeeper",
                entrypoint: "bin/run-local-zk.sh",
                service_port: Some(ZK_PORT),
                http_port: None,
                health_path: "/metrics",
            },
            Self::Storage => RoleDefaults {
                base_hostname: "bookkeeper",
                entrypoint: "bin/run-bookie.sh",
                service_port: Some(BOOKIE_PORT),
                http_port: None,
                health_path: "/metrics",
            },
            Self::Broker => RoleDefaults {
                base_hostname: "pulsar-broker",
                entrypoint: "bin/run-broker.sh",
                service_port: Some(BROKER_PORT),
                http_port: Some(BROKER_HTTP_PORT),
                health_path: "/metrics",
            },
            Self::Proxy => RoleDefaults {
                base_hostname: "pulsar-proxy",
                entrypoint: "bin/run-proxy.sh",
                service_port: Some(BROKER_PORT),
                http_port: Some(BROKER_HTTP_PORT),
                health_path: "/metrics",
            },
            Self::FunctionWorker => RoleDefaults {
                base_hostname: "pulsar-worker",
                entrypoint: "bin/run-functions-worker.sh",
                service_port: None,
                http_port: Some(WORKER_HTTP_PORT),
                health_path: "/metrics",
            },
            Self::External => return None,
        };
        Some(defaults)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Image-level settings shared by every container of a managed role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleDefaults {
    /// Hostname prefix; containers are named `<base>-<index>`.
    pub base_hostname: &'static str,

    /// Script the container runs instead of the image entrypoint.
    pub entrypoint: &'static str,

    /// Service port, probed with a TCP connect.
    pub service_port: Option<u16>,

    /// HTTP port.
    pub http_port: Option<u16>,

    /// Path probed when the role only declares an HTTP port.
    pub health_path: &'static str,
}

impl RoleDefaults {
    /// Returns the hostname of the `index`-th container of this role.
    pub fn hostname(&self, index: usize) -> String {
        format!("{}-{}", self.base_hostname, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_name() {
        assert_eq!(NodeRole::Coordination.name(), "coordination");
        assert_eq!(NodeRole::FunctionWorker.to_string(), "function-worker");
    }

    #[test]
    fn test_startup_order() {
        let pos = |role| {
            NodeRole::STARTUP_ORDER
                .iter()
                .position(|r| *r == role)
                .unwrap()
        };
        assert!(pos(NodeRole::Coordination) < pos(NodeRole::Storage));
        assert!(pos(NodeRole::Coordination) < pos(NodeRole::Broker));
        assert!(pos(NodeRole::Broker) < pos(NodeRole::Proxy));
        assert!(pos(NodeRole::Proxy) < pos(NodeRole::FunctionWorker));
    }

    #[test]
    fn test_role_defaults() {
        let broker = NodeRole::Broker.defaults().unwrap();
        assert_eq!(broker.service_port, Some(BROKER_PORT));
        assert_eq!(broker.http_port, Some(BROKER_HTTP_PORT));
        assert_eq!(broker.hostname(1), "pulsar-broker-1");

        let worker = NodeRole::FunctionWorker.defaults().unwrap();
        assert_eq!(worker.service_port, None);

        assert!(NodeRole::External.defaults().is_none());
    }
}
