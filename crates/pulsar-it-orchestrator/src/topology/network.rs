//! Cluster network specification.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Network specification for a cluster.
///
/// Every cluster owns exactly one network, named after the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Name of the network.
    pub name: String,

    /// Network driver (bridge, overlay, etc.).
    pub driver: String,

    /// Whether the network is internal (no external connectivity).
    pub internal: bool,

    /// Network labels.
    pub labels: HashMap<String, String>,
}

impl Default for NetworkSpec {
    fn default() -> Self {
        Self {
            name: "pulsar-it".to_string(),
            driver: "bridge".to_string(),
            internal: false,
            labels: HashMap::new(),
        }
    }
}

impl NetworkSpec {
    /// Creates a new network specification builder.
    pub fn builder(name: impl Into<String>) -> NetworkSpecBuilder {
        NetworkSpecBuilder::new(name)
    }
}

/// Builder for `NetworkSpec`.
#[derive(Debug)]
pub struct NetworkSpecBuilder {
    spec: NetworkSpec,
}

impl NetworkSpecBuilder {
    /// Creates a new builder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            spec: NetworkSpec {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    /// Sets whether the network is internal.
    pub fn internal(mut self, internal: bool) -> Self {
        self.spec.internal = internal;
        self
    }

    /// Adds a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.labels.insert(key.into(), value.into());
        self
    }

    /// Builds the network specification.
    pub fn build(self) -> NetworkSpec {
        self.spec
    }
}
