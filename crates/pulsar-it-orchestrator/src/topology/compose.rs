//! docker-compose export of a cluster.
//!
//! The rendered file is a reproduction aid only; the orchestrator itself
//! never reads it back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::container::{ContainerHandle, NodeRole};
use crate::error::Result;
use crate::topology::NetworkSpec;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ComposeFile {
    version: String,
    services: BTreeMap<String, ComposeService>,
    networks: BTreeMap<String, ComposeNetwork>,
}

impl ComposeFile {
    fn new() -> Self {
        Self {
            version: "3.8".to_string(),
            services: BTreeMap::new(),
            networks: BTreeMap::new(),
        }
    }

    fn add_service(&mut self, name: &str, service: ComposeService) {
        self.services.insert(name.to_string(), service);
    }

    fn add_network(&mut self, name: &str, driver: &str, internal: bool) {
        self.networks.insert(
            name.to_string(),
            ComposeNetwork {
                driver: driver.to_string(),
                internal,
            },
        );
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ComposeService {
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    networks: BTreeMap<String, ComposeServiceNetwork>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ports: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entrypoint: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ComposeServiceNetwork {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    aliases: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ComposeNetwork {
    driver: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    internal: bool,
}

/// Renders the cluster as a docker-compose YAML document.
///
/// Each service depends on every container of the preceding startup stage.
pub fn render_compose(network: &NetworkSpec, handles: &[ContainerHandle]) -> Result<String> {
    let mut compose = ComposeFile::new();
    compose.add_network(&network.name, &network.driver, network.internal);

    let mut previous_stage: Vec<String> = Vec::new();
    for role in NodeRole::STARTUP_ORDER {
        let stage: Vec<&ContainerHandle> = handles.iter().filter(|h| h.role() == role).collect();
        if stage.is_empty() {
            continue;
        }

        for handle in &stage {
            let service = handle_to_service(handle, network, &previous_stage);
            compose.add_service(handle.hostname(), service);
        }
        previous_stage = stage.iter().map(|h| h.hostname().to_string()).collect();
    }

    Ok(serde_yaml::to_string(&compose)?)
}

fn handle_to_service(
    handle: &ContainerHandle,
    network: &NetworkSpec,
    depends_on: &[String],
) -> ComposeService {
    let mut aliases: Vec<String> = handle.aliases().iter().cloned().collect();
    aliases.retain(|a| a != handle.hostname());

    ComposeService {
        image: handle.image().to_string(),
        container_name: Some(handle.container_name()),
        hostname: Some(handle.hostname().to_string()),
        networks: [(network.name.clone(), ComposeServiceNetwork { aliases })]
            .into_iter()
            .collect(),
        ports: handle
            .service_port()
            .into_iter()
            .chain(handle.http_port())
            .map(|p| p.to_string())
            .collect(),
        environment: handle.env().clone(),
        entrypoint: handle.entrypoint().map(<[String]>::to_vec),
        command: handle.command().map(<[String]>::to_vec),
        depends_on: depends_on.to_vec(),
        labels: handle
            .labels()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}
