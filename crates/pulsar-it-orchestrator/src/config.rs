//! Orchestrator configuration.
//!
//! This module provides the ambient settings shared by every cluster in a
//! test run, supporting loading from TOML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::container::ContainerImage;
use crate::error::{OrchestratorError, Result};

/// Environment variable overriding [`OrchestratorConfig::image`].
pub const ENV_IMAGE: &str = "PULSAR_IT_IMAGE";

/// Environment variable overriding [`OrchestratorConfig::output_root`].
pub const ENV_OUTPUT_DIR: &str = "PULSAR_IT_OUTPUT_DIR";

/// Environment variable overriding [`OrchestratorConfig::startup_timeout_secs`].
pub const ENV_STARTUP_TIMEOUT_SECS: &str = "PULSAR_IT_STARTUP_TIMEOUT_SECS";

/// Environment variable overriding [`OrchestratorConfig::docker_host_address`].
pub const ENV_DOCKER_HOST: &str = "PULSAR_IT_DOCKER_HOST";

/// Environment variable overriding [`OrchestratorConfig::pull_images`].
pub const ENV_PULL_IMAGES: &str = "PULSAR_IT_PULL_IMAGES";

/// Settings applied to every container and cluster of a test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Image used for every managed (non-external) node.
    pub image: String,

    /// Root of the artifact area; captures land under `container-logs/`.
    pub output_root: PathBuf,

    /// Readiness timeout per container in seconds.
    pub startup_timeout_secs: u64,

    /// Delay between readiness probe attempts in milliseconds.
    pub readiness_poll_interval_ms: u64,

    /// Delay between exec status polls in milliseconds.
    pub exec_poll_interval_ms: u64,

    /// Upper bound for a single log or directory capture in seconds.
    pub capture_timeout_secs: u64,

    /// Grace period given to a container on stop in seconds.
    pub stop_timeout_secs: u64,

    /// Address on which mapped container ports are reachable.
    pub docker_host_address: String,

    /// Directory captured from managed nodes on stop.
    pub log_dir: String,

    /// Command run on the first coordination node once it is ready.
    pub cluster_init_command: Vec<String>,

    /// Whether to export each cluster as a docker-compose file on start.
    pub write_compose_file: bool,

    /// Whether a missing image is pulled before its container is created.
    pub pull_images: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            image: "apachepulsar/pulsar-test-latest-version:latest".to_string(),
            output_root: PathBuf::from("target"),
            startup_timeout_secs: 300,
            readiness_poll_interval_ms: 500,
            exec_poll_interval_ms: 200,
            capture_timeout_secs: 120,
            stop_timeout_secs: 10,
            docker_host_address: "localhost".to_string(),
            log_dir: "/var/log/pulsar".to_string(),
            cluster_init_command: vec!["/pulsar/bin/init-cluster.sh".to_string()],
            write_compose_file: true,
            pull_images: true,
        }
    }
}

impl OrchestratorConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the default configuration with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from a key lookup (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(image) = lookup(ENV_IMAGE) {
            self.image = image;
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
            self.output_root = PathBuf::from(dir);
        }
        if let Some(secs) = lookup(ENV_STARTUP_TIMEOUT_SECS) {
            self.startup_timeout_secs = secs.trim().parse().map_err(|_| {
                OrchestratorError::configuration(format!(
                    "{ENV_STARTUP_TIMEOUT_SECS} is not a number: {secs}"
                ))
            })?;
        }
        if let Some(host) = lookup(ENV_DOCKER_HOST) {
            self.docker_host_address = host;
        }
        if let Some(pull) = lookup(ENV_PULL_IMAGES) {
            self.pull_images = pull.trim().parse().map_err(|_| {
                OrchestratorError::configuration(format!(
                    "{ENV_PULL_IMAGES} must be true or false: {pull}"
                ))
            })?;
        }
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if ContainerImage::new(self.image.trim()).name().is_empty() {
            return Err(OrchestratorError::configuration("image must not be empty"));
        }
        if self.startup_timeout_secs == 0 {
            return Err(OrchestratorError::configuration(
                "startup_timeout_secs must be positive",
            ));
        }
        if self.capture_timeout_secs == 0 {
            return Err(OrchestratorError::configuration(
                "capture_timeout_secs must be positive",
            ));
        }
        if self.readiness_poll_interval_ms == 0 || self.exec_poll_interval_ms == 0 {
            return Err(OrchestratorError::configuration(
                "poll intervals must be positive",
            ));
        }
        Ok(())
    }

    /// Returns the startup timeout as a Duration.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Returns the readiness poll interval as a Duration.
    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_interval_ms)
    }

    /// Returns the exec poll interval as a Duration.
    pub fn exec_poll_interval(&self) -> Duration {
        Duration::from_millis(self.exec_poll_interval_ms)
    }

    /// Returns the capture timeout as a Duration.
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    /// Returns the directory holding per-container captures.
    pub fn container_logs_dir(&self) -> PathBuf {
        self.output_root.join("container-logs")
    }
}
