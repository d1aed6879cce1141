//! Error types for the orchestrator crate.
//!
//! This module provides the error taxonomy for cluster specification,
//! container startup, command execution and diagnostic capture.

use std::time::Duration;

use thiserror::Error;

use crate::diagnostics::ExecResult;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that can occur while building, starting or driving a test cluster.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed cluster specification.
    #[error("validation error: {0}")]
    Validation(String),

    /// A readiness probe did not succeed within the startup timeout.
    #[error("container {container} was not ready within {timeout:?}")]
    StartupTimeout {
        /// Fully-qualified container name.
        container: String,
        /// The timeout that expired.
        timeout: Duration,
    },

    /// A command exited non-zero where the caller asked for a hard failure.
    #[error(
        "command `{command}` failed in container {container} with exit code {}: {}",
        .result.exit_code,
        .result.stderr.trim()
    )]
    CommandExecution {
        /// Container the command ran in.
        container: String,
        /// The command line, space separated.
        command: String,
        /// Full output of the command.
        result: ExecResult,
    },

    /// Streaming a log or copying a directory out of a container failed.
    #[error("diagnostic capture failed for {container}: {reason}")]
    DiagnosticCapture {
        /// Container whose diagnostics were being captured.
        container: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Container not found.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Network creation failed.
    #[error("failed to create network {name}: {reason}")]
    NetworkCreationFailed {
        /// The network name.
        name: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Image pull failed.
    #[error("failed to pull image {image}: {reason}")]
    ImagePullFailed {
        /// The image reference.
        image: String,
        /// The reason for the failure.
        reason: String,
    },

    /// The container runtime rejected or failed an operation.
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// Docker API error.
    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    /// HTTP client error raised while probing readiness.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl OrchestratorError {
    /// Creates a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Creates a startup timeout error.
    pub fn startup_timeout(container: impl Into<String>, timeout: Duration) -> Self {
        Self::StartupTimeout {
            container: container.into(),
            timeout,
        }
    }

    /// Creates a command execution error carrying the full result.
    pub fn command_execution(
        container: impl Into<String>,
        command: impl Into<String>,
        result: ExecResult,
    ) -> Self {
        Self::CommandExecution {
            container: container.into(),
            command: command.into(),
            result,
        }
    }

    /// Creates a diagnostic capture error.
    pub fn diagnostic_capture(container: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DiagnosticCapture {
            container: container.into(),
            reason: reason.into(),
        }
    }

    /// Creates a container not found error.
    pub fn container_not_found(name: impl Into<String>) -> Self {
        Self::ContainerNotFound(name.into())
    }

    /// Creates a network creation failed error.
    pub fn network_creation_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NetworkCreationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an image pull failed error.
    pub fn image_pull_failed(image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImagePullFailed {
            image: image.into(),
            reason: reason.into(),
        }
    }

    /// Creates a runtime error.
    pub fn runtime(reason: impl Into<String>) -> Self {
        Self::Runtime(reason.into())
    }

    /// Creates a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization(reason.into())
    }

    /// Creates a configuration error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    /// Returns the command result if this is a command execution error.
    pub fn exec_result(&self) -> Option<&ExecResult> {
        match self {
            Self::CommandExecution { result, .. } => Some(result),
            _ => None,
        }
    }

    /// Returns true if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ContainerNotFound(_))
    }

    /// Returns true if the container runtime itself could not be reached or
    /// failed. There is no retry policy for these.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Runtime(_)
                | Self::DockerApi(_)
                | Self::NetworkCreationFailed { .. }
                | Self::ImagePullFailed { .. }
        )
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for OrchestratorError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}
