//! Error types for suite scaffolding.

use pulsar_it_orchestrator::OrchestratorError;
use thiserror::Error;

/// Result type for suite operations.
pub type Result<T> = std::result::Result<T, SuiteError>;

/// Errors raised while setting up or driving a suite cluster.
#[derive(Debug, Error)]
pub enum SuiteError {
    /// The orchestrator failed.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// A cluster was requested before `setup_cluster`.
    #[error("No cluster has been set up for suite {0}")]
    NoCluster(String),

    /// A secret key or token could not be generated.
    #[error("Token generation failed: {0}")]
    TokenGeneration(String),
}

impl SuiteError {
    /// Returns the orchestrator error, if this wraps one.
    pub fn as_orchestrator(&self) -> Option<&OrchestratorError> {
        match self {
            Self::Orchestrator(e) => Some(e),
            _ => None,
        }
    }
}
