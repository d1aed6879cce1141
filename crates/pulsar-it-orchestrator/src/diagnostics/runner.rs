//! Running commands inside containers.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::runtime::{ContainerRuntime, OutputFrame};

/// Label holding the owning cluster's name on every container.
pub const CLUSTER_LABEL: &str = "cluster";

/// Output from executing a command in a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Exit code of the command.
    pub exit_code: i32,

    /// Standard output from the command.
    pub stdout: String,

    /// Standard error from the command.
    pub stderr: String,
}

impl ExecResult {
    /// Creates a new exec result.
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined stdout and stderr.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Returns stdout lines as a vector.
    pub fn stdout_lines(&self) -> Vec<&str> {
        self.stdout.lines().collect()
    }

    /// Returns stderr lines as a vector.
    pub fn stderr_lines(&self) -> Vec<&str> {
        self.stderr.lines().collect()
    }
}

/// Runs commands and captures diagnostics through a shared runtime.
#[derive(Clone)]
pub struct CommandRunner {
    runtime: Arc<dyn ContainerRuntime>,
    pub(crate) poll_interval: Duration,
    pub(crate) output_root: PathBuf,
    pub(crate) capture_timeout: Duration,
}

impl std::fmt::Debug for CommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRunner")
            .field("runtime", &self.runtime.name())
            .field("poll_interval", &self.poll_interval)
            .field("output_root", &self.output_root)
            .finish()
    }
}

impl CommandRunner {
    /// Creates a runner over `runtime` using the poll interval, artifact root
    /// and capture timeout of `config`.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &OrchestratorConfig) -> Self {
        Self {
            runtime,
            poll_interval: config.exec_poll_interval(),
            output_root: config.output_root.clone(),
            capture_timeout: config.capture_timeout(),
        }
    }

    /// Returns the underlying runtime.
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Runs `cmd` in the container and waits for it to finish.
    ///
    /// A non-zero exit code is reported in the result, not as an error.
    pub async fn run_command(&self, container_id: &str, cmd: &[&str]) -> Result<ExecResult> {
        let argv: Vec<String> = cmd.iter().map(|s| s.to_string()).collect();
        let mut session = self.runtime.start_exec(container_id, &argv).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(frame) = session.output.next().await {
            match frame? {
                OutputFrame::Stdout(bytes) => stdout.extend_from_slice(&bytes),
                OutputFrame::Stderr(bytes) => stderr.extend_from_slice(&bytes),
            }
        }

        // The output stream can close before the exit code is recorded.
        let exit_code = loop {
            let status = self.runtime.inspect_exec(&session.exec_id).await?;
            if !status.running {
                break status.exit_code.unwrap_or(-1) as i32;
            }
            tokio::time::sleep(self.poll_interval).await;
        };

        let result = ExecResult::new(
            exit_code,
            String::from_utf8_lossy(&stdout),
            String::from_utf8_lossy(&stderr),
        );

        debug!(
            container = %container_id,
            cmd = %cmd.join(" "),
            exit_code,
            "Command finished"
        );

        Ok(result)
    }

    /// Runs `cmd` and fails with [`OrchestratorError::CommandExecution`] on a
    /// non-zero exit code.
    pub async fn run_command_checked(
        &self,
        container_id: &str,
        cmd: &[&str],
    ) -> Result<ExecResult> {
        let result = self.run_command(container_id, cmd).await?;
        if result.success() {
            return Ok(result);
        }

        let container = self
            .container_name(container_id)
            .await
            .unwrap_or_else(|_| container_id.to_string());
        warn!(
            container = %container,
            cmd = %cmd.join(" "),
            exit_code = result.exit_code,
            stderr = %result.stderr.trim(),
            "Command failed"
        );
        Err(OrchestratorError::command_execution(
            container,
            cmd.join(" "),
            result,
        ))
    }

    /// Returns the container's address on the cluster network.
    pub async fn container_ip(&self, container_id: &str) -> Result<String> {
        let info = self.runtime.inspect_container(container_id).await?;
        info.ip_address.clone().ok_or_else(|| {
            OrchestratorError::runtime(format!(
                "container {} has no network address",
                info.bare_name()
            ))
        })
    }

    /// Returns the name of the cluster that owns the container.
    pub async fn container_cluster(&self, container_id: &str) -> Result<Option<String>> {
        let info = self.runtime.inspect_container(container_id).await?;
        Ok(info.labels.get(CLUSTER_LABEL).cloned())
    }

    /// Returns the container name without the runtime's leading slash.
    pub async fn container_name(&self, container_id: &str) -> Result<String> {
        let info = self.runtime.inspect_container(container_id).await?;
        Ok(info.bare_name().to_string())
    }
}
