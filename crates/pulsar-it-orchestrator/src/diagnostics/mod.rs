//! Command execution and diagnostic capture.
//!
//! This module runs commands inside containers and copies logs and
//! directories out of them into the artifact area.

mod capture;
mod runner;

pub use capture::{archive_file_name, available_path, log_file_name, sanitize_path};
pub use runner::{CommandRunner, ExecResult, CLUSTER_LABEL};
