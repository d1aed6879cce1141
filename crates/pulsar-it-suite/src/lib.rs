//! Suite scaffolding for Pulsar integration tests.
//!
//! A scenario suite owns a [`ClusterTestBase`], sets its cluster up once,
//! drives it through the orchestrator's accessors and tears it down at the
//! end, whatever the outcome of the start.
//!
//! # Modules
//!
//! - [`suite`]: One-cluster-per-suite setup and teardown
//! - [`auth`]: Token authentication keys and cluster wiring
//! - [`naming`]: Random cluster, namespace and topic names
//! - [`providers`]: Service URL and topic-kind parameter sets
//! - [`logging`]: Test log initialisation
//!
//! # Running
//!
//! ```bash
//! # In-memory runtime only
//! cargo test -p pulsar-it-suite
//!
//! # Scenarios against a local Docker daemon
//! RUST_LOG=info cargo test -p pulsar-it-suite -- --ignored --nocapture
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod error;
pub mod logging;
pub mod naming;
pub mod providers;
pub mod suite;

pub use auth::AuthTokens;
pub use error::{Result, SuiteError};
pub use logging::init_test_logging;
pub use naming::{generate_namespace_name, generate_topic_name, generate_topic_name_in, random_name};
pub use providers::{service_url_and_topics, service_urls};
pub use suite::ClusterTestBase;
