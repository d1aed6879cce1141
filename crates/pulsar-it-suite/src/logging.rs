//! Test logging setup.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs a fmt subscriber writing through the test harness.
///
/// `RUST_LOG` is honoured; orchestrator and suite events default to `info`.
/// Safe to call from every test.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("pulsar_it_orchestrator=info,pulsar_it_suite=info,container_log=info")
        });

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}
