//! Fakes and fixtures for driving a narwhal `JobExecutor` without a cluster.

use std::sync::Once;

pub mod cluster;
pub mod fixtures;
pub mod mock;
pub mod repository;

pub use cluster::FakeCluster;
pub use fixtures::*;
pub use mock::*;
pub use repository::*;

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once per process.
///
/// Honours `RUST_LOG`, defaults to `narwhal=debug`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("narwhal=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
