pub mod builders;
pub mod fake_executor;

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
///
/// Filter comes from `RUST_LOG`, default `info`. Output is captured by the
/// harness and shown for failing tests only.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Fail the test if `f` takes longer than five seconds.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    with_timeout_secs(5, f).await
}

/// Run a future with a custom timeout; interpreter startup can be slow on CI.
pub async fn with_timeout_secs<F, T>(secs: u64, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(secs), f)
        .await
        .unwrap_or_else(|_| panic!("Test timed out after {secs} seconds"))
}
