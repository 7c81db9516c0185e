//! Shared helpers for the `copernicus` test suites.
//!
//! - [`builders`]: server config, commands, worker requests and heartbeats
//! - [`library`]: the `t` function library used by the scenarios
//! - [`fake_executor`]: runs queued tasks when a test asks for it

pub mod builders;
pub mod fake_executor;
pub mod library;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Default budget for anything a test awaits.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test-writer subscriber once per test binary. Output only shows
/// for failing tests unless run with `--nocapture`; `RUST_LOG` overrides the
/// `copernicus=debug` default.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("copernicus=debug,warn"));
        // another harness may have installed one first
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Await `f`, failing the test after [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(v) => v,
        Err(_) => panic!("test timed out after {TEST_TIMEOUT:?}"),
    }
}

/// Poll `cond` every 10ms until it holds, failing after [`TEST_TIMEOUT`].
pub async fn eventually<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    with_timeout(async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}
