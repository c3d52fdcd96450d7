//! Shared helpers for integration tests.

use ringflow::CancelFlag;
use std::sync::Once;
use std::time::{Duration, Instant};

/// A token that cancels itself after `millis`, for tests that want to
/// assert a blocking call returns instead of hanging forever on a bug.
#[allow(dead_code)]
pub fn deadline_token(millis: u64) -> CancelFlag {
    CancelFlag::with_deadline(Instant::now() + Duration::from_millis(millis))
}

static LOG_INIT: Once = Once::new();

/// Installs a `tracing` fmt subscriber once per test binary, so the
/// discard/padding/worker-exception log lines surface under `--nocapture`
/// instead of going nowhere.
#[allow(dead_code)]
pub fn init_tracing() {
    LOG_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .try_init();
    });
}
