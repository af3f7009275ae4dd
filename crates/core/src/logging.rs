//! Tracing subscriber setup.

use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `default_level`.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init(default_level: LevelFilter) -> bool {
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Subscriber for tests: writes through the test harness capture.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
