//! Shared helpers for integration tests.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes test logging once per binary.
///
/// Respects `RUST_LOG`; defaults to warnings so failing assertions stay
/// readable.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Marks the start of a test phase in the log.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = $name, "test phase");
    };
}

/// Asserts with expected/actual context in the failure message.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        assert!(
            $cond,
            "{}: expected {:?}, got {:?}",
            $msg, $expected, $actual
        );
    };
}
