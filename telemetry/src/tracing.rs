use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable enabling log output in tests when `RUST_LOG` is not set.
const ENABLE_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

/// Default filter used by test tracing when only [`ENABLE_TRACING_ENV_NAME`] is set.
const DEFAULT_TEST_FILTER: &str = "followsync=debug";

static INIT_TEST_TRACING: Once = Once::new();

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`.
///
/// Falls back to `{service_name}=info` when `RUST_LOG` is unset or invalid. Returns an error if a
/// global subscriber was already installed.
pub fn init_tracing(
    service_name: &str,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{service_name}=info")));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

/// Installs a test subscriber once per process.
///
/// Output is only produced when `RUST_LOG` or `ENABLE_TRACING` is set, so test runs stay quiet
/// by default. Safe to call from every test.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) if std::env::var(ENABLE_TRACING_ENV_NAME).is_ok() => {
                EnvFilter::new(DEFAULT_TEST_FILTER)
            }
            Err(_) => return,
        };

        // Another test harness may already own the global subscriber.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}
