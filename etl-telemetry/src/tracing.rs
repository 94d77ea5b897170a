use std::sync::Once;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Filter applied when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "info";

/// Filter applied to tests when `RUST_LOG` is not set.
const DEFAULT_TEST_LOG_FILTER: &str = "etl=debug";

static TEST_TRACING: Once = Once::new();

/// Installs a global formatting subscriber tagged with `service_name`.
///
/// Honours `RUST_LOG`. Returns an error if a global subscriber was already installed.
pub fn init_tracing(
    service_name: &'static str,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    ::tracing::info!(service = service_name, "tracing initialized");

    Ok(())
}

/// Installs a test writer subscriber once per process.
///
/// Safe to call at the start of every test; only the first call has an effect.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_LOG_FILTER));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_test_writer()
            .try_init();
    });
}
