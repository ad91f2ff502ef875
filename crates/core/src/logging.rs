//! Logging initialization and configuration.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when neither `RUST_LOG` nor a configured filter is present.
pub const DEFAULT_LOG_FILTER: &str = "info,renderer_renderer=debug";

/// Initialize the logging system with tracing.
///
/// `RUST_LOG` takes precedence over `default_filter`. An invalid
/// `default_filter` falls back to [`DEFAULT_LOG_FILTER`].
///
/// Calling this more than once is harmless; later calls keep the subscriber
/// installed by the first one.
///
/// # Example
/// ```
/// renderer_core::init_logging("info");
/// tracing::info!("Renderer initialized");
/// ```
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();

    if installed.is_err() {
        tracing::debug!("Logging already initialized, keeping existing subscriber");
    }
}
