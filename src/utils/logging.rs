//! Logging utilities for the differential engine and its CLI
//!
//! - Respects RUST_LOG environment variable
//! - Falls back to the configured filter, then to "info"
//! - Safe to call more than once (tests, CLI subcommands)
//!
//! # Usage
//! ```rust
//! use bllvm_differential::utils::init_logging;
//!
//! init_logging(None); // Uses RUST_LOG or defaults to "info"
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn build_filter(filter: Option<&str>) -> EnvFilter {
    // RUST_LOG always takes precedence
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(filter.unwrap_or("info"))
}

/// Initialize human-readable logging on stderr
///
/// # Arguments
/// * `filter` - Optional log filter from config (e.g., "debug", "bllvm_differential::node=trace").
///              Ignored when RUST_LOG is set.
pub fn init_logging(filter: Option<&str>) {
    let result = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_writer(std::io::stderr)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(build_filter(filter))
        .try_init();

    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

/// Initialize logging with JSON output (for CI log aggregation)
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) {
    let result = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(std::io::stderr),
        )
        .with(build_filter(filter))
        .try_init();

    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

/// Initialize logging from the engine configuration
pub fn init_logging_from_config(config: &crate::config::LoggingConfig) {
    let filter = config.filter.as_deref();

    if config.json_format {
        #[cfg(feature = "json-logging")]
        {
            init_json_logging(filter);
            return;
        }
    }
    init_logging(filter);
}
