//! # Structured Logging
//!
//! Provides the subscriber setup and span macros used across the crate.

use crate::config::{Config, ObservabilityConfig};
use crate::errors::{Error, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Create a tracing span for a graph build.
///
/// ```rust,ignore
/// let span = dag_span!("build");
/// let graph = GraphBuilder::new(span).build(&cache);
/// ```
#[macro_export]
macro_rules! dag_span {
    ($operation:expr) => {
        tracing::info_span!("dag_operation", operation = %$operation)
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::info_span!("dag_operation", operation = %$operation, $($field)*)
    };
}

/// Create a tracing span for xDS resource translation
#[macro_export]
macro_rules! xds_span {
    ($operation:expr) => {
        tracing::info_span!("xds_operation", operation = %$operation)
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::info_span!("xds_operation", operation = %$operation, $($field)*)
    };
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Fails when a
/// subscriber has already been installed or the directive does not parse.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| {
            Error::config(format!("Invalid log level '{}': {}", config.log_level, e))
        })?,
    };

    let builder = fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json_logs {
        builder.json().with_current_span(true).with_span_list(true).try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| Error::internal(format!("Failed to install log subscriber: {}", e)))
}

/// Log configuration at startup
pub fn log_config_info(config: &Config) {
    tracing::info!(
        http_listener = %format!("{}:{}", config.translator.http_address, config.translator.http_port),
        https_listener = %format!("{}:{}", config.translator.https_address, config.translator.https_port),
        root_namespaces = ?config.cache.root_namespaces,
        ingress_class = ?config.cache.ingress_class,
        default_http_filters = config.translator.default_http_filters.len(),
        "Switchyard compiler configuration"
    );
}
