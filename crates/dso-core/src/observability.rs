//! Observability infrastructure for the DSO API.
//!
//! Structured logging with consistent spans. This module provides the
//! initialization helper and span constructors used across all crates.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `dso_filters=debug`)
///
/// # Example
///
/// ```rust
/// use dso_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for request handling against one dataset table.
///
/// # Example
///
/// ```rust
/// use dso_core::observability::dataset_span;
///
/// let span = dataset_span("list", "gebieden", "buurten");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn dataset_span(operation: &str, dataset: &str, table: &str) -> Span {
    tracing::info_span!("dataset", op = operation, dataset = dataset, table = table)
}

/// Creates a span for registry mutations (dataset load/unload, route rebuilds).
#[must_use]
pub fn registry_span(operation: &str, dataset: &str) -> Span {
    tracing::info_span!("registry", op = operation, dataset = dataset)
}
