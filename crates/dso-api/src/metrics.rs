//! Metrics middleware and instrumentation for the DSO API.
//!
//! Provides Prometheus metrics for:
//! - Request duration and throughput
//! - Routing table reloads
//! - Remote proxy calls

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::auth::header_string;
use crate::server::AppState;

// ============================================================================
// Metric Names
// ============================================================================

/// API request duration histogram.
pub const API_REQUEST_DURATION: &str = "api_request_duration_seconds";

/// API request counter.
pub const API_REQUEST_TOTAL: &str = "api_request_total";

/// Routing table reload counter.
pub const ROUTES_RELOADED: &str = "dso_routes_reloaded_total";

/// Number of routes in the published routing table.
pub const ROUTING_TABLE_ROUTES: &str = "dso_routing_table_routes";

/// Remote proxy call counter, labelled by outcome.
pub const REMOTE_CALLS: &str = "dso_remote_calls_total";

const UNMATCHED_ENDPOINT: &str = "unmatched";

/// Response extension naming the dynamic route that served a request.
///
/// API routes are matched by [`crate::router::DynamicRouter`], so axum's
/// `MatchedPath` only sees the catch-all pattern.
#[derive(Debug, Clone, Copy)]
pub struct RouteLabel(pub &'static str);

// ============================================================================
// Prometheus Recorder
// ============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initializes the global metrics recorder with Prometheus exporter.
///
/// Safe to call multiple times; subsequent calls are no-ops.
///
/// # Panics
///
/// Panics if the Prometheus recorder cannot be installed. The server should
/// not start without metrics.
#[allow(clippy::panic)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .unwrap_or_else(|e| panic!("failed to install prometheus recorder: {e}"));

            describe_histogram!(API_REQUEST_DURATION, "Duration of API requests in seconds");
            describe_counter!(API_REQUEST_TOTAL, "Total number of API requests");
            describe_counter!(ROUTES_RELOADED, "Total number of routing table rebuilds");
            describe_gauge!(
                ROUTING_TABLE_ROUTES,
                "Number of routes in the published routing table"
            );
            describe_counter!(REMOTE_CALLS, "Total number of upstream calls by outcome");

            tracing::info!("Prometheus metrics recorder initialized");
            handle
        })
        .clone()
}

/// Returns the global Prometheus handle, if initialized.
#[must_use]
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// ============================================================================
// Metrics Middleware
// ============================================================================

fn endpoint_label<B>(request: &Request<B>) -> String {
    request.extensions().get::<MatchedPath>().map_or_else(
        || UNMATCHED_ENDPOINT.to_string(),
        |path| path.as_str().to_string(),
    )
}

/// Middleware that records request metrics.
///
/// Captures:
/// - `api_request_duration_seconds{endpoint, method, status_class}`
/// - `api_request_total{endpoint, method, status_class}`
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let matched = endpoint_label(&request);
    let method = request.method().to_string();

    let response = next.run(request).await;

    let path = response
        .extensions()
        .get::<RouteLabel>()
        .map_or(matched, |label| label.0.to_string());
    let duration = start.elapsed().as_secs_f64();
    let status_class = status_class(response.status());

    let labels = [
        ("endpoint", path.clone()),
        ("method", method.clone()),
        ("status_class", status_class.to_string()),
    ];

    histogram!(API_REQUEST_DURATION, &labels).record(duration);
    counter!(API_REQUEST_TOTAL, &labels).increment(1);

    if duration > 1.0 {
        tracing::warn!(
            endpoint = %path,
            method = %method,
            status = %response.status(),
            duration_secs = %duration,
            "Slow request detected"
        );
    }

    response
}

/// Returns the status class (2xx, 3xx, 4xx, 5xx) for a status code.
fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "unknown",
    }
}

/// Records the outcome of one upstream call.
pub fn record_remote_call(outcome: &'static str) {
    counter!(REMOTE_CALLS, "outcome" => outcome).increment(1);
}

// ============================================================================
// Metrics Endpoint
// ============================================================================

/// Handler for the `/metrics` endpoint.
///
/// Returns Prometheus-formatted metrics text. When a metrics secret is
/// configured the caller must present it.
pub async fn serve_metrics(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(secret) = state.config.metrics_secret.as_deref() {
        if !secret_matches(&headers, secret) {
            return (
                StatusCode::UNAUTHORIZED,
                [("content-type", "text/plain; charset=utf-8")],
                "Unauthorized".to_string(),
            )
                .into_response();
        }
    }

    prometheus_handle()
        .map_or_else(
            || {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    [("content-type", "text/plain; charset=utf-8")],
                    "Metrics not initialized".to_string(),
                )
            },
            |handle| {
                (
                    StatusCode::OK,
                    [("content-type", "text/plain; charset=utf-8")],
                    handle.render(),
                )
            },
        )
        .into_response()
}

fn secret_matches(headers: &HeaderMap, secret: &str) -> bool {
    header_string(headers, "x-metrics-secret").as_deref() == Some(secret)
        || header_string(headers, "authorization")
            .as_deref()
            .and_then(|raw| raw.strip_prefix("Bearer "))
            == Some(secret)
}
