//! API server implementation.
//!
//! Provides health, ready, metrics and the dynamic `/v1` endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower::limit::ConcurrencyLimitLayer;
use tower::timeout::TimeoutLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use dso_core::Result;
use dso_core::scopes::ProfileSet;
use dso_core::store::{MemoryStore, RowStore};
use dso_registry::Registry;

use crate::auth::{REQUEST_ID_HEADER, SCOPES_HEADER};
use crate::config::{Config, CorsConfig};
use crate::context::{ACCEPT_CRS_HEADER, CONTENT_CRS_HEADER};
use crate::error::ApiError;
use crate::remote::{RemoteClient, RemoteError};
use crate::router::DynamicRouter;

// ============================================================================
// Health and Ready Responses
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadyResponse {
    /// Service readiness status.
    pub ready: bool,
    /// Number of datasets currently routed.
    pub datasets: usize,
    /// Optional message about readiness state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all request handlers.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Dataset registry.
    pub registry: Arc<Registry>,
    /// Hot-reloadable routing table.
    pub routes: Arc<DynamicRouter>,
    /// Row store for local datasets.
    pub store: Arc<dyn RowStore>,
    /// Field-access profiles.
    pub profiles: Arc<ProfileSet>,
    /// Client for remote datasets.
    pub remote: RemoteClient,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("routes", &self.routes)
            .field("store", &"<RowStore>")
            .field("profiles", &self.profiles.len())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Creates application state around an existing registry and store.
    ///
    /// The routing table is built from the registry's current snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`RemoteError`] when the upstream HTTP client cannot be
    /// built.
    pub fn new(
        config: Config,
        registry: Arc<Registry>,
        store: Arc<dyn RowStore>,
        profiles: ProfileSet,
    ) -> std::result::Result<Self, RemoteError> {
        let remote = RemoteClient::new(&config.remote)?;
        let routes = Arc::new(DynamicRouter::new(Arc::clone(&registry)));
        Ok(Self {
            config,
            registry,
            routes,
            store,
            profiles: Arc::new(profiles),
            remote,
        })
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint handler.
///
/// Returns 200 OK if the service is alive. This is a shallow check
/// that doesn't verify dependencies.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness check endpoint handler.
///
/// Returns 200 OK once the row store answers.
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let datasets = state.registry.snapshot().datasets().count();
    match state.store.table_names().await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                datasets,
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                datasets,
                message: Some(format!("store check failed: {e}")),
            }),
        ),
    }
}

async fn handle_timeout_error(_err: tower::BoxError) -> ApiError {
    ApiError::service_unavailable("Request timed out")
}

// ============================================================================
// Server
// ============================================================================

/// The DSO API server.
pub struct Server {
    state: Arc<AppState>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("state", &self.state).finish()
    }
}

impl Server {
    /// Creates a server with an empty registry and in-memory store.
    ///
    /// # Errors
    ///
    /// Returns a [`RemoteError`] when the upstream HTTP client cannot be
    /// built.
    pub fn new(config: Config) -> std::result::Result<Self, RemoteError> {
        ServerBuilder::new().config(config).build()
    }

    /// Creates a new `ServerBuilder`.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// Returns the dataset registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.state.registry
    }

    /// Returns the dynamic router, e.g. to reload it after registry changes.
    #[must_use]
    pub fn routes(&self) -> &Arc<DynamicRouter> {
        &self.state.routes
    }

    /// Creates the router with all routes and middleware.
    fn create_router(&self) -> Router {
        let state = Arc::clone(&self.state);
        let cors = self.build_cors_layer();

        let auth_layer =
            middleware::from_fn_with_state(Arc::clone(&state), crate::auth::auth_middleware);
        let metrics_layer = middleware::from_fn(crate::metrics::metrics_middleware);

        let router = Router::new()
            // Health, ready, and metrics endpoints (no auth required)
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/metrics", get(crate::metrics::serve_metrics))
            .merge(crate::routes::api_routes().layer(auth_layer));

        let router = match state.config.concurrency_limit {
            Some(limit) => router.layer(ConcurrencyLimitLayer::new(limit)),
            None => router,
        };

        let router = match state.config.request_timeout_secs {
            Some(secs) => router.layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(handle_timeout_error))
                    .layer(TimeoutLayer::new(Duration::from_secs(secs))),
            ),
            None => router,
        };

        router
            // Middleware (order matters): Metrics outermost for timing, then trace, then CORS.
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(metrics_layer)
            .with_state(state)
    }

    /// Builds the CORS layer from configuration.
    fn build_cors_layer(&self) -> CorsLayer {
        let cors_config = &self.state.config.cors;
        let cors = Self::build_cors_base(cors_config);
        Self::apply_cors_allowed_origins(cors, cors_config)
    }

    fn build_cors_base(cors_config: &CorsConfig) -> CorsLayer {
        CorsLayer::new()
            .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
            .allow_headers([
                header::AUTHORIZATION,
                header::ACCEPT,
                header::HeaderName::from_static(ACCEPT_CRS_HEADER),
                header::HeaderName::from_static(REQUEST_ID_HEADER),
                header::HeaderName::from_static(SCOPES_HEADER),
                header::HeaderName::from_static("x-correlation-id"),
            ])
            .expose_headers([
                header::CONTENT_TYPE,
                header::CONTENT_LENGTH,
                header::HeaderName::from_static(CONTENT_CRS_HEADER),
                header::HeaderName::from_static(REQUEST_ID_HEADER),
            ])
            .max_age(Duration::from_secs(cors_config.max_age_seconds))
    }

    fn parse_cors_origins(cors_config: &CorsConfig) -> Vec<HeaderValue> {
        let mut allowed = Vec::new();
        for origin in &cors_config.allowed_origins {
            match HeaderValue::from_str(origin) {
                Ok(value) => allowed.push(value),
                Err(_) => {
                    tracing::error!(
                        origin = %origin,
                        "Invalid CORS origin; expected a valid HeaderValue"
                    );
                }
            }
        }
        allowed
    }

    fn apply_cors_allowed_origins(cors: CorsLayer, cors_config: &CorsConfig) -> CorsLayer {
        if cors_config.allowed_origins.is_empty() {
            return cors;
        }

        if cors_config.allowed_origins.iter().any(|origin| origin == "*") {
            if cors_config.allowed_origins.len() == 1 {
                return cors.allow_origin(Any);
            }
            tracing::error!(
                origins = ?cors_config.allowed_origins,
                "Invalid CORS config: '*' must be the only allowed origin"
            );
            return cors;
        }

        let allowed = Self::parse_cors_origins(cors_config);
        if allowed.is_empty() {
            tracing::warn!("All configured CORS origins were invalid; disabling CORS");
            cors
        } else {
            tracing::info!(origins = ?cors_config.allowed_origins, "CORS configured");
            cors.allow_origin(AllowOrigin::list(allowed))
        }
    }

    /// Starts the server and blocks until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to the port.
    pub async fn serve(&self) -> Result<()> {
        self.state.config.validate()?;
        crate::metrics::init_metrics();

        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.create_router();

        tracing::info!(
            http_port = self.state.config.http_port,
            datasets = self.state.registry.snapshot().datasets().count(),
            routes = self.state.routes.table().len(),
            "Starting DSO API server"
        );

        let listener =
            tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| dso_core::Error::Internal {
                    message: format!("failed to bind to {addr}: {e}"),
                })?;

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| dso_core::Error::Internal {
            message: format!("server error: {e}"),
        })?;

        Ok(())
    }

    /// Creates a test router for the server.
    ///
    /// Useful for integration tests that drive routes without binding a
    /// port. Requests carry no `ConnectInfo` unless the test inserts one.
    #[doc(hidden)]
    pub fn test_router(&self) -> Router {
        self.create_router()
    }
}

/// Builder for constructing a server.
pub struct ServerBuilder {
    config: Config,
    registry: Arc<Registry>,
    store: Arc<dyn RowStore>,
    profiles: ProfileSet,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("store", &"<RowStore>")
            .finish_non_exhaustive()
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            registry: Arc::new(Registry::new()),
            store: Arc::new(MemoryStore::new()),
            profiles: ProfileSet::default(),
        }
    }
}

impl ServerBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the HTTP port.
    #[must_use]
    pub fn http_port(mut self, port: u16) -> Self {
        self.config.http_port = port;
        self
    }

    /// Enables debug mode (pretty logs, `X-Scopes` header auth).
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug = enabled;
        self
    }

    /// Sets the absolute URL prefix for HAL links.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Sets the HS256 secret for bearer tokens.
    #[must_use]
    pub fn jwt_hs256_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.jwt.hs256_secret = Some(secret.into());
        self
    }

    /// Uses an existing registry.
    #[must_use]
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    /// Uses an explicit row store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn RowStore>) -> Self {
        self.store = store;
        self
    }

    /// Sets the field-access profiles.
    #[must_use]
    pub fn profiles(mut self, profiles: ProfileSet) -> Self {
        self.profiles = profiles;
        self
    }

    /// Builds the server.
    ///
    /// # Errors
    ///
    /// Returns a [`RemoteError`] when the upstream HTTP client cannot be
    /// built.
    pub fn build(self) -> std::result::Result<Server, RemoteError> {
        Ok(Server {
            state: Arc::new(AppState::new(
                self.config,
                self.registry,
                self.store,
                self.profiles,
            )?),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
