//! # dso-api
//!
//! HTTP layer of the dynamic DSO API.
//!
//! Datasets are described by schema documents and registered at runtime;
//! this crate turns the registry into REST endpoints:
//!
//! - **Routing**: a routing table rebuilt from registry snapshots and
//!   swapped atomically, so datasets come and go without a restart
//! - **Authorization**: bearer tokens carry scopes; dataset, table and field
//!   scopes decide what a caller may see
//! - **Rendering**: HAL envelopes with pagination, relation links,
//!   expansion and CRS negotiation
//! - **Proxying**: remote datasets are fetched from their upstream service
//!
//! ## Endpoints
//!
//! ```text
//! GET /health                                    - Health check
//! GET /ready                                     - Readiness check
//! GET /metrics                                   - Prometheus metrics
//! GET /v1/                                       - Dataset listing
//! GET /v1/openapi.json                           - OpenAPI document
//! GET /v1/{dataset}/                             - Dataset index
//! GET /v1/{dataset}/{table}/                     - Paginated listing
//! GET /v1/{dataset}/{table}/{id}/                - One object
//! GET /v1/{dataset}/{table}/{id}/{relation}/     - Related objects
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use dso_api::server::Server;
//!
//! let server = Server::builder().http_port(8080).build()?;
//! server.registry().register_dataset(schema)?;
//! server.routes().reload();
//! server.serve().await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod hal;
pub mod metrics;
pub mod pagination;
pub mod permissions;
pub mod remote;
pub mod router;
pub mod routes;
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::auth::Caller;
    pub use crate::config::Config;
    pub use crate::context::RequestContext;
    pub use crate::error::{ApiError, ApiResult};
    pub use crate::router::DynamicRouter;
    pub use crate::server::{Server, ServerBuilder};
}
