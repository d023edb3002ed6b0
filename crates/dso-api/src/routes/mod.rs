//! HTTP route handlers.
//!
//! Every `/v1` request goes through [`dispatch`], which matches it against
//! the current [`crate::router::RoutingTable`] instead of axum's static
//! router so datasets can be added and removed at runtime.

pub mod metadata;
pub mod resources;
pub mod root;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use serde_json::Value;
use tracing::Instrument;
use url::Url;

use dso_core::crs::Crs;
use dso_core::observability::dataset_span;

use crate::auth::Caller;
use crate::context::CONTENT_CRS_HEADER;
use crate::error::ApiResult;
use crate::metrics::RouteLabel;
use crate::pagination::{origin, request_url};
use crate::router::{Endpoint, Resolution};
use crate::server::AppState;

/// Media type of every `/v1` response body.
pub const HAL_JSON: &str = "application/hal+json";

/// `/v1` routes, dispatched through the dynamic routing table.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1", any(dispatch))
        .route("/v1/", any(dispatch))
        .route("/v1/*path", any(dispatch))
}

/// One `/v1` request, decoded once for all handlers.
#[derive(Debug)]
pub struct ApiRequest<'a> {
    /// Shared application state.
    pub state: &'a AppState,
    /// Authenticated caller.
    pub caller: &'a Caller,
    /// Request headers.
    pub headers: &'a HeaderMap,
    /// Request path as sent, still percent-encoded.
    pub path: String,
    /// Raw query string.
    pub raw_query: Option<&'a str>,
    /// Decoded query parameters in request order.
    pub params: Vec<(String, String)>,
    /// Peer address, when the server records it.
    pub client_ip: Option<IpAddr>,
}

impl ApiRequest<'_> {
    /// Returns the origin HAL links are rendered against.
    #[must_use]
    pub fn origin(&self) -> String {
        origin(self.state.config.base_url.as_deref(), self.headers)
    }

    /// Returns the absolute URL of this request.
    ///
    /// # Errors
    ///
    /// Returns a 400 [`ApiError`] when no valid URL can be formed.
    pub fn url(&self) -> ApiResult<Url> {
        request_url(&self.origin(), &self.path, self.raw_query)
    }
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let path = uri.path().to_string();
    let request_id = caller.request_id.clone();

    let resolution = match state.routes.resolve(&method, &path) {
        Ok(resolution) => resolution,
        Err(e) => return e.with_request_id(request_id).into_response(),
    };
    let label = resolution.endpoint.label();

    let request = ApiRequest {
        state: &state,
        caller: &caller,
        headers: &headers,
        path,
        raw_query: uri.query(),
        params: uri.query().map(parse_query).unwrap_or_default(),
        client_ip: connect_info.map(|ConnectInfo(addr)| addr.ip()),
    };

    let span = match &resolution.endpoint {
        Endpoint::List(resource)
        | Endpoint::Detail(resource)
        | Endpoint::Relation { resource, .. } => {
            dataset_span(label, resource.dataset_id(), resource.name())
        }
        Endpoint::DatasetIndex { dataset } => dataset_span(label, dataset, ""),
        Endpoint::Root | Endpoint::OpenApi => dataset_span(label, "", ""),
    };

    let result = handle(&request, &method, resolution).instrument(span).await;
    let mut response = match result {
        Ok(response) => response,
        Err(e) => e.with_request_id(request_id).into_response(),
    };
    response.extensions_mut().insert(RouteLabel(label));

    if method == Method::HEAD {
        let (parts, _) = response.into_parts();
        return Response::from_parts(parts, Body::empty());
    }
    response
}

async fn handle(
    request: &ApiRequest<'_>,
    method: &Method,
    resolution: Resolution,
) -> ApiResult<Response> {
    let resolution = request.state.routes.revalidate(resolution)?;
    if method == Method::OPTIONS {
        return metadata::options(request, &resolution.endpoint);
    }

    let snapshot = resolution.snapshot();
    match &resolution.endpoint {
        Endpoint::Root => root::datasets(request, resolution.table()),
        Endpoint::OpenApi => metadata::openapi(request, resolution.table()),
        Endpoint::DatasetIndex { dataset } => root::dataset_index(request, snapshot, dataset),
        Endpoint::List(resource) => resources::list(request, snapshot, resource).await,
        Endpoint::Detail(resource) => {
            resources::detail(
                request,
                snapshot,
                resource,
                resolution.id().unwrap_or_default(),
            )
            .await
        }
        Endpoint::Relation { resource, relation } => {
            resources::relation(
                request,
                snapshot,
                resource,
                resolution.id().unwrap_or_default(),
                relation,
            )
            .await
        }
    }
}

fn parse_query(raw: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect()
}

/// Renders a 200 HAL response, with `Content-Crs` when geometries are
/// involved.
pub(crate) fn hal_response(body: Value, content_crs: Option<Crs>) -> Response {
    let mut response = (StatusCode::OK, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(HAL_JSON));
    if let Some(crs) = content_crs {
        if let Ok(value) = HeaderValue::from_str(&crs.to_string()) {
            headers.insert(CONTENT_CRS_HEADER, value);
        }
    }
    response
}

/// Renders a 200 plain JSON response.
pub(crate) fn json_response(body: Value) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parameters_keep_repeats_and_order() {
        let params = parse_query("kleur=groen&kleur=rood&naam=a%2Ab&leeg=");
        assert_eq!(
            params,
            vec![
                ("kleur".to_string(), "groen".to_string()),
                ("kleur".to_string(), "rood".to_string()),
                ("naam".to_string(), "a*b".to_string()),
                ("leeg".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn hal_response_carries_content_crs() {
        let response = hal_response(serde_json::json!({}), Some(Crs::Wgs84));
        assert_eq!(response.headers()[CONTENT_TYPE], HAL_JSON);
        assert_eq!(response.headers()[CONTENT_CRS_HEADER], "EPSG:4326");

        let response = hal_response(serde_json::json!({}), None);
        assert!(response.headers().get(CONTENT_CRS_HEADER).is_none());
    }
}
