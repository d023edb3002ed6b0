//! Remote dataset proxying against an in-process upstream service.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::{Value, json};
use tower::ServiceExt;

use dso_api::config::{Config, RemoteConfig};
use dso_api::server::ServerBuilder;
use dso_core::store::MemoryStore;
use dso_registry::Registry;
use dso_test_utils::{TEST_JWT_SECRET, bearer, init_test_logging, remote_schema};

type Captured = Arc<Mutex<Option<HeaderMap>>>;

async fn people() -> Response {
    axum::Json(json!([
        {"id": "1", "naam": "Jan", "geboortedatum": "1980-01-01", "bsn": "123", "extra": "x"},
        {"id": "2", "naam": "Piet", "geboortedatum": null, "bsn": null}
    ]))
    .into_response()
}

async fn person(
    State(captured): State<Captured>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    match id.as_str() {
        "1" => {
            *captured.lock().unwrap() = Some(headers);
            axum::Json(json!({"id": "1", "naam": "Jan", "bsn": "123", "extra": "x"})).into_response()
        }
        "ontbreekt" => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "application/problem+json")],
            r#"{"type": "urn:apiexception:not_found", "title": "Not found", "status": 404}"#,
        )
            .into_response(),
        "traag" => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            axum::Json(json!({"id": "traag", "naam": "Traag"})).into_response()
        }
        "ongeldig" => axum::Json(json!({"id": "ongeldig", "geboortedatum": "gisteren"})).into_response(),
        "login" => (
            StatusCode::FOUND,
            [(header::LOCATION, "https://login.example.com/oauth/authorize?client_id=dso")],
        )
            .into_response(),
        "1?x=y" => axum::Json(json!({"id": "1?x=y", "naam": "Vraag"})).into_response(),
        "geheim" => (
            StatusCode::FORBIDDEN,
            [(header::CONTENT_TYPE, "text/html")],
            "<html>Forbidden</html>",
        )
            .into_response(),
        _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Starts the upstream and returns its base URL and the header capture.
async fn upstream() -> (String, Captured) {
    let captured: Captured = Arc::new(Mutex::new(None));
    let app = Router::new()
        .route("/personen/", get(people))
        .route("/personen/:id", get(person))
        .with_state(Arc::clone(&captured));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/"), captured)
}

fn proxy(url: &str) -> Router {
    init_test_logging();
    let registry = Arc::new(Registry::new());
    registry.register_dataset(remote_schema(url)).unwrap();
    let config = Config {
        remote: RemoteConfig {
            timeout_secs: 1,
            ..RemoteConfig::default()
        },
        ..Config::default()
    };
    ServerBuilder::new()
        .config(config)
        .jwt_hs256_secret(TEST_JWT_SECRET)
        .registry(registry)
        .store(Arc::new(MemoryStore::new()))
        .build()
        .unwrap()
        .test_router()
}

async fn call(router: &Router, uri: &str, headers: &[(&str, String)]) -> (StatusCode, Value) {
    let mut builder = Request::builder().uri(uri).header("host", "testserver");
    for (name, value) in headers {
        builder = builder.header(*name, value);
    }
    let mut request = builder.body(Body::empty()).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 4321))));
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn list_is_projected_into_hal_envelope() {
    let (url, _) = upstream().await;
    let router = proxy(&url);

    let (status, body) = call(&router, "/v1/remote/personen/", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["_links"]["self"]["href"], "http://testserver/v1/remote/personen/");

    let items = body["_embedded"]["personen"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(
        items[0]["_links"]["self"]["href"],
        "http://testserver/v1/remote/personen/1/"
    );
    assert_eq!(items[0]["naam"], "Jan");
    assert!(items[0].get("bsn").is_none());
    assert!(items[0].get("extra").is_none());
    assert!(items[1].get("geboortedatum").is_none());
}

#[tokio::test]
async fn protected_remote_field_needs_scope() {
    let (url, _) = upstream().await;
    let router = proxy(&url);

    let (status, body) = call(
        &router,
        "/v1/remote/personen/1/",
        &[("authorization", bearer(&["BRP/R"]))],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bsn"], "123");
    assert_eq!(body["_links"]["self"]["href"], "http://testserver/v1/remote/personen/1/");
}

#[tokio::test]
async fn detail_forwards_client_headers() {
    let (url, captured) = upstream().await;
    let router = proxy(&url);

    let (status, _) = call(
        &router,
        "/v1/remote/personen/1/",
        &[
            ("x-forwarded-for", "1.2.3.4".to_string()),
            ("x-unique-id", "uniek-42".to_string()),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let headers = captured.lock().unwrap().take().unwrap();
    assert_eq!(headers["x-forwarded-for"], "1.2.3.4 10.0.0.7");
    assert_eq!(headers["x-correlation-id"], "uniek-42");
    assert_eq!(headers["accept"], "application/json; charset=utf-8");
}

#[tokio::test]
async fn reserved_characters_in_id_stay_in_the_path() {
    let (url, captured) = upstream().await;
    let router = proxy(&url);

    let (status, body) = call(&router, "/v1/remote/personen/1%3Fx=y/", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "1?x=y");
    assert_eq!(body["naam"], "Vraag");
    assert!(captured.lock().unwrap().is_none());

    let (status, _) = call(&router, "/v1/remote/personen/%2E%2E/", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upstream_not_found_is_not_found() {
    let (url, _) = upstream().await;
    let router = proxy(&url);
    let (status, body) = call(&router, "/v1/remote/personen/ontbreekt/", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn invalid_upstream_payload_is_bad_gateway() {
    let (url, _) = upstream().await;
    let router = proxy(&url);
    let (status, body) = call(&router, "/v1/remote/personen/ongeldig/", &[]).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "UPSTREAM_VALIDATION");
    let errors = &body["detail"]["x-validation-errors"];
    assert!(errors.get("naam").is_some());
    assert!(errors.get("geboortedatum").is_some());
}

#[tokio::test]
async fn oauth_redirect_means_invalid_token() {
    let (url, _) = upstream().await;
    let router = proxy(&url);
    let (status, _) = call(&router, "/v1/remote/personen/login/", &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn upstream_forbidden_is_forbidden() {
    let (url, _) = upstream().await;
    let router = proxy(&url);
    let (status, body) = call(&router, "/v1/remote/personen/geheim/", &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.get("detail").is_none_or(Value::is_null));
}

#[tokio::test]
async fn upstream_server_error_is_bad_gateway() {
    let (url, _) = upstream().await;
    let router = proxy(&url);
    let (status, _) = call(&router, "/v1/remote/personen/kapot/", &[]).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn slow_upstream_times_out() {
    let (url, _) = upstream().await;
    let router = proxy(&url);
    let (status, body) = call(&router, "/v1/remote/personen/traag/", &[]).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["code"], "GATEWAY_TIMEOUT");
}

#[tokio::test]
async fn unreachable_upstream_is_unavailable() {
    let router = proxy("http://127.0.0.1:1/");
    let (status, body) = call(&router, "/v1/remote/personen/", &[]).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn remote_tables_have_no_relation_routes() {
    let (url, _) = upstream().await;
    let router = proxy(&url);
    let (status, _) = call(&router, "/v1/remote/personen/1/naam/", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
