//! Proxy for datasets served by an upstream JSON service.
//!
//! Upstream calls carry a default `Accept` header, the allow-listed request
//! headers, an extended `X-Forwarded-For` and the caller's correlation id.
//! Calls are never retried. Upstream failures are mapped onto
//! [`RemoteError`], which the HTTP layer renders as 4xx/5xx responses.

use std::net::IpAddr;
use std::time::Duration;

use axum::http::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use chrono::{NaiveDate, NaiveTime};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Map, Value, json};
use thiserror::Error;

use dso_core::schema::{FieldType, TableSchema};

use crate::config::RemoteConfig;
use crate::metrics::record_remote_call;

/// `Accept` header sent upstream.
pub const DEFAULT_ACCEPT: &str = "application/json; charset=utf-8";

const PROBLEM_JSON: &str = "application/problem+json";
const MISSING_CREDENTIALS_BODY: &[u8] = b"Missing required MKS headers";

/// Everything except unreserved characters.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// An upstream call failed or returned unusable data.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The HTTP client could not be constructed.
    #[error("remote client could not be built: {message}")]
    Client {
        /// Builder error description.
        message: String,
    },

    /// Upstream redirected to its login page.
    #[error("upstream rejected the token")]
    InvalidToken,

    /// Upstream reported missing service credentials.
    #[error("internal credentials are missing")]
    MissingCredentials,

    /// Upstream rejected the request with a problem document.
    #[error("upstream rejected the request")]
    BadRequest {
        /// The forwarded problem document.
        detail: Value,
    },

    /// Upstream denied access.
    #[error("upstream denied access")]
    Forbidden {
        /// Upstream response body, unless it was HTML.
        detail: Option<Value>,
    },

    /// Upstream has no such object.
    #[error("upstream object not found")]
    NotFound {
        /// Upstream response body, unless it was HTML.
        detail: Option<Value>,
    },

    /// Upstream answered with a status this proxy does not forward.
    #[error("{message}")]
    Unexpected {
        /// Client-facing message.
        message: String,
        /// Upstream response body, unless it was HTML.
        detail: Option<Value>,
    },

    /// The upstream payload does not match the table schema.
    #[error("upstream payload did not validate")]
    Validation {
        /// Per-field errors.
        errors: Value,
        /// The payload as received.
        raw: Value,
    },

    /// The upstream call timed out.
    #[error("upstream call to {url} timed out")]
    Timeout {
        /// Called URL.
        url: String,
    },

    /// The upstream could not be reached.
    #[error("upstream unavailable: {message}")]
    Unavailable {
        /// Transport error description.
        message: String,
    },
}

impl RemoteError {
    fn outcome(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Unavailable { .. } => "unavailable",
            Self::Validation { .. } => "invalid_payload",
            _ => "http_error",
        }
    }
}

/// Request details forwarded upstream.
#[derive(Debug, Clone, Copy)]
pub struct Forwarded<'a> {
    /// Headers of the incoming request.
    pub headers: &'a HeaderMap,
    /// Peer address of the incoming request.
    pub client_ip: Option<IpAddr>,
}

/// HTTP client for remote datasets.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    passthrough: Vec<HeaderName>,
}

impl RemoteClient {
    /// Creates a client with the configured timeout and header allow-list.
    ///
    /// Redirects are not followed so login redirects can be recognized.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Client`] when the TLS backend or the
    /// configured options cannot be initialized.
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| RemoteError::Client {
                message: e.to_string(),
            })?;
        let passthrough = config
            .headers_passthrough
            .iter()
            .filter_map(|name| match HeaderName::try_from(name.as_str()) {
                Ok(name) => Some(name),
                Err(e) => {
                    tracing::warn!(header = %name, error = %e, "ignoring invalid passthrough header");
                    None
                }
            })
            .collect();
        Ok(Self { http, passthrough })
    }

    /// Builds the headers sent upstream.
    #[must_use]
    pub fn outgoing_headers(&self, forwarded: Forwarded<'_>) -> HeaderMap {
        let incoming = forwarded.headers;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));

        let existing = incoming
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let client_ip = forwarded.client_ip.map(|ip| ip.to_string());
        let forward = match (existing, client_ip) {
            (Some(existing), Some(ip)) => Some(format!("{existing} {ip}")),
            (Some(existing), None) => Some(existing.to_string()),
            (None, Some(ip)) => Some(ip),
            (None, None) => None,
        };
        if let Some(value) = forward.and_then(|v| HeaderValue::from_str(&v).ok()) {
            headers.insert("x-forwarded-for", value);
        }

        let correlation = ["x-correlation-id", "x-unique-id"]
            .iter()
            .find_map(|name| incoming.get(*name).filter(|v| !v.is_empty()));
        if let Some(value) = correlation {
            headers.insert("x-correlation-id", value.clone());
        }

        for name in &self.passthrough {
            if let Some(value) = incoming.get(name).filter(|v| !v.is_empty()) {
                headers.insert(name.clone(), value.clone());
            }
        }
        headers
    }

    /// Performs one GET against `url` and returns the decoded JSON body.
    ///
    /// # Errors
    ///
    /// Returns a [`RemoteError`] for transport failures, non-200 responses
    /// and bodies that are not JSON.
    pub async fn get(&self, url: &str, forwarded: Forwarded<'_>) -> Result<Value, RemoteError> {
        let result = self.call(url, forwarded).await;
        match &result {
            Ok(_) => record_remote_call("ok"),
            Err(e) => record_remote_call(e.outcome()),
        }
        result
    }

    async fn call(&self, url: &str, forwarded: Forwarded<'_>) -> Result<Value, RemoteError> {
        tracing::debug!(url, "forwarding call");
        let response = self
            .http
            .get(url)
            .headers(self.outgoing_headers(forwarded))
            .send()
            .await
            .map_err(|e| transport_error(url, &e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(url, &e))?;

        if status == StatusCode::OK {
            return serde_json::from_slice(&body).map_err(|e| {
                tracing::error!(url, error = %e, "upstream returned invalid JSON");
                RemoteError::Unexpected {
                    message: "Upstream returned invalid JSON".to_string(),
                    detail: None,
                }
            });
        }
        Err(http_error(status, &headers, &body))
    }
}

/// Joins `id` onto `endpoint` as exactly one percent-encoded path segment.
///
/// `None` for `.` and `..`, which URL parsing would resolve as dot segments
/// in any encoding.
#[must_use]
pub fn detail_url(endpoint: &str, id: &str) -> Option<String> {
    if matches!(id, "" | "." | "..") {
        return None;
    }
    let base = if endpoint.ends_with('/') {
        endpoint.to_string()
    } else {
        format!("{endpoint}/")
    };
    Some(format!("{base}{}", utf8_percent_encode(id, PATH_SEGMENT)))
}

fn transport_error(url: &str, error: &reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        tracing::error!(url, error = %error, "proxy call failed, timeout from remote server");
        RemoteError::Timeout {
            url: url.to_string(),
        }
    } else {
        tracing::error!(url, error = %error, "proxy call failed, error when connecting to server");
        RemoteError::Unavailable {
            message: error.to_string(),
        }
    }
}

fn http_error(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> RemoteError {
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), "proxy call failed");
    } else {
        tracing::debug!(status = status.as_u16(), "proxy call failed");
    }
    tracing::debug!(body = %String::from_utf8_lossy(body), "upstream response body");

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let is_problem = content_type == PROBLEM_JSON;
    let detail = if content_type.starts_with("text/html") {
        None
    } else {
        let text = String::from_utf8_lossy(body).into_owned();
        Some(serde_json::from_slice(body).unwrap_or(Value::String(text)))
    };

    if status.is_redirection()
        && headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|location| location.contains("/oauth/authorize"))
    {
        return RemoteError::InvalidToken;
    }

    match status {
        StatusCode::BAD_REQUEST if body == MISSING_CREDENTIALS_BODY => {
            RemoteError::MissingCredentials
        }
        StatusCode::BAD_REQUEST if is_problem => RemoteError::BadRequest {
            detail: detail.unwrap_or(Value::Null),
        },
        StatusCode::BAD_REQUEST => RemoteError::Unexpected {
            message: "Upstream rejected the request".to_string(),
            detail,
        },
        StatusCode::FORBIDDEN => RemoteError::Forbidden { detail },
        StatusCode::NOT_FOUND => RemoteError::NotFound { detail },
        _ => {
            tracing::error!(
                status = status.as_u16(),
                "proxy call failed, unexpected status code from endpoint"
            );
            RemoteError::Unexpected {
                message: format!("Unexpected HTTP {} from internal endpoint", status.as_u16()),
                detail,
            }
        }
    }
}

// ============================================================================
// Payload validation and rendering
// ============================================================================

/// Validates one upstream object against the table's fields.
///
/// Returns a map of field name to error messages; empty when valid.
#[must_use]
pub fn validate_object(table: &TableSchema, value: &Value) -> Map<String, Value> {
    let mut errors = Map::new();
    let Some(object) = value.as_object() else {
        errors.insert(
            "non_field_errors".into(),
            json!([format!(
                "Invalid data. Expected a dictionary, but got {}.",
                json_type(value)
            )]),
        );
        return errors;
    };

    for field in &table.fields {
        let message = match object.get(&field.name) {
            None if !field.nullable => Some("This field is required.".to_string()),
            Some(Value::Null) if !field.nullable => Some("This field may not be null.".to_string()),
            None | Some(Value::Null) => None,
            Some(value) => type_error(field.field_type, value),
        };
        if let Some(message) = message {
            errors.insert(field.name.clone(), json!([message]));
        }
    }
    errors
}

fn type_error(field_type: FieldType, value: &Value) -> Option<String> {
    let valid = match field_type {
        FieldType::String => value.is_string(),
        FieldType::Integer => value.is_i64() || value.is_u64(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Date => value
            .as_str()
            .is_some_and(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()),
        FieldType::DateTime => value
            .as_str()
            .and_then(|s| s.get(..10))
            .is_some_and(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").is_ok()),
        FieldType::Time => value
            .as_str()
            .is_some_and(|s| NaiveTime::parse_from_str(s, "%H:%M:%S").is_ok()
                || NaiveTime::parse_from_str(s, "%H:%M").is_ok()),
        FieldType::Array => value.is_array(),
        FieldType::Object | FieldType::Geometry => value.is_object(),
    };
    if valid {
        return None;
    }
    Some(match field_type {
        FieldType::String => "Not a valid string.".to_string(),
        FieldType::Integer => "A valid integer is required.".to_string(),
        FieldType::Number => "A valid number is required.".to_string(),
        FieldType::Boolean => "Must be a valid boolean.".to_string(),
        FieldType::Date => {
            "Date has wrong format. Use one of these formats instead: YYYY-MM-DD.".to_string()
        }
        FieldType::DateTime => "Datetime has wrong format.".to_string(),
        FieldType::Time => "Time has wrong format. Use one of these formats instead: hh:mm[:ss].".to_string(),
        FieldType::Array => format!(
            "Expected a list of items but got type \"{}\".",
            json_type(value)
        ),
        FieldType::Object | FieldType::Geometry => format!(
            "Expected a dictionary of items but got type \"{}\".",
            json_type(value)
        ),
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Validates an upstream listing; every item must validate.
///
/// # Errors
///
/// Returns [`RemoteError::Validation`] with one error map per item.
pub fn validate_list(table: &TableSchema, value: &Value) -> Result<(), RemoteError> {
    let Some(items) = value.as_array() else {
        return Err(RemoteError::Validation {
            errors: json!({"non_field_errors": [format!(
                "Expected a list of items but got type \"{}\".",
                json_type(value)
            )]}),
            raw: value.clone(),
        });
    };
    let errors: Vec<Map<String, Value>> = items
        .iter()
        .map(|item| validate_object(table, item))
        .collect();
    if errors.iter().all(Map::is_empty) {
        return Ok(());
    }
    Err(RemoteError::Validation {
        errors: Value::Array(errors.into_iter().map(Value::Object).collect()),
        raw: value.clone(),
    })
}

/// Validates an upstream detail object.
///
/// # Errors
///
/// Returns [`RemoteError::Validation`] listing every invalid field.
pub fn validate_detail(table: &TableSchema, value: &Value) -> Result<(), RemoteError> {
    let errors = validate_object(table, value);
    if errors.is_empty() {
        return Ok(());
    }
    Err(RemoteError::Validation {
        errors: Value::Object(errors),
        raw: value.clone(),
    })
}

/// Keeps the declared, visible fields of an upstream object.
///
/// Upstream `_links` are kept as-is.
#[must_use]
pub fn project(
    table: &TableSchema,
    value: &Value,
    hidden: &std::collections::BTreeSet<String>,
) -> Map<String, Value> {
    let mut projected = Map::new();
    if let Some(links) = value.get("_links") {
        projected.insert("_links".into(), links.clone());
    }
    for field in &table.fields {
        if hidden.contains(&field.name) {
            continue;
        }
        if let Some(v) = value.get(&field.name) {
            projected.insert(field.name.clone(), v.clone());
        }
    }
    projected
}

/// Deletes null-valued keys, recursing into nested objects.
pub fn del_none(object: &mut Map<String, Value>) {
    object.retain(|_, value| !value.is_null());
    for value in object.values_mut() {
        if let Value::Object(nested) = value {
            del_none(nested);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dso_core::schema::DatasetSchema;

    fn personen() -> TableSchema {
        DatasetSchema::from_json(
            r#"{"id": "remote", "remote": {"url": "http://upstream/"}, "tables": [{"id": "personen", "fields": [
                {"name": "id", "type": "string", "nullable": false},
                {"name": "naam", "type": "string", "nullable": false},
                {"name": "geboortedatum", "type": "date"},
                {"name": "bsn", "type": "string", "auth": "BRP/R"}
            ]}]}"#,
        )
        .unwrap()
        .tables
        .remove(0)
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn detail_url_encodes_id_as_one_segment() {
        assert_eq!(detail_url("http://upstream/personen/", "123").as_deref(), Some("http://upstream/personen/123"));
        assert_eq!(detail_url("http://upstream/personen", "a.b-c_d").as_deref(), Some("http://upstream/personen/a.b-c_d"));
        assert_eq!(
            detail_url("http://upstream/personen/", "1?x=y#f").as_deref(),
            Some("http://upstream/personen/1%3Fx%3Dy%23f")
        );
        assert_eq!(
            detail_url("http://upstream/personen/", "../admin").as_deref(),
            Some("http://upstream/personen/..%2Fadmin")
        );
        assert_eq!(detail_url("http://upstream/personen/", ".."), None);
        assert_eq!(detail_url("http://upstream/personen/", "."), None);
    }

    #[test]
    fn forwarded_for_appends_client_ip() {
        let client = RemoteClient::new(&RemoteConfig::default()).unwrap();
        let incoming = headers(&[("x-forwarded-for", "10.0.0.1"), ("authorization", "Bearer t")]);
        let out = client.outgoing_headers(Forwarded {
            headers: &incoming,
            client_ip: Some("192.168.1.2".parse().unwrap()),
        });
        assert_eq!(out["x-forwarded-for"], "10.0.0.1 192.168.1.2");
        assert_eq!(out["authorization"], "Bearer t");
        assert_eq!(out[ACCEPT], DEFAULT_ACCEPT);
    }

    #[test]
    fn correlation_id_falls_back_to_unique_id() {
        let client = RemoteClient::new(&RemoteConfig::default()).unwrap();
        let incoming = headers(&[("x-unique-id", "abc")]);
        let out = client.outgoing_headers(Forwarded {
            headers: &incoming,
            client_ip: None,
        });
        assert_eq!(out["x-correlation-id"], "abc");

        let incoming = headers(&[("x-unique-id", "abc"), ("x-correlation-id", "xyz")]);
        let out = client.outgoing_headers(Forwarded {
            headers: &incoming,
            client_ip: None,
        });
        assert_eq!(out["x-correlation-id"], "xyz");
    }

    #[test]
    fn headers_outside_allow_list_are_dropped() {
        let client = RemoteClient::new(&RemoteConfig::default()).unwrap();
        let incoming = headers(&[("cookie", "session=1"), ("accept-crs", "EPSG:4326")]);
        let out = client.outgoing_headers(Forwarded {
            headers: &incoming,
            client_ip: None,
        });
        assert!(out.get("cookie").is_none());
        assert!(out.get("accept-crs").is_none());
    }

    #[test]
    fn oauth_redirect_is_invalid_token() {
        let response_headers = headers(&[("location", "https://login/oauth/authorize?x=1")]);
        assert!(matches!(
            http_error(StatusCode::FOUND, &response_headers, b""),
            RemoteError::InvalidToken
        ));
    }

    #[test]
    fn bad_request_mapping_depends_on_body() {
        assert!(matches!(
            http_error(StatusCode::BAD_REQUEST, &HeaderMap::new(), MISSING_CREDENTIALS_BODY),
            RemoteError::MissingCredentials
        ));

        let problem = headers(&[("content-type", PROBLEM_JSON)]);
        let RemoteError::BadRequest { detail } =
            http_error(StatusCode::BAD_REQUEST, &problem, br#"{"title": "bad"}"#)
        else {
            panic!("expected bad request");
        };
        assert_eq!(detail["title"], "bad");

        assert!(matches!(
            http_error(StatusCode::BAD_REQUEST, &HeaderMap::new(), b"nope"),
            RemoteError::Unexpected { .. }
        ));
    }

    #[test]
    fn html_bodies_carry_no_detail() {
        let html = headers(&[("content-type", "text/html; charset=utf-8")]);
        let RemoteError::Unexpected { message, detail } =
            http_error(StatusCode::INTERNAL_SERVER_ERROR, &html, b"<html></html>")
        else {
            panic!("expected unexpected");
        };
        assert!(detail.is_none());
        assert_eq!(message, "Unexpected HTTP 500 from internal endpoint");
    }

    #[test]
    fn validation_reports_every_field() {
        let errors = validate_object(
            &personen(),
            &json!({"id": "1", "geboortedatum": "gisteren", "bsn": 12}),
        );
        assert_eq!(errors["naam"], json!(["This field is required."]));
        assert!(errors.contains_key("geboortedatum"));
        assert_eq!(errors["bsn"], json!(["Not a valid string."]));
        assert!(!errors.contains_key("id"));
    }

    #[test]
    fn list_requires_an_array() {
        let err = validate_list(&personen(), &json!({"id": "1"})).unwrap_err();
        assert!(matches!(err, RemoteError::Validation { .. }));
        assert!(validate_list(&personen(), &json!([{"id": "1", "naam": "A"}])).is_ok());
    }

    #[test]
    fn projection_drops_hidden_and_undeclared_fields() {
        let hidden = std::collections::BTreeSet::from(["bsn".to_string()]);
        let mut object = project(
            &personen(),
            &json!({"id": "1", "naam": "A", "bsn": "123", "extra": 1, "geboortedatum": null}),
            &hidden,
        );
        del_none(&mut object);
        assert_eq!(Value::Object(object), json!({"id": "1", "naam": "A"}));
    }
}
