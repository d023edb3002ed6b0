//! API error types and HTTP response mapping.

use axum::Json;
use axum::http::header::{ALLOW, HeaderName};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;

use dso_core::Error as CoreError;
use dso_filters::{FilterError, InvalidParam};
use dso_registry::SchemaError;

use crate::remote::RemoteError;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients).
    pub message: String,
    /// Optional request ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Every rejected query parameter.
    #[serde(rename = "invalid-params", skip_serializing_if = "Vec::is_empty")]
    pub invalid_params: Vec<InvalidParam>,
    /// Reasons of the rejected parameters, in the same order.
    #[serde(rename = "x-validation-errors", skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
    /// Extra structured detail, e.g. a forwarded upstream problem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

/// HTTP API error with stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    request_id: Option<String>,
    invalid_params: Vec<InvalidParam>,
    detail: Option<Value>,
    allow: Option<&'static str>,
}

impl ApiError {
    /// Returns an error response for invalid query parameters.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    /// Returns a validation error listing every rejected parameter.
    #[must_use]
    pub fn invalid_params(params: Vec<InvalidParam>) -> Self {
        let mut error = Self::bad_request("Invalid query parameters.");
        error.invalid_params = params;
        error
    }

    /// Returns an error response for authentication failures.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// Returns an error response when the bearer token is invalid.
    #[must_use]
    pub fn invalid_token() -> Self {
        Self::unauthorized("Invalid bearer token")
    }

    /// Returns an error response for authorization failures.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    /// Returns an error response for missing resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Returns a 405 advertising the allowed methods.
    #[must_use]
    pub fn method_not_allowed(allow: &'static str) -> Self {
        let mut error = Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "METHOD_NOT_ALLOWED",
            "Method not allowed",
        );
        error.allow = Some(allow);
        error
    }

    /// Returns an error response for an unsupported `Accept-Crs`.
    pub fn unsupported_crs(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_ACCEPTABLE, "UNSUPPORTED_CRS", message)
    }

    /// Returns an error response for upstream payloads that fail validation.
    #[must_use]
    pub fn upstream_validation(detail: Value) -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            "UPSTREAM_VALIDATION",
            "Upstream response did not validate",
        )
        .with_detail(detail)
    }

    /// Returns an error response for unexpected upstream behaviour.
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "BAD_GATEWAY", message)
    }

    /// Returns an error response when an upstream cannot be reached.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            message,
        )
    }

    /// Returns an error response when an upstream call times out.
    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, "GATEWAY_TIMEOUT", message)
    }

    /// Returns an internal error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Attaches a request ID for correlation.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attaches structured detail to the body.
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the request ID, if one was attached.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Returns the stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Returns the rejected parameters of a validation error.
    #[must_use]
    pub fn params(&self) -> &[InvalidParam] {
        &self.invalid_params
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            request_id: None,
            invalid_params: Vec::new(),
            detail: None,
            allow: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = self.request_id;
        let validation_errors = self
            .invalid_params
            .iter()
            .map(|p| p.reason.clone())
            .collect();
        let mut response = (
            self.status,
            Json(ApiErrorBody {
                code: self.code.to_string(),
                message: self.message,
                request_id: request_id.clone(),
                invalid_params: self.invalid_params,
                validation_errors,
                detail: self.detail,
            }),
        )
            .into_response();

        if let Some(request_id) = request_id {
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("x-request-id"), value);
            }
        }

        if let Some(allow) = self.allow {
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static(allow));
        }

        response
    }
}

impl From<CoreError> for ApiError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidInput(message) => Self::bad_request(message),
            CoreError::UnsupportedCrs { value } => {
                Self::unsupported_crs(format!("Unsupported CRS: {value}"))
            }
            CoreError::NotFound(message) => Self::not_found(message),
            CoreError::Store { message, .. }
            | CoreError::Serialization { message }
            | CoreError::Internal { message } => Self::internal(message),
        }
    }
}

impl From<FilterError> for ApiError {
    fn from(value: FilterError) -> Self {
        match value {
            FilterError::Invalid(params) => Self::invalid_params(params),
            FilterError::Forbidden { field } => {
                Self::forbidden(format!("Access to field '{field}' is not allowed"))
            }
        }
    }
}

impl From<SchemaError> for ApiError {
    fn from(value: SchemaError) -> Self {
        Self::internal(value.to_string())
    }
}

impl From<RemoteError> for ApiError {
    fn from(value: RemoteError) -> Self {
        match value {
            RemoteError::Client { message } => Self::internal(message),
            RemoteError::InvalidToken => Self::unauthorized("Invalid token"),
            RemoteError::MissingCredentials => {
                Self::unauthorized("Internal credentials are missing")
            }
            RemoteError::BadRequest { detail } => {
                Self::bad_request("Upstream rejected the request").with_detail(detail)
            }
            RemoteError::Forbidden { detail } => {
                let error = Self::forbidden("Upstream denied access");
                match detail {
                    Some(detail) => error.with_detail(detail),
                    None => error,
                }
            }
            RemoteError::NotFound { detail } => {
                let error = Self::not_found("Not found.");
                match detail {
                    Some(detail) => error.with_detail(detail),
                    None => error,
                }
            }
            RemoteError::Unexpected { message, detail } => {
                let error = Self::bad_gateway(message);
                match detail {
                    Some(detail) => error.with_detail(detail),
                    None => error,
                }
            }
            RemoteError::Validation { errors, raw } => Self::upstream_validation(
                serde_json::json!({
                    "detail": "These schema fields did not validate:",
                    "x-validation-errors": errors,
                    "x-raw-response": raw,
                }),
            ),
            RemoteError::Timeout { url } => {
                Self::gateway_timeout(format!("Connection timed out: {url}"))
            }
            RemoteError::Unavailable { message } => Self::service_unavailable(message),
        }
    }
}
