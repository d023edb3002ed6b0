//! Caller identification and authentication middleware.
//!
//! Requests without a bearer token are served anonymously with an empty
//! scope set. A bearer token that is present must verify against the
//! configured key; its scopes claim becomes the caller's
//! [`AuthorizationScopeSet`]. In debug mode anonymous callers may also name
//! scopes through the `X-Scopes` header for local development.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::header::HeaderName;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::Value;
use ulid::Ulid;

use dso_core::scopes::AuthorizationScopeSet;

use crate::config::JwtConfig;
use crate::error::ApiError;
use crate::server::AppState;

/// Header name for request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Debug-mode header carrying space or comma separated scopes.
pub const SCOPES_HEADER: &str = "x-scopes";

/// The authenticated (or anonymous) caller of one request.
#[derive(Debug, Clone)]
pub struct Caller {
    /// Scopes the caller holds.
    pub scopes: AuthorizationScopeSet,
    /// Token subject, when a token was presented.
    pub subject: Option<String>,
    /// Request ID for tracing/correlation.
    pub request_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<Self>() {
            return Ok(existing.clone());
        }

        let headers = &parts.headers;
        let request_id =
            header_string(headers, REQUEST_ID_HEADER).unwrap_or_else(|| Ulid::new().to_string());

        let caller = match bearer_token(headers) {
            Some(token) => {
                let (scopes, subject) = extract_from_jwt(&token, &state.config.jwt, &request_id)?;
                Self {
                    scopes,
                    subject,
                    request_id,
                }
            }
            None => {
                let scopes = if state.config.debug {
                    header_string(headers, SCOPES_HEADER)
                        .map(|raw| AuthorizationScopeSet::new(split_scopes(&raw)))
                        .unwrap_or_default()
                } else {
                    AuthorizationScopeSet::anonymous()
                };
                Self {
                    scopes,
                    subject: None,
                    request_id,
                }
            }
        };

        parts.extensions.insert(caller.clone());
        Ok(caller)
    }
}

fn extract_from_jwt(
    token: &str,
    jwt: &JwtConfig,
    request_id: &str,
) -> Result<(AuthorizationScopeSet, Option<String>), ApiError> {
    let (decoding_key, algorithm) = jwt_decoding_key(jwt, request_id)?;
    let mut validation = Validation::new(algorithm);
    validation.validate_nbf = true;

    if let Some(iss) = jwt.issuer.as_deref() {
        validation.set_issuer(&[iss]);
    }
    if let Some(aud) = jwt.audience.as_deref() {
        validation.set_audience(&[aud]);
    }

    let data = jsonwebtoken::decode::<Value>(token, &decoding_key, &validation).map_err(|e| {
        tracing::debug!(error = %e, "rejected bearer token");
        ApiError::invalid_token().with_request_id(request_id.to_string())
    })?;

    let Some(claims) = data.claims.as_object() else {
        return Err(ApiError::invalid_token().with_request_id(request_id.to_string()));
    };

    let scopes = match claims.get(&jwt.scopes_claim) {
        Some(Value::Array(items)) => {
            AuthorizationScopeSet::new(items.iter().filter_map(Value::as_str))
        }
        Some(Value::String(raw)) => AuthorizationScopeSet::new(split_scopes(raw)),
        Some(Value::Null) | None => AuthorizationScopeSet::anonymous(),
        Some(_) => {
            return Err(ApiError::invalid_token().with_request_id(request_id.to_string()));
        }
    };
    let subject = claims.get("sub").and_then(Value::as_str).map(str::to_string);

    Ok((scopes, subject))
}

fn jwt_decoding_key(
    jwt: &JwtConfig,
    request_id: &str,
) -> Result<(DecodingKey, Algorithm), ApiError> {
    match (
        jwt.hs256_secret.as_deref(),
        jwt.rs256_public_key_pem.as_deref(),
    ) {
        (Some(secret), None) => Ok((DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)),
        (None, Some(pem)) => DecodingKey::from_rsa_pem(pem.as_bytes())
            .map(|key| (key, Algorithm::RS256))
            .map_err(|e| {
                ApiError::internal(format!("failed to parse jwt.rs256_public_key_pem: {e}"))
                    .with_request_id(request_id.to_string())
            }),
        (Some(_), Some(_)) => Err(ApiError::internal(
            "jwt.hs256_secret and jwt.rs256_public_key_pem are mutually exclusive",
        )
        .with_request_id(request_id.to_string())),
        (None, None) => Err(ApiError::unauthorized(
            "Bearer tokens are not accepted: no verification key configured",
        )
        .with_request_id(request_id.to_string())),
    }
}

fn split_scopes(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = header_string(headers, "Authorization")?;
    let token = raw.strip_prefix("Bearer ")?;
    Some(token.trim().to_string())
}

pub(crate) fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?;
    header_value_to_string(value)
}

fn header_value_to_string(value: &HeaderValue) -> Option<String> {
    value
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Authentication middleware.
///
/// Resolves the [`Caller`] once per request, injects it into request
/// extensions and echoes the request ID on the response.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let caller = match Caller::from_request_parts(&mut parts, &state).await {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };

    let mut req = Request::from_parts(parts, body);
    let request_id = caller.request_id.clone();
    req.extensions_mut().insert(caller);

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};

    fn hs256_config() -> JwtConfig {
        JwtConfig {
            hs256_secret: Some("secret".into()),
            ..JwtConfig::default()
        }
    }

    fn sign(claims: &Value) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap()
    }

    fn far_future() -> u64 {
        4_102_444_800
    }

    #[test]
    fn scopes_claim_accepts_list() {
        let token = sign(&serde_json::json!({
            "sub": "alice", "scopes": ["BRK/RO", "BRK/RSN"], "exp": far_future()
        }));
        let (scopes, subject) = extract_from_jwt(&token, &hs256_config(), "req").unwrap();
        assert!(scopes.contains("BRK/RSN"));
        assert!(scopes.contains("BRK/RO"));
        assert_eq!(subject.as_deref(), Some("alice"));
    }

    #[test]
    fn scopes_claim_accepts_space_separated_string() {
        let token = sign(&serde_json::json!({"scopes": "BAG/R FP/MDW", "exp": far_future()}));
        let (scopes, _) = extract_from_jwt(&token, &hs256_config(), "req").unwrap();
        assert!(scopes.contains("BAG/R"));
        assert!(scopes.contains("FP/MDW"));
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let token = sign(&serde_json::json!({"scopes": [], "exp": far_future()}));
        let config = JwtConfig {
            hs256_secret: Some("other".into()),
            ..JwtConfig::default()
        };
        let err = extract_from_jwt(&token, &config, "req").unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
        assert_eq!(err.request_id(), Some("req"));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = sign(&serde_json::json!({"scopes": [], "exp": 1}));
        assert!(extract_from_jwt(&token, &hs256_config(), "req").is_err());
    }

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_none());
        headers.insert("Authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn debug_scopes_split_on_commas_and_spaces() {
        let scopes: Vec<&str> = split_scopes("BRK/RO, BRK/RSN  FP/MDW").collect();
        assert_eq!(scopes, vec!["BRK/RO", "BRK/RSN", "FP/MDW"]);
    }
}
