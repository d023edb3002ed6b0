//! Bearer token minting.

use jsonwebtoken::{EncodingKey, Header};
use serde_json::json;

/// HS256 secret shared by tests and the test server configuration.
pub const TEST_JWT_SECRET: &str = "dso-test-secret";

/// Mints an HS256 token carrying `scopes` in the `scopes` claim.
pub fn mint_token(scopes: &[&str]) -> String {
    let claims = json!({
        "sub": "test-user",
        "scopes": scopes,
        "exp": 4_102_444_800_u64,
    });
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("encode token")
}

/// Returns an `Authorization` header value for a token with `scopes`.
pub fn bearer(scopes: &[&str]) -> String {
    format!("Bearer {}", mint_token(scopes))
}
