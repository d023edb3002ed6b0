//! Server configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use dso_core::{Error, Result};
use dso_filters::MultiValueOperator;

/// Configuration for the DSO API server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server port.
    pub http_port: u16,

    /// Enable debug mode.
    ///
    /// When enabled:
    /// - logs are pretty-printed instead of JSON
    /// - anonymous callers may present scopes through the `X-Scopes` header
    pub debug: bool,

    /// Absolute URL prefix used in HAL links (e.g. `https://api.data.amsterdam.nl`).
    ///
    /// When unset, links are derived from the request `Host` header.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Directory holding dataset schema documents.
    #[serde(default)]
    pub schema_dir: Option<PathBuf>,

    /// Directory holding `<dataset>_<table>.json` seed rows for the in-memory store.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// JSON file with field-access profiles.
    #[serde(default)]
    pub profiles_path: Option<PathBuf>,

    /// Optional shared secret required to access `/metrics`.
    ///
    /// When set, callers must provide either `X-Metrics-Secret: <secret>` or
    /// `Authorization: Bearer <secret>`.
    #[serde(default)]
    pub metrics_secret: Option<String>,

    /// CORS configuration.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Bearer token verification.
    #[serde(default)]
    pub jwt: JwtConfig,

    /// Listing page sizes.
    #[serde(default)]
    pub pagination: PaginationConfig,

    /// Filter engine settings.
    #[serde(default)]
    pub filters: FilterConfig,

    /// Upstream calls for remote datasets.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Server-side handler timeout in seconds.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// Maximum number of in-flight requests.
    #[serde(default)]
    pub concurrency_limit: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            debug: false,
            base_url: None,
            schema_dir: None,
            data_dir: None,
            profiles_path: None,
            metrics_secret: None,
            cors: CorsConfig::default(),
            jwt: JwtConfig::default(),
            pagination: PaginationConfig::default(),
            filters: FilterConfig::default(),
            remote: RemoteConfig::default(),
            request_timeout_secs: None,
            concurrency_limit: None,
        }
    }
}

/// CORS configuration for browser-based access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. Use `["*"]` to allow all origins (development only).
    /// Empty list disables CORS entirely.
    pub allowed_origins: Vec<String>,

    /// Max age for preflight cache (seconds).
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            max_age_seconds: 3600,
        }
    }
}

/// Page size limits for listings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Page size when the request names none.
    pub default_page_size: usize,
    /// Upper bound; larger requested sizes are clamped.
    pub max_page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 1000,
        }
    }
}

/// Filter engine settings.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// How repeated query keys are combined.
    #[serde(default)]
    pub multi_value: MultiValueOperator,
}

/// Upstream call settings for remote datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Timeout for one upstream call, in seconds. Calls are never retried.
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
    /// Request headers copied verbatim to the upstream call.
    #[serde(default = "default_headers_passthrough")]
    pub headers_passthrough: Vec<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_remote_timeout_secs(),
            headers_passthrough: default_headers_passthrough(),
        }
    }
}

fn default_remote_timeout_secs() -> u64 {
    60
}

fn default_headers_passthrough() -> Vec<String> {
    vec!["Authorization".to_string()]
}

/// JWT configuration for bearer token verification.
///
/// Requests without a bearer token are served anonymously; a token that is
/// present must verify against one of the configured keys.
#[derive(Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HS256 secret used to verify bearer tokens.
    #[serde(default)]
    pub hs256_secret: Option<String>,

    /// RS256 public key in PEM format for verifying bearer tokens.
    #[serde(default)]
    pub rs256_public_key_pem: Option<String>,

    /// Optional issuer (`iss`) to enforce.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Optional audience (`aud`) to enforce.
    #[serde(default)]
    pub audience: Option<String>,

    /// Claim holding the caller's scopes, as a list or a space-separated string.
    #[serde(default = "default_scopes_claim")]
    pub scopes_claim: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            hs256_secret: None,
            rs256_public_key_pem: None,
            issuer: None,
            audience: None,
            scopes_claim: default_scopes_claim(),
        }
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field(
                "hs256_secret",
                &self.hs256_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "rs256_public_key_pem",
                &self.rs256_public_key_pem.as_ref().map(|_| "[REDACTED]"),
            )
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("scopes_claim", &self.scopes_claim)
            .finish()
    }
}

fn default_scopes_claim() -> String {
    "scopes".to_string()
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Supported env vars:
    /// - `DSO_HTTP_PORT`
    /// - `DSO_DEBUG`
    /// - `DSO_BASE_URL`
    /// - `DSO_SCHEMA_DIR`
    /// - `DSO_DATA_DIR`
    /// - `DSO_PROFILES_PATH`
    /// - `DSO_METRICS_SECRET`
    /// - `DSO_CORS_ALLOWED_ORIGINS` (comma-separated, or `*`)
    /// - `DSO_CORS_MAX_AGE_SECONDS`
    /// - `DSO_JWT_SECRET`
    /// - `DSO_JWT_PUBLIC_KEY_PEM`
    /// - `DSO_JWT_ISSUER`
    /// - `DSO_JWT_AUDIENCE`
    /// - `DSO_JWT_SCOPES_CLAIM`
    /// - `DSO_PAGE_SIZE`
    /// - `DSO_MAX_PAGE_SIZE`
    /// - `DSO_FILTER_MULTI_VALUE_OPERATOR` (`and` | `or`)
    /// - `DSO_REMOTE_TIMEOUT_SECS`
    /// - `DSO_REMOTE_HEADERS_PASSTHROUGH` (comma-separated)
    /// - `DSO_REQUEST_TIMEOUT_SECS`
    /// - `DSO_CONCURRENCY_LIMIT`
    ///
    /// # Errors
    ///
    /// Returns an error if any environment variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_u16("DSO_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(debug) = env_bool("DSO_DEBUG")? {
            config.debug = debug;
        }
        config.base_url = env_string("DSO_BASE_URL").map(|url| url.trim_end_matches('/').to_string());
        config.schema_dir = env_string("DSO_SCHEMA_DIR").map(PathBuf::from);
        config.data_dir = env_string("DSO_DATA_DIR").map(PathBuf::from);
        config.profiles_path = env_string("DSO_PROFILES_PATH").map(PathBuf::from);
        config.metrics_secret = env_string("DSO_METRICS_SECRET");

        if let Some(origins) = env_string("DSO_CORS_ALLOWED_ORIGINS") {
            config.cors.allowed_origins = parse_list(&origins);
        }
        if let Some(max_age) = env_u64("DSO_CORS_MAX_AGE_SECONDS")? {
            config.cors.max_age_seconds = max_age;
        }

        config.jwt.hs256_secret = env_string("DSO_JWT_SECRET");
        config.jwt.rs256_public_key_pem =
            env_string("DSO_JWT_PUBLIC_KEY_PEM").map(|pem| normalize_pem(&pem));
        config.jwt.issuer = env_string("DSO_JWT_ISSUER");
        config.jwt.audience = env_string("DSO_JWT_AUDIENCE");
        if let Some(claim) = env_string("DSO_JWT_SCOPES_CLAIM") {
            config.jwt.scopes_claim = claim;
        }

        if let Some(size) = env_usize("DSO_PAGE_SIZE")? {
            config.pagination.default_page_size = size;
        }
        if let Some(size) = env_usize("DSO_MAX_PAGE_SIZE")? {
            config.pagination.max_page_size = size;
        }
        if let Some(operator) = env_string("DSO_FILTER_MULTI_VALUE_OPERATOR") {
            config.filters.multi_value = operator.parse().map_err(|e: String| {
                Error::InvalidInput(format!("DSO_FILTER_MULTI_VALUE_OPERATOR {e}"))
            })?;
        }

        if let Some(secs) = env_u64("DSO_REMOTE_TIMEOUT_SECS")? {
            config.remote.timeout_secs = secs;
        }
        if let Some(headers) = env_string("DSO_REMOTE_HEADERS_PASSTHROUGH") {
            config.remote.headers_passthrough = parse_list(&headers);
        }
        config.request_timeout_secs = env_u64("DSO_REQUEST_TIMEOUT_SECS")?;
        config.concurrency_limit = env_usize("DSO_CONCURRENCY_LIMIT")?;

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.pagination.default_page_size == 0 {
            return Err(Error::InvalidInput(
                "DSO_PAGE_SIZE must be greater than 0".to_string(),
            ));
        }
        if self.pagination.default_page_size > self.pagination.max_page_size {
            return Err(Error::InvalidInput(format!(
                "DSO_PAGE_SIZE must be at most DSO_MAX_PAGE_SIZE ({})",
                self.pagination.max_page_size
            )));
        }
        if self.remote.timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "DSO_REMOTE_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(Error::InvalidInput(
                "DSO_REQUEST_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        if self.concurrency_limit == Some(0) {
            return Err(Error::InvalidInput(
                "DSO_CONCURRENCY_LIMIT must be greater than 0".to_string(),
            ));
        }
        if self.jwt.hs256_secret.is_some() && self.jwt.rs256_public_key_pem.is_some() {
            return Err(Error::InvalidInput(
                "DSO_JWT_SECRET and DSO_JWT_PUBLIC_KEY_PEM are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(name: &str) -> Result<Option<u16>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u16: {e}")))
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if trimmed == "*" {
        return vec!["*".to_string()];
    }

    trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_pem(pem: &str) -> String {
    let trimmed = pem.trim();
    if trimmed.contains("\\n") && !trimmed.contains('\n') {
        trimmed.replace("\\n", "\n")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.pagination.default_page_size, 20);
        assert_eq!(config.pagination.max_page_size, 1000);
        assert_eq!(config.remote.timeout_secs, 60);
        assert_eq!(config.remote.headers_passthrough, vec!["Authorization"]);
        assert_eq!(config.jwt.scopes_claim, "scopes");
        assert_eq!(config.filters.multi_value, MultiValueOperator::And);
        config.validate().unwrap();
    }

    #[test]
    fn parse_bool_accepts_true_values() {
        assert!(parse_bool("TEST", "true").unwrap());
        assert!(parse_bool("TEST", "1").unwrap());
        assert!(parse_bool("TEST", "yes").unwrap());
        assert!(parse_bool("TEST", "TRUE").unwrap());
    }

    #[test]
    fn parse_bool_accepts_false_values() {
        assert!(!parse_bool("TEST", "false").unwrap());
        assert!(!parse_bool("TEST", "0").unwrap());
        assert!(!parse_bool("TEST", "no").unwrap());
    }

    #[test]
    fn parse_bool_rejects_invalid_values() {
        let err = parse_bool("DSO_DEBUG", "maybe").unwrap_err();
        let Error::InvalidInput(message) = err else {
            panic!("unexpected error: {err:?}");
        };
        assert!(message.contains("DSO_DEBUG"));
    }

    #[test]
    fn parse_list_trims_and_drops_blanks() {
        assert_eq!(
            parse_list(" Authorization , Accept-Crs,, "),
            vec!["Authorization", "Accept-Crs"]
        );
        assert_eq!(parse_list("*"), vec!["*"]);
    }

    #[test]
    fn pem_escapes_are_normalized() {
        assert_eq!(normalize_pem("a\\nb"), "a\nb");
        assert_eq!(normalize_pem("a\nb\\n"), "a\nb\\n");
    }

    #[test]
    fn page_size_above_max_is_rejected() {
        let config = Config {
            pagination: PaginationConfig {
                default_page_size: 50,
                max_page_size: 10,
            },
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("DSO_PAGE_SIZE"));
    }

    #[test]
    fn jwt_keys_are_mutually_exclusive() {
        let config = Config {
            jwt: JwtConfig {
                hs256_secret: Some("s".into()),
                rs256_public_key_pem: Some("pem".into()),
                ..JwtConfig::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn jwt_debug_redacts_secrets() {
        let jwt = JwtConfig {
            hs256_secret: Some("super-secret".into()),
            ..JwtConfig::default()
        };
        let dbg = format!("{jwt:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("super-secret"));
    }
}
