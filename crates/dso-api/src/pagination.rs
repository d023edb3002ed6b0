//! Page-number pagination and request URLs for HAL links.

use axum::http::HeaderMap;
use serde_json::{Value, json};
use url::Url;

use dso_filters::InvalidParam;

use crate::auth::header_string;
use crate::config::PaginationConfig;
use crate::error::ApiError;

/// Query parameter holding the 1-based page number.
pub const PAGE_PARAM: &str = "page";

/// Query parameters holding the page size, in order of preference.
pub const PAGE_SIZE_PARAMS: [&str; 2] = ["_pageSize", "page_size"];

/// The window one listing request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number.
    pub number: usize,
    /// Rows per page.
    pub size: usize,
}

impl PageRequest {
    /// Reads `page` and `_pageSize` (or `page_size`) from the query.
    ///
    /// Sizes above the configured maximum are clamped.
    ///
    /// # Errors
    ///
    /// Returns a 400 [`ApiError`] naming every non-positive or non-numeric
    /// parameter.
    pub fn from_params(
        params: &[(String, String)],
        config: &PaginationConfig,
    ) -> Result<Self, ApiError> {
        let mut invalid = Vec::new();

        let number = match lookup(params, PAGE_PARAM) {
            Some(raw) => positive(raw).unwrap_or_else(|| {
                invalid.push(InvalidParam::new(PAGE_PARAM, "Enter a positive whole number."));
                1
            }),
            None => 1,
        };

        let size = match PAGE_SIZE_PARAMS
            .iter()
            .find_map(|name| lookup(params, name).map(|raw| (*name, raw)))
        {
            Some((name, raw)) => positive(raw).map_or_else(
                || {
                    invalid.push(InvalidParam::new(name, "Enter a positive whole number."));
                    config.default_page_size
                },
                |size| size.min(config.max_page_size),
            ),
            None => config.default_page_size,
        };

        if !invalid.is_empty() {
            return Err(ApiError::invalid_params(invalid));
        }
        Ok(Self { number, size })
    }

    /// Returns the number of rows before this page.
    #[must_use]
    pub fn offset(&self) -> usize {
        (self.number - 1).saturating_mul(self.size)
    }

    /// Returns the number of pages for `total` rows; never less than one.
    #[must_use]
    pub fn total_pages(&self, total: usize) -> usize {
        total.div_ceil(self.size).max(1)
    }

    /// Checks that this page exists for `total` rows.
    ///
    /// # Errors
    ///
    /// Returns a 404 [`ApiError`] past the last page.
    pub fn check_in_range(&self, total: usize) -> Result<(), ApiError> {
        if self.number > self.total_pages(total) {
            return Err(ApiError::not_found("Invalid page."));
        }
        Ok(())
    }

    /// Renders `_links` and `page` of a listing envelope.
    #[must_use]
    pub fn envelope(&self, request_url: &Url, name: &str, items: Vec<Value>, total: usize) -> Value {
        let total_pages = self.total_pages(total);
        let next = (self.number < total_pages).then(|| with_page(request_url, self.number + 1));
        let previous = (self.number > 1).then(|| with_page(request_url, self.number - 1));

        let mut embedded = serde_json::Map::new();
        embedded.insert(name.to_string(), Value::Array(items));

        json!({
            "_links": {
                "self": {"href": request_url.as_str()},
                "next": {"href": next},
                "previous": {"href": previous},
            },
            "_embedded": embedded,
            "page": {
                "number": self.number,
                "size": self.size,
                "totalElements": total,
                "totalPages": total_pages,
            },
        })
    }
}

fn lookup<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn positive(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|n| *n > 0)
}

/// Returns `url` with its `page` parameter set; page 1 drops the parameter.
fn with_page(url: &Url, page: usize) -> String {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != PAGE_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut url = url.clone();
    url.set_query(None);
    if !pairs.is_empty() || page > 1 {
        let mut query = url.query_pairs_mut();
        query.extend_pairs(pairs);
        if page > 1 {
            query.append_pair(PAGE_PARAM, &page.to_string());
        }
    }
    url.to_string()
}

/// Returns the absolute origin links are rendered against.
///
/// A configured base URL wins; otherwise the `Host` header is used.
#[must_use]
pub fn origin(base_url: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(base) = base_url {
        return base.trim_end_matches('/').to_string();
    }
    let host = header_string(headers, "host").unwrap_or_else(|| "localhost".to_string());
    format!("http://{host}")
}

/// Builds the absolute URL of the current request.
///
/// # Errors
///
/// Returns a 400 [`ApiError`] when the origin and path do not form a URL.
pub fn request_url(origin: &str, path: &str, raw_query: Option<&str>) -> Result<Url, ApiError> {
    let mut url = Url::parse(&format!("{origin}{path}"))
        .map_err(|e| ApiError::bad_request(format!("Invalid request URL: {e}")))?;
    url.set_query(raw_query.filter(|q| !q.is_empty()));
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn defaults_to_first_page() {
        let page = PageRequest::from_params(&[], &PaginationConfig::default()).unwrap();
        assert_eq!(page, PageRequest { number: 1, size: 20 });
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn page_size_is_clamped() {
        let config = PaginationConfig {
            default_page_size: 20,
            max_page_size: 50,
        };
        let page = PageRequest::from_params(&params(&[("_pageSize", "500")]), &config).unwrap();
        assert_eq!(page.size, 50);
        let page = PageRequest::from_params(&params(&[("page_size", "5"), ("page", "3")]), &config)
            .unwrap();
        assert_eq!(page.offset(), 10);
    }

    #[test]
    fn invalid_values_are_rejected_together() {
        let err = PageRequest::from_params(
            &params(&[("page", "0"), ("_pageSize", "veel")]),
            &PaginationConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.params().len(), 2);
    }

    #[test]
    fn total_pages_is_at_least_one() {
        let page = PageRequest { number: 1, size: 20 };
        assert_eq!(page.total_pages(0), 1);
        assert_eq!(page.total_pages(41), 3);
        assert!(PageRequest { number: 2, size: 20 }.check_in_range(0).is_err());
    }

    #[test]
    fn envelope_links_neighbouring_pages() {
        let url = request_url("http://testserver", "/v1/x/y/", Some("page=2&kleur=rood")).unwrap();
        let page = PageRequest { number: 2, size: 1 };
        let body = page.envelope(&url, "y", vec![json!({"id": 2})], 3);
        assert_eq!(
            body["_links"]["next"]["href"],
            "http://testserver/v1/x/y/?kleur=rood&page=3"
        );
        assert_eq!(
            body["_links"]["previous"]["href"],
            "http://testserver/v1/x/y/?kleur=rood"
        );
        assert_eq!(body["page"]["totalPages"], 3);
    }

    #[test]
    fn origin_prefers_base_url() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("api.example"));
        assert_eq!(origin(Some("https://data.example/"), &headers), "https://data.example");
        assert_eq!(origin(None, &headers), "http://api.example");
        assert_eq!(origin(None, &HeaderMap::new()), "http://localhost");
    }
}
