//! Per-request dataset context: temporal versioning and CRS negotiation.

use axum::http::HeaderMap;

use dso_core::crs::Crs;
use dso_registry::ResourceDefinition;

use crate::auth::header_string;
use crate::error::ApiError;

/// Request header naming the CRS the caller wants geometries in.
pub const ACCEPT_CRS_HEADER: &str = "accept-crs";

/// Response header naming the CRS geometries are rendered in.
pub const CONTENT_CRS_HEADER: &str = "content-crs";

/// A temporal dimension selected through its query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalSlice {
    /// Dimension name, e.g. `geldigOp`.
    pub key: String,
    /// Raw parameter value.
    pub value: String,
    /// Backing start and end fields.
    pub fields: [String; 2],
}

/// Dataset identity, temporal state and negotiated CRS of one request.
///
/// Resolved once before filtering and serialization; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Dataset the request targets.
    pub dataset_id: String,
    /// Whether the dataset supports temporal versioning.
    pub is_versioned: bool,
    /// Value of the temporal identifier parameter, when given.
    pub requested_version: Option<String>,
    /// The selected temporal dimension, when given.
    pub temporal_slice: Option<TemporalSlice>,
    /// CRS named by `Accept-Crs`.
    pub accept_crs: Option<Crs>,
    /// CRS the response is rendered in, when it carries geometries.
    pub content_crs: Option<Crs>,
}

impl RequestContext {
    /// Resolves the context of a request for `resource`.
    ///
    /// For non-temporal datasets both version fields stay empty whatever the
    /// parameters say. Among temporal dimensions, the last one (by name)
    /// with a non-blank value wins.
    ///
    /// # Errors
    ///
    /// Returns a 406 [`ApiError`] when `Accept-Crs` cannot be parsed or names
    /// an unsupported system.
    pub fn resolve(
        resource: &ResourceDefinition,
        params: &[(String, String)],
        headers: &HeaderMap,
    ) -> Result<Self, ApiError> {
        let accept_crs = match header_string(headers, ACCEPT_CRS_HEADER) {
            Some(raw) => Some(Crs::parse(&raw).map_err(ApiError::from)?),
            None => None,
        };
        let content_crs =
            accept_crs.or_else(|| resource.table().has_geometry().then_some(Crs::STORAGE));

        let (requested_version, temporal_slice) = match resource.temporal() {
            Some(temporal) => {
                let version = non_blank(params, &temporal.identifier);
                let slice = temporal
                    .dimensions
                    .iter()
                    .filter_map(|(key, fields)| {
                        non_blank(params, key).map(|value| TemporalSlice {
                            key: key.clone(),
                            value,
                            fields: fields.clone(),
                        })
                    })
                    .last();
                (version, slice)
            }
            None => (None, None),
        };

        Ok(Self {
            dataset_id: resource.dataset_id().to_string(),
            is_versioned: resource.temporal().is_some(),
            requested_version,
            temporal_slice,
            accept_crs,
            content_crs,
        })
    }

    /// Returns the query key and value that pin a related temporal object.
    ///
    /// A selected dimension takes precedence over the requested version.
    #[must_use]
    pub fn temporal_query(&self) -> Option<(&str, &str)> {
        self.temporal_slice
            .as_ref()
            .map(|slice| (slice.key.as_str(), slice.value.as_str()))
    }
}

fn non_blank(params: &[(String, String)], name: &str) -> Option<String> {
    params
        .iter()
        .rev()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use dso_registry::Registry;
    use dso_test_utils::fixture_schemas;
    use std::sync::Arc;

    fn resource(dataset: &str, table: &str) -> Arc<ResourceDefinition> {
        let registry = Registry::new();
        for schema in fixture_schemas() {
            registry.register_dataset(schema).unwrap();
        }
        Arc::clone(registry.snapshot().resource(dataset, table).unwrap())
    }

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn non_temporal_dataset_ignores_version_params() {
        let ctx = RequestContext::resolve(
            &resource("afvalwegingen", "containers"),
            &params(&[("volgnummer", "2"), ("geldigOp", "2021-01-01")]),
            &HeaderMap::new(),
        )
        .unwrap();
        assert!(!ctx.is_versioned);
        assert!(ctx.requested_version.is_none());
        assert!(ctx.temporal_slice.is_none());
        assert_eq!(ctx.dataset_id, "afvalwegingen");
    }

    #[test]
    fn temporal_dataset_reads_version_and_slice() {
        let ctx = RequestContext::resolve(
            &resource("gebieden", "buurten"),
            &params(&[("volgnummer", "2"), ("geldigOp", "2021-01-15")]),
            &HeaderMap::new(),
        )
        .unwrap();
        assert!(ctx.is_versioned);
        assert_eq!(ctx.requested_version.as_deref(), Some("2"));
        let slice = ctx.temporal_slice.clone().unwrap();
        assert_eq!(slice.key, "geldigOp");
        assert_eq!(slice.fields[0], "beginGeldigheid");
        assert_eq!(ctx.temporal_query(), Some(("geldigOp", "2021-01-15")));
    }

    #[test]
    fn blank_temporal_values_are_ignored() {
        let ctx = RequestContext::resolve(
            &resource("gebieden", "buurten"),
            &params(&[("volgnummer", " "), ("geldigOp", "")]),
            &HeaderMap::new(),
        )
        .unwrap();
        assert!(ctx.is_versioned);
        assert!(ctx.requested_version.is_none());
        assert!(ctx.temporal_slice.is_none());
    }

    #[test]
    fn geometry_tables_default_to_storage_crs() {
        let ctx = RequestContext::resolve(
            &resource("afvalwegingen", "containers"),
            &[],
            &HeaderMap::new(),
        )
        .unwrap();
        assert_eq!(ctx.content_crs, Some(Crs::RdNew));

        let ctx =
            RequestContext::resolve(&resource("bommen", "bommen"), &[], &HeaderMap::new()).unwrap();
        assert_eq!(ctx.content_crs, None);
    }

    #[test]
    fn accept_crs_is_negotiated() {
        let mut headers = HeaderMap::new();
        headers.insert("Accept-Crs", HeaderValue::from_static("EPSG:4258"));
        let ctx = RequestContext::resolve(&resource("bommen", "bommen"), &[], &headers).unwrap();
        assert_eq!(ctx.accept_crs, Some(Crs::Etrs89));
        assert_eq!(ctx.content_crs, Some(Crs::Etrs89));
    }

    #[test]
    fn unsupported_crs_is_not_acceptable() {
        let mut headers = HeaderMap::new();
        headers.insert("Accept-Crs", HeaderValue::from_static("EPSG:2000"));
        let err = RequestContext::resolve(&resource("bommen", "bommen"), &[], &headers)
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_ACCEPTABLE);
    }
}
