//! Dynamic URL routing over the resource registry.
//!
//! A [`RoutingTable`] is built from exactly one [`RegistrySnapshot`] and
//! published through an [`ArcSwap`], so request handlers always match
//! against a complete table. [`DynamicRouter::reload`] rebuilds the table
//! from the registry without a restart.
//!
//! Every table carries a revision. A [`Resolution`] holds the table it was
//! made against, and handlers call [`DynamicRouter::revalidate`] before
//! touching the store: when the table was replaced in between, the path is
//! matched again and a removed route yields not-found. Handlers resolve
//! relations and links against [`Resolution::snapshot`] only, so one request
//! never mixes two registry generations.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use axum::http::Method;
use metrics::{counter, gauge};
use percent_encoding::percent_decode_str;

use dso_registry::{Registry, RegistrySnapshot, ResourceDefinition};

use crate::error::ApiError;
use crate::metrics::{ROUTES_RELOADED, ROUTING_TABLE_ROUTES};

/// URL prefix of every API route.
pub const API_PREFIX: &str = "/v1";

/// Value of the `Allow` header on every API route.
pub const ALLOWED_METHODS: &str = "GET, HEAD, OPTIONS";

/// What a matched route serves.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// Listing of every dataset.
    Root,
    /// OpenAPI document for the current table.
    OpenApi,
    /// Tables of one dataset.
    DatasetIndex {
        /// Dataset id.
        dataset: String,
    },
    /// Paginated rows of a table.
    List(Arc<ResourceDefinition>),
    /// One row of a table; the id is the first path parameter.
    Detail(Arc<ResourceDefinition>),
    /// Related rows of one row; the id is the first path parameter.
    Relation {
        /// Resource owning the relation.
        resource: Arc<ResourceDefinition>,
        /// Relation field or reverse relation name.
        relation: String,
    },
}

impl Endpoint {
    /// Returns a low-cardinality label for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Root => "/v1/",
            Self::OpenApi => "/v1/openapi.json",
            Self::DatasetIndex { .. } => "/v1/{dataset}/",
            Self::List(_) => "/v1/{dataset}/{table}/",
            Self::Detail(_) => "/v1/{dataset}/{table}/{id}/",
            Self::Relation { .. } => "/v1/{dataset}/{table}/{id}/{relation}/",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
}

#[derive(Debug, Clone)]
struct Route {
    pattern: Vec<Segment>,
    endpoint: Endpoint,
}

impl Route {
    fn new(pattern: Vec<Segment>, endpoint: Endpoint) -> Self {
        Self { pattern, endpoint }
    }

    fn matches(&self, segments: &[String]) -> Option<Vec<String>> {
        if self.pattern.len() != segments.len() {
            return None;
        }
        let mut params = Vec::new();
        for (pattern, segment) in self.pattern.iter().zip(segments) {
            match pattern {
                Segment::Literal(literal) if literal == segment => {}
                Segment::Literal(_) => return None,
                Segment::Param => params.push(segment.clone()),
            }
        }
        Some(params)
    }
}

fn literal(value: &str) -> Segment {
    Segment::Literal(value.to_string())
}

/// An ordered list of routes built from one registry snapshot.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    revision: u64,
    source_generation: Option<u64>,
    snapshot: Arc<RegistrySnapshot>,
    routes: Vec<Route>,
}

impl RoutingTable {
    /// Builds list, detail and relation routes for every resource.
    #[must_use]
    pub fn build(snapshot: Arc<RegistrySnapshot>) -> Self {
        let mut routes = Self::base_routes();

        for (dataset_id, entry) in snapshot.datasets() {
            routes.push(Route::new(
                vec![literal(dataset_id)],
                Endpoint::DatasetIndex {
                    dataset: dataset_id.to_string(),
                },
            ));
            for resource in entry.resources() {
                let base = vec![literal(dataset_id), literal(resource.name())];
                routes.push(Route::new(
                    base.clone(),
                    Endpoint::List(Arc::clone(resource)),
                ));

                let mut detail = base;
                detail.push(Segment::Param);
                for relation in resource.relation_names() {
                    let mut pattern = detail.clone();
                    pattern.push(literal(relation));
                    routes.push(Route::new(
                        pattern,
                        Endpoint::Relation {
                            resource: Arc::clone(resource),
                            relation: relation.to_string(),
                        },
                    ));
                }
                routes.push(Route::new(detail, Endpoint::Detail(Arc::clone(resource))));
            }
        }

        Self {
            revision: 0,
            source_generation: Some(snapshot.generation()),
            snapshot,
            routes,
        }
    }

    /// A table serving only the root listing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            revision: 0,
            source_generation: None,
            snapshot: Arc::new(RegistrySnapshot::default()),
            routes: Self::base_routes(),
        }
    }

    fn base_routes() -> Vec<Route> {
        vec![
            Route::new(Vec::new(), Endpoint::Root),
            Route::new(vec![literal("openapi.json")], Endpoint::OpenApi),
        ]
    }

    /// Returns the registry generation this table was built from.
    #[must_use]
    pub fn source_generation(&self) -> Option<u64> {
        self.source_generation
    }

    /// Returns the snapshot this table was built from; empty for a cleared
    /// table.
    #[must_use]
    pub fn snapshot(&self) -> &Arc<RegistrySnapshot> {
        &self.snapshot
    }

    /// Returns the revision under which this table was published.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns the number of routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true when the table holds no routes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Iterates the endpoints in match order.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.routes.iter().map(|route| &route.endpoint)
    }

    fn find(&self, segments: &[String]) -> Option<(Endpoint, Vec<String>)> {
        self.routes.iter().find_map(|route| {
            route
                .matches(segments)
                .map(|params| (route.endpoint.clone(), params))
        })
    }
}

/// Splits a raw request path below [`API_PREFIX`] into decoded segments.
///
/// Segments are split before decoding, so `%2F` stays inside one segment.
/// `None` when the prefix is missing or a segment is not valid UTF-8.
fn path_segments(path: &str) -> Option<Vec<String>> {
    let rest = path.strip_prefix(API_PREFIX)?;
    if !(rest.is_empty() || rest.starts_with('/')) {
        return None;
    }
    rest.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| percent_decode_str(s).decode_utf8().ok().map(Cow::into_owned))
        .collect()
}

/// A matched request path.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The matched endpoint.
    pub endpoint: Endpoint,
    /// Decoded path parameters in pattern order.
    pub params: Vec<String>,
    segments: Vec<String>,
    table: Arc<RoutingTable>,
}

impl Resolution {
    /// Returns the revision of the table this resolution was made against.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.table.revision
    }

    /// Returns the table this resolution was made against.
    #[must_use]
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Returns the registry snapshot the matched table was built from.
    #[must_use]
    pub fn snapshot(&self) -> &Arc<RegistrySnapshot> {
        &self.table.snapshot
    }

    /// Returns the first path parameter (the object id).
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.params.first().map(String::as_str)
    }
}

/// Routes requests against the current [`RoutingTable`].
#[derive(Debug)]
pub struct DynamicRouter {
    registry: Arc<Registry>,
    table: ArcSwap<RoutingTable>,
    revision: AtomicU64,
    writer: Mutex<()>,
}

impl DynamicRouter {
    /// Creates a router with a table built from the registry's current state.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        let mut table = RoutingTable::build(registry.snapshot());
        table.revision = 1;
        Self {
            registry,
            table: ArcSwap::from_pointee(table),
            revision: AtomicU64::new(1),
            writer: Mutex::new(()),
        }
    }

    /// Returns the registry the router rebuilds from.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Returns the current table.
    #[must_use]
    pub fn table(&self) -> Arc<RoutingTable> {
        self.table.load_full()
    }

    /// Returns the revision of the current table.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.table.load().revision
    }

    /// Rebuilds the table from the current registry snapshot and swaps it in.
    ///
    /// Concurrent reloads are serialized, so the last one to finish always
    /// publishes the newest snapshot it could see. Returns the new revision.
    pub fn reload(&self) -> u64 {
        // The mutex guards no data; a poisoned lock is still a valid writer slot.
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.registry.snapshot();
        let generation = snapshot.generation();
        let table = RoutingTable::build(snapshot);
        let routes = table.len();
        let revision = self.publish(table);
        tracing::info!(revision, generation, routes, "routing table reloaded");
        revision
    }

    /// Publishes a table serving only the root listing.
    ///
    /// Returns the new revision.
    pub fn clear(&self) -> u64 {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let revision = self.publish(RoutingTable::empty());
        tracing::info!(revision, "routing table cleared");
        revision
    }

    /// Callers hold `writer`.
    fn publish(&self, mut table: RoutingTable) -> u64 {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        table.revision = revision;
        #[allow(clippy::cast_precision_loss)]
        gauge!(ROUTING_TABLE_ROUTES).set(table.len() as f64);
        counter!(ROUTES_RELOADED).increment(1);
        self.table.store(Arc::new(table));
        revision
    }

    /// Matches `method` and the raw, percent-encoded `path` (including the
    /// [`API_PREFIX`]).
    ///
    /// # Errors
    ///
    /// - 404 when no route matches the path or a segment is not valid UTF-8
    /// - 405 with an `Allow` header for methods other than GET, HEAD and OPTIONS
    pub fn resolve(&self, method: &Method, path: &str) -> Result<Resolution, ApiError> {
        let segments = path_segments(path).ok_or_else(|| ApiError::not_found("Not found."))?;
        let table = self.table.load_full();
        let Some((endpoint, params)) = table.find(&segments) else {
            return Err(ApiError::not_found("Not found."));
        };
        if !(method == Method::GET || method == Method::HEAD || method == Method::OPTIONS) {
            return Err(ApiError::method_not_allowed(ALLOWED_METHODS));
        }
        Ok(Resolution {
            endpoint,
            params,
            segments,
            table,
        })
    }

    /// Confirms a resolution against the current table.
    ///
    /// A resolution from an older table is matched again; a route that no
    /// longer exists yields not-found.
    ///
    /// # Errors
    ///
    /// Returns a 404 [`ApiError`] when the route was removed.
    pub fn revalidate(&self, resolution: Resolution) -> Result<Resolution, ApiError> {
        let table = self.table.load_full();
        if resolution.revision() == table.revision {
            return Ok(resolution);
        }
        tracing::debug!(
            path = %resolution.segments.join("/"),
            from = resolution.revision(),
            to = table.revision,
            "revalidating stale route"
        );
        let Some((endpoint, params)) = table.find(&resolution.segments) else {
            return Err(ApiError::not_found("Not found."));
        };
        Ok(Resolution {
            endpoint,
            params,
            segments: resolution.segments,
            table,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dso_test_utils::fixture_schemas;

    fn router() -> DynamicRouter {
        let registry = Arc::new(Registry::new());
        for schema in fixture_schemas() {
            registry.register_dataset(schema).unwrap();
        }
        DynamicRouter::new(registry)
    }

    #[test]
    fn resolves_list_detail_and_relation() {
        let router = router();

        let list = router
            .resolve(&Method::GET, "/v1/afvalwegingen/containers/")
            .unwrap();
        assert!(matches!(list.endpoint, Endpoint::List(ref r) if r.name() == "containers"));

        let detail = router
            .resolve(&Method::GET, "/v1/afvalwegingen/containers/1")
            .unwrap();
        assert!(matches!(detail.endpoint, Endpoint::Detail(_)));
        assert_eq!(detail.id(), Some("1"));

        let relation = router
            .resolve(&Method::GET, "/v1/parkeervakken/parkeervakken/121138489006/regimes/")
            .unwrap();
        assert!(
            matches!(relation.endpoint, Endpoint::Relation { ref relation, .. } if relation == "regimes")
        );
    }

    #[test]
    fn root_and_dataset_index() {
        let router = router();
        assert!(matches!(
            router.resolve(&Method::GET, "/v1").unwrap().endpoint,
            Endpoint::Root
        ));
        assert!(matches!(
            router.resolve(&Method::GET, "/v1/gebieden/").unwrap().endpoint,
            Endpoint::DatasetIndex { ref dataset } if dataset == "gebieden"
        ));
        assert!(router.resolve(&Method::GET, "/v10/gebieden").is_err());
    }

    #[test]
    fn unknown_paths_are_not_found() {
        let router = router();
        let err = router
            .resolve(&Method::GET, "/v1/afvalwegingen/onbekend/")
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn write_methods_are_not_allowed() {
        let router = router();
        let err = router
            .resolve(&Method::POST, "/v1/bommen/bommen/")
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn cleared_table_serves_only_root() {
        let router = router();
        let before = router
            .resolve(&Method::GET, "/v1/bommen/bommen/")
            .unwrap();

        router.clear();
        assert_eq!(router.table().source_generation(), None);
        assert!(router.resolve(&Method::GET, "/v1/").is_ok());
        assert!(router.resolve(&Method::GET, "/v1/bommen/bommen/").is_err());

        let err = router.revalidate(before).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn reload_tracks_registry_generation() {
        let router = router();
        let first = router.revision();
        router.registry().unregister("bommen");
        let revision = router.reload();
        assert!(revision > first);
        assert_eq!(
            router.table().source_generation(),
            Some(router.registry().snapshot().generation())
        );
        assert!(router.resolve(&Method::GET, "/v1/bommen/bommen/").is_err());
    }

    #[test]
    fn resolution_keeps_the_snapshot_of_its_table() {
        let router = router();
        let before = router
            .resolve(&Method::GET, "/v1/afvalwegingen/containers/1/")
            .unwrap();
        let generation = before.snapshot().generation();

        router.registry().unregister("bommen");
        let again = router.revalidate(before).unwrap();
        assert_eq!(again.snapshot().generation(), generation);
        assert!(again.snapshot().dataset("bommen").is_some());

        router.reload();
        let fresh = router
            .resolve(&Method::GET, "/v1/afvalwegingen/containers/1/")
            .unwrap();
        assert!(fresh.snapshot().generation() > generation);
        assert!(fresh.snapshot().dataset("bommen").is_none());
    }

    #[test]
    fn segments_are_decoded_after_splitting() {
        let router = router();
        let detail = router
            .resolve(&Method::GET, "/v1/afvalwegingen/clusters/a%2Fb/")
            .unwrap();
        assert!(matches!(detail.endpoint, Endpoint::Detail(_)));
        assert_eq!(detail.id(), Some("a/b"));

        let err = router
            .resolve(&Method::GET, "/v1/afvalwegingen/clusters/%FF/")
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn current_resolution_passes_revalidation() {
        let router = router();
        let resolution = router
            .resolve(&Method::GET, "/v1/bommen/bommen/")
            .unwrap();
        router.reload();
        let again = router.revalidate(resolution).unwrap();
        assert_eq!(again.revision(), router.revision());
    }
}
