//! Routing table reloads racing registry mutations.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::thread;

use axum::http::Method;

use dso_api::router::DynamicRouter;
use dso_core::schema::DatasetSchema;
use dso_registry::Registry;
use dso_test_utils::fixture_schemas;

fn dataset(id: &str) -> DatasetSchema {
    DatasetSchema::from_json(&format!(
        r#"{{"id": "{id}", "tables": [{{"id": "dingen", "fields": [{{"name": "id", "type": "integer"}}]}}]}}"#
    ))
    .unwrap()
}

#[test]
fn concurrent_reloads_publish_the_newest_snapshot() {
    for _ in 0..20 {
        let registry = Arc::new(Registry::new());
        for schema in fixture_schemas() {
            registry.register_dataset(schema).unwrap();
        }
        let router = DynamicRouter::new(Arc::clone(&registry));

        thread::scope(|scope| {
            for worker in 0..8 {
                let registry = &registry;
                let router = &router;
                scope.spawn(move || {
                    let mut last = 0;
                    for round in 0..25 {
                        let id = format!("set{worker}");
                        if round % 2 == 0 {
                            registry.register_dataset(dataset(&id)).unwrap();
                        } else {
                            registry.unregister(&id);
                        }
                        let revision = router.reload();
                        assert!(revision > last);
                        last = revision;
                    }
                });
            }
        });

        let table = router.table();
        let snapshot = registry.snapshot();
        assert_eq!(table.source_generation(), Some(snapshot.generation()));
        assert_eq!(table.snapshot().generation(), snapshot.generation());
        for worker in 0..8 {
            // Every worker ends on an unregister.
            let path = format!("/v1/set{worker}/dingen/");
            assert!(router.resolve(&Method::GET, &path).is_err());
        }
        assert!(router.resolve(&Method::GET, "/v1/bommen/bommen/").is_ok());
    }
}

#[test]
fn clear_and_reload_interleave_without_losing_the_last_write() {
    let registry = Arc::new(Registry::new());
    for schema in fixture_schemas() {
        registry.register_dataset(schema).unwrap();
    }
    let router = DynamicRouter::new(Arc::clone(&registry));

    thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..50 {
                router.clear();
            }
        });
        scope.spawn(|| {
            for _ in 0..50 {
                router.reload();
            }
        });
    });

    router.reload();
    let table = router.table();
    assert_eq!(table.source_generation(), Some(registry.snapshot().generation()));
    assert_eq!(table.revision(), router.revision());
    assert!(router.resolve(&Method::GET, "/v1/bommen/bommen/").is_ok());
}
