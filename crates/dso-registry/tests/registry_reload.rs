//! Registry rebuilds under concurrent readers, and directory loading.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dso_registry::{Registry, SchemaError, SchemaLoader};
use dso_test_utils::{
    TempSchemaDir, afvalwegingen_schema, bommen_schema, fixture_schemas, gebieden_schema,
};

#[test]
fn readers_see_whole_datasets_during_rebuilds() {
    let registry = Arc::new(Registry::new());
    registry
        .register_dataset(afvalwegingen_schema())
        .expect("register");
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut observed = 0_u64;
                while !stop.load(Ordering::Relaxed) {
                    let snapshot = registry.snapshot();
                    // afvalwegingen is always registered with both tables or not at all
                    let tables = snapshot
                        .dataset("afvalwegingen")
                        .map_or(0, |d| d.resources().count());
                    assert!(tables == 0 || tables == 2, "torn snapshot with {tables} tables");
                    observed += 1;
                }
                observed
            })
        })
        .collect();

    for _ in 0..200 {
        registry.unregister("afvalwegingen");
        registry
            .register_dataset(afvalwegingen_schema())
            .expect("register");
    }
    stop.store(true, Ordering::Relaxed);

    for reader in readers {
        assert!(reader.join().expect("reader thread") > 0);
    }
    assert_eq!(registry.snapshot().generation(), 401);
}

#[test]
fn loader_registers_every_document() {
    let dir = TempSchemaDir::with_schemas(&fixture_schemas());
    dir.write("README.txt", "not a schema");

    let registry = Registry::new();
    let count = SchemaLoader::new(dir.path())
        .load_into(&registry)
        .expect("load");
    assert_eq!(count, 4);

    let snapshot = registry.snapshot();
    assert!(snapshot.resource("gebieden", "buurten").is_some());
    assert!(snapshot.resource("parkeervakken", "regimes").is_some());
    assert_eq!(snapshot.len(), 7);
}

#[test]
fn loader_names_the_broken_document() {
    let dir = TempSchemaDir::with_schemas(&[bommen_schema(), gebieden_schema()]);
    dir.write("zz-broken.json", "{\"id\": ");

    let registry = Registry::new();
    let err = SchemaLoader::new(dir.path())
        .load_into(&registry)
        .expect_err("broken document");
    match err {
        SchemaError::Document { path, .. } => {
            assert!(path.ends_with("zz-broken.json"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(registry.snapshot().is_empty());
}

#[test]
fn loader_reports_missing_directory() {
    let err = SchemaLoader::new("/nonexistent/dso-schemas")
        .load()
        .expect_err("missing dir");
    assert!(matches!(err, SchemaError::Io { .. }));
}
