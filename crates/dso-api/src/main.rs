//! `dso-api` binary entrypoint.
//!
//! Loads configuration from environment variables, registers the dataset
//! schemas, seeds the in-memory store and starts the HTTP server. On unix a
//! `SIGHUP` reloads the schema directory and swaps the routing table.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use dso_api::config::Config;
use dso_api::server::Server;
use dso_core::observability::{LogFormat, init_logging};
use dso_core::scopes::ProfileSet;
use dso_core::store::MemoryStore;
use dso_registry::{Registry, SchemaLoader};

fn choose_log_format(config: &Config) -> LogFormat {
    if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

/// Registers every schema in `dir` and drops datasets no longer present.
fn sync_schemas(dir: &Path, registry: &Registry) -> Result<usize> {
    let schemas = SchemaLoader::new(dir)
        .load()
        .with_context(|| format!("loading schemas from {}", dir.display()))?;
    let loaded: BTreeSet<String> = schemas.iter().map(|schema| schema.id.clone()).collect();

    let count = schemas.len();
    for schema in schemas {
        let id = schema.id.clone();
        registry
            .register_dataset(schema)
            .with_context(|| format!("registering dataset {id}"))?;
    }

    let stale: Vec<String> = registry
        .snapshot()
        .datasets()
        .map(|(id, _)| id.to_string())
        .filter(|id| !loaded.contains(id))
        .collect();
    for id in stale {
        registry.unregister(&id);
    }
    Ok(count)
}

/// Seeds `<dataset>_<table>.json` files for every registered local table.
fn seed_store(dir: &Path, registry: &Registry, store: &MemoryStore) -> Result<usize> {
    let mut seeded = 0;
    for resource in registry.snapshot().resources() {
        if resource.is_remote() {
            continue;
        }
        let path = dir.join(format!("{}_{}.json", resource.dataset_id(), resource.name()));
        if !path.exists() {
            continue;
        }
        let document = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let rows = store
            .seed_from_json(resource.key(), &document)
            .with_context(|| format!("seeding {}", path.display()))?;
        tracing::info!(dataset = resource.dataset_id(), table = resource.name(), rows, "seeded table");
        seeded += rows;
    }
    Ok(seeded)
}

/// Re-reads the schema directory and swaps the routing table on `SIGHUP`.
#[cfg(unix)]
fn reload_on_hangup(server: &Server) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let Some(dir) = server.config().schema_dir.clone() else {
        return Ok(());
    };
    let routes = Arc::clone(server.routes());
    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match sync_schemas(&dir, routes.registry()) {
                Ok(datasets) => {
                    let revision = routes.reload();
                    tracing::info!(datasets, revision, "schemas reloaded on SIGHUP");
                }
                Err(e) => {
                    tracing::error!(error = %e, "schema reload failed; keeping current routes");
                }
            }
        }
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(choose_log_format(&config));

    let registry = Arc::new(Registry::new());
    if let Some(dir) = config.schema_dir.as_deref() {
        let datasets = sync_schemas(dir, &registry)?;
        tracing::info!(datasets, dir = %dir.display(), "loaded dataset schemas");
    } else {
        tracing::warn!("DSO_SCHEMA_DIR not set; starting without datasets");
    }

    let store = Arc::new(MemoryStore::new());
    if let Some(dir) = config.data_dir.as_deref() {
        let rows = seed_store(dir, &registry, &store)?;
        tracing::info!(rows, dir = %dir.display(), "seeded in-memory store");
    }

    let profiles = match config.profiles_path.as_deref() {
        Some(path) => {
            let document = std::fs::read_to_string(path)
                .with_context(|| format!("reading profiles from {}", path.display()))?;
            ProfileSet::from_json(&document)?
        }
        None => ProfileSet::default(),
    };

    let server = Server::builder()
        .config(config)
        .registry(Arc::clone(&registry))
        .store(store)
        .profiles(profiles)
        .build()?;

    #[cfg(unix)]
    reload_on_hangup(&server)?;

    server.serve().await?;
    Ok(())
}
