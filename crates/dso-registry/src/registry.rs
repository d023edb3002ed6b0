//! Process-wide resource registry with copy-on-write snapshots.
//!
//! Readers call [`Registry::snapshot`] and get an immutable
//! [`RegistrySnapshot`] without taking any lock. Writers serialize on a
//! mutex, build a complete new snapshot and publish it with a single atomic
//! store, so a reader sees either the old mapping or the new one.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use dso_core::observability::registry_span;
use dso_core::schema::DatasetSchema;

use crate::error::{Result, SchemaError};
use crate::resource::ResourceDefinition;

/// All resources of one dataset.
#[derive(Debug, Clone)]
pub struct DatasetEntry {
    schema: Arc<DatasetSchema>,
    resources: BTreeMap<String, Arc<ResourceDefinition>>,
}

impl DatasetEntry {
    /// Returns the dataset schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<DatasetSchema> {
        &self.schema
    }

    /// Looks up a resource by table name.
    #[must_use]
    pub fn resource(&self, table: &str) -> Option<&Arc<ResourceDefinition>> {
        self.resources.get(table)
    }

    /// Iterates resources in table-name order.
    pub fn resources(&self) -> impl Iterator<Item = &Arc<ResourceDefinition>> {
        self.resources.values()
    }
}

/// An immutable view of the registry at one generation.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    generation: u64,
    datasets: BTreeMap<String, DatasetEntry>,
}

impl RegistrySnapshot {
    /// Returns the generation; every published mutation increments it.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Looks up a dataset.
    #[must_use]
    pub fn dataset(&self, id: &str) -> Option<&DatasetEntry> {
        self.datasets.get(id)
    }

    /// Iterates datasets in id order.
    pub fn datasets(&self) -> impl Iterator<Item = (&str, &DatasetEntry)> {
        self.datasets.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    /// Looks up a resource by composite key.
    #[must_use]
    pub fn resource(&self, dataset: &str, table: &str) -> Option<&Arc<ResourceDefinition>> {
        self.datasets.get(dataset)?.resource(table)
    }

    /// Iterates every resource, ordered by dataset then table.
    pub fn resources(&self) -> impl Iterator<Item = &Arc<ResourceDefinition>> {
        self.datasets.values().flat_map(DatasetEntry::resources)
    }

    /// Returns the number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.datasets.values().map(|d| d.resources.len()).sum()
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The registry of resource definitions.
#[derive(Debug)]
pub struct Registry {
    current: ArcSwap<RegistrySnapshot>,
    writer: Mutex<()>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistrySnapshot::default()),
            writer: Mutex::new(()),
        }
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Adds or replaces one resource under `(dataset_id, table)`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::DatasetMismatch`] when the resource was built
    /// for another dataset.
    pub fn register(&self, dataset_id: &str, resource: ResourceDefinition) -> Result<u64> {
        if resource.dataset_id() != dataset_id {
            return Err(SchemaError::DatasetMismatch {
                expected: dataset_id.to_string(),
                actual: resource.dataset_id().to_string(),
                table: resource.name().to_string(),
            });
        }
        let span = registry_span("register", dataset_id);
        let _guard = span.enter();

        Ok(self.mutate(|datasets| {
            let schema = Arc::new(resource.dataset().clone());
            let entry = datasets
                .entry(dataset_id.to_string())
                .or_insert_with(|| DatasetEntry {
                    schema: Arc::clone(&schema),
                    resources: BTreeMap::new(),
                });
            // Dataset metadata follows the most recently registered resource.
            entry.schema = schema;
            entry
                .resources
                .insert(resource.name().to_string(), Arc::new(resource));
        }))
    }

    /// Replaces a whole dataset with the resources built from `schema`.
    ///
    /// Relation targets inside the dataset are validated; targets in other
    /// datasets are not.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] when any table is malformed; the registry is
    /// left unchanged.
    pub fn register_dataset(&self, schema: DatasetSchema) -> Result<u64> {
        let span = registry_span("register_dataset", &schema.id);
        let _guard = span.enter();

        let entry = build_entry(schema)?;
        let id = entry.schema.id.clone();
        let tables = entry.resources.len();
        let generation = self.mutate(|datasets| {
            datasets.insert(id, entry);
        });
        tracing::info!(generation, tables, "dataset registered");
        Ok(generation)
    }

    /// Removes every resource of `dataset_id`. Returns whether anything was
    /// removed.
    pub fn unregister(&self, dataset_id: &str) -> bool {
        let span = registry_span("unregister", dataset_id);
        let _guard = span.enter();

        let mut removed = false;
        let generation = self.mutate(|datasets| {
            removed = datasets.remove(dataset_id).is_some();
        });
        tracing::info!(generation, removed, "dataset unregistered");
        removed
    }

    /// Removes every dataset.
    pub fn clear(&self) -> u64 {
        self.mutate(BTreeMap::clear)
    }

    fn mutate<F>(&self, apply: F) -> u64
    where
        F: FnOnce(&mut BTreeMap<String, DatasetEntry>),
    {
        // The mutex guards no data; a poisoned lock is still a valid writer slot.
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.current.load();
        let mut datasets = current.datasets.clone();
        apply(&mut datasets);
        let generation = current.generation + 1;
        self.current.store(Arc::new(RegistrySnapshot {
            generation,
            datasets,
        }));
        generation
    }
}

fn build_entry(schema: DatasetSchema) -> Result<DatasetEntry> {
    let schema = Arc::new(schema);
    let mut resources = BTreeMap::new();
    for table in &schema.tables {
        let resource = ResourceDefinition::from_schema(Arc::clone(&schema), table)?;
        if resources
            .insert(table.id.clone(), Arc::new(resource))
            .is_some()
        {
            return Err(SchemaError::DuplicateTable {
                dataset: schema.id.clone(),
                table: table.id.clone(),
            });
        }
    }

    for table in &schema.tables {
        for field in table.relations() {
            let Some((dataset, target)) = field.relation_target(&schema.id) else {
                continue;
            };
            if dataset == schema.id && !resources.contains_key(&target) {
                return Err(SchemaError::UnknownRelationTarget {
                    dataset: schema.id.clone(),
                    table: table.id.clone(),
                    field: field.name.clone(),
                    target,
                });
            }
        }
        for reverse in &table.reverse_relations {
            let points_back = schema
                .table(&reverse.table)
                .and_then(|t| t.field(&reverse.field))
                .and_then(|f| f.relation_target(&schema.id))
                .is_some_and(|(ds, t)| ds == schema.id && t == table.id);
            if !points_back {
                return Err(SchemaError::UnknownRelationTarget {
                    dataset: schema.id.clone(),
                    table: table.id.clone(),
                    field: reverse.name.clone(),
                    target: format!("{}.{}", reverse.table, reverse.field),
                });
            }
        }
    }

    Ok(DatasetEntry { schema, resources })
}
