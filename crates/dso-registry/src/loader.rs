//! Loads dataset schema documents from a directory.

use std::path::{Path, PathBuf};

use dso_core::schema::DatasetSchema;

use crate::error::{Result, SchemaError};
use crate::registry::Registry;

/// Reads every `*.json` schema document in a directory.
#[derive(Debug, Clone)]
pub struct SchemaLoader {
    dir: PathBuf,
}

impl SchemaLoader {
    /// Creates a loader for `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the directory this loader reads.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parses every document, in file-name order.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Io`] when the directory or a file cannot be
    /// read and [`SchemaError::Document`] naming the file that failed to
    /// parse.
    pub fn load(&self) -> Result<Vec<DatasetSchema>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| SchemaError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SchemaError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        paths
            .into_iter()
            .map(|path| {
                let document = std::fs::read_to_string(&path).map_err(|source| SchemaError::Io {
                    path: path.clone(),
                    source,
                })?;
                DatasetSchema::from_json(&document).map_err(|source| SchemaError::Document { path, source })
            })
            .collect()
    }

    /// Parses every document and registers each dataset.
    ///
    /// All documents are parsed before anything is registered, so a parse
    /// failure leaves the registry untouched. Returns the number of datasets
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] encountered.
    pub fn load_into(&self, registry: &Registry) -> Result<usize> {
        let schemas = self.load()?;
        let count = schemas.len();
        for schema in schemas {
            registry.register_dataset(schema)?;
        }
        tracing::info!(dir = %self.dir.display(), datasets = count, "schemas loaded");
        Ok(count)
    }
}
