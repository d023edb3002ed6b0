//! Temporary directories holding schema documents.

use std::path::{Path, PathBuf};

use dso_core::schema::DatasetSchema;

/// A directory under the system temp dir, removed on drop.
#[derive(Debug)]
pub struct TempSchemaDir {
    path: PathBuf,
}

impl TempSchemaDir {
    /// Creates an empty directory with a unique name.
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("dso-schemas-{}", ulid::Ulid::new()));
        std::fs::create_dir_all(&path).expect("create temp dir");
        Self { path }
    }

    /// Creates a directory holding one `<id>.json` document per schema.
    pub fn with_schemas(schemas: &[DatasetSchema]) -> Self {
        let dir = Self::new();
        for schema in schemas {
            let document = serde_json::to_string_pretty(schema).expect("serialize schema");
            dir.write(&format!("{}.json", schema.id), &document);
        }
        dir
    }

    /// Writes a raw file into the directory.
    pub fn write(&self, name: &str, contents: &str) {
        std::fs::write(self.path.join(name), contents).expect("write file");
    }

    /// Returns the directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for TempSchemaDir {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TempSchemaDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}
