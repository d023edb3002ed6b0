//! Error types for registry operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, SchemaError>;

/// A schema could not be turned into resource definitions.
///
/// Registry mutations that fail with a `SchemaError` leave the registry
/// untouched.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The table lacks a field the dataset requires as identifier.
    #[error("{dataset}.{table}: missing identifier field '{field}'")]
    MissingIdentifier {
        /// Dataset id.
        dataset: String,
        /// Table name.
        table: String,
        /// Missing field name.
        field: String,
    },

    /// A temporal table lacks a field named by the temporal configuration.
    #[error("{dataset}.{table}: missing temporal field '{field}'")]
    MissingTemporalField {
        /// Dataset id.
        dataset: String,
        /// Table name.
        table: String,
        /// Missing field name.
        field: String,
    },

    /// Two fields in one table share a name.
    #[error("{dataset}.{table}: duplicate field '{field}'")]
    DuplicateField {
        /// Dataset id.
        dataset: String,
        /// Table name.
        table: String,
        /// Duplicated field name.
        field: String,
    },

    /// Two tables in one dataset share a name.
    #[error("{dataset}: duplicate table '{table}'")]
    DuplicateTable {
        /// Dataset id.
        dataset: String,
        /// Duplicated table name.
        table: String,
    },

    /// A relation points at a table the dataset does not define.
    #[error("{dataset}.{table}.{field}: unknown relation target '{target}'")]
    UnknownRelationTarget {
        /// Dataset id.
        dataset: String,
        /// Table name.
        table: String,
        /// Relation field or reverse relation name.
        field: String,
        /// Target as written in the schema.
        target: String,
    },

    /// A resource was registered under another dataset's id.
    #[error("resource {table} belongs to dataset '{actual}', not '{expected}'")]
    DatasetMismatch {
        /// Dataset id the caller registered under.
        expected: String,
        /// Dataset id the resource was built from.
        actual: String,
        /// Table name.
        table: String,
    },

    /// A schema document could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Document path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A schema document could not be parsed.
    #[error("invalid schema document {path}: {source}")]
    Document {
        /// Document path.
        path: PathBuf,
        /// Parse failure.
        #[source]
        source: dso_core::Error,
    },
}
