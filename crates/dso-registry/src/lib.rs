//! # dso-registry
//!
//! Maps dataset schemas to runtime [`ResourceDefinition`]s and keeps them in a
//! process-wide [`Registry`] that can be rebuilt without a restart.
//!
//! ## Snapshot semantics
//!
//! The registry is copy-on-write. [`Registry::snapshot`] never blocks, and a
//! snapshot never changes after it is taken. Every mutation publishes a new
//! snapshot with a higher generation number; routing tables record the
//! generation they were built from.
//!
//! ## Example
//!
//! ```rust
//! use dso_core::schema::DatasetSchema;
//! use dso_registry::Registry;
//!
//! let schema = DatasetSchema::from_json(
//!     r#"{"id": "bommen", "tables": [{"id": "bommen", "fields": [{"name": "id", "type": "integer"}]}]}"#,
//! ).unwrap();
//! let registry = Registry::new();
//! registry.register_dataset(schema).unwrap();
//! assert!(registry.snapshot().resource("bommen", "bommen").is_some());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod error;
pub mod loader;
pub mod registry;
pub mod resource;

pub use error::{Result, SchemaError};
pub use loader::SchemaLoader;
pub use registry::{DatasetEntry, Registry, RegistrySnapshot};
pub use resource::{Backend, ResourceDefinition};
