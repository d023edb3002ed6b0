//! # dso-core
//!
//! Core abstractions for the dynamic DSO API.
//!
//! This crate provides the foundational types shared by every other crate:
//!
//! - **Schema Model**: typed dataset/table/field descriptors parsed from schema documents
//! - **Scopes**: authorization scope sets, scope requirements and field-access profiles
//! - **Temporal identifiers**: splitting and joining `identifier@version` keys
//! - **CRS**: coordinate reference system parsing and coordinate transforms
//! - **Query expressions**: store-level predicates and sort keys
//! - **Row stores**: the relational store contract plus an in-memory implementation
//! - **Error Types**: shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `dso-core` owns the vocabulary that crosses crate boundaries. It knows nothing
//! about HTTP; the request-handling layer lives in `dso-api`.
//!
//! ## Example
//!
//! ```rust
//! use dso_core::prelude::*;
//!
//! let (identifier, version) = split_on_separator("abc@2");
//! assert_eq!(identifier, "abc");
//! assert_eq!(version, Some("2"));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod crs;
pub mod error;
pub mod naming;
pub mod observability;
pub mod query;
pub mod schema;
pub mod scopes;
pub mod store;
pub mod temporal;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::crs::Crs;
    pub use crate::error::{Error, Result};
    pub use crate::naming::{to_camel_case, to_snake_case};
    pub use crate::query::{CompareOp, GeoPoint, Predicate, Query, SortKey};
    pub use crate::schema::{
        DatasetSchema, FieldSchema, FieldType, RemoteSchema, ReverseRelationSchema, TableSchema,
        TemporalConfig,
    };
    pub use crate::scopes::{AuthorizationScopeSet, Profile, ProfileSet, ScopeRequirement};
    pub use crate::store::{MemoryStore, Page, Row, RowStore, TableRef};
    pub use crate::temporal::{TEMPORAL_SEPARATOR, split_on_separator};
}

pub use crs::Crs;
pub use error::{Error, Result};
pub use observability::{LogFormat, init_logging};
pub use query::{CompareOp, GeoPoint, Predicate, Query, SortKey};
pub use schema::{DatasetSchema, FieldSchema, FieldType, TableSchema, TemporalConfig};
pub use scopes::{AuthorizationScopeSet, Profile, ProfileSet, ScopeRequirement};
pub use store::{MemoryStore, Page, Row, RowStore, TableRef};
