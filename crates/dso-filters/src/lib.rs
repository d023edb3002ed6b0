//! # dso-filters
//!
//! Translates DSO query parameters into store [`Predicate`]s and
//! [`SortKey`]s.
//!
//! A [`FilterSet`] is derived once per [`ResourceDefinition`] from its field
//! types. Each field maps to a [`FilterKind`], and the kind decides which
//! lookups (`field[not]`, `field[lt]`, ...) are accepted and how the raw
//! parameter value is parsed.
//!
//! ```text
//! ?naam=foo*&datumCreatie[gte]=2021-01-01&_sort=-datumCreatie
//!   -> naam LIKE 'foo%' AND datum_creatie >= '2021-01-01'
//!   -> ORDER BY datum_creatie DESC
//! ```
//!
//! Every malformed parameter is reported in a single [`FilterError::Invalid`]
//! so clients see all problems at once.
//!
//! [`Predicate`]: dso_core::query::Predicate
//! [`SortKey`]: dso_core::query::SortKey
//! [`ResourceDefinition`]: dso_registry::ResourceDefinition

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod error;
pub mod filterset;
pub mod geometry;
pub mod lookup;
pub mod ordering;
pub mod values;
pub mod wildcard;

pub use error::{FilterError, InvalidParam};
pub use filterset::{FilterOptions, FilterSet, MultiValueOperator, RESERVED_PARAMS};
pub use geometry::parse_point;
pub use lookup::{FilterKind, Lookup, split_param};
pub use ordering::parse_ordering;
pub use wildcard::wildcard_to_like;
