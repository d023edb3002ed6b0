//! Shared test utilities for the dynamic DSO API.
//!
//! This crate provides:
//! - Sample dataset schemas ([`fixtures`]) covering plain, temporal, nested
//!   and field-protected tables
//! - A [`MemoryStore`](dso_core::MemoryStore) seeded with matching rows
//! - Bearer token minting for scope-based tests ([`tokens`])
//! - Temporary schema directories for loader tests ([`schema_dir`])

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod schema_dir;
pub mod tokens;

pub use fixtures::*;
pub use schema_dir::TempSchemaDir;
pub use tokens::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("dso=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
