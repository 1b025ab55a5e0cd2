//! AavionDB - a content-addressed, JSON-file-backed datastore.
//!
//! Deterministic canonical persistence with atomic verified writes,
//! versioned entities with incremental merges, a schema-validated save
//! pipeline, and a preset-driven export engine with inline reference
//! resolution. One command dispatch core serves the statement parser,
//! programmatic calls, and the REST gateway alike.

/// Crate version string.
#[must_use]
pub fn aaviondb_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub mod cli;
pub mod commands;
pub mod rest;
pub mod runtime;

pub use runtime::{Runtime, SetupOptions};

// Core types re-exported for embedders.
pub use aavion_dispatch::{CommandRequest, Response, Status};
pub use aavion_store::{BrainStore, SaveOptions};
pub use aavion_utils::{AavionError, Scope, ScopeMode};
