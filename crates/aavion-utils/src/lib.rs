//! Foundation utilities shared by every AavionDB crate.
//!
//! This crate provides the canonical JSON codec and content hasher, the
//! root-anchored path locator with slug sanitization, the verifying atomic
//! file writer, the library-wide error taxonomy, and logging/timestamp
//! helpers.

pub mod atomic;
pub mod canonical;
pub mod error;
pub mod logging;
pub mod paths;
pub mod scope;
pub mod time;

pub use atomic::{AtomicWriter, FailureReason, WriteFailure, WriteRecord};
pub use error::AavionError;
pub use paths::{Paths, normalize_slug, sanitize_slug};
pub use scope::{Scope, ScopeMode};
