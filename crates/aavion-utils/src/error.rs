//! Library-level error taxonomy.
//!
//! Every failure that can cross a crate boundary is an [`AavionError`].
//! The dispatcher converts errors into response envelopes exactly once at
//! the dispatch boundary; the REST gateway additionally maps each kind to
//! an HTTP status via [`AavionError::http_status`].

use thiserror::Error;

/// Primary error type returned by AavionDB library operations.
#[derive(Error, Debug)]
pub enum AavionError {
    /// A slug failed sanitization (empty after cleanup, or reserved).
    #[error("Invalid slug '{slug}': {reason}")]
    InvalidSlug { slug: String, reason: String },

    /// A version/commit selector could not be resolved.
    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    /// A command parameter is missing or malformed.
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A payload or statement fragment is not valid JSON.
    #[error("Invalid JSON: {reason}")]
    InvalidJson { reason: String },

    /// A preset definition failed shape validation.
    #[error("Invalid preset '{slug}': {reason}")]
    InvalidPreset { slug: String, reason: String },

    /// Brain, project, entity, version, preset, or schema not found.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// The current scope does not permit the operation.
    #[error("Scope denied: {operation} on project '{project}'")]
    ScopeDenied { operation: String, project: String },

    /// Presented token does not match any active key.
    #[error("Invalid token")]
    InvalidToken,

    /// No token presented on an authenticated surface.
    #[error("Missing token")]
    MissingToken,

    /// The bootstrap key was presented over REST.
    #[error("Bootstrap key is not allowed over REST")]
    BootstrapNotAllowed,

    /// REST surface is disabled.
    #[error("REST API is disabled")]
    ApiDisabled,

    /// Per-client, global, or failed-attempt rate limit tripped.
    #[error("Rate limited ({reason}), retry after {retry_after_secs}s")]
    RateLimited {
        retry_after_secs: u64,
        reason: String,
    },

    /// Payload violates the bound fieldset schema.
    #[error("Schema validation failed at '{path}': {reason}")]
    SchemaValidation { path: String, reason: String },

    /// Atomic writer verification failed twice.
    #[error("Integrity failure writing '{path}': {reason}")]
    IntegrityFailure { path: String, reason: String },

    /// Canonical encoding failed (non-finite number or similar).
    #[error("Canonical encoding failed: {reason}")]
    Encoding { reason: String },

    /// Filesystem error outside the atomic-write verification protocol.
    #[error("Storage failure at '{path}': {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl AavionError {
    /// Build a [`AavionError::NotFound`] with a descriptive kind.
    #[must_use]
    pub fn not_found(kind: &str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            name: name.into(),
        }
    }

    /// Build a [`AavionError::Storage`] for a filesystem failure at `path`.
    #[must_use]
    pub fn storage(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Short type name surfaced in `meta.exception.type`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSlug { .. } => "InvalidSlug",
            Self::InvalidReference { .. } => "InvalidReference",
            Self::InvalidParameter { .. } => "InvalidParameter",
            Self::InvalidJson { .. } => "InvalidJSON",
            Self::InvalidPreset { .. } => "InvalidPreset",
            Self::NotFound { .. } => "NotFound",
            Self::ScopeDenied { .. } => "ScopeDenied",
            Self::InvalidToken => "InvalidToken",
            Self::MissingToken => "MissingToken",
            Self::BootstrapNotAllowed => "BootstrapNotAllowed",
            Self::ApiDisabled => "ApiDisabled",
            Self::RateLimited { .. } => "RateLimited",
            Self::SchemaValidation { .. } => "SchemaValidation",
            Self::IntegrityFailure { .. } => "IntegrityFailure",
            Self::Encoding { .. } => "EncodingError",
            Self::Storage { .. } => "StorageFailure",
        }
    }

    /// HTTP status the REST gateway responds with for this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::InvalidSlug { .. }
            | Self::InvalidReference { .. }
            | Self::InvalidParameter { .. }
            | Self::InvalidJson { .. }
            | Self::InvalidPreset { .. }
            | Self::NotFound { .. }
            | Self::SchemaValidation { .. } => 400,
            Self::MissingToken | Self::InvalidToken => 401,
            Self::ScopeDenied { .. } | Self::BootstrapNotAllowed => 403,
            Self::RateLimited { .. } => 429,
            Self::ApiDisabled => 503,
            Self::IntegrityFailure { .. } | Self::Encoding { .. } | Self::Storage { .. } => 500,
        }
    }

    /// Whether the failure is a plain validation error (no exception
    /// recorded in the envelope).
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidSlug { .. }
                | Self::InvalidReference { .. }
                | Self::InvalidParameter { .. }
                | Self::InvalidJson { .. }
                | Self::InvalidPreset { .. }
                | Self::NotFound { .. }
                | Self::SchemaValidation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AavionError::MissingToken.http_status(), 401);
        assert_eq!(AavionError::InvalidToken.http_status(), 401);
        assert_eq!(AavionError::BootstrapNotAllowed.http_status(), 403);
        assert_eq!(AavionError::ApiDisabled.http_status(), 503);
        assert_eq!(
            AavionError::RateLimited {
                retry_after_secs: 30,
                reason: "client".into()
            }
            .http_status(),
            429
        );
        assert_eq!(AavionError::not_found("project", "demo").http_status(), 400);
        assert_eq!(
            AavionError::ScopeDenied {
                operation: "write".into(),
                project: "demo".into()
            }
            .http_status(),
            403
        );
    }

    #[test]
    fn validation_errors_carry_no_exception() {
        assert!(AavionError::not_found("entity", "hero").is_validation());
        assert!(
            AavionError::SchemaValidation {
                path: "/name".into(),
                reason: "required".into()
            }
            .is_validation()
        );
        assert!(
            !AavionError::IntegrityFailure {
                path: "x.brain".into(),
                reason: "hash_mismatch".into()
            }
            .is_validation()
        );
    }
}
