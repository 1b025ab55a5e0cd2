//! Request scopes.
//!
//! A scope binds a mode and a project filter to every request. Store
//! operations consult the binding per project slug before reading or
//! writing. `WO` is preserved as a distinct mode but grants read+write
//! like `RW` (no write-only flow ships).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AavionError;

/// Permission mode of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeMode {
    #[serde(rename = "ALL")]
    All,
    #[serde(rename = "RW")]
    ReadWrite,
    #[serde(rename = "RO")]
    ReadOnly,
    #[serde(rename = "WO")]
    WriteOnly,
}

impl ScopeMode {
    /// Canonical wire name (`ALL`, `RW`, `RO`, `WO`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::ReadWrite => "RW",
            Self::ReadOnly => "RO",
            Self::WriteOnly => "WO",
        }
    }
}

impl fmt::Display for ScopeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeMode {
    type Err = AavionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ALL" => Ok(Self::All),
            "RW" => Ok(Self::ReadWrite),
            "RO" => Ok(Self::ReadOnly),
            "WO" => Ok(Self::WriteOnly),
            other => Err(AavionError::InvalidParameter {
                name: "scope".to_string(),
                reason: format!("unknown mode '{other}'"),
            }),
        }
    }
}

/// A mode plus project filter. `projects == ["*"]` matches any project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub mode: ScopeMode,
    pub projects: Vec<String>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::all()
    }
}

impl Scope {
    /// The implicit scope of CLI/embedded entry points.
    #[must_use]
    pub fn all() -> Self {
        Self {
            mode: ScopeMode::All,
            projects: vec!["*".to_string()],
        }
    }

    /// Whether the project filter admits `project`.
    #[must_use]
    pub fn matches_project(&self, project: &str) -> bool {
        self.projects.iter().any(|p| p == "*" || p == project)
    }

    /// Read permission on `project`. Every mode grants reads (`WO` falls
    /// back to `RW` semantics).
    #[must_use]
    pub fn allows_read(&self, project: &str) -> bool {
        self.matches_project(project)
    }

    /// Write permission on `project`.
    #[must_use]
    pub fn allows_write(&self, project: &str) -> bool {
        matches!(
            self.mode,
            ScopeMode::All | ScopeMode::ReadWrite | ScopeMode::WriteOnly
        ) && self.matches_project(project)
    }

    /// Fail with [`AavionError::ScopeDenied`] unless writes to `project`
    /// are allowed.
    pub fn require_write(&self, project: &str) -> Result<(), AavionError> {
        if self.allows_write(project) {
            Ok(())
        } else {
            Err(AavionError::ScopeDenied {
                operation: "write".to_string(),
                project: project.to_string(),
            })
        }
    }

    /// Fail with [`AavionError::ScopeDenied`] unless reads of `project`
    /// are allowed.
    pub fn require_read(&self, project: &str) -> Result<(), AavionError> {
        if self.allows_read(project) {
            Ok(())
        } else {
            Err(AavionError::ScopeDenied {
                operation: "read".to_string(),
                project: project.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(mode: ScopeMode, projects: &[&str]) -> Scope {
        Scope {
            mode,
            projects: projects.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn wildcard_matches_everything() {
        let s = Scope::all();
        assert!(s.allows_read("demo"));
        assert!(s.allows_write("demo"));
    }

    #[test]
    fn read_only_denies_writes() {
        let s = scope(ScopeMode::ReadOnly, &["demo"]);
        assert!(s.allows_read("demo"));
        assert!(!s.allows_write("demo"));
        assert!(s.require_write("demo").is_err());
    }

    #[test]
    fn project_filter_is_enforced() {
        let s = scope(ScopeMode::ReadWrite, &["demo"]);
        assert!(s.allows_write("demo"));
        assert!(!s.allows_write("other"));
        assert!(!s.allows_read("other"));
    }

    #[test]
    fn write_only_grants_read_and_write() {
        let s = scope(ScopeMode::WriteOnly, &["*"]);
        assert!(s.allows_write("demo"));
        assert!(s.allows_read("demo"));
        assert_eq!(s.mode.as_str(), "WO");
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("rw".parse::<ScopeMode>().unwrap(), ScopeMode::ReadWrite);
        assert_eq!("ALL".parse::<ScopeMode>().unwrap(), ScopeMode::All);
        assert!("NOPE".parse::<ScopeMode>().is_err());
    }
}
