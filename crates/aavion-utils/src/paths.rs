//! Root-anchored path resolution and slug sanitization.
//!
//! All on-disk locations hang off a single root directory, taken from the
//! `AAVIONDB_HOME` environment variable or defaulting to `./.aaviondb`.
//! Tests override the root through a thread-local to avoid process-global
//! env races.

use std::cell::RefCell;
use std::fs;

use camino::Utf8PathBuf;

use crate::error::AavionError;

// Thread-local override used only in tests to avoid process-global env races.
thread_local! {
    static THREAD_HOME: RefCell<Option<Utf8PathBuf>> = const { RefCell::new(None) };
}

/// Slug reserved for the system brain; never a valid user brain name.
pub const RESERVED_SYSTEM_SLUG: &str = "system";

/// Resolve the AavionDB root directory.
#[must_use]
pub fn aavion_home() -> Utf8PathBuf {
    if let Some(tl) = THREAD_HOME.with(|tl| tl.borrow().clone()) {
        return tl;
    }
    if let Ok(p) = std::env::var("AAVIONDB_HOME") {
        return Utf8PathBuf::from(p);
    }
    Utf8PathBuf::from(".aaviondb")
}

/// Set a thread-local override for the root during tests.
pub fn set_thread_home_for_tests(path: Utf8PathBuf) {
    THREAD_HOME.with(|tl| *tl.borrow_mut() = Some(path));
}

/// Clear the thread-local root override.
pub fn clear_thread_home_for_tests() {
    THREAD_HOME.with(|tl| *tl.borrow_mut() = None);
}

/// Resolver for every directory and file AavionDB touches.
#[derive(Debug, Clone)]
pub struct Paths {
    root: Utf8PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Paths {
    /// Anchor at an explicit root.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Anchor at [`aavion_home`].
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            root: aavion_home(),
        }
    }

    /// The root directory itself.
    #[must_use]
    pub fn root(&self) -> &Utf8PathBuf {
        &self.root
    }

    /// `<root>/system/storage`
    #[must_use]
    pub fn system_storage(&self) -> Utf8PathBuf {
        self.root.join("system").join("storage")
    }

    /// `<root>/system/storage/system.brain`
    #[must_use]
    pub fn system_brain_file(&self) -> Utf8PathBuf {
        self.system_storage().join("system.brain")
    }

    /// `<root>/system/storage/logs`
    #[must_use]
    pub fn logs_dir(&self) -> Utf8PathBuf {
        self.system_storage().join("logs")
    }

    /// `<root>/user/storage`
    #[must_use]
    pub fn user_storage(&self) -> Utf8PathBuf {
        self.root.join("user").join("storage")
    }

    /// `<root>/user/storage/<slug>.brain`
    #[must_use]
    pub fn brain_file(&self, slug: &str) -> Utf8PathBuf {
        self.user_storage().join(format!("{slug}.brain"))
    }

    /// `<root>/user/cache`
    #[must_use]
    pub fn cache_dir(&self) -> Utf8PathBuf {
        self.root.join("user").join("cache")
    }

    /// `<root>/user/backups`
    #[must_use]
    pub fn backups_dir(&self) -> Utf8PathBuf {
        self.root.join("user").join("backups")
    }

    /// `<root>/user/exports`
    #[must_use]
    pub fn exports_dir(&self) -> Utf8PathBuf {
        self.root.join("user").join("exports")
    }

    /// `<root>/user/presets/export`
    #[must_use]
    pub fn export_presets_dir(&self) -> Utf8PathBuf {
        self.root.join("user").join("presets").join("export")
    }

    /// `<root>/system/modules`
    #[must_use]
    pub fn system_modules_dir(&self) -> Utf8PathBuf {
        self.root.join("system").join("modules")
    }

    /// `<root>/user/modules`
    #[must_use]
    pub fn user_modules_dir(&self) -> Utf8PathBuf {
        self.root.join("user").join("modules")
    }

    /// Create every default directory that is missing.
    pub fn ensure_default_directories(&self) -> Result<(), AavionError> {
        for dir in [
            self.system_storage(),
            self.logs_dir(),
            self.user_storage(),
            self.cache_dir(),
            self.backups_dir(),
            self.exports_dir(),
            self.export_presets_dir(),
            self.system_modules_dir(),
            self.user_modules_dir(),
        ] {
            ensure_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Create a directory (and parents) if missing, tolerating benign races.
pub fn ensure_dir_all(path: &Utf8PathBuf) -> Result<(), AavionError> {
    if !path.as_std_path().exists() {
        fs::create_dir_all(path.as_std_path()).map_err(|e| AavionError::storage(path.clone(), e))?;
    }
    Ok(())
}

/// Sanitize a brain slug: lowercase, replace anything outside
/// `[a-z0-9._-]` with `-`, strip leading/trailing `-_.`, empty becomes
/// `default`.
#[must_use]
pub fn sanitize_slug(raw: &str) -> String {
    let cleaned: String = raw
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| matches!(c, '-' | '_' | '.'));
    if trimmed.is_empty() {
        "default".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Sanitize a project/entity slug; unlike [`sanitize_slug`], empty input
/// is an error rather than `default`.
pub fn normalize_slug(raw: &str) -> Result<String, AavionError> {
    let cleaned: String = raw
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| matches!(c, '-' | '_' | '.'));
    if trimmed.is_empty() {
        return Err(AavionError::InvalidSlug {
            slug: raw.to_string(),
            reason: "empty after sanitization".to_string(),
        });
    }
    Ok(trimmed.to_string())
}
