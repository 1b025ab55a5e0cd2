//! The brain store.
//!
//! Loads, mutates, and persists the two JSON documents at the heart of
//! AavionDB: the system brain (config, auth, api, export presets,
//! scheduler, commits index) and the active user brain (projects,
//! entities, commits, hierarchy, config).
//!
//! Every read-modify-write takes a per-brain mutex for the whole
//! load → mutate → persist span, so concurrent writers never interleave.
//! Documents are re-read from disk on each operation; persistence goes
//! through the verifying atomic writer.

pub mod entities;
pub mod hierarchy;
pub mod lifecycle;
pub mod maintenance;
pub mod merge;
pub mod model;
pub mod projects;
pub mod refs;

pub use entities::{SaveOptions, SaveOutcome};
pub use model::*;

use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use serde_json::{Value, json};

use aavion_events::EventBus;
use aavion_utils::error::AavionError;
use aavion_utils::{AtomicWriter, Paths, canonical, paths, sanitize_slug};

/// Shared handle to both brains.
pub struct BrainStore {
    paths: Paths,
    bus: EventBus,
    writer: AtomicWriter,
    locks: Mutex<BTreeMap<String, Arc<Mutex<()>>>>,
}

impl BrainStore {
    /// Create a store rooted at `paths`, reporting on `bus`.
    #[must_use]
    pub fn new(paths: Paths, bus: EventBus) -> Self {
        let writer = AtomicWriter::new(bus.clone());
        Self {
            paths,
            bus,
            writer,
            locks: Mutex::new(BTreeMap::new()),
        }
    }

    /// The path locator this store is anchored at.
    #[must_use]
    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// The event bus mutations are reported on.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The atomic writer (for integrity reports).
    #[must_use]
    pub fn writer(&self) -> &AtomicWriter {
        &self.writer
    }

    fn lock_for(&self, slug: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        Arc::clone(locks.entry(slug.to_string()).or_default())
    }

    fn brain_path(&self, slug: &str) -> Utf8PathBuf {
        if slug == paths::RESERVED_SYSTEM_SLUG {
            self.paths.system_brain_file()
        } else {
            self.paths.brain_file(slug)
        }
    }

    /// Load a brain document from disk.
    fn load(&self, slug: &str) -> Result<Brain, AavionError> {
        let path = self.brain_path(slug);
        let bytes = fs::read(path.as_std_path())
            .map_err(|_| AavionError::not_found("brain", slug))?;
        let value = canonical::decode(&bytes)?;
        serde_json::from_value(value).map_err(|e| AavionError::InvalidJson {
            reason: format!("brain '{slug}' is malformed: {e}"),
        })
    }

    /// Persist a brain document, bumping `meta.updated_at`.
    fn persist(&self, slug: &str, brain: &mut Brain) -> Result<(), AavionError> {
        brain.touch();
        let bytes = canonical::encode_serialize(brain)?;
        self.writer.write(&self.brain_path(slug), &bytes)?;
        Ok(())
    }

    /// Read-only access to a brain by slug.
    pub fn read_brain<R>(
        &self,
        slug: &str,
        f: impl FnOnce(&Brain) -> Result<R, AavionError>,
    ) -> Result<R, AavionError> {
        let lock = self.lock_for(slug);
        let _guard = lock.lock().expect("brain lock poisoned");
        let brain = self.load(slug)?;
        f(&brain)
    }

    /// Read-modify-write on a brain by slug; persists only on success.
    pub fn with_brain<R>(
        &self,
        slug: &str,
        f: impl FnOnce(&mut Brain) -> Result<R, AavionError>,
    ) -> Result<R, AavionError> {
        let lock = self.lock_for(slug);
        let _guard = lock.lock().expect("brain lock poisoned");
        let mut brain = self.load(slug)?;
        let result = f(&mut brain)?;
        self.persist(slug, &mut brain)?;
        Ok(result)
    }

    /// Read-only access to the system brain.
    pub fn read_system<R>(
        &self,
        f: impl FnOnce(&Brain) -> Result<R, AavionError>,
    ) -> Result<R, AavionError> {
        self.read_brain(paths::RESERVED_SYSTEM_SLUG, f)
    }

    /// Read-modify-write on the system brain.
    pub fn with_system<R>(
        &self,
        f: impl FnOnce(&mut Brain) -> Result<R, AavionError>,
    ) -> Result<R, AavionError> {
        self.with_brain(paths::RESERVED_SYSTEM_SLUG, f)
    }

    /// The currently active user brain slug.
    pub fn active_brain_slug(&self) -> Result<String, AavionError> {
        self.read_system(|brain| {
            Ok(brain
                .state
                .as_ref()
                .map_or_else(|| "default".to_string(), |s| s.active_brain.clone()))
        })
    }

    /// Read-only access to the active user brain.
    pub fn read_active<R>(
        &self,
        f: impl FnOnce(&str, &Brain) -> Result<R, AavionError>,
    ) -> Result<R, AavionError> {
        let slug = self.active_brain_slug()?;
        self.read_brain(&slug, |brain| f(&slug, brain))
    }

    /// Read-modify-write on the active user brain.
    pub fn with_active<R>(
        &self,
        f: impl FnOnce(&str, &mut Brain) -> Result<R, AavionError>,
    ) -> Result<R, AavionError> {
        let slug = self.active_brain_slug()?;
        self.with_brain(&slug, |brain| f(&slug, brain))
    }

    /// Idempotent system-brain initialization. Reads, merges newly added
    /// default config keys and `overrides`, and writes back, so upgrades
    /// land missing keys without clobbering existing values. Returns
    /// whether the brain was created from scratch.
    pub fn ensure_system_brain(
        &self,
        overrides: Option<&BTreeMap<String, Value>>,
    ) -> Result<bool, AavionError> {
        let lock = self.lock_for(paths::RESERVED_SYSTEM_SLUG);
        let _guard = lock.lock().expect("brain lock poisoned");

        let path = self.paths.system_brain_file();
        let (mut brain, created) = if path.as_std_path().exists() {
            (self.load(paths::RESERVED_SYSTEM_SLUG)?, false)
        } else {
            (
                Brain::new_system(uuid::Uuid::new_v4().to_string()),
                true,
            )
        };

        for (key, value) in default_config(&self.paths) {
            brain.config.entry(key).or_insert(value);
        }
        if let Some(overrides) = overrides {
            for (key, value) in overrides {
                brain
                    .config
                    .insert(normalize_config_key(key), value.clone());
            }
        }
        // Sections added after the brain was first written.
        brain.state.get_or_insert_with(SystemState::default);
        brain.auth.get_or_insert_with(AuthState::default);
        brain.api.get_or_insert_with(ApiState::default);
        brain.export.get_or_insert_with(ExportState::default);
        brain.scheduler.get_or_insert_with(SchedulerState::default);
        brain.security.get_or_insert_with(BTreeMap::new);
        brain.cache.get_or_insert_with(CacheSettings::default);

        self.persist(paths::RESERVED_SYSTEM_SLUG, &mut brain)?;
        if created {
            self.bus
                .emit("brain.created", json!({"slug": "system", "system": true}));
        }
        Ok(created)
    }

    /// Ensure the active user brain exists, creating `default.brain` if
    /// none does. Returns its slug.
    pub fn ensure_active_brain(&self) -> Result<String, AavionError> {
        let slug = self.active_brain_slug()?;
        let path = self.paths.brain_file(&slug);
        if !path.as_std_path().exists() {
            let lock = self.lock_for(&slug);
            let _guard = lock.lock().expect("brain lock poisoned");
            if !path.as_std_path().exists() {
                let mut brain = Brain::new_user(&slug);
                self.persist(&slug, &mut brain)?;
                self.bus
                    .emit("brain.created", json!({"slug": slug, "system": false}));
            }
        }
        Ok(slug)
    }

    /// One config value from the system brain.
    pub fn config_value(&self, key: &str) -> Result<Option<Value>, AavionError> {
        let key = normalize_config_key(key);
        self.read_system(|brain| Ok(brain.config.get(&key).cloned()))
    }

    /// Integer config value with a fallback.
    pub fn config_u64(&self, key: &str, default: u64) -> u64 {
        self.config_value(key)
            .ok()
            .flatten()
            .and_then(|v| v.as_u64())
            .unwrap_or(default)
    }

    /// Boolean config value with a fallback.
    pub fn config_bool(&self, key: &str, default: bool) -> bool {
        self.config_value(key)
            .ok()
            .flatten()
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    /// String config value with a fallback.
    pub fn config_string(&self, key: &str, default: &str) -> String {
        self.config_value(key)
            .ok()
            .flatten()
            .and_then(|v| v.as_str().map(ToString::to_string))
            .unwrap_or_else(|| default.to_string())
    }

    /// Set one config key in the system brain.
    pub fn set_config_value(&self, key: &str, value: Value) -> Result<(), AavionError> {
        let key = normalize_config_key(key);
        self.with_system(|brain| {
            brain.config.insert(key.clone(), value);
            Ok(())
        })
    }
}

/// Lowercased dotted config keys.
#[must_use]
pub fn normalize_config_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Sanitized brain slug, rejecting the reserved `system`.
pub fn user_brain_slug(raw: &str) -> Result<String, AavionError> {
    let slug = sanitize_slug(raw);
    if slug == paths::RESERVED_SYSTEM_SLUG {
        return Err(AavionError::InvalidSlug {
            slug,
            reason: "'system' is reserved".to_string(),
        });
    }
    Ok(slug)
}

fn default_config(paths: &Paths) -> BTreeMap<String, Value> {
    let mut config = BTreeMap::new();
    config.insert("export.response".to_string(), json!(true));
    config.insert("export.save".to_string(), json!(false));
    config.insert("export.format".to_string(), json!("json"));
    config.insert("export.nest_children".to_string(), json!(false));
    config.insert("export.path".to_string(), json!(paths.exports_dir().as_str()));
    config.insert("cache.active".to_string(), json!(true));
    config.insert("cache.ttl".to_string(), json!(300));
    config.insert("security.active".to_string(), json!(true));
    config.insert("security.rate_limit".to_string(), json!(60));
    config.insert("security.global_limit".to_string(), json!(600));
    config.insert("security.block_duration".to_string(), json!(60));
    config.insert("security.ddos_lockdown".to_string(), json!(300));
    config.insert("security.failed_limit".to_string(), json!(5));
    config.insert("security.failed_block".to_string(), json!(300));
    config.insert("hierarchy.max_depth".to_string(), json!(10));
    config.insert("api_key_length".to_string(), json!(16));
    config.insert("log_level".to_string(), json!("info"));
    config.insert(
        "log_path".to_string(),
        json!(paths.logs_dir().join("aaviondb.log").as_str()),
    );
    config.insert(
        "backups_path".to_string(),
        json!(paths.backups_dir().as_str()),
    );
    config.insert(
        "exports_path".to_string(),
        json!(paths.exports_dir().as_str()),
    );
    config
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use tempfile::TempDir;

    /// Fresh store over a temp root with system + default brains ready.
    pub fn store() -> (TempDir, BrainStore) {
        let tmp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let paths = Paths::new(root);
        paths.ensure_default_directories().unwrap();
        let store = BrainStore::new(paths, EventBus::new());
        store.ensure_system_brain(None).unwrap();
        store.ensure_active_brain().unwrap();
        (tmp, store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testutil::store;

    #[test]
    fn ensure_is_idempotent() {
        let (_tmp, s) = store();
        assert!(!s.ensure_system_brain(None).unwrap());
        assert_eq!(s.ensure_active_brain().unwrap(), "default");
        assert_eq!(s.active_brain_slug().unwrap(), "default");
    }

    #[test]
    fn defaults_land_and_overrides_win() {
        let (_tmp, s) = store();
        assert_eq!(s.config_u64("hierarchy.max_depth", 0), 10);
        assert_eq!(s.config_string("log_level", "?"), "info");

        let mut overrides = BTreeMap::new();
        overrides.insert("Hierarchy.Max_Depth".to_string(), json!(4));
        s.ensure_system_brain(Some(&overrides)).unwrap();
        assert_eq!(s.config_u64("hierarchy.max_depth", 0), 4);
        // Untouched keys survive the re-ensure.
        assert_eq!(s.config_u64("security.rate_limit", 0), 60);
    }

    #[test]
    fn with_brain_persists_only_on_success() {
        let (_tmp, s) = store();
        let before = s
            .read_brain("default", |b| Ok(b.meta.updated_at.clone()))
            .unwrap();
        let result: Result<(), AavionError> = s.with_brain("default", |brain| {
            brain.config.insert("junk".to_string(), json!(1));
            Err(AavionError::not_found("entity", "nope"))
        });
        assert!(result.is_err());
        let after = s
            .read_brain("default", |b| {
                Ok((b.meta.updated_at.clone(), b.config.contains_key("junk")))
            })
            .unwrap();
        assert_eq!(before, after.0);
        assert!(!after.1);
    }

    #[test]
    fn reserved_slug_rejected() {
        assert!(user_brain_slug("system").is_err());
        assert_eq!(user_brain_slug("My Notes").unwrap(), "my-notes");
    }

    #[test]
    fn set_and_read_config() {
        let (_tmp, s) = store();
        s.set_config_value("Export.Format", json!("markdown")).unwrap();
        assert_eq!(s.config_string("export.format", "json"), "markdown");
    }
}
