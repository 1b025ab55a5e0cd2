//! Preset CRUD against the system brain.
//!
//! Bundled presets are seeded at bootstrap (and re-seeded if missing).
//! Updates to a `read_only` or `immutable` preset are redirected to an
//! auto-named clone (`<slug>-v2`, `-v3`, …); deletion is refused only
//! for `immutable` presets.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::info;

use aavion_store::BrainStore;
use aavion_store::merge::merge_payload;
use aavion_utils::error::AavionError;
use aavion_utils::normalize_slug;

use crate::bundled::bundled_presets;
use crate::model::{Preset, validate_preset};

/// Outcome of a preset write.
#[derive(Debug, Clone)]
pub struct PresetWrite {
    /// The slug actually written.
    pub slug: String,
    /// Set when a protected preset redirected the write to a clone.
    pub clone: Option<String>,
}

/// Registry handle over the system brain's `export.presets`.
pub struct PresetRegistry {
    store: Arc<BrainStore>,
}

impl PresetRegistry {
    #[must_use]
    pub fn new(store: Arc<BrainStore>) -> Self {
        Self { store }
    }

    /// Seed every bundled preset that is missing. Returns the slugs
    /// inserted.
    pub fn seed_bundled(&self) -> Result<Vec<String>, AavionError> {
        self.store.with_system(|brain| {
            let presets = &mut brain.export.get_or_insert_with(Default::default).presets;
            let mut seeded = Vec::new();
            for (slug, value) in bundled_presets() {
                if !presets.contains_key(slug) {
                    presets.insert(slug.to_string(), value);
                    seeded.push(slug.to_string());
                }
            }
            if !seeded.is_empty() {
                info!(count = seeded.len(), "bundled presets seeded");
            }
            Ok(seeded)
        })
    }

    /// Summaries of every stored preset.
    pub fn list(&self) -> Result<Vec<Value>, AavionError> {
        self.store.read_system(|brain| {
            let Some(export) = &brain.export else {
                return Ok(Vec::new());
            };
            Ok(export
                .presets
                .iter()
                .map(|(slug, value)| {
                    json!({
                        "slug": slug,
                        "title": value.pointer("/meta/title"),
                        "description": value.pointer("/meta/description"),
                        "format": value.pointer("/settings/destination/format"),
                        "tags": value.pointer("/meta/tags"),
                        "read_only": value.pointer("/meta/read_only").and_then(Value::as_bool).unwrap_or(false),
                        "immutable": value.pointer("/meta/immutable").and_then(Value::as_bool).unwrap_or(false),
                    })
                })
                .collect())
        })
    }

    /// The raw stored document for one preset.
    pub fn get(&self, raw_slug: &str) -> Result<Value, AavionError> {
        let slug = normalize_slug(raw_slug)?;
        self.store.read_system(|brain| {
            brain
                .export
                .as_ref()
                .and_then(|e| e.presets.get(&slug))
                .cloned()
                .ok_or_else(|| AavionError::not_found("preset", &slug))
        })
    }

    /// The validated, typed document for one preset.
    pub fn load(&self, raw_slug: &str) -> Result<Preset, AavionError> {
        let slug = normalize_slug(raw_slug)?;
        let value = self.get(&slug)?;
        validate_preset(&slug, &value)
    }

    /// Create a new preset; the slug must be free.
    pub fn create(&self, raw_slug: &str, value: &Value) -> Result<PresetWrite, AavionError> {
        let slug = normalize_slug(raw_slug)?;
        validate_preset(&slug, value)?;
        self.store.with_system(|brain| {
            let presets = &mut brain.export.get_or_insert_with(Default::default).presets;
            if presets.contains_key(&slug) {
                return Err(AavionError::InvalidPreset {
                    slug: slug.clone(),
                    reason: "preset already exists".to_string(),
                });
            }
            presets.insert(slug.clone(), value.clone());
            Ok(())
        })?;
        Ok(PresetWrite { slug, clone: None })
    }

    /// Merge `patch` into an existing preset. Protected presets are
    /// never mutated; the merged result lands in the next free
    /// `<slug>-vN` instead, with its protection flags cleared.
    pub fn update(&self, raw_slug: &str, patch: &Value) -> Result<PresetWrite, AavionError> {
        let slug = normalize_slug(raw_slug)?;
        self.store.with_system(|brain| {
            let presets = &mut brain.export.get_or_insert_with(Default::default).presets;
            let current = presets
                .get(&slug)
                .cloned()
                .ok_or_else(|| AavionError::not_found("preset", &slug))?;

            let mut merged = merge_payload(&current, patch);
            let protected = ["read_only", "immutable"].iter().any(|flag| {
                current
                    .pointer(&format!("/meta/{flag}"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            });

            if protected {
                if let Some(meta) = merged.get_mut("meta").and_then(Value::as_object_mut) {
                    meta.insert("read_only".to_string(), json!(false));
                    meta.insert("immutable".to_string(), json!(false));
                }
                let mut n = 2;
                let clone_slug = loop {
                    let candidate = format!("{slug}-v{n}");
                    if !presets.contains_key(&candidate) {
                        break candidate;
                    }
                    n += 1;
                };
                validate_preset(&clone_slug, &merged)?;
                presets.insert(clone_slug.clone(), merged);
                return Ok(PresetWrite {
                    slug: slug.clone(),
                    clone: Some(clone_slug),
                });
            }

            validate_preset(&slug, &merged)?;
            presets.insert(slug.clone(), merged);
            Ok(PresetWrite {
                slug: slug.clone(),
                clone: None,
            })
        })
    }

    /// Delete a preset. Only `immutable` blocks deletion.
    pub fn delete(&self, raw_slug: &str) -> Result<(), AavionError> {
        let slug = normalize_slug(raw_slug)?;
        self.store.with_system(|brain| {
            let presets = &mut brain.export.get_or_insert_with(Default::default).presets;
            let current = presets
                .get(&slug)
                .ok_or_else(|| AavionError::not_found("preset", &slug))?;
            let immutable = current
                .pointer("/meta/immutable")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if immutable {
                return Err(AavionError::InvalidPreset {
                    slug: slug.clone(),
                    reason: "preset is immutable".to_string(),
                });
            }
            presets.remove(&slug);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aavion_events::EventBus;
    use aavion_utils::Paths;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn registry() -> (TempDir, PresetRegistry) {
        let tmp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let paths = Paths::new(root);
        paths.ensure_default_directories().unwrap();
        let store = Arc::new(BrainStore::new(paths, EventBus::new()));
        store.ensure_system_brain(None).unwrap();
        let registry = PresetRegistry::new(store);
        registry.seed_bundled().unwrap();
        (tmp, registry)
    }

    fn custom_preset() -> Value {
        json!({
            "meta": {"title": "Mine", "description": "d", "usage": "u", "tags": []},
            "settings": {"destination": {"format": "json"}},
            "selection": {},
            "templates": {"root": "${entities}", "entity": "${entity.slug}"}
        })
    }

    #[test]
    fn seeding_is_idempotent_and_reseeds_missing() {
        let (_tmp, r) = registry();
        assert!(r.seed_bundled().unwrap().is_empty());
        // Remove protection is impossible via delete (immutable), so
        // verify the re-seed path by checking list contents instead.
        let listed = r.list().unwrap();
        assert_eq!(listed.len(), crate::bundled::BUNDLED_SLUGS.len());
    }

    #[test]
    fn create_get_update_delete() {
        let (_tmp, r) = registry();
        r.create("mine", &custom_preset()).unwrap();
        assert!(r.create("mine", &custom_preset()).is_err());

        let loaded = r.load("mine").unwrap();
        assert_eq!(loaded.meta.title, "Mine");

        let write = r
            .update("mine", &json!({"meta": {"title": "Renamed"}}))
            .unwrap();
        assert!(write.clone.is_none());
        assert_eq!(r.load("mine").unwrap().meta.title, "Renamed");

        r.delete("mine").unwrap();
        assert!(r.get("mine").is_err());
    }

    #[test]
    fn protected_update_clones() {
        let (_tmp, r) = registry();
        let write = r
            .update(
                "context-unified",
                &json!({"meta": {"description": "mine"}}),
            )
            .unwrap();
        assert_eq!(write.clone.as_deref(), Some("context-unified-v2"));

        // The protected original is untouched.
        let original = r.load("context-unified").unwrap();
        assert_ne!(original.meta.description, "mine");
        assert!(original.meta.read_only);

        // The clone carries the change and dropped its protection.
        let clone = r.load("context-unified-v2").unwrap();
        assert_eq!(clone.meta.description, "mine");
        assert!(!clone.meta.read_only);
        assert!(!clone.meta.immutable);

        // A second protected update picks the next free name.
        let write = r
            .update("context-unified", &json!({"meta": {"description": "again"}}))
            .unwrap();
        assert_eq!(write.clone.as_deref(), Some("context-unified-v3"));
    }

    #[test]
    fn immutable_blocks_delete_but_read_only_does_not() {
        let (_tmp, r) = registry();
        assert!(r.delete("context-unified").is_err());

        let mut preset = custom_preset();
        preset["meta"]["read_only"] = json!(true);
        r.create("guarded", &preset).unwrap();
        // read_only alone blocks in-place update but not deletion.
        let write = r.update("guarded", &json!({"meta": {"title": "x"}})).unwrap();
        assert_eq!(write.clone.as_deref(), Some("guarded-v2"));
        r.delete("guarded").unwrap();
    }

    #[test]
    fn invalid_update_rejected() {
        let (_tmp, r) = registry();
        r.create("mine", &custom_preset()).unwrap();
        let err = r
            .update("mine", &json!({"templates": {"root": null}}))
            .unwrap_err();
        assert!(matches!(err, AavionError::InvalidPreset { .. }));
    }

    #[test]
    fn unknown_preset_is_not_found() {
        let (_tmp, r) = registry();
        assert!(matches!(
            r.get("ghost"),
            Err(AavionError::NotFound { .. })
        ));
        assert!(r.update("ghost", &json!({})).is_err());
        assert!(r.delete("ghost").is_err());
    }
}
