//! Version selector resolution.
//!
//! A selector string is one of: bare numeric version `"3"`, `"@3"`,
//! `"#<commit-hash>"` (looked up via the brain's commit index), or
//! absent (meaning the entity's active version). All forms normalize to
//! a version-map key.

use aavion_utils::canonical;
use aavion_utils::error::AavionError;

use crate::model::{Brain, Entity};

/// Resolve a selector into a version-map key for `entity`.
pub fn resolve_version_key(
    brain: &Brain,
    project: &str,
    entity: &Entity,
    reference: Option<&str>,
) -> Result<String, AavionError> {
    let Some(reference) = reference.map(str::trim).filter(|r| !r.is_empty()) else {
        return entity.active_version.clone().ok_or_else(|| {
            AavionError::InvalidReference {
                reference: String::new(),
                reason: format!("entity '{}' has no active version", entity.slug),
            }
        });
    };

    if let Some(version) = reference.strip_prefix('@') {
        // Both `@2` and `@v2` are accepted.
        let version = version.strip_prefix('v').unwrap_or(version);
        return existing_version_key(entity, version, reference);
    }

    if let Some(hash) = reference.strip_prefix('#') {
        let commit = brain.commits.get(hash).ok_or_else(|| {
            AavionError::InvalidReference {
                reference: reference.to_string(),
                reason: "unknown commit hash".to_string(),
            }
        })?;
        if commit.entity != entity.slug || commit.project != project {
            return Err(AavionError::InvalidReference {
                reference: reference.to_string(),
                reason: format!(
                    "commit belongs to {}/{}, not {}/{}",
                    commit.project, commit.entity, project, entity.slug
                ),
            });
        }
        return existing_version_key(entity, &commit.version.to_string(), reference);
    }

    if reference.chars().all(|c| c.is_ascii_digit()) {
        return existing_version_key(entity, reference, reference);
    }

    Err(AavionError::InvalidReference {
        reference: reference.to_string(),
        reason: "expected a version number, '@N', or '#hash'".to_string(),
    })
}

fn existing_version_key(
    entity: &Entity,
    version: &str,
    reference: &str,
) -> Result<String, AavionError> {
    let key: u64 = version.parse().map_err(|_| AavionError::InvalidReference {
        reference: reference.to_string(),
        reason: "version is not a number".to_string(),
    })?;
    let key = key.to_string();
    if entity.versions.contains_key(&key) {
        Ok(key)
    } else {
        Err(AavionError::not_found(
            "version",
            format!("{}@{key}", entity.slug),
        ))
    }
}

/// Split an `entity@N` / `entity#H` / `entity` selector into the entity
/// slug and the optional reference part (kept with its sigil).
#[must_use]
pub fn split_entity_selector(selector: &str) -> (String, Option<String>) {
    if let Some((entity, version)) = selector.split_once('@') {
        return (entity.to_string(), Some(format!("@{version}")));
    }
    if let Some((entity, hash)) = selector.split_once('#') {
        return (entity.to_string(), Some(format!("#{hash}")));
    }
    (selector.to_string(), None)
}

/// Split an `entity:fieldset[@N|#H]` save selector into entity slug,
/// optional fieldset slug, and optional fieldset reference.
#[must_use]
pub fn split_save_selector(selector: &str) -> (String, Option<String>, Option<String>) {
    match selector.split_once(':') {
        Some((entity, fieldset_part)) => {
            let (fieldset, reference) = split_entity_selector(fieldset_part);
            let fieldset = if fieldset.is_empty() { None } else { Some(fieldset) };
            (entity.to_string(), fieldset, reference)
        }
        None => (selector.to_string(), None, None),
    }
}

/// Whether a string is a plausible commit hash reference body.
#[must_use]
pub fn is_commit_hash(reference: &str) -> bool {
    canonical::looks_like_hash(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Brain, CommitEntry, Entity, VersionRecord, VersionStatus};
    use aavion_utils::time;
    use serde_json::json;

    fn entity_with_versions(versions: &[u64], active: Option<u64>) -> Entity {
        let mut entity = Entity::stub("hero");
        for &n in versions {
            entity.versions.insert(
                n.to_string(),
                VersionRecord {
                    version: n,
                    hash: format!("hash{n}"),
                    commit: format!("commit{n}"),
                    committed_at: time::now_iso(),
                    status: if active == Some(n) {
                        VersionStatus::Active
                    } else {
                        VersionStatus::Inactive
                    },
                    payload: json!({}),
                    meta: json!({}),
                    merge: true,
                    fieldset_version: None,
                    source_reference: None,
                    fieldset_reference: None,
                },
            );
        }
        entity.active_version = active.map(|n| n.to_string());
        entity
    }

    #[test]
    fn missing_reference_means_active() {
        let brain = Brain::new_user("default");
        let entity = entity_with_versions(&[1, 2], Some(2));
        assert_eq!(
            resolve_version_key(&brain, "demo", &entity, None).unwrap(),
            "2"
        );
    }

    #[test]
    fn at_and_bare_forms() {
        let brain = Brain::new_user("default");
        let entity = entity_with_versions(&[1, 2, 3], Some(3));
        assert_eq!(
            resolve_version_key(&brain, "demo", &entity, Some("@1")).unwrap(),
            "1"
        );
        assert_eq!(
            resolve_version_key(&brain, "demo", &entity, Some("2")).unwrap(),
            "2"
        );
        assert!(resolve_version_key(&brain, "demo", &entity, Some("@9")).is_err());
    }

    #[test]
    fn commit_hash_lookup() {
        let mut brain = Brain::new_user("default");
        let entity = entity_with_versions(&[1], Some(1));
        brain.commits.insert(
            "deadbeef".to_string(),
            CommitEntry {
                project: "demo".to_string(),
                entity: "hero".to_string(),
                version: 1,
                hash: "hash1".to_string(),
                timestamp: time::now_iso(),
                merge: true,
                fieldset: None,
                fieldset_version: None,
                source_reference: None,
                fieldset_reference: None,
            },
        );
        assert_eq!(
            resolve_version_key(&brain, "demo", &entity, Some("#deadbeef")).unwrap(),
            "1"
        );
        // Wrong project refuses the commit.
        assert!(resolve_version_key(&brain, "other", &entity, Some("#deadbeef")).is_err());
        assert!(resolve_version_key(&brain, "demo", &entity, Some("#unknown")).is_err());
    }

    #[test]
    fn selector_splitting() {
        assert_eq!(
            split_entity_selector("hero@3"),
            ("hero".to_string(), Some("@3".to_string()))
        );
        assert_eq!(
            split_entity_selector("hero#abc"),
            ("hero".to_string(), Some("#abc".to_string()))
        );
        assert_eq!(split_entity_selector("hero"), ("hero".to_string(), None));
    }

    #[test]
    fn save_selector_with_fieldset() {
        assert_eq!(
            split_save_selector("hero:character@2"),
            (
                "hero".to_string(),
                Some("character".to_string()),
                Some("@2".to_string())
            )
        );
        assert_eq!(
            split_save_selector("hero"),
            ("hero".to_string(), None, None)
        );
    }

    #[test]
    fn garbage_reference_rejected() {
        let brain = Brain::new_user("default");
        let entity = entity_with_versions(&[1], Some(1));
        assert!(resolve_version_key(&brain, "demo", &entity, Some("latest")).is_err());
    }
}
