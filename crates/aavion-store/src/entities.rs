//! Entity operations: the save pipeline, version management, and reads.

use serde::Serialize;
use serde_json::{Value, json};

use aavion_schema::SchemaContext;
use aavion_utils::error::AavionError;
use aavion_utils::{Scope, canonical, normalize_slug, time};

use crate::hierarchy;
use crate::merge::merge_payload;
use crate::model::{
    Brain, CommitEntry, Entity, EntityStatus, FIELDSETS_PROJECT, Project, VersionRecord,
    VersionStatus,
};
use crate::projects::{deactivate_versions, entity_summary};
use crate::refs::resolve_version_key;
use crate::{BrainStore, hierarchy::DEFAULT_MAX_DEPTH};

/// Options accepted by [`BrainStore::save_entity`].
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// `None` defaults to merge mode; `Some(false)` replaces wholesale.
    pub merge: Option<bool>,
    /// Merge source selector (`@N`, `#hash`, bare number).
    pub source_reference: Option<String>,
    /// Whether the caller supplied a fieldset binding at all (an explicit
    /// `None` fieldset detaches).
    pub fieldset_provided: bool,
    pub fieldset: Option<String>,
    /// Schema revision selector for the bound fieldset.
    pub fieldset_reference: Option<String>,
    /// Requested hierarchy position (ancestors root-first).
    pub parent_path: Option<Vec<String>>,
}

/// What a successful save produced.
#[derive(Debug, Clone, Serialize)]
pub struct SaveOutcome {
    pub project: String,
    pub entity: String,
    pub version: String,
    pub hash: String,
    pub commit: String,
    pub merge: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fieldset: Option<String>,
    pub warnings: Vec<String>,
}

/// One resolved entity revision, as handed to readers and the resolver.
#[derive(Debug, Clone, Serialize)]
pub struct EntityRecord {
    pub project: String,
    pub entity: String,
    pub version: String,
    pub status: String,
    pub payload: Value,
    pub path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fieldset: Option<String>,
}

impl BrainStore {
    /// Save a new version of an entity (creating project and entity stubs
    /// on first contact), per the canonical pipeline: scope check, slug
    /// normalization, hierarchy assignment, merge, schema validation,
    /// resolver strip, version allocation, commit indexing, persist.
    pub fn save_entity(
        &self,
        scope: &Scope,
        raw_project: &str,
        raw_entity: &str,
        payload: Value,
        meta: Value,
        options: &SaveOptions,
    ) -> Result<SaveOutcome, AavionError> {
        let project_slug = normalize_slug(raw_project)?;
        let entity_slug = normalize_slug(raw_entity)?;
        scope.require_write(&project_slug)?;
        let max_depth = self.config_u64("hierarchy.max_depth", DEFAULT_MAX_DEPTH as u64) as usize;

        let outcome = self.with_active(|_, brain| {
            save_into_brain(
                brain,
                &project_slug,
                &entity_slug,
                payload,
                meta,
                options,
                max_depth,
            )
        })?;

        self.bus().emit(
            "brain.entity.saved",
            json!({
                "project": outcome.project,
                "entity": outcome.entity,
                "version": outcome.version,
                "commit": outcome.commit,
                "merge": outcome.merge,
                "fieldset": outcome.fieldset,
                "source_reference": options.source_reference,
                "fieldset_reference": options.fieldset_reference,
            }),
        );
        Ok(outcome)
    }

    /// Fetch one entity revision by selector (active version if none).
    pub fn entity_record(
        &self,
        scope: &Scope,
        raw_project: &str,
        raw_entity: &str,
        reference: Option<&str>,
    ) -> Result<EntityRecord, AavionError> {
        let project_slug = normalize_slug(raw_project)?;
        let entity_slug = normalize_slug(raw_entity)?;
        scope.require_read(&project_slug)?;
        self.read_active(|_, brain| {
            let project = brain
                .projects
                .get(&project_slug)
                .ok_or_else(|| AavionError::not_found("project", &project_slug))?;
            let entity = project
                .entities
                .get(&entity_slug)
                .ok_or_else(|| AavionError::not_found("entity", &entity_slug))?;
            let key = resolve_version_key(brain, &project_slug, entity, reference)?;
            let record = &entity.versions[&key];
            Ok(EntityRecord {
                project: project_slug.clone(),
                entity: entity_slug.clone(),
                version: key,
                status: match record.status {
                    VersionStatus::Active => "active".to_string(),
                    VersionStatus::Inactive => "inactive".to_string(),
                },
                payload: record.payload.clone(),
                path: hierarchy::path_of(project, &entity_slug),
                fieldset: entity.fieldset.clone(),
            })
        })
    }

    /// Active-version records across projects (scope-filtered), for
    /// queries and exports.
    pub fn active_records(
        &self,
        scope: &Scope,
        projects: &[String],
    ) -> Result<Vec<EntityRecord>, AavionError> {
        self.read_active(|_, brain| {
            let mut out = Vec::new();
            for project_slug in projects {
                if !scope.allows_read(project_slug) {
                    continue;
                }
                let Some(project) = brain.projects.get(project_slug) else {
                    continue;
                };
                for (entity_slug, entity) in &project.entities {
                    let Some(active) = &entity.active_version else {
                        continue;
                    };
                    let Some(record) = entity.versions.get(active) else {
                        continue;
                    };
                    out.push(EntityRecord {
                        project: project_slug.clone(),
                        entity: entity_slug.clone(),
                        version: active.clone(),
                        status: "active".to_string(),
                        payload: record.payload.clone(),
                        path: hierarchy::path_of(project, entity_slug),
                        fieldset: entity.fieldset.clone(),
                    });
                }
            }
            Ok(out)
        })
    }

    /// Entity summaries of a project, optionally restricted to the
    /// subtree under `path_segments`.
    pub fn list_entities(
        &self,
        scope: &Scope,
        raw_project: &str,
        path_segments: Option<&[String]>,
    ) -> Result<Vec<Value>, AavionError> {
        let project_slug = normalize_slug(raw_project)?;
        scope.require_read(&project_slug)?;
        self.read_active(|_, brain| {
            let project = brain
                .projects
                .get(&project_slug)
                .ok_or_else(|| AavionError::not_found("project", &project_slug))?;
            let mut out = Vec::new();
            for entity in project.entities.values() {
                if let Some(prefix) = path_segments {
                    let path = hierarchy::path_of(project, &entity.slug);
                    if path.len() < prefix.len() || path[..prefix.len()] != *prefix {
                        continue;
                    }
                }
                out.push(entity_summary(project, entity));
            }
            Ok(out)
        })
    }

    /// Version listing for one entity, ascending by number.
    pub fn list_entity_versions(
        &self,
        scope: &Scope,
        raw_project: &str,
        raw_entity: &str,
    ) -> Result<Vec<Value>, AavionError> {
        let project_slug = normalize_slug(raw_project)?;
        let entity_slug = normalize_slug(raw_entity)?;
        scope.require_read(&project_slug)?;
        self.read_active(|_, brain| {
            let entity = entity_of(brain, &project_slug, &entity_slug)?;
            let mut out = Vec::new();
            for number in entity.version_numbers() {
                let record = &entity.versions[&number.to_string()];
                out.push(json!({
                    "version": record.version,
                    "hash": record.hash,
                    "commit": record.commit,
                    "status": record.status,
                    "committed_at": record.committed_at,
                    "merge": record.merge,
                    "fieldset_version": record.fieldset_version,
                }));
            }
            Ok(out)
        })
    }

    /// Commit-index entries of a project (optionally one entity).
    pub fn list_project_commits(
        &self,
        scope: &Scope,
        raw_project: &str,
        entity: Option<&str>,
    ) -> Result<Vec<Value>, AavionError> {
        let project_slug = normalize_slug(raw_project)?;
        let entity_slug = entity.map(normalize_slug).transpose()?;
        scope.require_read(&project_slug)?;
        self.read_active(|_, brain| {
            let mut out: Vec<Value> = brain
                .commits
                .iter()
                .filter(|(_, c)| c.project == project_slug)
                .filter(|(_, c)| entity_slug.as_deref().is_none_or(|e| c.entity == e))
                .map(|(hash, c)| {
                    json!({
                        "commit": hash,
                        "entity": c.entity,
                        "version": c.version,
                        "hash": c.hash,
                        "timestamp": c.timestamp,
                        "merge": c.merge,
                    })
                })
                .collect();
            out.sort_by(|a, b| {
                a["timestamp"]
                    .as_str()
                    .unwrap_or_default()
                    .cmp(b["timestamp"].as_str().unwrap_or_default())
            });
            Ok(out)
        })
    }

    /// Full report for one entity.
    pub fn entity_report(
        &self,
        scope: &Scope,
        raw_project: &str,
        raw_entity: &str,
    ) -> Result<Value, AavionError> {
        let project_slug = normalize_slug(raw_project)?;
        let entity_slug = normalize_slug(raw_entity)?;
        scope.require_read(&project_slug)?;
        self.read_active(|_, brain| {
            let project = brain
                .projects
                .get(&project_slug)
                .ok_or_else(|| AavionError::not_found("project", &project_slug))?;
            let entity = project
                .entities
                .get(&entity_slug)
                .ok_or_else(|| AavionError::not_found("entity", &entity_slug))?;
            let mut report = entity_summary(project, entity);
            report["children"] = json!(hierarchy::children_of(project, &entity_slug));
            if let Some(active) = &entity.active_version {
                if let Some(record) = entity.versions.get(active) {
                    report["payload"] = record.payload.clone();
                    report["hash"] = json!(record.hash);
                    report["commit"] = json!(record.commit);
                }
            }
            Ok(report)
        })
    }

    /// Archive an entity: versions deactivate, children promote to root.
    pub fn archive_entity(
        &self,
        scope: &Scope,
        raw_project: &str,
        raw_entity: &str,
    ) -> Result<(), AavionError> {
        let project_slug = normalize_slug(raw_project)?;
        let entity_slug = normalize_slug(raw_entity)?;
        scope.require_write(&project_slug)?;
        self.with_active(|_, brain| {
            let project = crate::projects::project_mut(brain, &project_slug)?;
            hierarchy::promote_children(project, &entity_slug);
            let entity = entity_mut(project, &entity_slug)?;
            deactivate_versions(entity);
            entity.status = EntityStatus::Archived;
            entity.archived_at = Some(time::now_iso());
            entity.touch();
            project.touch();
            Ok(())
        })?;
        self.bus().emit(
            "brain.entity.archived",
            json!({"project": project_slug, "entity": entity_slug}),
        );
        Ok(())
    }

    /// Deactivate an entity; without `recursive` its children promote,
    /// with it the whole subtree deactivates.
    pub fn deactivate_entity(
        &self,
        scope: &Scope,
        raw_project: &str,
        raw_entity: &str,
        recursive: bool,
    ) -> Result<Vec<String>, AavionError> {
        let project_slug = normalize_slug(raw_project)?;
        let entity_slug = normalize_slug(raw_entity)?;
        scope.require_write(&project_slug)?;
        let affected = self.with_active(|_, brain| {
            let project = crate::projects::project_mut(brain, &project_slug)?;
            if !project.entities.contains_key(&entity_slug) {
                return Err(AavionError::not_found("entity", &entity_slug));
            }
            let mut targets = vec![entity_slug.clone()];
            if recursive {
                targets.extend(hierarchy::descendants(project, &entity_slug));
            } else {
                hierarchy::promote_children(project, &entity_slug);
            }
            for slug in &targets {
                if let Some(entity) = project.entities.get_mut(slug) {
                    deactivate_versions(entity);
                    entity.status = EntityStatus::Inactive;
                    entity.touch();
                }
            }
            project.touch();
            Ok(targets)
        })?;
        self.bus().emit(
            "brain.entity.deactivated",
            json!({"project": project_slug, "entities": affected}),
        );
        Ok(affected)
    }

    /// Delete an entity (and optionally its subtree); commit entries go
    /// with it when `purge_commits` is set.
    pub fn delete_entity(
        &self,
        scope: &Scope,
        raw_project: &str,
        raw_entity: &str,
        purge_commits: bool,
        recursive: bool,
    ) -> Result<Vec<String>, AavionError> {
        let project_slug = normalize_slug(raw_project)?;
        let entity_slug = normalize_slug(raw_entity)?;
        scope.require_write(&project_slug)?;
        let removed = self.with_active(|_, brain| {
            let project = crate::projects::project_mut(brain, &project_slug)?;
            if !project.entities.contains_key(&entity_slug) {
                return Err(AavionError::not_found("entity", &entity_slug));
            }
            let mut removed = vec![entity_slug.clone()];
            removed.extend(hierarchy::remove_entity(project, &entity_slug, recursive));
            for slug in &removed {
                project.entities.remove(slug);
            }
            project.touch();
            if purge_commits {
                let removed_set: std::collections::BTreeSet<&String> = removed.iter().collect();
                brain.commits.retain(|_, c| {
                    c.project != project_slug || !removed_set.contains(&c.entity)
                });
            }
            Ok(removed)
        })?;
        self.bus().emit(
            "brain.entity.deleted",
            json!({"project": project_slug, "entities": removed, "purged_commits": purge_commits}),
        );
        Ok(removed)
    }

    /// Delete one version. If it was active, the highest remaining
    /// version number takes over; with none left the entity goes
    /// inactive.
    pub fn delete_entity_version(
        &self,
        scope: &Scope,
        raw_project: &str,
        raw_entity: &str,
        reference: &str,
    ) -> Result<Value, AavionError> {
        let project_slug = normalize_slug(raw_project)?;
        let entity_slug = normalize_slug(raw_entity)?;
        scope.require_write(&project_slug)?;
        let result = self.with_active(|_, brain| {
            let key = {
                let entity = entity_of(brain, &project_slug, &entity_slug)?;
                resolve_version_key(brain, &project_slug, entity, Some(reference))?
            };
            let project = crate::projects::project_mut(brain, &project_slug)?;
            let entity = entity_mut(project, &entity_slug)?;
            let removed = entity.versions.remove(&key).expect("resolved key exists");
            let was_active = entity.active_version.as_deref() == Some(key.as_str());

            let mut new_active = None;
            if was_active {
                deactivate_versions(entity);
                if let Some(next) = entity.version_numbers().last().map(u64::to_string) {
                    if let Some(record) = entity.versions.get_mut(&next) {
                        record.status = VersionStatus::Active;
                    }
                    entity.active_version = Some(next.clone());
                    new_active = Some(next);
                } else {
                    entity.active_version = None;
                    entity.status = EntityStatus::Inactive;
                }
            }
            entity.touch();
            project.touch();
            brain.commits.remove(&removed.commit);
            Ok(json!({
                "deleted_version": key,
                "deleted_commit": removed.commit,
                "new_active": new_active,
            }))
        })?;
        self.bus().emit(
            "brain.entity.version.deleted",
            json!({"project": project_slug, "entity": entity_slug, "version": result["deleted_version"]}),
        );
        Ok(result)
    }

    /// Make the referenced version the active one and the entity active.
    pub fn restore_entity_version(
        &self,
        scope: &Scope,
        raw_project: &str,
        raw_entity: &str,
        reference: &str,
    ) -> Result<Value, AavionError> {
        let project_slug = normalize_slug(raw_project)?;
        let entity_slug = normalize_slug(raw_entity)?;
        scope.require_write(&project_slug)?;
        let result = self.with_active(|_, brain| {
            let key = {
                let entity = entity_of(brain, &project_slug, &entity_slug)?;
                resolve_version_key(brain, &project_slug, entity, Some(reference))?
            };
            let project = crate::projects::project_mut(brain, &project_slug)?;
            let entity = entity_mut(project, &entity_slug)?;
            deactivate_versions(entity);
            if let Some(record) = entity.versions.get_mut(&key) {
                record.status = VersionStatus::Active;
            }
            entity.active_version = Some(key.clone());
            entity.status = EntityStatus::Active;
            entity.archived_at = None;
            entity.touch();
            project.touch();
            Ok(json!({"active_version": key}))
        })?;
        self.bus().emit(
            "brain.entity.restored",
            json!({"project": project_slug, "entity": entity_slug, "version": result["active_version"]}),
        );
        Ok(result)
    }

    /// Move an entity to a new hierarchy position. `strict` refuses the
    /// move when the supplied current path does not match; otherwise the
    /// mismatch becomes a warning.
    pub fn move_entity(
        &self,
        scope: &Scope,
        raw_project: &str,
        raw_entity: &str,
        current_path: Option<&[String]>,
        target_path: &[String],
        strict: bool,
    ) -> Result<Vec<String>, AavionError> {
        let project_slug = normalize_slug(raw_project)?;
        let entity_slug = normalize_slug(raw_entity)?;
        scope.require_write(&project_slug)?;
        let max_depth = self.config_u64("hierarchy.max_depth", DEFAULT_MAX_DEPTH as u64) as usize;
        let warnings = self.with_active(|_, brain| {
            let project = crate::projects::project_mut(brain, &project_slug)?;
            if !project.entities.contains_key(&entity_slug) {
                return Err(AavionError::not_found("entity", &entity_slug));
            }
            let mut warnings = Vec::new();
            if let Some(expected) = current_path {
                let actual = hierarchy::path_of(project, &entity_slug);
                let actual_parents = &actual[..actual.len() - 1];
                if actual_parents != expected {
                    let message = format!(
                        "current path mismatch: entity sits at {}",
                        actual_parents.join("/")
                    );
                    if strict {
                        return Err(AavionError::InvalidParameter {
                            name: "current_path".to_string(),
                            reason: message,
                        });
                    }
                    warnings.push(message);
                }
            }
            warnings.extend(hierarchy::assign_parent_path(
                project,
                &entity_slug,
                target_path,
                max_depth,
            ));
            project.touch();
            Ok(warnings)
        })?;
        self.bus().emit(
            "brain.entity.moved",
            json!({"project": project_slug, "entity": entity_slug, "target": target_path}),
        );
        Ok(warnings)
    }
}

fn entity_of<'a>(
    brain: &'a Brain,
    project: &str,
    entity: &str,
) -> Result<&'a Entity, AavionError> {
    brain
        .projects
        .get(project)
        .ok_or_else(|| AavionError::not_found("project", project))?
        .entities
        .get(entity)
        .ok_or_else(|| AavionError::not_found("entity", entity))
}

fn entity_mut<'a>(
    project: &'a mut Project,
    entity: &str,
) -> Result<&'a mut Entity, AavionError> {
    project
        .entities
        .get_mut(entity)
        .ok_or_else(|| AavionError::not_found("entity", entity))
}

/// The save pipeline against an already-locked brain document.
#[allow(clippy::too_many_lines)]
fn save_into_brain(
    brain: &mut Brain,
    project_slug: &str,
    entity_slug: &str,
    payload: Value,
    meta: Value,
    options: &SaveOptions,
    max_depth: usize,
) -> Result<SaveOutcome, AavionError> {
    let mut warnings = Vec::new();

    // Stubs on first contact.
    if !brain.projects.contains_key(project_slug) {
        brain.projects.insert(
            project_slug.to_string(),
            Project::stub(project_slug, None, None),
        );
    }
    {
        let project = brain.projects.get_mut(project_slug).expect("just ensured");
        if !project.entities.contains_key(entity_slug) {
            project
                .entities
                .insert(entity_slug.to_string(), Entity::stub(entity_slug));
        }
    }

    // Hierarchy assignment before anything can fail on validation, so
    // warnings reflect the requested move.
    if let Some(parent_path) = &options.parent_path {
        let project = brain.projects.get_mut(project_slug).expect("ensured");
        warnings.extend(hierarchy::assign_parent_path(
            project,
            entity_slug,
            parent_path,
            max_depth,
        ));
    }

    let merge = options.merge.unwrap_or(true);

    // Read-only phase: everything the mutation below needs, cloned out.
    let (source_payload, stored_fieldset_slug, stored_fieldset_version) = {
        let entity = &brain.projects[project_slug].entities[entity_slug];
        let source = if merge {
            match &options.source_reference {
                Some(reference) => {
                    let key =
                        resolve_version_key(brain, project_slug, entity, Some(reference))
                            .map_err(|_| AavionError::InvalidReference {
                                reference: reference.clone(),
                                reason: "unknown merge source".to_string(),
                            })?;
                    entity.versions[&key].payload.clone()
                }
                None => entity
                    .active_version
                    .as_ref()
                    .and_then(|v| entity.versions.get(v))
                    .map(|r| r.payload.clone())
                    .unwrap_or_else(|| json!({})),
            }
        } else {
            json!({})
        };
        (
            source,
            entity.fieldset.clone(),
            entity.fieldset_version.clone(),
        )
    };

    let mut merged = merge_payload(&source_payload, &payload);

    // Fieldset handling.
    let mut bound_fieldset: Option<String> = None;
    let mut bound_fieldset_version: Option<String> = None;
    if project_slug == FIELDSETS_PROJECT {
        aavion_schema::assert_valid_schema(&merged)?;
    } else {
        let desired = if options.fieldset_provided {
            options.fieldset.clone()
        } else {
            stored_fieldset_slug.clone()
        };
        if let Some(fieldset_slug) = desired {
            let (schema_version, schema) = {
                let schema_entity = brain
                    .projects
                    .get(FIELDSETS_PROJECT)
                    .and_then(|p| p.entities.get(&fieldset_slug))
                    .ok_or_else(|| AavionError::not_found("fieldset", &fieldset_slug))?;
                // A stored schema revision only carries over while the
                // binding still names the same fieldset.
                let inherited = stored_fieldset_version
                    .filter(|_| stored_fieldset_slug.as_deref() == Some(fieldset_slug.as_str()))
                    .map(|v| format!("@{v}"));
                let reference = options.fieldset_reference.clone().or(inherited);
                let key = resolve_version_key(
                    brain,
                    FIELDSETS_PROJECT,
                    schema_entity,
                    reference.as_deref(),
                )?;
                (key.clone(), schema_entity.versions[&key].payload.clone())
            };
            let ctx = SchemaContext {
                project: project_slug.to_string(),
                entity: entity_slug.to_string(),
            };
            merged = aavion_schema::apply_schema(&merged, &schema, &ctx)?;
            bound_fieldset = Some(fieldset_slug);
            bound_fieldset_version = Some(schema_version);
        }
    }

    // Canonical payloads keep shortcodes in instruction-only form.
    merged = aavion_resolver::strip_resolved(&merged);

    let hash = canonical::hash_value(&merged)?;
    let committed_at = time::now_iso();
    let commit_fieldset_version = bound_fieldset_version.clone();

    let entity = brain
        .projects
        .get_mut(project_slug)
        .expect("ensured")
        .entities
        .get_mut(entity_slug)
        .expect("ensured");
    let version = entity.next_version();
    let version_key = version.to_string();

    let mut descriptor = json!({
        "project": project_slug,
        "entity": entity_slug,
        "version": version,
        "hash": hash,
        "payload": merged,
        "meta": meta,
        "timestamp": committed_at,
        "merge": merge,
        "fieldset": bound_fieldset,
        "fieldset_version": bound_fieldset_version,
    });
    if let Some(source_reference) = &options.source_reference {
        descriptor["source_reference"] = json!(source_reference);
    }
    if let Some(fieldset_reference) = &options.fieldset_reference {
        descriptor["fieldset_reference"] = json!(fieldset_reference);
    }
    let commit = canonical::hash_value(&descriptor)?;

    deactivate_versions(entity);
    entity.versions.insert(
        version_key.clone(),
        VersionRecord {
            version,
            hash: hash.clone(),
            commit: commit.clone(),
            committed_at: committed_at.clone(),
            status: VersionStatus::Active,
            payload: merged,
            meta,
            merge,
            fieldset_version: bound_fieldset_version.clone(),
            source_reference: options.source_reference.clone(),
            fieldset_reference: options.fieldset_reference.clone(),
        },
    );
    entity.active_version = Some(version_key.clone());
    entity.status = EntityStatus::Active;
    entity.archived_at = None;
    if project_slug == FIELDSETS_PROJECT {
        entity.fieldset = None;
        entity.fieldset_version = None;
    } else {
        entity.fieldset = bound_fieldset.clone();
        entity.fieldset_version = bound_fieldset_version;
    }
    entity.touch();

    brain.commits.insert(
        commit.clone(),
        CommitEntry {
            project: project_slug.to_string(),
            entity: entity_slug.to_string(),
            version,
            hash: hash.clone(),
            timestamp: committed_at,
            merge,
            fieldset: bound_fieldset.clone(),
            fieldset_version: commit_fieldset_version,
            source_reference: options.source_reference.clone(),
            fieldset_reference: options.fieldset_reference.clone(),
        },
    );
    brain
        .projects
        .get_mut(project_slug)
        .expect("ensured")
        .touch();

    Ok(SaveOutcome {
        project: project_slug.to_string(),
        entity: entity_slug.to_string(),
        version: version_key,
        hash,
        commit,
        merge,
        fieldset: bound_fieldset,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::store;

    fn save(
        s: &BrainStore,
        project: &str,
        entity: &str,
        payload: Value,
        options: &SaveOptions,
    ) -> SaveOutcome {
        s.save_entity(&Scope::all(), project, entity, payload, json!({}), options)
            .unwrap()
    }

    #[test]
    fn first_save_creates_stubs_and_version_one() {
        let (_tmp, s) = store();
        let outcome = save(
            &s,
            "demo",
            "hero",
            json!({"name": "Aria", "role": "Pilot"}),
            &SaveOptions::default(),
        );
        assert_eq!(outcome.version, "1");
        assert_eq!(
            outcome.hash,
            canonical::hash_value(&json!({"name": "Aria", "role": "Pilot"})).unwrap()
        );

        let record = s
            .entity_record(&Scope::all(), "demo", "hero", None)
            .unwrap();
        assert_eq!(record.payload, json!({"name": "Aria", "role": "Pilot"}));
        assert_eq!(record.version, "1");
    }

    #[test]
    fn merge_with_null_removal() {
        let (_tmp, s) = store();
        save(&s, "demo", "hero", json!({"name": "Aria", "role": "Pilot"}), &SaveOptions::default());
        let outcome = save(
            &s,
            "demo",
            "hero",
            json!({"role": null, "stats": {"agility": 12}}),
            &SaveOptions::default(),
        );
        assert_eq!(outcome.version, "2");

        let record = s
            .entity_record(&Scope::all(), "demo", "hero", None)
            .unwrap();
        assert_eq!(
            record.payload,
            json!({"name": "Aria", "stats": {"agility": 12}})
        );
        // Version 1 stays, inactive.
        let versions = s
            .list_entity_versions(&Scope::all(), "demo", "hero")
            .unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0]["status"], json!("inactive"));
        assert_eq!(versions[1]["status"], json!("active"));
    }

    #[test]
    fn replace_mode_ignores_previous_payload() {
        let (_tmp, s) = store();
        save(&s, "demo", "hero", json!({"name": "Aria", "role": "Pilot"}), &SaveOptions::default());
        save(
            &s,
            "demo",
            "hero",
            json!({"callsign": "Ghost"}),
            &SaveOptions {
                merge: Some(false),
                ..Default::default()
            },
        );
        let record = s
            .entity_record(&Scope::all(), "demo", "hero", None)
            .unwrap();
        assert_eq!(record.payload, json!({"callsign": "Ghost"}));
    }

    #[test]
    fn merge_from_explicit_source_reference() {
        let (_tmp, s) = store();
        save(&s, "demo", "hero", json!({"a": 1}), &SaveOptions::default());
        save(&s, "demo", "hero", json!({"b": 2}), &SaveOptions::default());
        // Merge onto v1, not the active v2.
        let outcome = save(
            &s,
            "demo",
            "hero",
            json!({"c": 3}),
            &SaveOptions {
                source_reference: Some("@1".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(outcome.version, "3");
        let record = s
            .entity_record(&Scope::all(), "demo", "hero", None)
            .unwrap();
        assert_eq!(record.payload, json!({"a": 1, "c": 3}));

        // An unknown source is a hard error.
        let err = s
            .save_entity(
                &Scope::all(),
                "demo",
                "hero",
                json!({}),
                json!({}),
                &SaveOptions {
                    source_reference: Some("@99".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, AavionError::InvalidReference { .. }));
    }

    #[test]
    fn commit_index_stays_consistent() {
        let (_tmp, s) = store();
        let o1 = save(&s, "demo", "hero", json!({"n": 1}), &SaveOptions::default());
        let o2 = save(&s, "demo", "hero", json!({"n": 2}), &SaveOptions::default());
        s.read_active(|_, brain| {
            assert_eq!(brain.commits.len(), 2);
            let entry = &brain.commits[&o2.commit];
            assert_eq!(entry.version, 2);
            assert_eq!(entry.entity, "hero");
            assert!(brain.commits.contains_key(&o1.commit));
            Ok(())
        })
        .unwrap();
        let report = s.integrity_report_for(None).unwrap();
        assert_eq!(report["ok"], json!(true));
    }

    #[test]
    fn delete_active_version_shifts_active() {
        let (_tmp, s) = store();
        for n in 1..=3 {
            save(&s, "demo", "hero", json!({"n": n}), &SaveOptions::default());
        }
        let result = s
            .delete_entity_version(&Scope::all(), "demo", "hero", "@3")
            .unwrap();
        assert_eq!(result["new_active"], json!("2"));
        let record = s
            .entity_record(&Scope::all(), "demo", "hero", None)
            .unwrap();
        assert_eq!(record.payload, json!({"n": 2}));
        s.read_active(|_, brain| {
            // v3's commit entry is gone.
            assert_eq!(brain.commits.len(), 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn deleting_last_version_deactivates_entity() {
        let (_tmp, s) = store();
        save(&s, "demo", "hero", json!({"n": 1}), &SaveOptions::default());
        s.delete_entity_version(&Scope::all(), "demo", "hero", "@1")
            .unwrap();
        s.read_active(|_, brain| {
            let entity = &brain.projects["demo"].entities["hero"];
            assert_eq!(entity.status, EntityStatus::Inactive);
            assert!(entity.active_version.is_none());
            assert!(entity.versions.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn restore_earlier_version() {
        let (_tmp, s) = store();
        save(&s, "demo", "hero", json!({"n": 1}), &SaveOptions::default());
        save(&s, "demo", "hero", json!({"n": 2}), &SaveOptions::default());
        s.restore_entity_version(&Scope::all(), "demo", "hero", "@1")
            .unwrap();
        let record = s
            .entity_record(&Scope::all(), "demo", "hero", None)
            .unwrap();
        assert_eq!(record.version, "1");
        let versions = s
            .list_entity_versions(&Scope::all(), "demo", "hero")
            .unwrap();
        assert_eq!(versions[0]["status"], json!("active"));
        assert_eq!(versions[1]["status"], json!("inactive"));
    }

    #[test]
    fn fieldset_binding_validates_and_fills_defaults() {
        let (_tmp, s) = store();
        save(
            &s,
            FIELDSETS_PROJECT,
            "character",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "role": {"type": "string", "default": "crew"}
                },
                "required": ["name"]
            }),
            &SaveOptions::default(),
        );

        let outcome = save(
            &s,
            "demo",
            "hero",
            json!({"name": "Aria"}),
            &SaveOptions {
                fieldset_provided: true,
                fieldset: Some("character".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(outcome.fieldset.as_deref(), Some("character"));
        let record = s
            .entity_record(&Scope::all(), "demo", "hero", None)
            .unwrap();
        assert_eq!(record.payload["role"], json!("crew"));

        // Violating payloads are refused.
        let err = s
            .save_entity(
                &Scope::all(),
                "demo",
                "hero",
                json!({"name": 7}),
                json!({}),
                &SaveOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, AavionError::SchemaValidation { .. }));
    }

    #[test]
    fn fieldset_binding_sticks_and_detaches() {
        let (_tmp, s) = store();
        save(
            &s,
            FIELDSETS_PROJECT,
            "character",
            json!({"type": "object", "properties": {"name": {"type": "string"}}}),
            &SaveOptions::default(),
        );
        save(
            &s,
            "demo",
            "hero",
            json!({"name": "Aria"}),
            &SaveOptions {
                fieldset_provided: true,
                fieldset: Some("character".to_string()),
                ..Default::default()
            },
        );
        // Unspecified binding keeps the stored one.
        let outcome = save(&s, "demo", "hero", json!({"name": "Bram"}), &SaveOptions::default());
        assert_eq!(outcome.fieldset.as_deref(), Some("character"));

        // Explicit null detaches.
        let outcome = save(
            &s,
            "demo",
            "hero",
            json!({"name": "Cole"}),
            &SaveOptions {
                fieldset_provided: true,
                fieldset: None,
                ..Default::default()
            },
        );
        assert_eq!(outcome.fieldset, None);
    }

    #[test]
    fn unknown_fieldset_is_not_found() {
        let (_tmp, s) = store();
        let err = s
            .save_entity(
                &Scope::all(),
                "demo",
                "hero",
                json!({"name": "Aria"}),
                json!({}),
                &SaveOptions {
                    fieldset_provided: true,
                    fieldset: Some("ghost".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, AavionError::NotFound { .. }));
    }

    #[test]
    fn fieldsets_project_payloads_must_be_schemas() {
        let (_tmp, s) = store();
        let err = s
            .save_entity(
                &Scope::all(),
                FIELDSETS_PROJECT,
                "broken",
                json!({"type": "quantum"}),
                json!({}),
                &SaveOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, AavionError::SchemaValidation { .. }));
    }

    #[test]
    fn resolved_suffixes_are_stripped_before_hashing() {
        let (_tmp, s) = store();
        let o1 = save(
            &s,
            "demo",
            "hero",
            json!({"bio": "[ref ship|name]"}),
            &SaveOptions::default(),
        );
        let o2 = save(
            &s,
            "demo",
            "hero",
            json!({"bio": "[ref ship|name]Vanguard[/ref]"}),
            &SaveOptions::default(),
        );
        assert_eq!(o1.hash, o2.hash);
        let record = s
            .entity_record(&Scope::all(), "demo", "hero", None)
            .unwrap();
        assert_eq!(record.payload["bio"], json!("[ref ship|name]"));
    }

    #[test]
    fn parent_path_assignment_on_save() {
        let (_tmp, s) = store();
        save(&s, "demo", "fleet", json!({"kind": "group"}), &SaveOptions::default());
        let outcome = save(
            &s,
            "demo",
            "hero",
            json!({"name": "Aria"}),
            &SaveOptions {
                parent_path: Some(vec!["fleet".to_string()]),
                ..Default::default()
            },
        );
        assert!(outcome.warnings.is_empty());
        let record = s
            .entity_record(&Scope::all(), "demo", "hero", None)
            .unwrap();
        assert_eq!(record.path, vec!["fleet", "hero"]);

        // Unknown segment clamps with a warning.
        let outcome = save(
            &s,
            "demo",
            "hero",
            json!({"name": "Aria"}),
            &SaveOptions {
                parent_path: Some(vec!["fleet".to_string(), "ghost".to_string()]),
                ..Default::default()
            },
        );
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn scope_denied_on_save() {
        let (_tmp, s) = store();
        let scope = Scope {
            mode: aavion_utils::ScopeMode::ReadOnly,
            projects: vec!["*".to_string()],
        };
        let err = s
            .save_entity(&scope, "demo", "hero", json!({}), json!({}), &SaveOptions::default())
            .unwrap_err();
        assert!(matches!(err, AavionError::ScopeDenied { .. }));
    }

    #[test]
    fn entity_listing_with_path_filter() {
        let (_tmp, s) = store();
        save(&s, "demo", "fleet", json!({}), &SaveOptions::default());
        save(
            &s,
            "demo",
            "hero",
            json!({}),
            &SaveOptions {
                parent_path: Some(vec!["fleet".to_string()]),
                ..Default::default()
            },
        );
        save(&s, "demo", "loner", json!({}), &SaveOptions::default());

        let all = s
            .list_entities(&Scope::all(), "demo", None)
            .unwrap();
        assert_eq!(all.len(), 3);
        let under_fleet = s
            .list_entities(&Scope::all(), "demo", Some(&["fleet".to_string()]))
            .unwrap();
        assert_eq!(under_fleet.len(), 2);
    }

    #[test]
    fn move_entity_strict_and_lenient() {
        let (_tmp, s) = store();
        save(&s, "demo", "fleet", json!({}), &SaveOptions::default());
        save(&s, "demo", "dock", json!({}), &SaveOptions::default());
        save(
            &s,
            "demo",
            "hero",
            json!({}),
            &SaveOptions {
                parent_path: Some(vec!["fleet".to_string()]),
                ..Default::default()
            },
        );

        // Strict with the wrong current path refuses.
        let err = s
            .move_entity(
                &Scope::all(),
                "demo",
                "hero",
                Some(&["dock".to_string()]),
                &["dock".to_string()],
                true,
            )
            .unwrap_err();
        assert!(matches!(err, AavionError::InvalidParameter { .. }));

        // Lenient move succeeds with a warning.
        let warnings = s
            .move_entity(
                &Scope::all(),
                "demo",
                "hero",
                Some(&["dock".to_string()]),
                &["dock".to_string()],
                false,
            )
            .unwrap();
        assert_eq!(warnings.len(), 1);
        let record = s
            .entity_record(&Scope::all(), "demo", "hero", None)
            .unwrap();
        assert_eq!(record.path, vec!["dock", "hero"]);
    }
}
