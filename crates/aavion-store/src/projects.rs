//! Project operations.

use serde_json::{Value, json};

use aavion_utils::error::AavionError;
use aavion_utils::{Scope, normalize_slug};

use crate::model::{Brain, Entity, EntityStatus, Project, ProjectStatus, VersionStatus};
use crate::{BrainStore, hierarchy};

/// Options for `restoreProject`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreProjectOptions {
    pub reactivate_entities: bool,
}

impl BrainStore {
    /// Summaries of every project in the active brain the scope can read.
    pub fn list_projects(&self, scope: &Scope) -> Result<Vec<Value>, AavionError> {
        self.read_active(|_, brain| {
            Ok(brain
                .projects
                .values()
                .filter(|p| scope.allows_read(&p.slug))
                .map(project_summary)
                .collect())
        })
    }

    /// Create a project; fails if the slug is taken.
    pub fn create_project(
        &self,
        scope: &Scope,
        raw_slug: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<Value, AavionError> {
        let slug = normalize_slug(raw_slug)?;
        scope.require_write(&slug)?;
        let summary = self.with_active(|_, brain| {
            if brain.projects.contains_key(&slug) {
                return Err(AavionError::InvalidSlug {
                    slug: slug.clone(),
                    reason: "project already exists".to_string(),
                });
            }
            let project = Project::stub(&slug, title, description);
            let summary = project_summary(&project);
            brain.projects.insert(slug.clone(), project);
            Ok(summary)
        })?;
        self.bus()
            .emit("brain.project.created", json!({"project": slug}));
        Ok(summary)
    }

    /// Update title/description.
    pub fn update_project_metadata(
        &self,
        scope: &Scope,
        raw_slug: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<Value, AavionError> {
        let slug = normalize_slug(raw_slug)?;
        scope.require_write(&slug)?;
        let summary = self.with_active(|_, brain| {
            let project = project_mut(brain, &slug)?;
            if let Some(title) = title {
                project.title = title.to_string();
            }
            if let Some(description) = description {
                if description.is_empty() {
                    project.description = None;
                } else {
                    project.description = Some(description.to_string());
                }
            }
            project.touch();
            Ok(project_summary(project))
        })?;
        self.bus()
            .emit("brain.project.updated", json!({"project": slug}));
        Ok(summary)
    }

    /// Flip a project to archived and deactivate all of its entities.
    /// Each entity keeps its `active_version` pointer as the last-known
    /// active revision for a later restore.
    pub fn archive_project(&self, scope: &Scope, raw_slug: &str) -> Result<Value, AavionError> {
        let slug = normalize_slug(raw_slug)?;
        scope.require_write(&slug)?;
        let summary = self.with_active(|_, brain| {
            let project = project_mut(brain, &slug)?;
            if project.status == ProjectStatus::Archived {
                return Err(AavionError::InvalidParameter {
                    name: "project".to_string(),
                    reason: format!("'{slug}' is already archived"),
                });
            }
            project.status = ProjectStatus::Archived;
            project.archived_at = Some(aavion_utils::time::now_iso());
            for entity in project.entities.values_mut() {
                deactivate_versions(entity);
                entity.status = EntityStatus::Inactive;
                entity.touch();
            }
            project.touch();
            Ok(project_summary(project))
        })?;
        self.bus()
            .emit("brain.project.archived", json!({"project": slug}));
        Ok(summary)
    }

    /// Restore an archived project; optionally reactivate entities at
    /// their last-known active version (or the newest one). Entities
    /// without versions produce warnings.
    pub fn restore_project(
        &self,
        scope: &Scope,
        raw_slug: &str,
        options: RestoreProjectOptions,
    ) -> Result<Value, AavionError> {
        let slug = normalize_slug(raw_slug)?;
        scope.require_write(&slug)?;
        let result = self.with_active(|_, brain| {
            let project = project_mut(brain, &slug)?;
            project.status = ProjectStatus::Active;
            project.archived_at = None;
            let mut warnings = Vec::new();
            if options.reactivate_entities {
                for (entity_slug, entity) in &mut project.entities {
                    let candidate = entity
                        .active_version
                        .clone()
                        .filter(|v| entity.versions.contains_key(v))
                        .or_else(|| entity.version_numbers().last().map(u64::to_string));
                    match candidate {
                        Some(version) => {
                            deactivate_versions(entity);
                            if let Some(record) = entity.versions.get_mut(&version) {
                                record.status = VersionStatus::Active;
                            }
                            entity.active_version = Some(version);
                            entity.status = EntityStatus::Active;
                            entity.archived_at = None;
                            entity.touch();
                        }
                        None => warnings.push(format!("entity '{entity_slug}' has no versions")),
                    }
                }
            }
            project.touch();
            let mut summary = project_summary(project);
            summary["warnings"] = json!(warnings);
            Ok(summary)
        })?;
        self.bus()
            .emit("brain.project.restored", json!({"project": slug}));
        Ok(result)
    }

    /// Delete a project. With `purge_commits`, its commit-index entries
    /// go too; otherwise they remain as historical trace until the next
    /// compaction.
    pub fn delete_project(
        &self,
        scope: &Scope,
        raw_slug: &str,
        purge_commits: bool,
    ) -> Result<(), AavionError> {
        let slug = normalize_slug(raw_slug)?;
        scope.require_write(&slug)?;
        self.with_active(|_, brain| {
            if brain.projects.remove(&slug).is_none() {
                return Err(AavionError::not_found("project", &slug));
            }
            if purge_commits {
                brain.commits.retain(|_, commit| commit.project != slug);
            }
            Ok(())
        })?;
        self.bus().emit(
            "brain.project.deleted",
            json!({"project": slug, "purged_commits": purge_commits}),
        );
        Ok(())
    }

    /// Detailed report for one project.
    pub fn project_report(
        &self,
        scope: &Scope,
        raw_slug: &str,
        include_entities: bool,
    ) -> Result<Value, AavionError> {
        let slug = normalize_slug(raw_slug)?;
        scope.require_read(&slug)?;
        self.read_active(|_, brain| {
            let project = brain
                .projects
                .get(&slug)
                .ok_or_else(|| AavionError::not_found("project", &slug))?;
            let mut report = project_summary(project);
            report["hierarchy_issues"] = json!(hierarchy::consistency_issues(project));
            if include_entities {
                let entities: Vec<Value> = project
                    .entities
                    .values()
                    .map(|entity| entity_summary(project, entity))
                    .collect();
                report["entity_details"] = json!(entities);
            }
            Ok(report)
        })
    }
}

pub(crate) fn project_mut<'a>(
    brain: &'a mut Brain,
    slug: &str,
) -> Result<&'a mut Project, AavionError> {
    brain
        .projects
        .get_mut(slug)
        .ok_or_else(|| AavionError::not_found("project", slug))
}

pub(crate) fn deactivate_versions(entity: &mut Entity) {
    for record in entity.versions.values_mut() {
        record.status = VersionStatus::Inactive;
    }
}

pub(crate) fn project_summary(project: &Project) -> Value {
    json!({
        "slug": project.slug,
        "title": project.title,
        "description": project.description,
        "status": project.status,
        "created_at": project.created_at,
        "updated_at": project.updated_at,
        "archived_at": project.archived_at,
        "entities": project.entities.len(),
    })
}

pub(crate) fn entity_summary(project: &Project, entity: &Entity) -> Value {
    json!({
        "slug": entity.slug,
        "status": entity.status,
        "active_version": entity.active_version,
        "versions": entity.versions.len(),
        "fieldset": entity.fieldset,
        "fieldset_version": entity.fieldset_version,
        "path": hierarchy::path_of(project, &entity.slug),
        "created_at": entity.created_at,
        "updated_at": entity.updated_at,
    })
}
