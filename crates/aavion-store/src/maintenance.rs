//! Store maintenance: version purging, commit-index compaction, repair.

use std::collections::BTreeSet;

use serde_json::{Value, json};
use tracing::info;

use aavion_utils::Scope;
use aavion_utils::error::AavionError;
use aavion_utils::{normalize_slug, time};

use crate::BrainStore;
use crate::model::{Brain, CommitEntry, EntityStatus, VersionStatus};

impl BrainStore {
    /// Per entity, keep the active version plus the `keep` newest
    /// versions by number; delete everything else along with their
    /// commit-index entries. Returns the per-entity plan; with `dry_run`
    /// nothing mutates.
    pub fn purge_inactive_entity_versions(
        &self,
        scope: &Scope,
        raw_project: &str,
        entity: Option<&str>,
        keep: usize,
        dry_run: bool,
    ) -> Result<Value, AavionError> {
        let project_slug = normalize_slug(raw_project)?;
        let entity_slug = entity.map(normalize_slug).transpose()?;
        scope.require_write(&project_slug)?;

        let apply = |brain: &mut Brain| -> Result<Value, AavionError> {
            let project = brain
                .projects
                .get_mut(&project_slug)
                .ok_or_else(|| AavionError::not_found("project", &project_slug))?;
            let mut plan = Vec::new();
            let mut removed_commits = Vec::new();
            for (slug, entity) in &mut project.entities {
                if entity_slug.as_deref().is_some_and(|e| e != slug) {
                    continue;
                }
                let numbers = entity.version_numbers();
                let mut keep_set: BTreeSet<String> = numbers
                    .iter()
                    .rev()
                    .take(keep)
                    .map(u64::to_string)
                    .collect();
                if let Some(active) = &entity.active_version {
                    keep_set.insert(active.clone());
                }
                let remove: Vec<String> = numbers
                    .iter()
                    .map(u64::to_string)
                    .filter(|v| !keep_set.contains(v))
                    .collect();
                if !dry_run {
                    for version in &remove {
                        if let Some(record) = entity.versions.remove(version) {
                            removed_commits.push(record.commit);
                        }
                    }
                    if !remove.is_empty() {
                        entity.touch();
                    }
                }
                plan.push(json!({
                    "entity": slug,
                    "keep": keep_set.iter().collect::<Vec<_>>(),
                    "remove": remove,
                }));
            }
            if !dry_run {
                for commit in removed_commits {
                    brain.commits.remove(&commit);
                }
            }
            Ok(json!({"project": project_slug, "dry_run": dry_run, "entities": plan}))
        };

        let result = if dry_run {
            self.read_active(|_, brain| {
                let mut scratch = brain.clone();
                apply(&mut scratch)
            })?
        } else {
            self.with_active(|_, brain| apply(brain))?
        };
        if !dry_run {
            self.bus().emit(
                "brain.entity.cleanup",
                json!({"project": result["project"], "keep": keep}),
            );
        }
        Ok(result)
    }

    /// Rebuild the commit index from surviving version records, for one
    /// project or all of them.
    pub fn compact_brain(
        &self,
        scope: &Scope,
        project: Option<&str>,
        dry_run: bool,
    ) -> Result<Value, AavionError> {
        let project_slug = project.map(normalize_slug).transpose()?;
        if let Some(slug) = &project_slug {
            scope.require_write(slug)?;
        }

        let apply = |brain: &mut Brain| -> Result<Value, AavionError> {
            let targets: Vec<String> = match &project_slug {
                Some(slug) => {
                    if !brain.projects.contains_key(slug) {
                        return Err(AavionError::not_found("project", slug));
                    }
                    vec![slug.clone()]
                }
                None => brain
                    .projects
                    .keys()
                    .filter(|slug| scope.allows_write(slug))
                    .cloned()
                    .collect(),
            };

            let before: usize = brain
                .commits
                .values()
                .filter(|c| targets.contains(&c.project))
                .count();
            brain.commits.retain(|_, c| !targets.contains(&c.project));

            let mut added = 0usize;
            for slug in &targets {
                let project = &brain.projects[slug];
                let mut rebuilt: Vec<(String, CommitEntry)> = Vec::new();
                for (entity_slug, entity) in &project.entities {
                    for record in entity.versions.values() {
                        rebuilt.push((
                            record.commit.clone(),
                            CommitEntry {
                                project: slug.clone(),
                                entity: entity_slug.clone(),
                                version: record.version,
                                hash: record.hash.clone(),
                                timestamp: record.committed_at.clone(),
                                merge: record.merge,
                                fieldset: entity.fieldset.clone(),
                                fieldset_version: record.fieldset_version.clone(),
                                source_reference: record.source_reference.clone(),
                                fieldset_reference: record.fieldset_reference.clone(),
                            },
                        ));
                    }
                }
                added += rebuilt.len();
                brain.commits.extend(rebuilt);
            }
            Ok(json!({
                "projects": targets,
                "commits_before": before,
                "commits_after": added,
                "dry_run": dry_run,
            }))
        };

        let result = if dry_run {
            self.read_active(|_, brain| {
                let mut scratch = brain.clone();
                apply(&mut scratch)
            })?
        } else {
            self.with_active(|_, brain| apply(brain))?
        };
        if !dry_run {
            info!("brain compacted");
            self.bus()
                .emit("brain.compacted", json!({"projects": result["projects"]}));
        }
        Ok(result)
    }

    /// Repair structural drift: active-version pointers, version
    /// statuses, missing timestamps, entity status alignment.
    pub fn repair_brain(
        &self,
        scope: &Scope,
        project: Option<&str>,
        dry_run: bool,
    ) -> Result<Value, AavionError> {
        let project_slug = project.map(normalize_slug).transpose()?;
        if let Some(slug) = &project_slug {
            scope.require_write(slug)?;
        }

        let apply = |brain: &mut Brain| -> Result<Value, AavionError> {
            let mut repairs: Vec<String> = Vec::new();
            for (slug, project) in &mut brain.projects {
                if project_slug.as_deref().is_some_and(|p| p != slug) {
                    continue;
                }
                if project_slug.is_none() && !scope.allows_write(slug) {
                    continue;
                }
                for (entity_slug, entity) in &mut project.entities {
                    let tag = format!("{slug}/{entity_slug}");

                    if entity.versions.is_empty() {
                        if entity.active_version.is_some()
                            || entity.status == EntityStatus::Active
                        {
                            repairs.push(format!("{tag}: cleared empty entity"));
                            entity.active_version = None;
                            entity.status = EntityStatus::Inactive;
                        }
                        continue;
                    }

                    let pointer_valid = entity
                        .active_version
                        .as_ref()
                        .is_some_and(|v| entity.versions.contains_key(v));
                    if !pointer_valid {
                        let fallback = entity
                            .versions
                            .iter()
                            .find(|(_, r)| r.status == VersionStatus::Active)
                            .map(|(k, _)| k.clone())
                            .or_else(|| entity.version_numbers().last().map(u64::to_string));
                        repairs.push(format!(
                            "{tag}: active_version repointed to {}",
                            fallback.as_deref().unwrap_or("none")
                        ));
                        entity.active_version = fallback;
                    }

                    // Exactly the pointed-at record is active.
                    let active = entity.active_version.clone();
                    for (key, record) in &mut entity.versions {
                        let should = active.as_deref() == Some(key.as_str());
                        let is = record.status == VersionStatus::Active;
                        if should != is {
                            repairs.push(format!("{tag}@{key}: status realigned"));
                            record.status = if should {
                                VersionStatus::Active
                            } else {
                                VersionStatus::Inactive
                            };
                        }
                        if record.committed_at.is_empty() {
                            repairs.push(format!("{tag}@{key}: committed_at filled"));
                            record.committed_at = entity.updated_at.clone();
                        }
                    }

                    if entity.created_at.is_empty() {
                        repairs.push(format!("{tag}: created_at filled"));
                        entity.created_at = time::now_iso();
                    }
                    if entity.updated_at.is_empty() {
                        repairs.push(format!("{tag}: updated_at filled"));
                        entity.updated_at = entity.created_at.clone();
                    }

                    let has_active = entity.active_version.is_some();
                    let aligned = match (has_active, entity.status) {
                        (true, EntityStatus::Active) => true,
                        (false, EntityStatus::Inactive | EntityStatus::Archived) => true,
                        _ => false,
                    };
                    if !aligned {
                        repairs.push(format!("{tag}: entity status realigned"));
                        entity.status = if has_active {
                            EntityStatus::Active
                        } else {
                            EntityStatus::Inactive
                        };
                    }
                }
            }
            Ok(json!({"repairs": repairs, "dry_run": dry_run}))
        };

        let result = if dry_run {
            self.read_active(|_, brain| {
                let mut scratch = brain.clone();
                apply(&mut scratch)
            })?
        } else {
            self.with_active(|_, brain| apply(brain))?
        };
        if !dry_run {
            self.bus().emit(
                "brain.repaired",
                json!({"repairs": result["repairs"].as_array().map_or(0, Vec::len)}),
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::SaveOptions;
    use crate::testutil::store;

    fn seed(s: &BrainStore, versions: u64) {
        for n in 1..=versions {
            s.save_entity(
                &Scope::all(),
                "demo",
                "hero",
                json!({"n": n}),
                json!({}),
                &SaveOptions::default(),
            )
            .unwrap();
        }
    }

    #[test]
    fn purge_keeps_active_and_newest() {
        let (_tmp, s) = store();
        seed(&s, 5);
        // Make v2 active so the keep-set is {2 (active), 5, 4}.
        s.restore_entity_version(&Scope::all(), "demo", "hero", "@2")
            .unwrap();

        let dry = s
            .purge_inactive_entity_versions(&Scope::all(), "demo", Some("hero"), 2, true)
            .unwrap();
        assert_eq!(dry["entities"][0]["remove"], json!(["1", "3"]));
        // Dry run left everything alone.
        assert_eq!(
            s.list_entity_versions(&Scope::all(), "demo", "hero")
                .unwrap()
                .len(),
            5
        );

        s.purge_inactive_entity_versions(&Scope::all(), "demo", Some("hero"), 2, false)
            .unwrap();
        let versions = s
            .list_entity_versions(&Scope::all(), "demo", "hero")
            .unwrap();
        assert_eq!(versions.len(), 3);
        // Commit index shrank with the records.
        let report = s.integrity_report_for(None).unwrap();
        assert_eq!(report["ok"], json!(true));
    }

    #[test]
    fn compact_rebuilds_commit_index() {
        let (_tmp, s) = store();
        seed(&s, 3);
        // Corrupt the index: drop one entry and add a stray one.
        s.with_active(|_, brain| {
            let some_key = brain.commits.keys().next().cloned().unwrap();
            brain.commits.remove(&some_key);
            brain.commits.insert(
                "stray".to_string(),
                CommitEntry {
                    project: "demo".to_string(),
                    entity: "ghost".to_string(),
                    version: 9,
                    hash: "x".to_string(),
                    timestamp: time::now_iso(),
                    merge: true,
                    fieldset: None,
                    fieldset_version: None,
                    source_reference: None,
                    fieldset_reference: None,
                },
            );
            Ok(())
        })
        .unwrap();
        assert_eq!(s.integrity_report_for(None).unwrap()["ok"], json!(false));

        let result = s.compact_brain(&Scope::all(), Some("demo"), false).unwrap();
        assert_eq!(result["commits_after"], json!(3));
        assert_eq!(s.integrity_report_for(None).unwrap()["ok"], json!(true));
    }

    #[test]
    fn repair_fixes_pointer_and_statuses() {
        let (_tmp, s) = store();
        seed(&s, 3);
        s.with_active(|_, brain| {
            let entity = brain
                .projects
                .get_mut("demo")
                .unwrap()
                .entities
                .get_mut("hero")
                .unwrap();
            entity.active_version = Some("99".to_string());
            for record in entity.versions.values_mut() {
                record.status = VersionStatus::Active;
            }
            Ok(())
        })
        .unwrap();

        let result = s.repair_brain(&Scope::all(), Some("demo"), false).unwrap();
        assert!(!result["repairs"].as_array().unwrap().is_empty());
        s.read_active(|_, brain| {
            let entity = &brain.projects["demo"].entities["hero"];
            // Repointed to the record that claimed active status (or the
            // newest); exactly one record is active afterwards.
            let active_count = entity
                .versions
                .values()
                .filter(|r| r.status == VersionStatus::Active)
                .count();
            assert_eq!(active_count, 1);
            let pointer = entity.active_version.clone().unwrap();
            assert_eq!(
                entity.versions[&pointer].status,
                VersionStatus::Active
            );
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn repair_clears_empty_entity() {
        let (_tmp, s) = store();
        seed(&s, 1);
        s.with_active(|_, brain| {
            let entity = brain
                .projects
                .get_mut("demo")
                .unwrap()
                .entities
                .get_mut("hero")
                .unwrap();
            entity.versions.clear();
            Ok(())
        })
        .unwrap();
        s.repair_brain(&Scope::all(), None, false).unwrap();
        s.read_active(|_, brain| {
            let entity = &brain.projects["demo"].entities["hero"];
            assert_eq!(entity.status, EntityStatus::Inactive);
            assert!(entity.active_version.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn dry_run_repair_mutates_nothing() {
        let (_tmp, s) = store();
        seed(&s, 2);
        s.with_active(|_, brain| {
            brain
                .projects
                .get_mut("demo")
                .unwrap()
                .entities
                .get_mut("hero")
                .unwrap()
                .active_version = Some("42".to_string());
            Ok(())
        })
        .unwrap();
        let result = s.repair_brain(&Scope::all(), None, true).unwrap();
        assert!(!result["repairs"].as_array().unwrap().is_empty());
        s.read_active(|_, brain| {
            assert_eq!(
                brain.projects["demo"].entities["hero"]
                    .active_version
                    .as_deref(),
                Some("42")
            );
            Ok(())
        })
        .unwrap();
    }
}
