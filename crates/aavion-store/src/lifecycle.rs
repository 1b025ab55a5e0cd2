//! Brain lifecycle: create/activate/delete, backups, and reports.

use std::fs;
use std::io::{Read, Write};

use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use aavion_utils::error::AavionError;
use aavion_utils::{canonical, paths, time};

use crate::model::{Brain, VersionStatus};
use crate::{BrainStore, user_brain_slug};

/// One row of `listBrains`.
#[derive(Debug, Clone, Serialize)]
pub struct BrainSummary {
    pub slug: String,
    pub active: bool,
    pub path: String,
    pub bytes: u64,
    pub updated_at: String,
}

/// Result of `backupBrain`.
#[derive(Debug, Clone, Serialize)]
pub struct BackupOutcome {
    pub path: String,
    pub bytes: u64,
    pub compressed: bool,
}

/// One discovered backup file.
#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub file: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub stamp: String,
    pub bytes: u64,
    pub compressed: bool,
}

/// Result of `pruneBackups`.
#[derive(Debug, Clone, Serialize)]
pub struct PruneOutcome {
    pub removed: Vec<String>,
    pub kept: usize,
    pub dry_run: bool,
}

impl BrainStore {
    /// Every user brain on disk, flagged with the active one.
    pub fn list_brains(&self) -> Result<Vec<BrainSummary>, AavionError> {
        let active = self.active_brain_slug()?;
        let dir = self.paths().user_storage();
        let mut out = Vec::new();
        if !dir.as_std_path().exists() {
            return Ok(out);
        }
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|e| AavionError::storage(dir.clone(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| AavionError::storage(dir.clone(), e))?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(slug) = name.strip_suffix(".brain") else {
                continue;
            };
            let meta = entry
                .metadata()
                .map_err(|e| AavionError::storage(name.to_string(), e))?;
            let updated_at = self
                .read_brain(slug, |brain| Ok(brain.meta.updated_at.clone()))
                .unwrap_or_default();
            out.push(BrainSummary {
                slug: slug.to_string(),
                active: slug == active,
                path: path.display().to_string(),
                bytes: meta.len(),
                updated_at,
            });
        }
        out.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(out)
    }

    /// Create a new user brain; optionally make it active.
    pub fn create_brain(&self, raw_slug: &str, activate: bool) -> Result<String, AavionError> {
        let slug = user_brain_slug(raw_slug)?;
        let path = self.paths().brain_file(&slug);
        if path.as_std_path().exists() {
            return Err(AavionError::InvalidSlug {
                slug,
                reason: "brain already exists".to_string(),
            });
        }
        {
            let lock = self.lock_for(&slug);
            let _guard = lock.lock().expect("brain lock poisoned");
            let mut brain = Brain::new_user(&slug);
            self.persist(&slug, &mut brain)?;
        }
        self.bus()
            .emit("brain.created", json!({"slug": slug, "system": false}));
        if activate {
            self.set_active_brain(&slug)?;
        }
        Ok(slug)
    }

    /// Point `state.active_brain` at an existing brain.
    pub fn set_active_brain(&self, raw_slug: &str) -> Result<(), AavionError> {
        let slug = user_brain_slug(raw_slug)?;
        if !self.paths().brain_file(&slug).as_std_path().exists() {
            return Err(AavionError::not_found("brain", slug));
        }
        self.with_system(|brain| {
            brain
                .state
                .get_or_insert_with(Default::default)
                .active_brain = slug.clone();
            Ok(())
        })
    }

    /// Delete a brain file. Refuses the system brain and the active one.
    pub fn delete_brain(&self, raw_slug: &str) -> Result<(), AavionError> {
        let slug = user_brain_slug(raw_slug)?;
        if slug == self.active_brain_slug()? {
            return Err(AavionError::InvalidParameter {
                name: "brain".to_string(),
                reason: "cannot delete the active brain".to_string(),
            });
        }
        let path = self.paths().brain_file(&slug);
        if !path.as_std_path().exists() {
            return Err(AavionError::not_found("brain", slug));
        }
        let lock = self.lock_for(&slug);
        let _guard = lock.lock().expect("brain lock poisoned");
        fs::remove_file(path.as_std_path()).map_err(|e| AavionError::storage(path, e))?;
        drop(_guard);
        self.bus().emit("brain.deleted", json!({"slug": slug}));
        Ok(())
    }

    /// Copy a brain file into the backups directory, optionally gzipped.
    pub fn backup_brain(
        &self,
        slug: Option<&str>,
        label: Option<&str>,
        compress: bool,
    ) -> Result<BackupOutcome, AavionError> {
        let slug = match slug {
            Some(raw) => user_brain_slug(raw)?,
            None => self.active_brain_slug()?,
        };
        let source = self.paths().brain_file(&slug);
        if !source.as_std_path().exists() {
            return Err(AavionError::not_found("brain", slug));
        }

        let label_part = label
            .map(paths::sanitize_slug)
            .map(|l| format!("--{l}"))
            .unwrap_or_default();
        let extension = if compress { ".brain.gz" } else { ".brain" };
        let filename = format!("{slug}{label_part}-{}{extension}", time::backup_stamp());
        let dir = self.backups_dir();
        paths::ensure_dir_all(&dir)?;
        let target = dir.join(&filename);

        let lock = self.lock_for(&slug);
        let _guard = lock.lock().expect("brain lock poisoned");
        let bytes = fs::read(source.as_std_path())
            .map_err(|e| AavionError::storage(source.clone(), e))?;
        drop(_guard);

        if compress {
            let file = fs::File::create(target.as_std_path())
                .map_err(|e| AavionError::storage(target.clone(), e))?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder
                .write_all(&bytes)
                .and_then(|()| encoder.finish().map(drop))
                .map_err(|e| AavionError::storage(target.clone(), e))?;
        } else {
            fs::write(target.as_std_path(), &bytes)
                .map_err(|e| AavionError::storage(target.clone(), e))?;
        }

        let written = fs::metadata(target.as_std_path())
            .map_err(|e| AavionError::storage(target.clone(), e))?
            .len();
        info!(slug = %slug, path = %target, "brain backup created");
        self.bus().emit(
            "brain.backup.created",
            json!({"slug": slug, "path": target.as_str(), "compressed": compress}),
        );
        Ok(BackupOutcome {
            path: target.to_string(),
            bytes: written,
            compressed: compress,
        })
    }

    /// Backups on disk, optionally filtered by brain slug, newest first.
    pub fn list_backups(&self, slug: Option<&str>) -> Result<Vec<BackupInfo>, AavionError> {
        let dir = self.backups_dir();
        let mut out = Vec::new();
        if !dir.as_std_path().exists() {
            return Ok(out);
        }
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|e| AavionError::storage(dir.clone(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| AavionError::storage(dir.clone(), e))?;
            let Some(name) = entry.file_name().to_str().map(ToString::to_string) else {
                continue;
            };
            let Some(info) = parse_backup_name(&name) else {
                continue;
            };
            if slug.is_some_and(|s| s != info.0) {
                continue;
            }
            let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            out.push(BackupInfo {
                file: name.clone(),
                slug: info.0,
                label: info.1,
                stamp: info.2,
                bytes,
                compressed: name.ends_with(".gz"),
            });
        }
        out.sort_by(|a, b| b.stamp.cmp(&a.stamp));
        Ok(out)
    }

    /// Delete old backups: keep the newest `keep` per brain and anything
    /// younger than `older_than_days`.
    pub fn prune_backups(
        &self,
        slug: Option<&str>,
        keep: usize,
        older_than_days: Option<u64>,
        dry_run: bool,
    ) -> Result<PruneOutcome, AavionError> {
        let backups = self.list_backups(slug)?;
        let cutoff = older_than_days.map(|days| {
            (chrono::Utc::now() - chrono::Duration::days(days as i64))
                .format("%Y%m%d_%H%M%S")
                .to_string()
        });

        let mut removed = Vec::new();
        let mut kept = 0usize;
        let mut per_slug_seen: std::collections::BTreeMap<String, usize> = Default::default();
        // list_backups is newest-first, so the first `keep` per slug stay.
        for backup in backups {
            let seen = per_slug_seen.entry(backup.slug.clone()).or_insert(0);
            *seen += 1;
            let protected_by_keep = *seen <= keep;
            let young_enough = cutoff
                .as_ref()
                .is_some_and(|cutoff| backup.stamp.as_str() >= cutoff.as_str());
            if protected_by_keep || young_enough {
                kept += 1;
                continue;
            }
            if !dry_run {
                let path = self.backups_dir().join(&backup.file);
                fs::remove_file(path.as_std_path())
                    .map_err(|e| AavionError::storage(path, e))?;
            }
            removed.push(backup.file);
        }
        Ok(PruneOutcome {
            removed,
            kept,
            dry_run,
        })
    }

    /// Restore a backup file into a (possibly new) brain.
    pub fn restore_brain(
        &self,
        backup: &str,
        target_slug: Option<&str>,
        activate: bool,
        overwrite: bool,
    ) -> Result<String, AavionError> {
        let path = if backup.contains('/') {
            Utf8PathBuf::from(backup)
        } else {
            self.backups_dir().join(backup)
        };
        if !path.as_std_path().exists() {
            return Err(AavionError::not_found("backup", backup));
        }
        let file_name = path.file_name().unwrap_or_default().to_string();
        let parsed_slug = parse_backup_name(&file_name).map(|(slug, _, _)| slug);

        let raw = fs::read(path.as_std_path())
            .map_err(|e| AavionError::storage(path.clone(), e))?;
        let bytes = if file_name.ends_with(".gz") {
            let mut decoder = GzDecoder::new(raw.as_slice());
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| AavionError::storage(path.clone(), e))?;
            out
        } else {
            raw
        };

        let value = canonical::decode(&bytes)?;
        let mut brain: Brain =
            serde_json::from_value(value).map_err(|e| AavionError::InvalidJson {
                reason: format!("backup is not a brain document: {e}"),
            })?;

        let slug = match target_slug.or(parsed_slug.as_deref()) {
            Some(raw) => user_brain_slug(raw)?,
            None => {
                return Err(AavionError::InvalidParameter {
                    name: "target".to_string(),
                    reason: "cannot derive a brain slug from the backup name".to_string(),
                });
            }
        };
        let target = self.paths().brain_file(&slug);
        if target.as_std_path().exists() && !overwrite {
            return Err(AavionError::InvalidParameter {
                name: "overwrite".to_string(),
                reason: format!("brain '{slug}' exists; pass overwrite to replace it"),
            });
        }

        brain.meta.slug = slug.clone();
        {
            let lock = self.lock_for(&slug);
            let _guard = lock.lock().expect("brain lock poisoned");
            self.persist(&slug, &mut brain)?;
        }
        self.bus().emit(
            "brain.backup.restored",
            json!({"slug": slug, "backup": file_name}),
        );
        if activate {
            self.set_active_brain(&slug)?;
        }
        Ok(slug)
    }

    /// Structural summary of one brain.
    pub fn brain_report(&self, slug: Option<&str>) -> Result<Value, AavionError> {
        let slug = match slug {
            Some(raw) => user_brain_slug(raw)?,
            None => self.active_brain_slug()?,
        };
        let path = self.paths().brain_file(&slug);
        let bytes = fs::metadata(path.as_std_path()).map(|m| m.len()).unwrap_or(0);
        self.read_brain(&slug, |brain| {
            let mut projects = Vec::new();
            for (project_slug, project) in &brain.projects {
                let versions: usize =
                    project.entities.values().map(|e| e.versions.len()).sum();
                projects.push(json!({
                    "slug": project_slug,
                    "status": project.status,
                    "entities": project.entities.len(),
                    "versions": versions,
                }));
            }
            Ok(json!({
                "slug": slug,
                "path": path.as_str(),
                "bytes": bytes,
                "schema_version": brain.meta.schema_version,
                "created_at": brain.meta.created_at,
                "updated_at": brain.meta.updated_at,
                "projects": projects,
                "commits": brain.commits.len(),
            }))
        })
    }

    /// Verify hashes, commit-index consistency, and hierarchy shape for
    /// one brain without mutating anything.
    pub fn integrity_report_for(&self, slug: Option<&str>) -> Result<Value, AavionError> {
        let slug = match slug {
            Some(raw) => user_brain_slug(raw)?,
            None => self.active_brain_slug()?,
        };
        self.read_brain(&slug, |brain| Ok(integrity_issues(&slug, brain)))
    }

    /// Integrity over every brain plus the last writer state.
    pub fn integrity_report(&self) -> Result<Value, AavionError> {
        let mut reports = Vec::new();
        for summary in self.list_brains()? {
            reports.push(self.integrity_report_for(Some(&summary.slug))?);
        }
        Ok(json!({
            "brains": reports,
            "last_write": self.writer().last_write(),
            "last_failure": self.writer().last_failure(),
        }))
    }

    fn backups_dir(&self) -> Utf8PathBuf {
        let default = self.paths().backups_dir();
        Utf8PathBuf::from(self.config_string("backups_path", default.as_str()))
    }
}

fn integrity_issues(slug: &str, brain: &Brain) -> Value {
    let mut issues: Vec<String> = Vec::new();

    for (project_slug, project) in &brain.projects {
        for issue in crate::hierarchy::consistency_issues(project) {
            issues.push(format!("{project_slug}: hierarchy: {issue}"));
        }
        for (entity_slug, entity) in &project.entities {
            let mut active_count = 0usize;
            for (key, record) in &entity.versions {
                if record.status == VersionStatus::Active {
                    active_count += 1;
                }
                match canonical::hash_value(&record.payload) {
                    Ok(hash) if hash == record.hash => {}
                    Ok(hash) => issues.push(format!(
                        "{project_slug}/{entity_slug}@{key}: payload hash {hash} != recorded {}",
                        record.hash
                    )),
                    Err(err) => issues.push(format!(
                        "{project_slug}/{entity_slug}@{key}: payload not hashable: {err}"
                    )),
                }
                match brain.commits.get(&record.commit) {
                    Some(commit)
                        if commit.project == *project_slug
                            && commit.entity == *entity_slug
                            && commit.version == record.version => {}
                    Some(_) => issues.push(format!(
                        "{project_slug}/{entity_slug}@{key}: commit entry disagrees"
                    )),
                    None => issues.push(format!(
                        "{project_slug}/{entity_slug}@{key}: commit {} missing from index",
                        record.commit
                    )),
                }
            }
            if active_count > 1 {
                issues.push(format!(
                    "{project_slug}/{entity_slug}: {active_count} active versions"
                ));
            }
            if let Some(active) = &entity.active_version {
                let points_at_active = entity
                    .versions
                    .get(active)
                    .is_some_and(|r| r.status == VersionStatus::Active);
                if active_count == 1 && !points_at_active {
                    issues.push(format!(
                        "{project_slug}/{entity_slug}: active_version '{active}' is not the active record"
                    ));
                }
            } else if active_count == 1 {
                issues.push(format!(
                    "{project_slug}/{entity_slug}: active record without active_version pointer"
                ));
            }
        }
    }

    for (hash, commit) in &brain.commits {
        let resolves = brain
            .projects
            .get(&commit.project)
            .and_then(|p| p.entities.get(&commit.entity))
            .and_then(|e| e.versions.get(&commit.version.to_string()))
            .is_some_and(|record| record.commit == *hash);
        if !resolves {
            issues.push(format!(
                "commit {hash}: no matching version record ({}/{}@{})",
                commit.project, commit.entity, commit.version
            ));
        }
    }

    json!({
        "slug": slug,
        "ok": issues.is_empty(),
        "issues": issues,
    })
}

/// Parse `<slug>[--<label>]-YYYYmmdd_HHMMSS.brain[.gz]`.
fn parse_backup_name(name: &str) -> Option<(String, Option<String>, String)> {
    let stem = name
        .strip_suffix(".brain.gz")
        .or_else(|| name.strip_suffix(".brain"))?;
    let (head, stamp) = stem.rsplit_once('-')?;
    if stamp.len() != 15 || stamp.as_bytes().get(8) != Some(&b'_') {
        return None;
    }
    if !stamp
        .chars()
        .enumerate()
        .all(|(i, c)| if i == 8 { c == '_' } else { c.is_ascii_digit() })
    {
        return None;
    }
    match head.split_once("--") {
        Some((slug, label)) => Some((slug.to_string(), Some(label.to_string()), stamp.to_string())),
        None => Some((head.to_string(), None, stamp.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::store;
    use camino::Utf8Path;

    #[test]
    fn create_activate_delete() {
        let (_tmp, s) = store();
        s.create_brain("Side Project", false).unwrap();
        let brains = s.list_brains().unwrap();
        assert_eq!(brains.len(), 2);
        assert!(brains.iter().any(|b| b.slug == "side-project" && !b.active));

        s.set_active_brain("side-project").unwrap();
        assert_eq!(s.active_brain_slug().unwrap(), "side-project");

        // The now-active brain refuses deletion; the old one does not.
        assert!(s.delete_brain("side-project").is_err());
        s.delete_brain("default").unwrap();
        assert_eq!(s.list_brains().unwrap().len(), 1);
    }

    #[test]
    fn duplicate_brain_rejected() {
        let (_tmp, s) = store();
        assert!(s.create_brain("default", false).is_err());
    }

    #[test]
    fn backup_roundtrip_plain_and_gz() {
        let (_tmp, s) = store();
        let plain = s.backup_brain(None, Some("Nightly Run"), false).unwrap();
        assert!(plain.path.ends_with(".brain"));
        assert!(plain.path.contains("default--nightly-run-"));

        let gz = s.backup_brain(None, None, true).unwrap();
        assert!(gz.path.ends_with(".brain.gz"));

        let backups = s.list_backups(Some("default")).unwrap();
        assert_eq!(backups.len(), 2);

        // Restore the gz backup into a fresh slug and activate it.
        let file = backups
            .iter()
            .find(|b| b.compressed)
            .map(|b| b.file.clone())
            .unwrap();
        let slug = s
            .restore_brain(&file, Some("restored"), true, false)
            .unwrap();
        assert_eq!(slug, "restored");
        assert_eq!(s.active_brain_slug().unwrap(), "restored");
        s.read_brain("restored", |b| {
            assert_eq!(b.meta.slug, "restored");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn restore_refuses_silent_overwrite() {
        let (_tmp, s) = store();
        let backup = s.backup_brain(None, None, false).unwrap();
        let file = Utf8Path::new(&backup.path)
            .file_name()
            .unwrap()
            .to_string();
        assert!(s.restore_brain(&file, None, false, false).is_err());
        s.restore_brain(&file, None, false, true).unwrap();
    }

    #[test]
    fn prune_keeps_newest() {
        let (_tmp, s) = store();
        for _ in 0..3 {
            s.backup_brain(None, None, false).unwrap();
            // Distinct timestamps are not guaranteed within a second, so
            // uniqueness comes from the file content being identical but
            // names colliding; tolerate fewer than 3 files.
            std::thread::sleep(std::time::Duration::from_millis(1100));
        }
        let total = s.list_backups(None).unwrap().len();
        let outcome = s.prune_backups(None, 1, None, true).unwrap();
        assert!(outcome.dry_run);
        assert_eq!(outcome.removed.len(), total - 1);
        // Dry run removed nothing.
        assert_eq!(s.list_backups(None).unwrap().len(), total);

        let outcome = s.prune_backups(None, 1, None, false).unwrap();
        assert_eq!(outcome.removed.len(), total - 1);
        assert_eq!(s.list_backups(None).unwrap().len(), 1);
    }

    #[test]
    fn backup_name_parsing() {
        assert_eq!(
            parse_backup_name("default-20260801_120000.brain"),
            Some(("default".into(), None, "20260801_120000".into()))
        );
        assert_eq!(
            parse_backup_name("my-notes--label-20260801_120000.brain.gz"),
            Some((
                "my-notes".into(),
                Some("label".into()),
                "20260801_120000".into()
            ))
        );
        assert_eq!(parse_backup_name("junk.txt"), None);
        assert_eq!(parse_backup_name("nostamp.brain"), None);
    }

    #[test]
    fn reports_on_fresh_store() {
        let (_tmp, s) = store();
        let report = s.brain_report(None).unwrap();
        assert_eq!(report["slug"], json!("default"));
        assert_eq!(report["commits"], json!(0));

        let integrity = s.integrity_report_for(None).unwrap();
        assert_eq!(integrity["ok"], json!(true));

        let all = s.integrity_report().unwrap();
        assert!(all["brains"].as_array().unwrap().len() == 1);
        assert!(all["last_write"].is_object());
    }
}
