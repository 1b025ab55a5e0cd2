//! Brain document model.
//!
//! A brain is one JSON document on disk. The system brain and user brains
//! share the leading shape `{meta, projects, commits, config}`; the system
//! brain additionally carries state, auth, api, export, scheduler,
//! security, and cache sections. All keyed maps are `BTreeMap`s; version
//! keys are decimal-string integers whose numeric order is recovered by
//! parsing at read sites (canonical encoding sorts keys byte-wise, so
//! in-memory order is never observable).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use aavion_utils::ScopeMode;
use aavion_utils::time;

/// Current brain schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Slug of the reserved project holding fieldset schemas.
pub const FIELDSETS_PROJECT: &str = "fieldsets";

/// `meta` header of a brain document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainMeta {
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub schema_version: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// `state` section (system brain only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemState {
    pub active_brain: String,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            active_brain: "default".to_string(),
        }
    }
}

/// One brain document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brain {
    pub meta: BrainMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SystemState>,
    #[serde(default)]
    pub projects: BTreeMap<String, Project>,
    #[serde(default)]
    pub commits: BTreeMap<String, CommitEntry>,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSettings>,
}

impl Brain {
    /// Fresh user brain shell.
    #[must_use]
    pub fn new_user(slug: &str) -> Self {
        let now = time::now_iso();
        Self {
            meta: BrainMeta {
                slug: slug.to_string(),
                uuid: None,
                schema_version: SCHEMA_VERSION,
                created_at: now.clone(),
                updated_at: now,
            },
            state: None,
            projects: BTreeMap::new(),
            commits: BTreeMap::new(),
            config: BTreeMap::new(),
            auth: None,
            api: None,
            export: None,
            scheduler: None,
            security: None,
            cache: None,
        }
    }

    /// Fresh system brain shell with every section present.
    #[must_use]
    pub fn new_system(uuid: String) -> Self {
        let now = time::now_iso();
        Self {
            meta: BrainMeta {
                slug: "system".to_string(),
                uuid: Some(uuid),
                schema_version: SCHEMA_VERSION,
                created_at: now.clone(),
                updated_at: now,
            },
            state: Some(SystemState::default()),
            projects: BTreeMap::new(),
            commits: BTreeMap::new(),
            config: BTreeMap::new(),
            auth: Some(AuthState::default()),
            api: Some(ApiState::default()),
            export: Some(ExportState::default()),
            scheduler: Some(SchedulerState::default()),
            security: Some(BTreeMap::new()),
            cache: Some(CacheSettings::default()),
        }
    }

    /// Touch `meta.updated_at`.
    pub fn touch(&mut self) {
        self.meta.updated_at = time::now_iso();
    }
}

/// Project status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Archived,
}

/// One project: a namespace owning entities and a hierarchy forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub slug: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<String>,
    #[serde(default)]
    pub entities: BTreeMap<String, Entity>,
    #[serde(default)]
    pub hierarchy: Hierarchy,
}

impl Project {
    /// Stub with sensible defaults; the title falls back to the slug.
    #[must_use]
    pub fn stub(slug: &str, title: Option<&str>, description: Option<&str>) -> Self {
        let now = time::now_iso();
        Self {
            slug: slug.to_string(),
            title: title.unwrap_or(slug).to_string(),
            description: description.map(ToString::to_string),
            status: ProjectStatus::Active,
            created_at: now.clone(),
            updated_at: now,
            archived_at: None,
            entities: BTreeMap::new(),
            hierarchy: Hierarchy::default(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = time::now_iso();
    }
}

/// Entity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Active,
    Inactive,
    Archived,
}

/// One versioned entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub slug: String,
    pub status: EntityStatus,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fieldset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fieldset_version: Option<String>,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionRecord>,
}

impl Entity {
    /// Stub with no versions yet.
    #[must_use]
    pub fn stub(slug: &str) -> Self {
        let now = time::now_iso();
        Self {
            slug: slug.to_string(),
            status: EntityStatus::Active,
            created_at: now.clone(),
            updated_at: now,
            archived_at: None,
            active_version: None,
            fieldset: None,
            fieldset_version: None,
            versions: BTreeMap::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = time::now_iso();
    }

    /// Version numbers present, ascending numerically.
    #[must_use]
    pub fn version_numbers(&self) -> Vec<u64> {
        let mut numbers: Vec<u64> = self
            .versions
            .keys()
            .filter_map(|k| k.parse().ok())
            .collect();
        numbers.sort_unstable();
        numbers
    }

    /// Next version number to allocate: `max(existing) + 1`, starting at 1.
    #[must_use]
    pub fn next_version(&self) -> u64 {
        self.version_numbers().last().map_or(1, |max| max + 1)
    }
}

/// Version record status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Active,
    Inactive,
}

/// One immutable payload snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: u64,
    pub hash: String,
    pub commit: String,
    pub committed_at: String,
    pub status: VersionStatus,
    pub payload: Value,
    pub meta: Value,
    pub merge: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fieldset_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fieldset_reference: Option<String>,
}

/// Brain-level secondary index pointing into a version record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitEntry {
    pub project: String,
    pub entity: String,
    pub version: u64,
    pub hash: String,
    pub timestamp: String,
    pub merge: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fieldset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fieldset_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fieldset_reference: Option<String>,
}

/// Parent/children forest over a project's entities. The two maps stay
/// mutually consistent: a child appears under its parent's children iff
/// `parents[child] == parent`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hierarchy {
    #[serde(default)]
    pub parents: BTreeMap<String, String>,
    #[serde(default)]
    pub children: BTreeMap<String, Vec<String>>,
}

/// Key status in the auth section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Revoked,
}

/// Scope payload carried inside a key's meta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMeta {
    pub scope: ScopeMode,
    pub projects: Vec<String>,
}

/// One registered API key. Tokens are stored only as SHA-256 hashes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEntry {
    pub hash: String,
    pub status: KeyStatus,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub token_preview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    pub meta: KeyMeta,
}

/// `auth` section of the system brain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthState {
    /// SHA-256 hash of the bootstrap token.
    pub bootstrap_key: String,
    pub bootstrap_active: bool,
    #[serde(default)]
    pub keys: BTreeMap<String, KeyEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rotation_at: Option<String>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            bootstrap_key: String::new(),
            bootstrap_active: true,
            keys: BTreeMap::new(),
            last_rotation_at: None,
        }
    }
}

impl AuthState {
    /// Active keys whose hash differs from the bootstrap key.
    #[must_use]
    pub fn active_non_bootstrap_keys(&self) -> Vec<&KeyEntry> {
        self.keys
            .values()
            .filter(|k| k.status == KeyStatus::Active && k.hash != self.bootstrap_key)
            .collect()
    }
}

/// `api` section of the system brain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiState {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_enabled_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_disabled_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_request_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reason: Option<String>,
}

/// `export` section: the preset registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportState {
    #[serde(default)]
    pub presets: BTreeMap<String, Value>,
}

/// One scheduler task definition (execution is an external collaborator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerTask {
    pub slug: String,
    pub command: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
}

/// One entry in the bounded scheduler run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerLogEntry {
    pub timestamp: String,
    pub duration_ms: u64,
    pub results: Vec<SchedulerResult>,
}

/// Outcome of one task inside a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerResult {
    pub slug: String,
    pub command: String,
    pub status: String,
    pub message: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

/// Default cap on the scheduler run log.
pub const SCHEDULER_LOG_CAP: usize = 100;

/// `scheduler` section of the system brain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerState {
    #[serde(default)]
    pub tasks: BTreeMap<String, SchedulerTask>,
    #[serde(default)]
    pub log: Vec<SchedulerLogEntry>,
}

impl SchedulerState {
    /// Append a run entry, dropping the oldest past the cap.
    pub fn push_log(&mut self, entry: SchedulerLogEntry) {
        self.log.push(entry);
        if self.log.len() > SCHEDULER_LOG_CAP {
            let excess = self.log.len() - SCHEDULER_LOG_CAP;
            self.log.drain(..excess);
        }
    }
}

/// `cache` section of the system brain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub active: bool,
    pub ttl: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            active: true,
            ttl: 300,
        }
    }
}
