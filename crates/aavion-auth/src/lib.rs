//! Auth and scope management.
//!
//! Tokens are random alphanumerics handed out exactly once; the system
//! brain stores only their SHA-256 hashes plus a four-character preview.
//! The bootstrap token is implicit on CLI/embedded paths and explicitly
//! forbidden over REST. REST stays disabled until at least one active
//! non-bootstrap key exists.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::info;

use aavion_store::{ApiState, BrainStore, KeyEntry, KeyMeta, KeyStatus};
use aavion_utils::error::AavionError;
use aavion_utils::{Scope, ScopeMode, canonical, time};

/// Minimum accepted token length.
pub const MIN_TOKEN_LENGTH: usize = 8;

/// Default token length when `api_key_length` is unset.
pub const DEFAULT_TOKEN_LENGTH: usize = 16;

/// Options for [`AuthManager::grant`].
#[derive(Debug, Clone)]
pub struct GrantOptions {
    pub scope: ScopeMode,
    pub projects: Vec<String>,
    pub label: Option<String>,
    pub created_by: Option<String>,
    pub expires_at: Option<String>,
    /// Override the configured token length (clamped to the minimum).
    pub length: Option<usize>,
}

impl Default for GrantOptions {
    fn default() -> Self {
        Self {
            scope: ScopeMode::ReadWrite,
            projects: vec!["*".to_string()],
            label: None,
            created_by: None,
            expires_at: None,
            length: None,
        }
    }
}

/// What a grant hands back; the token appears here and nowhere else.
#[derive(Debug, Clone)]
pub struct GrantOutcome {
    pub token: String,
    pub hash: String,
    pub entry: KeyEntry,
}

/// Token and API-state manager over the system brain.
pub struct AuthManager {
    store: Arc<BrainStore>,
}

impl AuthManager {
    #[must_use]
    pub fn new(store: Arc<BrainStore>) -> Self {
        Self { store }
    }

    /// SHA-256 of a plaintext token, lowercase hex.
    #[must_use]
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Normalize a revoke/match identifier: a 64-hex string is taken as
    /// the hash, anything else is hashed.
    #[must_use]
    pub fn normalize_identifier(identifier: &str) -> String {
        let trimmed = identifier.trim();
        if canonical::looks_like_hash(trimmed) {
            trimmed.to_string()
        } else {
            Self::hash_token(trimmed)
        }
    }

    /// Issue a new key. The plaintext token is returned exactly once.
    pub fn grant(&self, options: &GrantOptions) -> Result<GrantOutcome, AavionError> {
        let configured = self.store.config_u64("api_key_length", DEFAULT_TOKEN_LENGTH as u64);
        let length = options
            .length
            .unwrap_or(configured as usize)
            .max(MIN_TOKEN_LENGTH);
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect();
        let hash = Self::hash_token(&token);
        let preview = format!("{}…", &token[..4]);

        let entry = KeyEntry {
            hash: hash.clone(),
            status: KeyStatus::Active,
            created_at: time::now_iso(),
            created_by: options.created_by.clone(),
            token_preview: preview,
            last_used_at: None,
            label: options.label.clone(),
            expires_at: options.expires_at.clone(),
            meta: KeyMeta {
                scope: options.scope,
                projects: if options.projects.is_empty() {
                    vec!["*".to_string()]
                } else {
                    options.projects.clone()
                },
            },
        };

        self.store.with_system(|brain| {
            let auth = brain.auth.get_or_insert_with(Default::default);
            auth.keys.insert(hash.clone(), entry.clone());
            Ok(())
        })?;
        info!(label = ?options.label, scope = %options.scope, "auth key created");
        self.store.bus().emit(
            "auth.key.created",
            json!({"hash": hash, "scope": options.scope.as_str(), "label": options.label}),
        );
        Ok(GrantOutcome { token, hash, entry })
    }

    /// Key listing (previews and metadata only, never hash→token).
    pub fn list(&self, include_revoked: bool) -> Result<Vec<Value>, AavionError> {
        self.store.read_system(|brain| {
            let Some(auth) = &brain.auth else {
                return Ok(Vec::new());
            };
            Ok(auth
                .keys
                .values()
                .filter(|k| include_revoked || k.status == KeyStatus::Active)
                .map(|k| {
                    json!({
                        "hash": k.hash,
                        "status": k.status,
                        "token_preview": k.token_preview,
                        "label": k.label,
                        "created_at": k.created_at,
                        "last_used_at": k.last_used_at,
                        "expires_at": k.expires_at,
                        "scope": k.meta.scope.as_str(),
                        "projects": k.meta.projects,
                        "bootstrap": k.hash == auth.bootstrap_key,
                    })
                })
                .collect())
        })
    }

    /// Revoke a key by token or hash. Returns whether a key changed.
    /// Revoking the last active non-bootstrap key disables REST and
    /// re-enables the bootstrap token.
    pub fn revoke(&self, identifier: &str) -> Result<bool, AavionError> {
        let hash = Self::normalize_identifier(identifier);
        let (revoked, api_forced_off) = self.store.with_system(|brain| {
            let auth = brain.auth.get_or_insert_with(Default::default);
            let Some(entry) = auth.keys.get_mut(&hash) else {
                return Ok((false, false));
            };
            if entry.status == KeyStatus::Revoked {
                return Ok((false, false));
            }
            entry.status = KeyStatus::Revoked;

            let mut forced_off = false;
            if auth.active_non_bootstrap_keys().is_empty() {
                auth.bootstrap_active = true;
                let api = brain.api.get_or_insert_with(ApiState::default);
                if api.enabled {
                    api.enabled = false;
                    api.last_disabled_at = Some(time::now_iso());
                    api.last_reason = Some("last active key revoked".to_string());
                    forced_off = true;
                }
            }
            Ok((true, forced_off))
        })?;
        if revoked {
            self.store
                .bus()
                .emit("auth.key.revoked", json!({"hash": hash}));
            if api_forced_off {
                self.store
                    .bus()
                    .emit("api.state.changed", json!({"enabled": false}));
            }
        }
        Ok(revoked)
    }

    /// Revoke every active key, disable REST, re-enable bootstrap.
    pub fn reset(&self) -> Result<usize, AavionError> {
        let revoked_count = self.store.with_system(|brain| {
            let auth = brain.auth.get_or_insert_with(Default::default);
            let mut revoked = 0usize;
            for entry in auth.keys.values_mut() {
                if entry.status == KeyStatus::Active {
                    entry.status = KeyStatus::Revoked;
                    revoked += 1;
                }
            }
            auth.bootstrap_active = true;
            auth.last_rotation_at = Some(time::now_iso());
            let api = brain.api.get_or_insert_with(ApiState::default);
            if api.enabled {
                api.enabled = false;
                api.last_disabled_at = Some(time::now_iso());
                api.last_reason = Some("auth reset".to_string());
            }
            Ok(revoked)
        })?;
        self.store
            .bus()
            .emit("auth.reset", json!({"revoked_count": revoked_count}));
        Ok(revoked_count)
    }

    /// Flip the REST flag. Enabling without an active non-bootstrap key
    /// is a no-op; returns whether the state changed.
    pub fn set_api_enabled(
        &self,
        enabled: bool,
        actor: Option<&str>,
        reason: Option<&str>,
    ) -> Result<bool, AavionError> {
        let changed = self.store.with_system(|brain| {
            if enabled {
                let has_key = brain
                    .auth
                    .as_ref()
                    .is_some_and(|auth| !auth.active_non_bootstrap_keys().is_empty());
                if !has_key {
                    return Ok(false);
                }
            }
            let api = brain.api.get_or_insert_with(ApiState::default);
            if api.enabled == enabled {
                return Ok(false);
            }
            api.enabled = enabled;
            let now = time::now_iso();
            if enabled {
                api.last_enabled_at = Some(now);
            } else {
                api.last_disabled_at = Some(now);
            }
            api.last_actor = actor.map(ToString::to_string);
            api.last_reason = reason.map(ToString::to_string);
            Ok(true)
        })?;
        if changed {
            self.store
                .bus()
                .emit("api.state.changed", json!({"enabled": enabled, "actor": actor}));
        }
        Ok(changed)
    }

    /// Current REST flag.
    pub fn is_api_enabled(&self) -> Result<bool, AavionError> {
        self.store
            .read_system(|brain| Ok(brain.api.as_ref().is_some_and(|api| api.enabled)))
    }

    /// Register or rotate the bootstrap token (stored hashed).
    pub fn update_bootstrap_key(&self, token: &str, active: bool) -> Result<(), AavionError> {
        if token.len() < MIN_TOKEN_LENGTH {
            return Err(AavionError::InvalidParameter {
                name: "token".to_string(),
                reason: format!("must be at least {MIN_TOKEN_LENGTH} characters"),
            });
        }
        let hash = Self::hash_token(token);
        self.store.with_system(|brain| {
            let auth = brain.auth.get_or_insert_with(Default::default);
            auth.bootstrap_key = hash.clone();
            auth.bootstrap_active = active;
            Ok(())
        })?;
        self.store
            .bus()
            .emit("auth.bootstrap.updated", json!({"active": active}));
        Ok(())
    }

    /// Post-successful-request hook: bump usage timestamps and clear the
    /// bootstrap flag.
    pub fn touch_auth_key(&self, hash: &str) -> Result<(), AavionError> {
        let touched = self.store.with_system(|brain| {
            let now = time::now_iso();
            let auth = brain.auth.get_or_insert_with(Default::default);
            let mut touched = false;
            if let Some(entry) = auth.keys.get_mut(hash) {
                entry.last_used_at = Some(now.clone());
                touched = true;
            }
            auth.bootstrap_active = false;
            brain
                .api
                .get_or_insert_with(ApiState::default)
                .last_request_at = Some(now);
            Ok(touched)
        })?;
        if touched {
            self.store
                .bus()
                .emit("auth.key.updated", json!({"hash": hash}));
        }
        Ok(())
    }

    /// REST admission. Returns the request scope and the admitted key's
    /// hash (for the post-request touch).
    pub fn admit_rest(&self, token: Option<&str>) -> Result<(Scope, String), AavionError> {
        self.store.read_system(|brain| {
            let api_enabled = brain.api.as_ref().is_some_and(|api| api.enabled);
            if !api_enabled {
                return Err(AavionError::ApiDisabled);
            }
            let token = token.ok_or(AavionError::MissingToken)?;
            let hash = Self::hash_token(token);
            let auth = brain.auth.as_ref().ok_or(AavionError::InvalidToken)?;
            // The bootstrap token is rejected outright, whether or not it
            // was ever registered as a key.
            if hash == auth.bootstrap_key {
                return Err(AavionError::BootstrapNotAllowed);
            }
            let entry = auth
                .keys
                .get(&hash)
                .filter(|k| k.status == KeyStatus::Active)
                .ok_or(AavionError::InvalidToken)?;
            if let Some(expires_at) = &entry.expires_at {
                let expired = DateTime::parse_from_rfc3339(expires_at)
                    .map(|t| t.with_timezone(&Utc) <= Utc::now())
                    .unwrap_or(true);
                if expired {
                    return Err(AavionError::InvalidToken);
                }
            }
            Ok((
                Scope {
                    mode: entry.meta.scope,
                    projects: entry.meta.projects.clone(),
                },
                hash,
            ))
        })
    }
}
