//! Request admission throttling.
//!
//! Three independent buckets — per-client, global, and failed-attempt —
//! use sliding 60-second windows persisted through the cache store.
//! Counter writes are forced so they land even while the general cache
//! is disabled. A manual lockdown rejects every client for its duration.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use aavion_cache::{CacheStore, PutOptions};
use aavion_utils::error::AavionError;

/// Sliding window length in seconds.
pub const WINDOW_SECS: i64 = 60;

const TAG: &str = "security";

/// Tunables, mirroring the `security.*` config keys.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SecuritySettings {
    pub active: bool,
    pub rate_limit: u64,
    pub global_limit: u64,
    pub block_duration: u64,
    pub ddos_lockdown: u64,
    pub failed_limit: u64,
    pub failed_block: u64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            active: true,
            rate_limit: 60,
            global_limit: 600,
            block_duration: 60,
            ddos_lockdown: 300,
            failed_limit: 5,
            failed_block: 300,
        }
    }
}

/// Outcome of a preflight check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preflight {
    Allow,
    Block { retry_after_secs: u64, reason: String },
}

impl Preflight {
    /// Convert into the error the gateway maps onto HTTP 429/503.
    pub fn into_result(self) -> Result<(), AavionError> {
        match self {
            Self::Allow => Ok(()),
            Self::Block {
                retry_after_secs,
                reason,
            } => Err(AavionError::RateLimited {
                retry_after_secs,
                reason,
            }),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Counter {
    attempts: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blocked_until: Option<i64>,
}

/// Shared security state over the cache store.
pub struct SecurityManager {
    cache: Arc<CacheStore>,
    settings: RwLock<SecuritySettings>,
}

impl SecurityManager {
    #[must_use]
    pub fn new(cache: Arc<CacheStore>, settings: SecuritySettings) -> Self {
        Self {
            cache,
            settings: RwLock::new(settings),
        }
    }

    /// Replace the tunables (after a config change).
    pub fn update_settings(&self, settings: SecuritySettings) {
        *self.settings.write().expect("settings poisoned") = settings;
    }

    /// Current tunables.
    #[must_use]
    pub fn settings(&self) -> SecuritySettings {
        *self.settings.read().expect("settings poisoned")
    }

    /// Check whether a client may proceed. Order: lockdown, failed-block,
    /// global window, per-client window.
    pub fn preflight(&self, client_id: &str) -> Preflight {
        let settings = self.settings();
        if !settings.active {
            return Preflight::Allow;
        }
        let now = Utc::now().timestamp();

        if let Some(until) = self.read_counter("security:lockdown").blocked_until {
            if until > now {
                return Preflight::Block {
                    retry_after_secs: (until - now) as u64,
                    reason: "lockdown".to_string(),
                };
            }
        }

        let failed = self.read_counter(&failed_key(client_id));
        if let Some(until) = failed.blocked_until {
            if until > now {
                return Preflight::Block {
                    retry_after_secs: (until - now) as u64,
                    reason: "failed_attempts".to_string(),
                };
            }
        }

        let global = self.read_counter("security:global");
        if in_window(&global.attempts, now) >= settings.global_limit {
            return Preflight::Block {
                retry_after_secs: settings.block_duration,
                reason: "global_limit".to_string(),
            };
        }

        let client = self.read_counter(&client_key(client_id));
        if in_window(&client.attempts, now) >= settings.rate_limit {
            return Preflight::Block {
                retry_after_secs: settings.block_duration,
                reason: "rate_limit".to_string(),
            };
        }

        Preflight::Allow
    }

    /// Record one admitted request against both windows.
    pub fn register_attempt(&self, client_id: &str) -> Result<(), AavionError> {
        let now = Utc::now().timestamp();
        self.bump(&client_key(client_id), now)?;
        self.bump("security:global", now)
    }

    /// Successful auth clears the client's failure streak.
    pub fn register_success(&self, client_id: &str) -> Result<(), AavionError> {
        self.cache.invalidate(&failed_key(client_id));
        Ok(())
    }

    /// Failed auth; enough failures inside the window block the client.
    pub fn register_failure(&self, client_id: &str) -> Result<(), AavionError> {
        let settings = self.settings();
        let now = Utc::now().timestamp();
        let key = failed_key(client_id);
        let mut counter = self.read_counter(&key);
        counter.attempts.retain(|t| now - t < WINDOW_SECS);
        counter.attempts.push(now);
        if counter.attempts.len() as u64 >= settings.failed_limit {
            counter.blocked_until = Some(now + settings.failed_block as i64);
            warn!(client = client_id, "client blocked after repeated auth failures");
        }
        self.write_counter(&key, &counter)
    }

    /// Force a global lockdown for `seconds` (default `ddos_lockdown`).
    pub fn lockdown(&self, seconds: Option<u64>) -> Result<u64, AavionError> {
        let settings = self.settings();
        let duration = seconds.unwrap_or(settings.ddos_lockdown);
        let counter = Counter {
            attempts: Vec::new(),
            blocked_until: Some(Utc::now().timestamp() + duration as i64),
        };
        warn!(duration, "manual lockdown engaged");
        self.write_counter("security:lockdown", &counter)?;
        Ok(duration)
    }

    /// Drop every security counter.
    pub fn purge(&self) -> Result<usize, AavionError> {
        self.cache.invalidate_by_tag(TAG)
    }

    /// Live status summary.
    pub fn status(&self) -> serde_json::Value {
        let settings = self.settings();
        let now = Utc::now().timestamp();
        let lockdown = self
            .read_counter("security:lockdown")
            .blocked_until
            .filter(|until| *until > now)
            .map(|until| until - now);
        let global = self.read_counter("security:global");
        json!({
            "active": settings.active,
            "settings": settings,
            "lockdown_remaining_secs": lockdown,
            "global_requests_in_window": in_window(&global.attempts, now),
        })
    }

    fn bump(&self, key: &str, now: i64) -> Result<(), AavionError> {
        let mut counter = self.read_counter(key);
        counter.attempts.retain(|t| now - t < WINDOW_SECS);
        counter.attempts.push(now);
        self.write_counter(key, &counter)
    }

    fn read_counter(&self, key: &str) -> Counter {
        self.cache
            .get_forced(key, true)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    fn write_counter(&self, key: &str, counter: &Counter) -> Result<(), AavionError> {
        let value = serde_json::to_value(counter).map_err(|e| AavionError::Encoding {
            reason: e.to_string(),
        })?;
        self.cache.put(
            key,
            value,
            &PutOptions {
                // Counters outlive their windows; block expiries are
                // encoded inside the value, not the cache TTL.
                ttl_secs: Some(24 * 3600),
                tags: vec![TAG.to_string()],
                force: true,
            },
        )
    }
}

fn client_key(client_id: &str) -> String {
    format!("security:client:{client_id}")
}

fn failed_key(client_id: &str) -> String {
    format!("security:failed:{client_id}")
}

fn in_window(attempts: &[i64], now: i64) -> u64 {
    attempts.iter().filter(|t| now - **t < WINDOW_SECS).count() as u64
}
