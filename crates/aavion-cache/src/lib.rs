//! Filesystem JSON cache.
//!
//! Entries live as one canonical-JSON file per key under the user cache
//! directory, named by the SHA-256 fingerprint of the key. Each file
//! carries its own tags, so tag invalidation is an O(entries) scan.
//! Reading an expired entry is a miss and lazily deletes the file.
//!
//! When the cache is disabled, reads miss and ordinary writes are no-ops;
//! forced writes (used for security counters) always land.

use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use aavion_utils::error::AavionError;
use aavion_utils::{canonical, paths};

/// Default entry lifetime in seconds.
pub const DEFAULT_TTL_SECS: u64 = 300;

/// One persisted cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub tags: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Options for [`CacheStore::put`].
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Override the store-level TTL for this entry.
    pub ttl_secs: Option<u64>,
    /// Tags attached to the entry for bulk invalidation.
    pub tags: Vec<String>,
    /// Write even when the cache is disabled.
    pub force: bool,
}

/// Aggregate statistics over the cache directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub entries: usize,
    pub bytes: u64,
    pub tags: BTreeMap<String, usize>,
    pub expired_removed: usize,
}

/// Shared, thread-safe handle to the on-disk cache.
pub struct CacheStore {
    dir: Utf8PathBuf,
    enabled: AtomicBool,
    default_ttl_secs: AtomicU64,
}

impl CacheStore {
    /// Open (and create if needed) the cache at `dir`.
    pub fn new(dir: Utf8PathBuf) -> Result<Self, AavionError> {
        paths::ensure_dir_all(&dir)?;
        Ok(Self {
            dir,
            enabled: AtomicBool::new(true),
            default_ttl_secs: AtomicU64::new(DEFAULT_TTL_SECS),
        })
    }

    /// Enable or disable the cache as a whole.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether reads and ordinary writes are active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Set the default TTL; zero is rejected.
    pub fn set_ttl(&self, secs: u64) -> Result<(), AavionError> {
        if secs == 0 {
            return Err(AavionError::InvalidParameter {
                name: "cache.ttl".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        self.default_ttl_secs.store(secs, Ordering::SeqCst);
        Ok(())
    }

    /// The current default TTL in seconds.
    #[must_use]
    pub fn ttl(&self) -> u64 {
        self.default_ttl_secs.load(Ordering::SeqCst)
    }

    fn entry_path(&self, key: &str) -> Utf8PathBuf {
        self.dir
            .join(format!("{}.json", canonical::hash_bytes(key.as_bytes())))
    }

    /// Fetch a live entry's value. Expired or corrupt entries are removed
    /// and reported as a miss.
    ///
    /// `force` bypasses the enabled flag (security counters read through
    /// a disabled cache).
    pub fn get_forced(&self, key: &str, force: bool) -> Option<Value> {
        if !force && !self.is_enabled() {
            return None;
        }
        let path = self.entry_path(key);
        let entry = read_entry(&path)?;
        if entry.expires_at <= Utc::now() {
            let _ = fs::remove_file(path.as_std_path());
            debug!(key, "cache entry expired");
            return None;
        }
        Some(entry.value)
    }

    /// Fetch a live entry's value, honoring the enabled flag.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_forced(key, false)
    }

    /// Store a value under `key`.
    pub fn put(&self, key: &str, value: Value, options: &PutOptions) -> Result<(), AavionError> {
        if !options.force && !self.is_enabled() {
            return Ok(());
        }
        let ttl = options.ttl_secs.unwrap_or_else(|| self.ttl());
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            tags: options.tags.clone(),
            expires_at: Utc::now() + Duration::seconds(ttl as i64),
        };
        let bytes = canonical::encode_serialize(&entry)?;
        let path = self.entry_path(key);
        paths::ensure_dir_all(&self.dir)?;
        fs::write(path.as_std_path(), bytes).map_err(|e| AavionError::storage(path, e))?;
        Ok(())
    }

    /// Remove one entry. Returns true if a file existed.
    pub fn invalidate(&self, key: &str) -> bool {
        fs::remove_file(self.entry_path(key).as_std_path()).is_ok()
    }

    /// Remove every entry carrying `tag`. Returns the number removed.
    pub fn invalidate_by_tag(&self, tag: &str) -> Result<usize, AavionError> {
        let mut removed = 0;
        for path in self.entry_files()? {
            if let Some(entry) = read_entry(&path) {
                if entry.tags.iter().any(|t| t == tag) {
                    let _ = fs::remove_file(path.as_std_path());
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn cleanup_expired(&self) -> Result<usize, AavionError> {
        let now = Utc::now();
        let mut removed = 0;
        for path in self.entry_files()? {
            match read_entry(&path) {
                Some(entry) if entry.expires_at <= now => {
                    let _ = fs::remove_file(path.as_std_path());
                    removed += 1;
                }
                Some(_) => {}
                // Corrupt entries are dropped alongside expired ones.
                None => {
                    let _ = fs::remove_file(path.as_std_path());
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Walk the directory and aggregate statistics, removing expired
    /// entries along the way.
    pub fn statistics(&self) -> Result<CacheStatistics, AavionError> {
        let now = Utc::now();
        let mut stats = CacheStatistics {
            entries: 0,
            bytes: 0,
            tags: BTreeMap::new(),
            expired_removed: 0,
        };
        for path in self.entry_files()? {
            let Some(entry) = read_entry(&path) else {
                continue;
            };
            if entry.expires_at <= now {
                let _ = fs::remove_file(path.as_std_path());
                stats.expired_removed += 1;
                continue;
            }
            stats.entries += 1;
            if let Ok(meta) = fs::metadata(path.as_std_path()) {
                stats.bytes += meta.len();
            }
            for tag in entry.tags {
                *stats.tags.entry(tag).or_insert(0) += 1;
            }
        }
        Ok(stats)
    }

    /// Remove everything. Returns the number of files removed.
    pub fn clear(&self) -> Result<usize, AavionError> {
        let mut removed = 0;
        for path in self.entry_files()? {
            if fs::remove_file(path.as_std_path()).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn entry_files(&self) -> Result<Vec<Utf8PathBuf>, AavionError> {
        let mut files = Vec::new();
        let dir = self.dir.as_std_path();
        if !dir.exists() {
            return Ok(files);
        }
        let entries =
            fs::read_dir(dir).map_err(|e| AavionError::storage(self.dir.clone(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| AavionError::storage(self.dir.clone(), e))?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                if let Ok(utf8) = Utf8PathBuf::try_from(path) {
                    files.push(utf8);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

fn read_entry(path: &Utf8Path) -> Option<CacheEntry> {
    let bytes = fs::read(path.as_std_path()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, CacheStore) {
        let tmp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(tmp.path().join("cache")).unwrap();
        let store = CacheStore::new(dir).unwrap();
        (tmp, store)
    }

    #[test]
    fn put_get_roundtrip() {
        let (_tmp, store) = store();
        store
            .put("k1", json!({"n": 1}), &PutOptions::default())
            .unwrap();
        assert_eq!(store.get("k1"), Some(json!({"n": 1})));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn expired_entry_is_miss_and_deleted() {
        let (_tmp, store) = store();
        store
            .put(
                "soon",
                json!(1),
                &PutOptions {
                    ttl_secs: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        // Rewrite the file with an already-past expiry.
        let path = store.entry_path("soon");
        let mut entry: CacheEntry =
            serde_json::from_slice(&fs::read(path.as_std_path()).unwrap()).unwrap();
        entry.expires_at = Utc::now() - Duration::seconds(5);
        fs::write(
            path.as_std_path(),
            serde_json::to_vec(&entry).unwrap(),
        )
        .unwrap();

        assert_eq!(store.get("soon"), None);
        assert!(!path.as_std_path().exists());
    }

    #[test]
    fn disabled_cache_misses_but_forced_writes_land() {
        let (_tmp, store) = store();
        store.set_enabled(false);

        store.put("plain", json!(1), &PutOptions::default()).unwrap();
        assert_eq!(store.get_forced("plain", true), None);

        store
            .put(
                "forced",
                json!(2),
                &PutOptions {
                    force: true,
                    ..Default::default()
                },
            )
            .unwrap();
        // Ordinary read still misses while disabled; forced read sees it.
        assert_eq!(store.get("forced"), None);
        assert_eq!(store.get_forced("forced", true), Some(json!(2)));

        store.set_enabled(true);
        assert_eq!(store.get("forced"), Some(json!(2)));
    }

    #[test]
    fn tag_invalidation_removes_only_tagged() {
        let (_tmp, store) = store();
        store
            .put(
                "a",
                json!(1),
                &PutOptions {
                    tags: vec!["security".into(), "client:1".into()],
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .put(
                "b",
                json!(2),
                &PutOptions {
                    tags: vec!["export".into()],
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(store.invalidate_by_tag("security").unwrap(), 1);
        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("b"), Some(json!(2)));
    }

    #[test]
    fn statistics_count_entries_and_tags() {
        let (_tmp, store) = store();
        for i in 0..3 {
            store
                .put(
                    &format!("k{i}"),
                    json!(i),
                    &PutOptions {
                        tags: vec!["bulk".into()],
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        let stats = store.statistics().unwrap();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.tags.get("bulk"), Some(&3));
        assert!(stats.bytes > 0);
    }

    #[test]
    fn zero_ttl_rejected() {
        let (_tmp, store) = store();
        assert!(store.set_ttl(0).is_err());
        store.set_ttl(120).unwrap();
        assert_eq!(store.ttl(), 120);
    }

    #[test]
    fn clear_removes_all() {
        let (_tmp, store) = store();
        store.put("x", json!(1), &PutOptions::default()).unwrap();
        store.put("y", json!(2), &PutOptions::default()).unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert_eq!(store.statistics().unwrap().entries, 0);
    }
}
