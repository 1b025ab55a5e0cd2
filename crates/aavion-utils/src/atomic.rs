//! Atomic file writer with post-write integrity verification.
//!
//! Writes go temp file → exclusive lock → flush → rename, then the target
//! is re-read and verified three ways: byte equality, SHA-256 equality
//! against the precomputed hash, and decode + canonical re-encode byte
//! stability. A failed verification is retried exactly once; the second
//! failure surfaces [`AavionError::IntegrityFailure`]. Readers can never
//! observe a partial write: only the pre-state or the post-state exists.

use std::fs;
use std::io::Write;
use std::sync::Mutex;

use camino::Utf8Path;
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::NamedTempFile;
use tracing::warn;

use aavion_events::EventBus;

use crate::canonical;
use crate::error::AavionError;
use crate::time;

/// Why a post-write verification failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Target could not be re-read after rename.
    ReadFailed,
    /// Re-read bytes hash to a different SHA-256.
    HashMismatch,
    /// Re-read bytes differ from the written bytes.
    ContentMismatch,
    /// Decode + canonical re-encode produced different bytes.
    CanonicalMismatch,
    /// Re-read bytes were not valid JSON.
    JsonDecodeError,
}

impl FailureReason {
    /// Stable snake_case name used in events and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadFailed => "read_failed",
            Self::HashMismatch => "hash_mismatch",
            Self::ContentMismatch => "content_mismatch",
            Self::CanonicalMismatch => "canonical_mismatch",
            Self::JsonDecodeError => "json_decode_error",
        }
    }
}

/// Record of the most recent successful write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRecord {
    pub path: String,
    pub hash: String,
    pub attempts: u32,
    pub timestamp: String,
}

/// Record of the most recent verification failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFailure {
    pub path: String,
    pub reason: FailureReason,
    pub timestamp: String,
}

#[derive(Default)]
struct WriterState {
    last_write: Option<WriteRecord>,
    last_failure: Option<WriteFailure>,
}

/// The process-wide verifying writer. All brain and cache persistence
/// funnels through one instance so `last_write`/`last_failure` describe
/// the store as a whole.
pub struct AtomicWriter {
    bus: EventBus,
    state: Mutex<WriterState>,
}

impl AtomicWriter {
    /// Create a writer that reports `brain.write.*` events on `bus`.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            state: Mutex::new(WriterState::default()),
        }
    }

    /// Atomically write canonical bytes to `path`, verify, and retry once.
    pub fn write(&self, path: &Utf8Path, bytes: &[u8]) -> Result<WriteRecord, AavionError> {
        let expected_hash = canonical::hash_bytes(bytes);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            self.write_once(path, bytes)?;

            match verify(path, bytes, &expected_hash) {
                Ok(()) => {
                    let record = WriteRecord {
                        path: path.to_string(),
                        hash: expected_hash,
                        attempts,
                        timestamp: time::now_iso(),
                    };
                    {
                        let mut state = self.state.lock().expect("writer state poisoned");
                        state.last_write = Some(record.clone());
                        state.last_failure = None;
                    }
                    self.bus.emit(
                        "brain.write.completed",
                        json!({
                            "path": record.path,
                            "hash": record.hash,
                            "attempts": record.attempts,
                        }),
                    );
                    return Ok(record);
                }
                Err(reason) => {
                    warn!(path = %path, reason = reason.as_str(), attempt = attempts, "write verification failed");
                    {
                        let mut state = self.state.lock().expect("writer state poisoned");
                        state.last_failure = Some(WriteFailure {
                            path: path.to_string(),
                            reason,
                            timestamp: time::now_iso(),
                        });
                    }
                    self.bus.emit(
                        "brain.write.integrity_failed",
                        json!({
                            "path": path.as_str(),
                            "reason": reason.as_str(),
                            "attempt": attempts,
                        }),
                    );
                    if attempts >= 2 {
                        return Err(AavionError::IntegrityFailure {
                            path: path.to_string(),
                            reason: reason.as_str().to_string(),
                        });
                    }
                    self.bus
                        .emit("brain.write.retry", json!({"path": path.as_str()}));
                }
            }
        }
    }

    /// Single temp + lock + rename pass, without verification.
    fn write_once(&self, path: &Utf8Path, bytes: &[u8]) -> Result<(), AavionError> {
        let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
        fs::create_dir_all(parent.as_std_path())
            .map_err(|e| AavionError::storage(parent.to_string(), e))?;

        let temp = NamedTempFile::new_in(parent.as_std_path())
            .map_err(|e| AavionError::storage(parent.to_string(), e))?;

        // Exclusive advisory lock for the duration of the byte write.
        let handle = temp
            .as_file()
            .try_clone()
            .map_err(|e| AavionError::storage(path.to_string(), e))?;
        let mut lock = RwLock::new(handle);
        {
            let mut guard = lock
                .write()
                .map_err(|e| AavionError::storage(path.to_string(), e))?;
            guard
                .write_all(bytes)
                .map_err(|e| AavionError::storage(path.to_string(), e))?;
            guard
                .flush()
                .map_err(|e| AavionError::storage(path.to_string(), e))?;
            guard
                .sync_all()
                .map_err(|e| AavionError::storage(path.to_string(), e))?;
        }

        temp.persist(path.as_std_path())
            .map_err(|e| AavionError::storage(path.to_string(), e.error))?;
        Ok(())
    }

    /// The most recent successful write, if any.
    #[must_use]
    pub fn last_write(&self) -> Option<WriteRecord> {
        self.state
            .lock()
            .expect("writer state poisoned")
            .last_write
            .clone()
    }

    /// The most recent verification failure, if any.
    #[must_use]
    pub fn last_failure(&self) -> Option<WriteFailure> {
        self.state
            .lock()
            .expect("writer state poisoned")
            .last_failure
            .clone()
    }
}

/// Re-read and verify a freshly renamed target file.
fn verify(path: &Utf8Path, written: &[u8], expected_hash: &str) -> Result<(), FailureReason> {
    let read_back = fs::read(path.as_std_path()).map_err(|_| FailureReason::ReadFailed)?;
    if read_back != written {
        return Err(FailureReason::ContentMismatch);
    }
    if canonical::hash_bytes(&read_back) != expected_hash {
        return Err(FailureReason::HashMismatch);
    }
    let value = canonical::decode(&read_back).map_err(|_| FailureReason::JsonDecodeError)?;
    let re_encoded = canonical::encode(&value).map_err(|_| FailureReason::CanonicalMismatch)?;
    if re_encoded != read_back {
        return Err(FailureReason::CanonicalMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn canonical_bytes(v: &serde_json::Value) -> Vec<u8> {
        canonical::encode(v).unwrap()
    }

    #[test]
    fn write_then_read_back_is_identical() {
        let tmp = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(tmp.path().join("store.brain")).unwrap();
        let writer = AtomicWriter::new(EventBus::new());
        let bytes = canonical_bytes(&json!({"meta": {"slug": "default"}, "projects": {}}));

        let record = writer.write(&path, &bytes).unwrap();
        assert_eq!(record.attempts, 1);
        assert_eq!(record.hash, canonical::hash_bytes(&bytes));
        assert_eq!(fs::read(path.as_std_path()).unwrap(), bytes);
        assert!(writer.last_failure().is_none());
        assert_eq!(writer.last_write().unwrap().path, path.as_str());
    }

    #[test]
    fn write_overwrites_previous_state() {
        let tmp = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(tmp.path().join("store.brain")).unwrap();
        let writer = AtomicWriter::new(EventBus::new());

        writer
            .write(&path, &canonical_bytes(&json!({"v": 1})))
            .unwrap();
        writer
            .write(&path, &canonical_bytes(&json!({"v": 2})))
            .unwrap();
        assert_eq!(
            fs::read(path.as_std_path()).unwrap(),
            canonical_bytes(&json!({"v": 2}))
        );
    }

    #[test]
    fn non_canonical_bytes_fail_integrity_after_retry() {
        let tmp = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(tmp.path().join("store.brain")).unwrap();
        let bus = EventBus::new();
        let retries = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&retries);
        bus.subscribe("brain.write.retry", move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let f = Arc::clone(&failures);
        bus.subscribe("brain.write.integrity_failed", move |_| {
            f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let writer = AtomicWriter::new(bus);

        // Whitespace makes decode+re-encode differ from the written bytes,
        // so verification fails deterministically on both attempts.
        let err = writer.write(&path, b"{ \"a\": 1 }").unwrap_err();
        match err {
            AavionError::IntegrityFailure { reason, .. } => {
                assert_eq!(reason, "canonical_mismatch");
            }
            other => panic!("expected IntegrityFailure, got {other:?}"),
        }
        assert_eq!(retries.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 2);
        assert_eq!(
            writer.last_failure().unwrap().reason,
            FailureReason::CanonicalMismatch
        );
    }

    #[test]
    fn completed_event_fires_on_success() {
        let tmp = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(tmp.path().join("ok.brain")).unwrap();
        let bus = EventBus::new();
        let completed = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&completed);
        bus.subscribe("brain.write.completed", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let writer = AtomicWriter::new(bus);
        writer
            .write(&path, &canonical_bytes(&json!({"ok": true})))
            .unwrap();
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }
}
