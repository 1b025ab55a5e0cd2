//! Canonical JSON codec and content hasher.
//!
//! Every value AavionDB persists or hashes goes through this module. The
//! canonical byte form is RFC 8785 (JCS): keyed maps sorted recursively,
//! list order preserved, no whitespace, UTF-8. Content hashes are SHA-256
//! over the canonical bytes, rendered as lowercase hex.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::AavionError;

/// Encode a JSON value into its canonical byte sequence.
///
/// Fails with [`AavionError::Encoding`] when the value cannot be
/// represented canonically (non-finite numbers never reach this point
/// because `serde_json::Value` cannot hold them, but serializer failures
/// are still surfaced rather than swallowed).
pub fn encode(value: &Value) -> Result<Vec<u8>, AavionError> {
    serde_json_canonicalizer::to_vec(value).map_err(|e| AavionError::Encoding {
        reason: e.to_string(),
    })
}

/// Encode a JSON value into a canonical UTF-8 string.
pub fn encode_to_string(value: &Value) -> Result<String, AavionError> {
    let bytes = encode(value)?;
    String::from_utf8(bytes).map_err(|e| AavionError::Encoding {
        reason: format!("canonical output was not UTF-8: {e}"),
    })
}

/// Serialize any serde value and encode it canonically.
pub fn encode_serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, AavionError> {
    let json = serde_json::to_value(value).map_err(|e| AavionError::Encoding {
        reason: e.to_string(),
    })?;
    encode(&json)
}

/// Decode canonical (or any) JSON bytes back into a value.
pub fn decode(bytes: &[u8]) -> Result<Value, AavionError> {
    serde_json::from_slice(bytes).map_err(|e| AavionError::InvalidJson {
        reason: e.to_string(),
    })
}

/// SHA-256 over raw bytes, lowercase hex.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Content hash of a JSON value: SHA-256 over its canonical encoding.
///
/// Equal values hash identically regardless of in-memory key order.
pub fn hash_value(value: &Value) -> Result<String, AavionError> {
    Ok(hash_bytes(&encode(value)?))
}

/// True for a 64-character lowercase hex string (a rendered SHA-256).
#[must_use]
pub fn looks_like_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
