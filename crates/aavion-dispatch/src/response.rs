//! The unified response envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use aavion_utils::error::AavionError;

/// Envelope status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Returned for every handler invocation, success or error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub action: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Response {
    /// Successful envelope with data.
    #[must_use]
    pub fn ok(action: &str, message: impl Into<String>, data: Value) -> Self {
        Self {
            status: Status::Ok,
            action: action.to_string(),
            message: message.into(),
            data: Some(data),
            meta: None,
        }
    }

    /// Successful envelope without data.
    #[must_use]
    pub fn ok_message(action: &str, message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            action: action.to_string(),
            message: message.into(),
            data: None,
            meta: None,
        }
    }

    /// Plain error envelope (no exception recorded).
    #[must_use]
    pub fn error(action: &str, message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            action: action.to_string(),
            message: message.into(),
            data: None,
            meta: None,
        }
    }

    /// Convert a library error into an envelope. Validation failures are
    /// plain errors; everything else records `meta.exception`.
    #[must_use]
    pub fn from_error(action: &str, err: &AavionError) -> Self {
        let mut meta = serde_json::Map::new();
        match err {
            AavionError::SchemaValidation { path, .. } => {
                meta.insert("path".to_string(), json!(path));
            }
            AavionError::IntegrityFailure { reason, .. } => {
                meta.insert("reason".to_string(), json!(reason));
            }
            AavionError::RateLimited {
                retry_after_secs, ..
            } => {
                meta.insert("retry_after".to_string(), json!(retry_after_secs));
            }
            _ => {}
        }
        if !err.is_validation() {
            meta.insert(
                "exception".to_string(),
                json!({"message": err.to_string(), "type": err.kind()}),
            );
        }
        Self {
            status: Status::Error,
            action: action.to_string(),
            message: err.to_string(),
            data: None,
            meta: if meta.is_empty() {
                None
            } else {
                Some(Value::Object(meta))
            },
        }
    }

    /// Whether this envelope carries `meta.exception`.
    #[must_use]
    pub fn has_exception(&self) -> bool {
        self.meta
            .as_ref()
            .and_then(|m| m.get("exception"))
            .is_some()
    }

    /// Attach or merge a meta field.
    #[must_use]
    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        let meta = self
            .meta
            .get_or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(map) = meta.as_object_mut() {
            map.insert(key.to_string(), value);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_has_no_exception() {
        let resp = Response::from_error("entity show", &AavionError::not_found("entity", "hero"));
        assert_eq!(resp.status, Status::Error);
        assert!(!resp.has_exception());
    }

    #[test]
    fn integrity_error_records_exception_and_reason() {
        let err = AavionError::IntegrityFailure {
            path: "default.brain".into(),
            reason: "hash_mismatch".into(),
        };
        let resp = Response::from_error("entity save", &err);
        assert!(resp.has_exception());
        let meta = resp.meta.unwrap();
        assert_eq!(meta["reason"], json!("hash_mismatch"));
        assert_eq!(meta["exception"]["type"], json!("IntegrityFailure"));
    }

    #[test]
    fn envelope_serializes_lowercase_status() {
        let resp = Response::ok_message("status", "ready");
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["status"], json!("ok"));
        assert!(v.get("data").is_none());
    }
}
