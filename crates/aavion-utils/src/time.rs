//! Timestamp helpers.
//!
//! Persisted timestamps are ISO-8601 with timezone offset; backup
//! filenames embed a compact local stamp.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current time as an ISO-8601 string with offset, second precision.
#[must_use]
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Render a given instant the way [`now_iso`] does.
#[must_use]
pub fn to_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Compact stamp used in backup filenames: `YYYYmmdd_HHMMSS`.
#[must_use]
pub fn backup_stamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_timestamps_parse_back() {
        let s = now_iso();
        assert!(DateTime::parse_from_rfc3339(&s).is_ok());
    }

    #[test]
    fn backup_stamp_shape() {
        let s = backup_stamp();
        assert_eq!(s.len(), 15);
        assert_eq!(s.as_bytes()[8], b'_');
    }
}
