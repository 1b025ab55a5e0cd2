//! Incremental payload merge.
//!
//! The rule, applied recursively: an incoming `null` removes the key;
//! an incoming keyed map merges into a source keyed map; anything else
//! (scalar or indexed list) replaces wholesale. A keyed map that becomes
//! empty through removals is dropped from its parent; a map that was
//! already empty and stays empty is preserved.

use serde_json::{Map, Value};

/// Merge `incoming` into `source` and return the resulting payload.
/// A top-level result that would vanish entirely becomes `{}`.
#[must_use]
pub fn merge_payload(source: &Value, incoming: &Value) -> Value {
    merge_values(Some(source), incoming).unwrap_or_else(|| Value::Object(Map::new()))
}

/// Merge one value; `None` means "remove this key from the parent".
fn merge_values(source: Option<&Value>, incoming: &Value) -> Option<Value> {
    match incoming {
        Value::Null => None,
        Value::Object(fields) => match source.and_then(Value::as_object) {
            Some(existing) => {
                let was_empty = existing.is_empty();
                let mut out = existing.clone();
                for (key, value) in fields {
                    let current = out.get(key).cloned();
                    match merge_values(current.as_ref(), value) {
                        Some(merged) => {
                            out.insert(key.clone(), merged);
                        }
                        None => {
                            out.remove(key);
                        }
                    }
                }
                if out.is_empty() && !was_empty {
                    None
                } else {
                    Some(Value::Object(out))
                }
            }
            None => {
                // No map to merge into: replace wholesale, still honoring
                // nested null-removals inside the incoming tree.
                let mut out = Map::new();
                for (key, value) in fields {
                    if let Some(merged) = merge_values(None, value) {
                        out.insert(key.clone(), merged);
                    }
                }
                if out.is_empty() {
                    None
                } else {
                    Some(Value::Object(out))
                }
            }
        },
        other => Some(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_replace() {
        let merged = merge_payload(&json!({"a": 1, "b": "x"}), &json!({"b": "y"}));
        assert_eq!(merged, json!({"a": 1, "b": "y"}));
    }

    #[test]
    fn null_removes_key() {
        let merged = merge_payload(
            &json!({"name": "Aria", "role": "Pilot"}),
            &json!({"role": null, "stats": {"agility": 12}}),
        );
        assert_eq!(merged, json!({"name": "Aria", "stats": {"agility": 12}}));
    }

    #[test]
    fn maps_merge_recursively() {
        let merged = merge_payload(
            &json!({"stats": {"agility": 12, "luck": 7}}),
            &json!({"stats": {"luck": 9}}),
        );
        assert_eq!(merged, json!({"stats": {"agility": 12, "luck": 9}}));
    }

    #[test]
    fn lists_replace_wholesale() {
        let merged = merge_payload(
            &json!({"tags": ["a", "b"]}),
            &json!({"tags": ["c"]}),
        );
        assert_eq!(merged, json!({"tags": ["c"]}));
    }

    #[test]
    fn map_emptied_by_removals_is_dropped() {
        let merged = merge_payload(
            &json!({"stats": {"agility": 12}}),
            &json!({"stats": {"agility": null}}),
        );
        assert_eq!(merged, json!({}));
    }

    #[test]
    fn empty_incoming_map_preserves_existing_map() {
        let merged = merge_payload(
            &json!({"stats": {"agility": 12}}),
            &json!({"stats": {}}),
        );
        assert_eq!(merged, json!({"stats": {"agility": 12}}));
    }

    #[test]
    fn empty_map_replacing_scalar_is_dropped() {
        let merged = merge_payload(&json!({"p": 3}), &json!({"p": {}}));
        assert_eq!(merged, json!({}));
    }

    #[test]
    fn already_empty_map_stays() {
        let merged = merge_payload(&json!({"box": {}}), &json!({"box": {}}));
        assert_eq!(merged, json!({"box": {}}));
    }

    #[test]
    fn deep_null_removal_inside_replacement() {
        let merged = merge_payload(
            &json!({}),
            &json!({"config": {"on": true, "off": null}}),
        );
        assert_eq!(merged, json!({"config": {"on": true}}));
    }
}
