//! Placeholder expansion for filter configs, preset selections, and
//! export templates.

use serde_json::{Map, Value};

use crate::{lookup_path, value_to_text};

/// Context values available to `${…}` markers.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderBag {
    pub project: String,
    pub entity: String,
    pub uid: String,
    pub version: String,
    /// `${param.*}` — caller-supplied call parameters.
    pub params: Map<String, Value>,
    /// `${var.*}` — resolved preset variables.
    pub vars: Map<String, Value>,
    /// `${payload.*}` — the payload under evaluation.
    pub payload: Value,
}

impl PlaceholderBag {
    /// Expand every `${…}` marker in `input`. Unknown markers are left
    /// untouched so downstream errors point at the literal marker.
    #[must_use]
    pub fn expand(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return out;
            };
            let marker = &after[..end];
            match self.resolve(marker) {
                Some(value) => out.push_str(&value),
                None => {
                    out.push_str("${");
                    out.push_str(marker);
                    out.push('}');
                }
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        out
    }

    /// Expand markers inside a JSON value. A string that is exactly one
    /// `${param.*}`/`${var.*}` marker resolves to the referenced value
    /// with its original type; everything else flattens to strings.
    #[must_use]
    pub fn expand_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => {
                if let Some(marker) = exact_marker(s) {
                    if let Some(resolved) = self.resolve_raw(marker) {
                        return resolved;
                    }
                }
                Value::String(self.expand(s))
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.expand_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.expand_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn resolve(&self, marker: &str) -> Option<String> {
        self.resolve_raw(marker).map(|v| value_to_text(&v))
    }

    fn resolve_raw(&self, marker: &str) -> Option<Value> {
        match marker {
            "project" => Some(Value::String(self.project.clone())),
            "entity" => Some(Value::String(self.entity.clone())),
            "uid" => Some(Value::String(self.uid.clone())),
            "version" => Some(Value::String(self.version.clone())),
            _ => {
                if let Some(key) = marker.strip_prefix("param.") {
                    lookup_path(&Value::Object(self.params.clone()), key).cloned()
                } else if let Some(key) = marker.strip_prefix("var.") {
                    lookup_path(&Value::Object(self.vars.clone()), key).cloned()
                } else if let Some(key) = marker.strip_prefix("payload.") {
                    lookup_path(&self.payload, key).cloned()
                } else {
                    None
                }
            }
        }
    }
}

/// If `s` is exactly one `${…}` marker, return its inner name.
fn exact_marker(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains("${") || inner.contains('}') {
        None
    } else {
        Some(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag() -> PlaceholderBag {
        PlaceholderBag {
            project: "demo".into(),
            entity: "hero".into(),
            uid: "demo.hero".into(),
            version: "3".into(),
            params: json!({"depth": 2, "mode": "full"})
                .as_object()
                .unwrap()
                .clone(),
            vars: json!({"audience": "crew", "tags": ["a", "b"]})
                .as_object()
                .unwrap()
                .clone(),
            payload: json!({"name": "Aria", "stats": {"agility": 12}}),
        }
    }

    #[test]
    fn scalar_markers_expand() {
        let b = bag();
        assert_eq!(
            b.expand("${project}/${entity}@${version}"),
            "demo/hero@3"
        );
        assert_eq!(b.expand("name=${payload.name}"), "name=Aria");
        assert_eq!(b.expand("agility ${payload.stats.agility}"), "agility 12");
        assert_eq!(b.expand("for ${var.audience}"), "for crew");
        assert_eq!(b.expand("depth ${param.depth}"), "depth 2");
    }

    #[test]
    fn unknown_markers_stay_literal() {
        let b = bag();
        assert_eq!(b.expand("${nope} and ${param.gone}"), "${nope} and ${param.gone}");
    }

    #[test]
    fn arrays_flatten_with_commas() {
        let b = bag();
        assert_eq!(b.expand("tags: ${var.tags}"), "tags: a,b");
    }

    #[test]
    fn exact_marker_preserves_type() {
        let b = bag();
        assert_eq!(b.expand_value(&json!("${param.depth}")), json!(2));
        assert_eq!(b.expand_value(&json!("${var.tags}")), json!(["a", "b"]));
        // Mixed strings flatten.
        assert_eq!(b.expand_value(&json!("d=${param.depth}")), json!("d=2"));
    }

    #[test]
    fn expand_value_recurses() {
        let b = bag();
        let v = b.expand_value(&json!({"who": "${entity}", "list": ["${project}"]}));
        assert_eq!(v, json!({"who": "hero", "list": ["demo"]}));
    }
}
