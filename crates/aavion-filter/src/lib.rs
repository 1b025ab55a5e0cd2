//! Predicate DSL for entity selection and payload queries.
//!
//! Two related languages live here. `FilterDef` lists (used by presets
//! and the export engine) are ANDed structured predicates over entity
//! metadata, payload trees, and hierarchy paths. `where` expressions
//! (used by `[query …]` shortcodes) are ANDed conditions separated by
//! `;` with comparison, containment, membership, and regex operators.
//!
//! Placeholders `${project}`, `${entity}`, `${uid}`, `${version}`,
//! `${param.*}`, `${var.*}`, and `${payload.*}` expand before
//! evaluation; arrays flatten into comma-joined strings.

mod placeholder;
mod wherexpr;

pub use placeholder::PlaceholderBag;
pub use wherexpr::{Condition, WhereExpr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use aavion_utils::error::AavionError;

/// One predicate: either the full `{type, config}` form or a bare string
/// shorthand for `slug_equals`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterDef {
    Shorthand(String),
    Full {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        config: Map<String, Value>,
    },
}

impl FilterDef {
    /// Normalize the shorthand form into (kind, config).
    #[must_use]
    pub fn parts(&self) -> (String, Map<String, Value>) {
        match self {
            Self::Shorthand(slug) => {
                let mut config = Map::new();
                config.insert("value".to_string(), Value::String(slug.clone()));
                ("slug_equals".to_string(), config)
            }
            Self::Full { kind, config } => (kind.clone(), config.clone()),
        }
    }
}

/// The snapshot of an entity a filter list is evaluated against.
#[derive(Debug, Clone)]
pub struct FilterTarget<'a> {
    pub project: &'a str,
    pub entity: &'a str,
    pub status: &'a str,
    pub fieldset: Option<&'a str>,
    pub version: &'a str,
    /// Hierarchy path segments from root to (and including) the entity.
    pub path: &'a [String],
    pub payload: &'a Value,
}

/// Evaluate an ANDed filter list. Unknown filter types fail loudly.
pub fn evaluate_all(
    filters: &[FilterDef],
    target: &FilterTarget<'_>,
    bag: &PlaceholderBag,
) -> Result<bool, AavionError> {
    for filter in filters {
        if !evaluate(filter, target, bag)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluate one filter against a target.
pub fn evaluate(
    filter: &FilterDef,
    target: &FilterTarget<'_>,
    bag: &PlaceholderBag,
) -> Result<bool, AavionError> {
    let (kind, config) = filter.parts();
    let expand = |key: &str| -> Option<Value> {
        config.get(key).map(|v| bag.expand_value(v))
    };

    match kind.as_str() {
        "slug_equals" => {
            let value = required_string(&kind, "value", expand("value"))?;
            Ok(target.entity == value)
        }
        "slug_in" => {
            let values = required_list(&kind, "values", expand("values"))?;
            Ok(values.iter().any(|v| v == target.entity))
        }
        "status_equals" => {
            let value = required_string(&kind, "value", expand("value"))?;
            Ok(target.status == value)
        }
        "has_fieldset" => {
            let expected = expand("value")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            Ok(target.fieldset.is_some() == expected)
        }
        "payload_contains" => {
            let field = required_string(&kind, "field", expand("field"))?;
            let value = expand("value").unwrap_or(Value::Null);
            Ok(lookup_path(target.payload, &field)
                .is_some_and(|found| value_contains(found, &value)))
        }
        "payload_equals" => {
            let field = required_string(&kind, "field", expand("field"))?;
            let value = expand("value").unwrap_or(Value::Null);
            Ok(lookup_path(target.payload, &field)
                .is_some_and(|found| values_equal(found, &value)))
        }
        "payload_missing" => {
            let field = required_string(&kind, "field", expand("field"))?;
            Ok(lookup_path(target.payload, &field).is_none())
        }
        "payload_matches" => {
            let field = required_string(&kind, "field", expand("field"))?;
            let pattern = required_string(&kind, "pattern", expand("pattern"))?;
            let re = regex::Regex::new(&pattern).map_err(|e| AavionError::InvalidParameter {
                name: format!("filter.{kind}.pattern"),
                reason: e.to_string(),
            })?;
            Ok(lookup_path(target.payload, &field)
                .is_some_and(|found| re.is_match(&value_to_text(found))))
        }
        "path_equals" => {
            let value = required_string(&kind, "value", expand("value"))?;
            Ok(join_path(target.path) == normalize_path(&value))
        }
        "path_under" => {
            let value = required_string(&kind, "value", expand("value"))?;
            let prefix = normalize_path(&value);
            let path = join_path(target.path);
            Ok(path == prefix || path.starts_with(&format!("{prefix}/")))
        }
        other => Err(AavionError::InvalidParameter {
            name: "filter.type".to_string(),
            reason: format!("unknown filter type '{other}'"),
        }),
    }
}

fn required_string(kind: &str, key: &str, value: Option<Value>) -> Result<String, AavionError> {
    match value {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Ok(value_to_text(&other)),
        None => Err(AavionError::InvalidParameter {
            name: format!("filter.{kind}.{key}"),
            reason: "required".to_string(),
        }),
    }
}

fn required_list(kind: &str, key: &str, value: Option<Value>) -> Result<Vec<String>, AavionError> {
    match value {
        Some(Value::Array(items)) => Ok(items.iter().map(value_to_text).collect()),
        Some(Value::String(s)) => Ok(s.split(',').map(|p| p.trim().to_string()).collect()),
        _ => Err(AavionError::InvalidParameter {
            name: format!("filter.{kind}.{key}"),
            reason: "required list".to_string(),
        }),
    }
}

fn join_path(segments: &[String]) -> String {
    segments.join("/")
}

fn normalize_path(path: &str) -> String {
    path.trim_matches('/').replace('.', "/")
}

/// Resolve a dot-path (`stats.agility`, `crew.0.name`) inside a value.
#[must_use]
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// `contains` semantics by type: substring for strings, membership for
/// arrays, key presence for objects.
#[must_use]
pub fn value_contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => s.contains(&value_to_text(needle)),
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::Object(map) => needle
            .as_str()
            .is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}

/// Equality with scalar/string coercion: `"3"` equals `3`.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::String(_), _) | (_, Value::String(_)) => value_to_text(a) == value_to_text(b),
        _ => false,
    }
}

/// Flatten a value into the string form used by placeholders and regex
/// matching; arrays join with `,`.
#[must_use]
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "name": "Aria",
            "role": "Pilot",
            "tags": ["ace", "veteran"],
            "stats": {"agility": 12, "luck": 7}
        })
    }

    fn target<'a>(payload: &'a Value, path: &'a [String]) -> FilterTarget<'a> {
        FilterTarget {
            project: "demo",
            entity: "hero",
            status: "active",
            fieldset: Some("character"),
            version: "3",
            path,
            payload,
        }
    }

    #[test]
    fn shorthand_is_slug_equals() {
        let p = payload();
        let path = vec!["hero".to_string()];
        let t = target(&p, &path);
        let bag = PlaceholderBag::default();
        assert!(evaluate(&FilterDef::Shorthand("hero".into()), &t, &bag).unwrap());
        assert!(!evaluate(&FilterDef::Shorthand("villain".into()), &t, &bag).unwrap());
    }

    #[test]
    fn payload_filters() {
        let p = payload();
        let path = vec!["hero".to_string()];
        let t = target(&p, &path);
        let bag = PlaceholderBag::default();
        let def = |kind: &str, config: Value| FilterDef::Full {
            kind: kind.to_string(),
            config: config.as_object().unwrap().clone(),
        };

        assert!(evaluate(&def("payload_equals", json!({"field": "role", "value": "Pilot"})), &t, &bag).unwrap());
        assert!(evaluate(&def("payload_contains", json!({"field": "tags", "value": "ace"})), &t, &bag).unwrap());
        assert!(evaluate(&def("payload_contains", json!({"field": "name", "value": "Ari"})), &t, &bag).unwrap());
        assert!(evaluate(&def("payload_missing", json!({"field": "callsign"})), &t, &bag).unwrap());
        assert!(!evaluate(&def("payload_missing", json!({"field": "stats.agility"})), &t, &bag).unwrap());
        assert!(evaluate(&def("payload_matches", json!({"field": "name", "pattern": "^A.+a$"})), &t, &bag).unwrap());
    }

    #[test]
    fn path_filters() {
        let p = payload();
        let path = vec!["fleet".to_string(), "wing".to_string(), "hero".to_string()];
        let t = target(&p, &path);
        let bag = PlaceholderBag::default();
        let def = |kind: &str, config: Value| FilterDef::Full {
            kind: kind.to_string(),
            config: config.as_object().unwrap().clone(),
        };
        assert!(evaluate(&def("path_equals", json!({"value": "fleet/wing/hero"})), &t, &bag).unwrap());
        assert!(evaluate(&def("path_under", json!({"value": "fleet"})), &t, &bag).unwrap());
        assert!(evaluate(&def("path_under", json!({"value": "fleet.wing"})), &t, &bag).unwrap());
        assert!(!evaluate(&def("path_under", json!({"value": "armada"})), &t, &bag).unwrap());
    }

    #[test]
    fn placeholders_expand_in_config() {
        let p = payload();
        let path = vec!["hero".to_string()];
        let t = target(&p, &path);
        let mut bag = PlaceholderBag::default();
        bag.entity = "hero".to_string();
        let def = FilterDef::Full {
            kind: "slug_equals".to_string(),
            config: json!({"value": "${entity}"}).as_object().unwrap().clone(),
        };
        assert!(evaluate(&def, &t, &bag).unwrap());
    }

    #[test]
    fn filter_list_is_anded() {
        let p = payload();
        let path = vec!["hero".to_string()];
        let t = target(&p, &path);
        let bag = PlaceholderBag::default();
        let filters = vec![
            FilterDef::Shorthand("hero".into()),
            FilterDef::Full {
                kind: "status_equals".to_string(),
                config: json!({"value": "archived"}).as_object().unwrap().clone(),
            },
        ];
        assert!(!evaluate_all(&filters, &t, &bag).unwrap());
    }

    #[test]
    fn unknown_type_errors() {
        let p = payload();
        let path = vec![];
        let t = target(&p, &path);
        let def = FilterDef::Full {
            kind: "telepathy".to_string(),
            config: Map::new(),
        };
        assert!(evaluate(&def, &t, &PlaceholderBag::default()).is_err());
    }

    #[test]
    fn lookup_traverses_arrays() {
        let v = json!({"crew": [{"name": "Aria"}, {"name": "Bram"}]});
        assert_eq!(lookup_path(&v, "crew.1.name"), Some(&json!("Bram")));
        assert_eq!(lookup_path(&v, "crew.7.name"), None);
    }
}
