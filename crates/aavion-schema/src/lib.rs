//! Fieldset schema validation and payload normalization.
//!
//! Fieldsets are JSON-Schema fragments stored as entities of the reserved
//! `fieldsets` project. Before a payload is hashed and persisted it is
//! normalized against its bound schema: missing properties with a
//! `default` are injected (recursively), placeholder markers inside
//! defaults are expanded from the save context, and the result is
//! validated. Validation failures carry the offending instance path.
//!
//! Supported placeholder markers in string defaults: `${project}`,
//! `${entity}`, `${now}`.

use serde_json::{Map, Value};

use aavion_utils::error::AavionError;
use aavion_utils::time;

const KNOWN_TYPES: &[&str] = &[
    "object", "array", "string", "number", "integer", "boolean", "null",
];

/// Context values available to placeholder expansion.
#[derive(Debug, Clone, Default)]
pub struct SchemaContext {
    pub project: String,
    pub entity: String,
}

impl SchemaContext {
    fn expand(&self, input: &str) -> String {
        input
            .replace("${project}", &self.project)
            .replace("${entity}", &self.entity)
            .replace("${now}", &time::now_iso())
    }
}

/// Assert that `payload` is itself a well-formed JSON Schema fragment.
///
/// Used when saving into the reserved `fieldsets` project: the merged
/// payload must be a schema other entities can later bind to.
pub fn assert_valid_schema(payload: &Value) -> Result<(), AavionError> {
    let obj = payload.as_object().ok_or_else(|| schema_error(
        "(schema)",
        "fieldset definition must be a JSON object",
    ))?;

    if let Some(ty) = obj.get("type") {
        check_type_keyword(ty)?;
    }
    if let Some(props) = obj.get("properties") {
        let props = props.as_object().ok_or_else(|| {
            schema_error("/properties", "'properties' must be an object")
        })?;
        for (name, sub) in props {
            if !sub.is_object() && !sub.is_boolean() {
                return Err(schema_error(
                    &format!("/properties/{name}"),
                    "property schema must be an object",
                ));
            }
            if let Some(ty) = sub.get("type") {
                check_type_keyword(ty).map_err(|_| {
                    schema_error(
                        &format!("/properties/{name}/type"),
                        "unrecognized type constraint",
                    )
                })?;
            }
        }
    }
    if let Some(required) = obj.get("required") {
        let ok = required
            .as_array()
            .is_some_and(|a| a.iter().all(Value::is_string));
        if !ok {
            return Err(schema_error(
                "/required",
                "'required' must be an array of property names",
            ));
        }
    }

    // Let the schema compiler catch everything structural beyond the
    // fast checks above.
    jsonschema::validator_for(payload)
        .map(|_| ())
        .map_err(|e| schema_error("(schema)", &e.to_string()))
}

fn check_type_keyword(ty: &Value) -> Result<(), AavionError> {
    let valid = match ty {
        Value::String(s) => KNOWN_TYPES.contains(&s.as_str()),
        Value::Array(items) => items
            .iter()
            .all(|v| v.as_str().is_some_and(|s| KNOWN_TYPES.contains(&s))),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(schema_error("/type", "unrecognized type constraint"))
    }
}

/// Validate `payload` against `schema` and return the normalized payload
/// with defaults injected and placeholders expanded.
pub fn apply_schema(
    payload: &Value,
    schema: &Value,
    ctx: &SchemaContext,
) -> Result<Value, AavionError> {
    let mut normalized = payload.clone();
    inject_defaults(&mut normalized, schema, ctx);

    let validator = jsonschema::validator_for(schema)
        .map_err(|e| schema_error("(schema)", &e.to_string()))?;

    if let Some(err) = validator.iter_errors(&normalized).next() {
        let path = err.instance_path.to_string();
        let path = if path.is_empty() { "/".to_string() } else { path };
        return Err(AavionError::SchemaValidation {
            path,
            reason: err.to_string(),
        });
    }
    Ok(normalized)
}

/// Walk `properties` and fill missing keys that declare a `default`.
/// Nested object properties are visited when present in the payload.
fn inject_defaults(value: &mut Value, schema: &Value, ctx: &SchemaContext) {
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    for (name, prop_schema) in props {
        match obj.get_mut(name) {
            None => {
                if let Some(default) = prop_schema.get("default") {
                    obj.insert(name.clone(), expand_placeholders(default, ctx));
                }
            }
            Some(existing) => inject_defaults(existing, prop_schema, ctx),
        }
    }
}

fn expand_placeholders(value: &Value, ctx: &SchemaContext) -> Value {
    match value {
        Value::String(s) if s.contains("${") => Value::String(ctx.expand(s)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| expand_placeholders(v, ctx)).collect())
        }
        Value::Object(map) => {
            let out: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), expand_placeholders(v, ctx)))
                .collect();
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn schema_error(path: &str, reason: &str) -> AavionError {
    AavionError::SchemaValidation {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn character_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "role": {"type": "string", "default": "crew"},
                "origin": {"type": "string", "default": "${project}"},
                "stats": {
                    "type": "object",
                    "properties": {
                        "agility": {"type": "integer", "default": 10}
                    }
                }
            },
            "required": ["name"]
        })
    }

    #[test]
    fn assert_accepts_reasonable_schema() {
        assert!(assert_valid_schema(&character_schema()).is_ok());
    }

    #[test]
    fn assert_rejects_non_object() {
        assert!(assert_valid_schema(&json!("not a schema")).is_err());
        assert!(assert_valid_schema(&json!(["a"])).is_err());
    }

    #[test]
    fn assert_rejects_unknown_type() {
        let err = assert_valid_schema(&json!({"type": "quantum"})).unwrap_err();
        match err {
            AavionError::SchemaValidation { path, .. } => assert_eq!(path, "/type"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn assert_rejects_bad_required() {
        assert!(assert_valid_schema(&json!({"required": [1, 2]})).is_err());
    }

    #[test]
    fn apply_injects_defaults_and_placeholders() {
        let ctx = SchemaContext {
            project: "demo".into(),
            entity: "hero".into(),
        };
        let normalized =
            apply_schema(&json!({"name": "Aria"}), &character_schema(), &ctx).unwrap();
        assert_eq!(normalized["role"], json!("crew"));
        assert_eq!(normalized["origin"], json!("demo"));
        // Absent nested object is not fabricated from nested defaults.
        assert!(normalized.get("stats").is_none());
    }

    #[test]
    fn apply_fills_nested_defaults_when_parent_present() {
        let ctx = SchemaContext::default();
        let normalized = apply_schema(
            &json!({"name": "Aria", "stats": {}}),
            &character_schema(),
            &ctx,
        )
        .unwrap();
        assert_eq!(normalized["stats"]["agility"], json!(10));
    }

    #[test]
    fn apply_reports_offending_path() {
        let ctx = SchemaContext::default();
        let err = apply_schema(
            &json!({"name": 42}),
            &character_schema(),
            &ctx,
        )
        .unwrap_err();
        match err {
            AavionError::SchemaValidation { path, .. } => assert_eq!(path, "/name"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn apply_enforces_required() {
        let ctx = SchemaContext::default();
        assert!(apply_schema(&json!({}), &character_schema(), &ctx).is_err());
    }

    #[test]
    fn existing_values_are_never_overwritten() {
        let ctx = SchemaContext::default();
        let normalized = apply_schema(
            &json!({"name": "Aria", "role": "Pilot"}),
            &character_schema(),
            &ctx,
        )
        .unwrap();
        assert_eq!(normalized["role"], json!("Pilot"));
    }
}
