//! Preset document model and shape validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use aavion_filter::FilterDef;
use aavion_utils::error::AavionError;
use aavion_utils::sanitize_slug;

/// Output format of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Jsonl,
    Markdown,
    Text,
}

impl ExportFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Jsonl => "jsonl",
            Self::Markdown => "markdown",
            Self::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AavionError> {
        match s {
            "json" => Ok(Self::Json),
            "jsonl" => Ok(Self::Jsonl),
            "markdown" | "md" => Ok(Self::Markdown),
            "text" | "txt" => Ok(Self::Text),
            other => Err(AavionError::InvalidParameter {
                name: "format".to_string(),
                reason: format!("unknown format '{other}'"),
            }),
        }
    }

    /// File extension for saved exports.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Jsonl => "jsonl",
            Self::Markdown => "md",
            Self::Text => "txt",
        }
    }
}

/// `meta` block of a preset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetMeta {
    pub title: String,
    pub description: String,
    pub usage: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub immutable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
}

/// Where and how rendered output lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default = "default_true")]
    pub response: bool,
    #[serde(default)]
    pub save: bool,
    pub format: ExportFormat,
    #[serde(default)]
    pub nest_children: bool,
}

fn default_true() -> bool {
    true
}

/// Declared preset variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDef {
    #[serde(rename = "type")]
    pub kind: VariableKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    Text,
    Int,
    Number,
    Float,
    Bool,
    Array,
    Object,
    CommaList,
    Json,
}

/// Payload shaping applied before rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transform {
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub post: Vec<FilterDef>,
}

/// Reference and cache policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policies {
    #[serde(default)]
    pub references: ReferencePolicy,
    #[serde(default)]
    pub cache: CachePolicy,
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            references: ReferencePolicy::default(),
            cache: CachePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferencePolicy {
    #[serde(default = "default_true")]
    pub include: bool,
    #[serde(default = "default_depth")]
    pub depth: u64,
}

fn default_depth() -> u64 {
    3
}

impl Default for ReferencePolicy {
    fn default() -> Self {
        Self {
            include: true,
            depth: default_depth(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachePolicy {
    #[serde(default)]
    pub ttl: u64,
    #[serde(default)]
    pub invalidate_on: Vec<String>,
}

/// Behavior when a template path lookup misses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPayload {
    #[default]
    Empty,
    Skip,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresetOptions {
    #[serde(default)]
    pub missing_payload: MissingPayload,
}

/// `settings` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetSettings {
    pub destination: Destination,
    #[serde(default)]
    pub variables: BTreeMap<String, VariableDef>,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub policies: Policies,
    #[serde(default)]
    pub options: PresetOptions,
}

/// Which references to pull into the export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeReferences {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_depth")]
    pub depth: u64,
    #[serde(default)]
    pub modes: Vec<String>,
}

impl Default for IncludeReferences {
    fn default() -> Self {
        Self {
            enabled: true,
            depth: default_depth(),
            modes: Vec::new(),
        }
    }
}

/// `selection` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetSelection {
    #[serde(default = "default_projects")]
    pub projects: Vec<String>,
    #[serde(default)]
    pub entities: Vec<FilterDef>,
    #[serde(default)]
    pub payload_filters: Vec<FilterDef>,
    #[serde(default)]
    pub include_references: IncludeReferences,
}

fn default_projects() -> Vec<String> {
    vec!["${project}".to_string()]
}

impl Default for PresetSelection {
    fn default() -> Self {
        Self {
            projects: default_projects(),
            entities: Vec::new(),
            payload_filters: Vec::new(),
            include_references: IncludeReferences::default(),
        }
    }
}

/// `templates` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetTemplates {
    pub root: String,
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

/// A full preset document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preset {
    pub meta: PresetMeta,
    pub settings: PresetSettings,
    #[serde(default)]
    pub selection: PresetSelection,
    pub templates: PresetTemplates,
}

/// Validate a raw preset value and return the typed document with its
/// layout name normalized.
pub fn validate_preset(slug: &str, value: &Value) -> Result<Preset, AavionError> {
    let invalid = |reason: String| AavionError::InvalidPreset {
        slug: slug.to_string(),
        reason,
    };

    let mut preset: Preset =
        serde_json::from_value(value.clone()).map_err(|e| invalid(e.to_string()))?;

    if preset.templates.root.trim().is_empty() {
        return Err(invalid("templates.root must not be empty".to_string()));
    }
    if preset.templates.entity.trim().is_empty() {
        return Err(invalid("templates.entity must not be empty".to_string()));
    }
    if preset.selection.projects.is_empty() {
        return Err(invalid("selection.projects must not be empty".to_string()));
    }
    for tag in &preset.meta.tags {
        if sanitize_slug(tag) != *tag {
            return Err(invalid(format!("meta.tags entry '{tag}' is not a slug")));
        }
    }
    preset.meta.layout = Some(sanitize_slug(
        preset.meta.layout.as_deref().unwrap_or("default"),
    ));

    Ok(preset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "meta": {"title": "T", "description": "D", "usage": "U", "tags": ["context"]},
            "settings": {"destination": {"format": "json"}},
            "selection": {},
            "templates": {"root": "${entities}", "entity": "${entity.slug}"}
        })
    }

    #[test]
    fn minimal_preset_validates_with_defaults() {
        let preset = validate_preset("p", &minimal()).unwrap();
        assert!(preset.settings.destination.response);
        assert!(!preset.settings.destination.save);
        assert_eq!(preset.selection.projects, vec!["${project}"]);
        assert_eq!(preset.meta.layout.as_deref(), Some("default"));
        assert_eq!(preset.settings.options.missing_payload, MissingPayload::Empty);
        assert_eq!(preset.settings.policies.references.depth, 3);
    }

    #[test]
    fn empty_templates_rejected() {
        let mut value = minimal();
        value["templates"]["root"] = json!("  ");
        assert!(validate_preset("p", &value).is_err());
        let mut value = minimal();
        value["templates"]["entity"] = json!("");
        assert!(validate_preset("p", &value).is_err());
    }

    #[test]
    fn bad_format_rejected() {
        let mut value = minimal();
        value["settings"]["destination"]["format"] = json!("yaml");
        assert!(validate_preset("p", &value).is_err());
    }

    #[test]
    fn bad_tag_rejected() {
        let mut value = minimal();
        value["meta"]["tags"] = json!(["Not A Slug"]);
        assert!(validate_preset("p", &value).is_err());
    }

    #[test]
    fn empty_projects_rejected() {
        let mut value = minimal();
        value["selection"]["projects"] = json!([]);
        assert!(validate_preset("p", &value).is_err());
    }

    #[test]
    fn variables_parse() {
        let mut value = minimal();
        value["settings"]["variables"] = json!({
            "audience": {"type": "text", "required": true},
            "depth": {"type": "int", "default": 2}
        });
        let preset = validate_preset("p", &value).unwrap();
        assert_eq!(preset.settings.variables.len(), 2);
        assert_eq!(
            preset.settings.variables["audience"].kind,
            VariableKind::Text
        );
    }

    #[test]
    fn filterdef_shorthand_in_selection() {
        let mut value = minimal();
        value["selection"]["entities"] = json!(["hero", {"type": "status_equals", "config": {"value": "active"}}]);
        let preset = validate_preset("p", &value).unwrap();
        assert_eq!(preset.selection.entities.len(), 2);
    }

    #[test]
    fn format_parsing() {
        assert_eq!(ExportFormat::parse("md").unwrap(), ExportFormat::Markdown);
        assert_eq!(ExportFormat::parse("jsonl").unwrap(), ExportFormat::Jsonl);
        assert!(ExportFormat::parse("xml").is_err());
        assert_eq!(ExportFormat::Markdown.extension(), "md");
    }
}
