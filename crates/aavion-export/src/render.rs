//! Template rendering.
//!
//! `${…}` placeholders in preset templates look up into per-entity,
//! per-project, and document-level contexts. JSON-valued placeholders
//! (`${meta}`, `${entity.payload}`, …) insert raw JSON in the json/jsonl
//! formats and flattened text in markdown/text. Missing payload path
//! lookups follow the preset's `missing_payload` option: `empty` emits
//! an empty slot and records a warning, `skip` drops the entity.

use serde_json::{Value, json};

use aavion_filter::{PlaceholderBag, lookup_path, value_to_text};
use aavion_preset::{ExportFormat, MissingPayload, Preset};
use aavion_utils::error::AavionError;

/// One entity prepared for rendering.
#[derive(Debug, Clone)]
pub struct EntityCtx {
    pub project: String,
    pub project_title: String,
    pub slug: String,
    pub version: String,
    pub status: String,
    pub fieldset: Option<String>,
    pub path: Vec<String>,
    /// Hierarchy depth used for heading prefixes and indentation; zero
    /// unless nesting is on.
    pub depth: usize,
    pub payload: Value,
}

/// Document-level context shared by the root template.
#[derive(Debug, Clone)]
pub struct DocumentCtx {
    pub meta: Value,
    pub stats: Value,
    pub index: Value,
    pub projects: Value,
    pub guide: Value,
    pub policies: Value,
    pub warnings: Value,
}

/// Render result: content plus warnings plus the slugs of entities
/// dropped by the `skip` policy.
#[derive(Debug)]
pub struct Rendered {
    pub content: String,
    pub warnings: Vec<String>,
    pub skipped: Vec<String>,
}

/// Render the full document.
pub fn render_document(
    preset: &Preset,
    format: ExportFormat,
    doc: &DocumentCtx,
    entities: &[EntityCtx],
    bag: &PlaceholderBag,
) -> Result<Rendered, AavionError> {
    let mut warnings = Vec::new();
    let mut skipped = Vec::new();
    let mut pieces: Vec<String> = Vec::new();
    let mut last_project: Option<String> = None;

    for entity in entities {
        // Optional per-project header for the non-JSON formats.
        if !matches!(format, ExportFormat::Json | ExportFormat::Jsonl) {
            if let Some(template) = &preset.templates.project {
                if last_project.as_deref() != Some(entity.project.as_str()) {
                    pieces.push(render_project_header(template, entity, bag));
                    last_project = Some(entity.project.clone());
                }
            }
        }
        let (text, mut entity_warnings, missing_path) =
            render_entity(&preset.templates.entity, format, entity, bag);
        match (missing_path, preset.settings.options.missing_payload) {
            (Some(path), MissingPayload::Skip) => {
                warnings.push(format!(
                    "{}/{}: payload path '{path}' missing, entity skipped",
                    entity.project, entity.slug
                ));
                skipped.push(format!("{}/{}", entity.project, entity.slug));
            }
            _ => {
                warnings.append(&mut entity_warnings);
                pieces.push(text);
            }
        }
    }

    let joined = match format {
        ExportFormat::Json => pieces.join(","),
        ExportFormat::Jsonl => pieces.join("\n"),
        ExportFormat::Markdown | ExportFormat::Text => pieces.join(""),
    };

    let mut warnings_doc = doc.warnings.clone();
    if let Some(array) = warnings_doc.as_array_mut() {
        array.extend(warnings.iter().map(|w| json!(w)));
    }

    let content = substitute(&preset.templates.root, |marker| {
        root_marker(marker, format, doc, &warnings_doc, &joined, bag)
    });

    validate_output(format, &content)?;
    Ok(Rendered {
        content,
        warnings,
        skipped,
    })
}

fn render_project_header(template: &str, entity: &EntityCtx, bag: &PlaceholderBag) -> String {
    substitute(template, |marker| match marker {
        "project.slug" => Some(entity.project.clone()),
        "project.title" => Some(entity.project_title.clone()),
        _ => bag_marker(marker, bag),
    })
}

/// Render one entity with the `empty` behavior; the first missing
/// payload path is reported so the caller can apply the `skip` policy.
fn render_entity(
    template: &str,
    format: ExportFormat,
    entity: &EntityCtx,
    bag: &PlaceholderBag,
) -> (String, Vec<String>, Option<String>) {
    let json_like = matches!(format, ExportFormat::Json | ExportFormat::Jsonl);
    let mut warnings = Vec::new();
    let mut missing: Option<String> = None;

    let content = substitute(template, |marker| {
        if let Some(resolved) = entity_marker(marker, json_like, entity) {
            return Some(resolved);
        }
        if let Some(path) = marker.strip_prefix("entity.payload.") {
            return match lookup_path(&entity.payload, path) {
                Some(value) => Some(if json_like {
                    serde_json::to_string(value).unwrap_or_default()
                } else {
                    value_to_text(value)
                }),
                None => {
                    warnings.push(format!(
                        "{}/{}: payload path '{path}' missing",
                        entity.project, entity.slug
                    ));
                    if missing.is_none() {
                        missing = Some(path.to_string());
                    }
                    Some(if json_like { "null".to_string() } else { String::new() })
                }
            };
        }
        bag_marker(marker, bag)
    });

    (content, warnings, missing)
}

fn entity_marker(marker: &str, json_like: bool, entity: &EntityCtx) -> Option<String> {
    match marker {
        "entity.slug" => Some(entity.slug.clone()),
        "entity.project" => Some(entity.project.clone()),
        "entity.version" => Some(entity.version.clone()),
        "entity.status" => Some(entity.status.clone()),
        "entity.fieldset" => Some(entity.fieldset.clone().unwrap_or_default()),
        "entity.path" => Some(if json_like {
            serde_json::to_string(&entity.path).unwrap_or_default()
        } else {
            entity.path.join("/")
        }),
        "entity.payload" => Some(serde_json::to_string(&entity.payload).unwrap_or_default()),
        "entity.payload_pretty" => {
            Some(serde_json::to_string_pretty(&entity.payload).unwrap_or_default())
        }
        "entity.heading_prefix" => Some("#".repeat((entity.depth + 3).min(6))),
        "entity.indent" => Some("  ".repeat(entity.depth)),
        _ => None,
    }
}

fn root_marker(
    marker: &str,
    format: ExportFormat,
    doc: &DocumentCtx,
    warnings: &Value,
    entities_joined: &str,
    bag: &PlaceholderBag,
) -> Option<String> {
    let json_like = matches!(format, ExportFormat::Json | ExportFormat::Jsonl);
    let emit = |value: &Value| {
        Some(if json_like {
            serde_json::to_string(value).unwrap_or_default()
        } else {
            value_to_text(value)
        })
    };
    match marker {
        "entities" => Some(entities_joined.to_string()),
        "meta" => emit(&doc.meta),
        "stats" => emit(&doc.stats),
        "index" => emit(&doc.index),
        "projects" => emit(&doc.projects),
        "guide" => emit(&doc.guide),
        "policies" => emit(&doc.policies),
        "warnings" => emit(warnings),
        _ => {
            for (prefix, value) in [
                ("meta.", &doc.meta),
                ("stats.", &doc.stats),
                ("index.", &doc.index),
                ("policies.", &doc.policies),
            ] {
                if let Some(path) = marker.strip_prefix(prefix) {
                    return lookup_path(value, path).map(|v| value_to_text(v));
                }
            }
            bag_marker(marker, bag)
        }
    }
}

fn bag_marker(marker: &str, bag: &PlaceholderBag) -> Option<String> {
    if marker.starts_with("param.") || marker.starts_with("var.") {
        let expanded = bag.expand(&format!("${{{marker}}}"));
        if expanded.starts_with("${") {
            None
        } else {
            Some(expanded)
        }
    } else {
        None
    }
}

/// Replace `${…}` markers via `resolve`; unknown markers stay literal.
fn substitute(template: &str, mut resolve: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let marker = &after[..end];
        match resolve(marker) {
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

/// JSON/JSONL outputs must parse after substitution.
fn validate_output(format: ExportFormat, content: &str) -> Result<(), AavionError> {
    match format {
        ExportFormat::Json => {
            serde_json::from_str::<Value>(content).map(drop).map_err(|e| {
                AavionError::InvalidPreset {
                    slug: "(render)".to_string(),
                    reason: format!("rendered root is not valid JSON: {e}"),
                }
            })
        }
        ExportFormat::Jsonl => {
            for (number, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                serde_json::from_str::<Value>(line).map_err(|e| AavionError::InvalidPreset {
                    slug: "(render)".to_string(),
                    reason: format!("rendered line {} is not valid JSON: {e}", number + 1),
                })?;
            }
            Ok(())
        }
        ExportFormat::Markdown | ExportFormat::Text => Ok(()),
    }
}
