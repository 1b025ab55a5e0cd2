//! Bundled read-only presets, seeded at bootstrap.

use serde_json::{Value, json};

/// Slugs of every bundled preset.
pub const BUNDLED_SLUGS: &[&str] = &[
    "context-unified",
    "context-jsonl",
    "context-markdown-unified",
    "context-markdown-slim",
    "context-markdown-plain",
    "context-text-plain",
];

/// The bundled preset definitions, `(slug, document)` pairs. All carry
/// `read_only` and `immutable`.
#[must_use]
pub fn bundled_presets() -> Vec<(&'static str, Value)> {
    let entity_json = concat!(
        r#"{"project":"${entity.project}","slug":"${entity.slug}","#,
        r#""version":"${entity.version}","path":${entity.path},"#,
        r#""payload":${entity.payload}}"#
    );

    vec![
        (
            "context-unified",
            json!({
                "meta": {
                    "title": "Unified context",
                    "description": "Single JSON document with meta, stats, index, and all entity payloads",
                    "usage": "export <project> --preset=context-unified",
                    "tags": ["context", "json"],
                    "read_only": true,
                    "immutable": true
                },
                "settings": {
                    "destination": {"format": "json", "response": true, "save": false, "nest_children": false}
                },
                "selection": {},
                "templates": {
                    "root": r#"{"meta":${meta},"stats":${stats},"index":${index},"projects":${projects},"entities":[${entities}],"warnings":${warnings}}"#,
                    "entity": entity_json
                }
            }),
        ),
        (
            "context-jsonl",
            json!({
                "meta": {
                    "title": "JSONL context",
                    "description": "One JSON value per entity per line",
                    "usage": "export <project> --preset=context-jsonl",
                    "tags": ["context", "jsonl"],
                    "read_only": true,
                    "immutable": true
                },
                "settings": {
                    "destination": {"format": "jsonl", "response": true, "save": false}
                },
                "selection": {},
                "templates": {
                    "root": "${entities}",
                    "entity": entity_json
                }
            }),
        ),
        (
            "context-markdown-unified",
            json!({
                "meta": {
                    "title": "Unified markdown context",
                    "description": "Markdown document with per-project sections and fenced payloads",
                    "usage": "export <project> --preset=context-markdown-unified",
                    "tags": ["context", "markdown"],
                    "read_only": true,
                    "immutable": true
                },
                "settings": {
                    "destination": {"format": "markdown", "response": true, "save": false, "nest_children": true}
                },
                "selection": {},
                "templates": {
                    "root": "# ${meta.title}\n\nGenerated ${meta.generated_at} · ${stats.entities} entities in ${stats.projects} project(s)\n\n${entities}",
                    "project": "## ${project.title}\n\n",
                    "entity": "${entity.heading_prefix} ${entity.slug} (v${entity.version})\n\n```json\n${entity.payload_pretty}\n```\n"
                }
            }),
        ),
        (
            "context-markdown-slim",
            json!({
                "meta": {
                    "title": "Slim markdown context",
                    "description": "Markdown headings with compact single-line payloads",
                    "usage": "export <project> --preset=context-markdown-slim",
                    "tags": ["context", "markdown"],
                    "read_only": true,
                    "immutable": true
                },
                "settings": {
                    "destination": {"format": "markdown", "response": true, "save": false, "nest_children": true}
                },
                "selection": {},
                "templates": {
                    "root": "# ${meta.title}\n\n${entities}",
                    "entity": "${entity.heading_prefix} ${entity.slug}\n\n${entity.payload}\n"
                }
            }),
        ),
        (
            "context-markdown-plain",
            json!({
                "meta": {
                    "title": "Plain markdown context",
                    "description": "Flat bullet list of entities and payloads",
                    "usage": "export <project> --preset=context-markdown-plain",
                    "tags": ["context", "markdown"],
                    "read_only": true,
                    "immutable": true
                },
                "settings": {
                    "destination": {"format": "markdown", "response": true, "save": false}
                },
                "selection": {},
                "templates": {
                    "root": "${entities}",
                    "entity": "- **${entity.slug}** (v${entity.version}): ${entity.payload}\n"
                }
            }),
        ),
        (
            "context-text-plain",
            json!({
                "meta": {
                    "title": "Plain text context",
                    "description": "Indented plain-text dump, one entity per block",
                    "usage": "export <project> --preset=context-text-plain",
                    "tags": ["context", "text"],
                    "read_only": true,
                    "immutable": true
                },
                "settings": {
                    "destination": {"format": "text", "response": true, "save": false, "nest_children": true}
                },
                "selection": {},
                "templates": {
                    "root": "${entities}",
                    "entity": "${entity.indent}${entity.slug} [v${entity.version}]\n${entity.indent}${entity.payload}\n"
                }
            }),
        ),
    ]
}
