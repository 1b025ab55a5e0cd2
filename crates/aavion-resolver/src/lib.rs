//! Inline shortcode resolution.
//!
//! Payload strings may embed `[ref …]` and `[query …]` shortcodes. When a
//! payload is emitted (entity show, export) each shortcode is replaced
//! in-place with `[kind …]<resolved>[/kind]`, keeping the instruction so
//! re-export round-trips. On save the store strips the resolved tail back
//! to the instruction-only form, so canonical payloads and hashes never
//! depend on resolved content.
//!
//! Cycle protection: a per-invocation stack of `project.entity:path`
//! tuples; re-entering a tuple yields the literal `<cycle>`.

mod shortcode;
mod strip;

pub use shortcode::{QuerySpec, RefSpec, Selector, Shortcode, instruction_end, parse_shortcode};
pub use strip::{strip_resolved, strip_resolved_text};

use std::cell::RefCell;
use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::debug;

use aavion_filter::{PlaceholderBag, lookup_path, value_to_text};
use aavion_utils::error::AavionError;

/// Literal inserted when resolution re-enters an in-flight tuple.
pub const CYCLE_TOKEN: &str = "<cycle>";

/// Default recursion depth for nested shortcode expansion.
pub const DEFAULT_DEPTH: usize = 3;

/// One record handed back by a [`ResolverSource`].
#[derive(Debug, Clone)]
pub struct RecordRef {
    pub project: String,
    pub entity: String,
    pub version: String,
    pub status: String,
    pub payload: Value,
    /// Hierarchy path segments from the project root to the entity.
    pub path: Vec<String>,
}

/// Data access the resolver needs; implemented by the runtime over the
/// brain store so this crate stays storage-agnostic.
pub trait ResolverSource {
    /// Fetch one entity revision.
    fn fetch(
        &self,
        project: &str,
        entity: &str,
        selector: Option<&Selector>,
    ) -> Result<RecordRef, AavionError>;

    /// All candidate records of the given projects (active versions).
    fn records(&self, projects: &[String]) -> Result<Vec<RecordRef>, AavionError>;
}

/// Where resolution happens from: the emitting entity's coordinates.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    pub project: String,
    pub entity: String,
    /// Hierarchy path of the calling entity (for relative URLs).
    pub path: Vec<String>,
    /// Remaining recursion depth.
    pub depth: usize,
}

/// Shortcode expander over a [`ResolverSource`].
pub struct Resolver<'a> {
    source: &'a dyn ResolverSource,
    bag: &'a PlaceholderBag,
    stack: RefCell<BTreeSet<String>>,
    warnings: RefCell<Vec<String>>,
}

impl<'a> Resolver<'a> {
    #[must_use]
    pub fn new(source: &'a dyn ResolverSource, bag: &'a PlaceholderBag) -> Self {
        Self {
            source,
            bag,
            stack: RefCell::new(BTreeSet::new()),
            warnings: RefCell::new(Vec::new()),
        }
    }

    /// Warnings accumulated across [`Resolver::resolve_payload`] calls.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.borrow().clone()
    }

    /// Expand every shortcode in every string leaf of `payload`.
    pub fn resolve_payload(&self, payload: &Value, ctx: &ResolveContext) -> Value {
        match payload {
            Value::String(s) => Value::String(self.resolve_text(s, ctx)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve_payload(item, ctx))
                    .collect(),
            ),
            Value::Object(map) => {
                let out: Map<String, Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), self.resolve_payload(v, ctx)))
                    .collect();
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    /// Expand shortcodes inside one string.
    pub fn resolve_text(&self, text: &str, ctx: &ResolveContext) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        loop {
            let next_ref = rest.find("[ref ");
            let next_query = rest.find("[query ");
            let (start, _) = match (next_ref, next_query) {
                (None, None) => break,
                (Some(r), None) => (r, "ref"),
                (None, Some(q)) => (q, "query"),
                (Some(r), Some(q)) if r < q => (r, "ref"),
                (_, Some(q)) => (q, "query"),
            };
            let Some(end) = instruction_end(rest, start) else {
                break;
            };
            let instruction = &rest[start..=end];
            out.push_str(&rest[..start]);
            out.push_str(instruction);

            // Every instruction gets a closing tag, resolved or not, so
            // the save-side strip always sees balanced pairs.
            let kind_tag = if instruction.starts_with("[ref ") {
                "[/ref]"
            } else {
                "[/query]"
            };
            match parse_shortcode(instruction) {
                Ok(code) => {
                    let resolved = self.resolve_one(&code, ctx);
                    out.push_str(&resolved);
                }
                Err(err) => {
                    self.warn(format!("unresolvable shortcode {instruction}: {err}"));
                }
            }
            out.push_str(kind_tag);
            rest = &rest[end + 1..];
        }
        out.push_str(rest);
        out
    }

    fn resolve_one(&self, code: &Shortcode, ctx: &ResolveContext) -> String {
        if ctx.depth == 0 {
            self.warn("reference depth exhausted".to_string());
            return String::new();
        }
        match code {
            Shortcode::Ref(spec) => self.resolve_ref(spec, ctx),
            Shortcode::Query(spec) => self.resolve_query(spec, ctx),
        }
    }

    fn resolve_ref(&self, spec: &RefSpec, ctx: &ResolveContext) -> String {
        let project = spec
            .project
            .clone()
            .unwrap_or_else(|| ctx.project.clone());
        let tuple = format!("{project}.{}:{}", spec.entity, spec.field_path.join("."));
        if self.stack.borrow().contains(&tuple) {
            return CYCLE_TOKEN.to_string();
        }
        self.stack.borrow_mut().insert(tuple.clone());
        let result = self.resolve_ref_inner(spec, &project, ctx);
        self.stack.borrow_mut().remove(&tuple);
        result
    }

    fn resolve_ref_inner(&self, spec: &RefSpec, project: &str, ctx: &ResolveContext) -> String {
        let record = match self
            .source
            .fetch(project, &spec.entity, spec.selector.as_ref())
        {
            Ok(record) => record,
            Err(err) => {
                self.warn(format!(
                    "ref {project}.{} failed: {err}",
                    spec.entity
                ));
                return String::new();
            }
        };

        let mut value = record.payload.clone();
        if !spec.field_path.is_empty() {
            let path = spec.field_path.join(".");
            match lookup_path(&record.payload, &path) {
                Some(found) => value = found.clone(),
                None => {
                    self.warn(format!(
                        "ref {project}.{}: path '{path}' missing",
                        spec.entity
                    ));
                    return String::new();
                }
            }
        }

        // Nested shortcodes inside the target resolve in its own context.
        let nested = ResolveContext {
            project: record.project.clone(),
            entity: record.entity.clone(),
            path: record.path.clone(),
            depth: ctx.depth - 1,
        };
        value = self.resolve_payload(&value, &nested);

        if let Some(template) = &spec.template {
            let items = match &value {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            let rendered: Vec<String> = items
                .iter()
                .map(|item| self.render_template(template, item, &record, ctx))
                .collect();
            return rendered.join(&spec.separator);
        }

        render_value(&value, &spec.format, &spec.separator)
    }

    fn resolve_query(&self, spec: &QuerySpec, ctx: &ResolveContext) -> String {
        let projects = if spec.projects.is_empty() {
            vec![ctx.project.clone()]
        } else {
            spec.projects
                .iter()
                .map(|p| self.bag.expand(p))
                .collect()
        };
        let tuple = format!("query:{}:{}", projects.join(","), spec.raw);
        if self.stack.borrow().contains(&tuple) {
            return CYCLE_TOKEN.to_string();
        }
        self.stack.borrow_mut().insert(tuple.clone());
        let result = self.resolve_query_inner(spec, &projects, ctx);
        self.stack.borrow_mut().remove(&tuple);
        result
    }

    fn resolve_query_inner(
        &self,
        spec: &QuerySpec,
        projects: &[String],
        ctx: &ResolveContext,
    ) -> String {
        let mut records = match self.source.records(projects) {
            Ok(records) => records,
            Err(err) => {
                self.warn(format!("query failed: {err}"));
                return String::new();
            }
        };

        if let Some(where_expr) = &spec.where_expr {
            records.retain(|record| {
                where_expr
                    .matches(&record_value(record))
                    .unwrap_or(false)
            });
        }

        if let Some((field, descending)) = &spec.sort {
            records.sort_by(|a, b| {
                let av = lookup_path(&record_value(a), field).cloned().unwrap_or(Value::Null);
                let bv = lookup_path(&record_value(b), field).cloned().unwrap_or(Value::Null);
                let ordering = compare_values(&av, &bv);
                if *descending { ordering.reverse() } else { ordering }
            });
        }

        let offset = spec.offset.unwrap_or(0);
        let records: Vec<RecordRef> = records
            .into_iter()
            .skip(offset)
            .take(spec.limit.unwrap_or(usize::MAX))
            .collect();
        debug!(count = records.len(), "query resolved");

        let selected: Vec<Value> = records
            .iter()
            .map(|record| {
                let root = record_value(record);
                let value = lookup_path(&root, &spec.select)
                    .cloned()
                    .unwrap_or(Value::Null);
                // Selected content resolves in the record's own context so
                // the emitted text stays balanced.
                let nested = ResolveContext {
                    project: record.project.clone(),
                    entity: record.entity.clone(),
                    path: record.path.clone(),
                    depth: ctx.depth - 1,
                };
                self.resolve_payload(&value, &nested)
            })
            .collect();

        if let Some(template) = &spec.template {
            let rendered: Vec<String> = records
                .iter()
                .zip(&selected)
                .map(|(record, value)| self.render_template(template, value, record, ctx))
                .collect();
            return rendered.join(&spec.separator);
        }

        match spec.format.as_str() {
            "raw" => selected
                .iter()
                .map(value_to_text)
                .collect::<Vec<_>>()
                .join(&spec.separator),
            format => render_value(&Value::Array(selected), format, &spec.separator),
        }
    }

    /// Per-item template rendering with `{value}`, `{record.*}` markers.
    fn render_template(
        &self,
        template: &str,
        value: &Value,
        record: &RecordRef,
        ctx: &ResolveContext,
    ) -> String {
        let mut out = template.to_string();
        out = out.replace("{value}", &value_to_text(value));
        out = out.replace("{record.version}", &record.version);
        out = out.replace("{record.entity}", &record.entity);
        out = out.replace("{record.project}", &record.project);
        out = out.replace("{record.url}", &relative_url(&ctx.path, &record.path));
        out = out.replace("{record.url_relative}", &relative_url(&ctx.path, &record.path));
        out = out.replace("{record.url_absolute}", &absolute_url(&record.path));
        // {record.payload.field} markers, resolved lazily.
        while let Some(start) = out.find("{record.payload.") {
            let Some(end) = out[start..].find('}') else { break };
            let marker = &out[start..start + end + 1];
            let field = &marker["{record.payload.".len()..marker.len() - 1];
            let replacement = lookup_path(&record.payload, field)
                .map(value_to_text)
                .unwrap_or_default();
            out = out.replacen(marker, &replacement, 1);
        }
        out
    }

    fn warn(&self, message: String) {
        self.warnings.borrow_mut().push(message);
    }
}

/// Record as a JSON value for `where`/`select`/`sort` evaluation.
#[must_use]
pub fn record_value(record: &RecordRef) -> Value {
    serde_json::json!({
        "project": record.project,
        "entity": record.entity,
        "version": record.version,
        "status": record.status,
        "payload": record.payload,
    })
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => value_to_text(a).cmp(&value_to_text(b)),
    }
}

fn render_value(value: &Value, format: &str, separator: &str) -> String {
    match format {
        "plain" => match value {
            Value::Array(items) => items
                .iter()
                .map(value_to_text)
                .collect::<Vec<_>>()
                .join(separator),
            other => value_to_text(other),
        },
        "markdown" => match value {
            Value::Array(items) => items
                .iter()
                .map(|item| format!("- {}", value_to_text(item)))
                .collect::<Vec<_>>()
                .join("\n"),
            other => value_to_text(other),
        },
        // json and anything unrecognized: compact JSON, except bare
        // strings which embed without quoting.
        _ => match value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        },
    }
}

/// Relative filesystem-style path from the caller's position to a target.
/// The project slug is omitted; both paths are hierarchy segment lists.
#[must_use]
pub fn relative_url(from: &[String], to: &[String]) -> String {
    // The caller's directory is its path minus the entity itself.
    let from_dir = if from.is_empty() { from } else { &from[..from.len() - 1] };
    let common = from_dir
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let ups = from_dir.len() - common;
    let mut parts: Vec<String> = std::iter::repeat_n("..".to_string(), ups).collect();
    parts.extend(to[common..].iter().cloned());
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Project-root-anchored path to a target entity.
#[must_use]
pub fn absolute_url(to: &[String]) -> String {
    format!("/{}", to.join("/"))
}
