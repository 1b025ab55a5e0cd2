//! The export engine.
//!
//! An export resolves a preset (default `context-unified`), merges
//! destination settings (system config < preset < call overrides),
//! validates preset variables, selects projects and entities, applies
//! payload transforms and inline reference resolution, materializes the
//! document contexts, and renders through the preset's templates into
//! json, jsonl, markdown, or text.

mod render;
pub use render::{DocumentCtx, EntityCtx, Rendered, render_document};

use std::fs;
use std::sync::Arc;

use camino::Utf8PathBuf;
use serde_json::{Map, Value, json};
use tracing::info;

use aavion_filter::{FilterDef, FilterTarget, PlaceholderBag};
use aavion_preset::{ExportFormat, Preset, PresetRegistry, VariableKind};
use aavion_resolver::{RecordRef, ResolveContext, Resolver, ResolverSource, Selector};
use aavion_store::entities::EntityRecord;
use aavion_store::{BrainStore, refs};
use aavion_utils::error::AavionError;
use aavion_utils::{Scope, paths, time};

/// Inputs to one export run.
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    /// Project spec: one slug, a CSV list, `*`, or empty (preset mode).
    pub project_spec: String,
    pub preset: Option<String>,
    /// `entity[@N|#hash]` selectors; mutually exclusive with presets,
    /// wildcards, and multi-project specs.
    pub selectors: Vec<String>,
    pub format: Option<String>,
    pub path: Option<String>,
    pub save: Option<bool>,
    pub response: Option<bool>,
    pub nest_children: Option<bool>,
    pub params: Map<String, Value>,
}

/// Adapter giving the resolver read access through the brain store.
pub struct StoreResolverSource {
    store: Arc<BrainStore>,
    scope: Scope,
}

impl StoreResolverSource {
    #[must_use]
    pub fn new(store: Arc<BrainStore>, scope: Scope) -> Self {
        Self { store, scope }
    }
}

impl ResolverSource for StoreResolverSource {
    fn fetch(
        &self,
        project: &str,
        entity: &str,
        selector: Option<&Selector>,
    ) -> Result<RecordRef, AavionError> {
        let reference = selector.map(|s| match s {
            Selector::Version(n) => format!("@{n}"),
            Selector::Commit(h) => format!("#{h}"),
        });
        let record = self
            .store
            .entity_record(&self.scope, project, entity, reference.as_deref())?;
        Ok(to_record_ref(record))
    }

    fn records(&self, projects: &[String]) -> Result<Vec<RecordRef>, AavionError> {
        Ok(self
            .store
            .active_records(&self.scope, projects)?
            .into_iter()
            .map(to_record_ref)
            .collect())
    }
}

fn to_record_ref(record: EntityRecord) -> RecordRef {
    RecordRef {
        project: record.project,
        entity: record.entity,
        version: record.version,
        status: record.status,
        payload: record.payload,
        path: record.path,
    }
}

/// The export pipeline over a brain store and preset registry.
pub struct ExportEngine {
    store: Arc<BrainStore>,
    registry: PresetRegistry,
}

impl ExportEngine {
    #[must_use]
    pub fn new(store: Arc<BrainStore>) -> Self {
        let registry = PresetRegistry::new(Arc::clone(&store));
        Self { store, registry }
    }

    /// Run an export. Returns the response `data` object:
    /// `{content?, projects, entities, index, stats, meta, warnings,
    /// saved_path?}`.
    pub fn export(&self, scope: &Scope, request: &ExportRequest) -> Result<Value, AavionError> {
        let mut warnings: Vec<String> = Vec::new();

        // Argument combination rules.
        let spec = request.project_spec.trim();
        let multi = spec.contains(',');
        if !request.selectors.is_empty() {
            if spec == "*" {
                return Err(invalid("selectors", "wildcard exports take no selectors"));
            }
            if multi {
                return Err(invalid(
                    "selectors",
                    "selectors require exactly one project",
                ));
            }
            if request.preset.is_some() {
                return Err(invalid(
                    "selectors",
                    "selectors and presets are mutually exclusive",
                ));
            }
        }

        let preset_slug = request.preset.as_deref().unwrap_or("context-unified");
        let preset = self.registry.load(preset_slug)?;

        // Destination precedence: system config < preset < call.
        let format = match &request.format {
            Some(format) => ExportFormat::parse(format)?,
            None => preset.settings.destination.format,
        };
        let save = request.save.unwrap_or_else(|| {
            if preset.settings.destination.save {
                true
            } else {
                self.store.config_bool("export.save", false)
            }
        });
        let response = request.response.unwrap_or_else(|| {
            preset.settings.destination.response
                && self.store.config_bool("export.response", true)
        });
        let nest_children = request
            .nest_children
            .unwrap_or(preset.settings.destination.nest_children);

        // Preset variables.
        let vars = resolve_variables(&preset, &request.params)?;
        let mut bag = PlaceholderBag {
            params: request.params.clone(),
            vars,
            ..PlaceholderBag::default()
        };
        if let Some(project) = request.params.get("project").and_then(Value::as_str) {
            bag.project = project.to_string();
        } else if !spec.is_empty() && spec != "*" && !multi {
            bag.project = spec.to_string();
        }

        // Project set.
        let projects = self.resolve_projects(scope, spec, &preset, &bag)?;
        if projects.is_empty() {
            return Err(invalid("project", "no projects selected"));
        }

        // Slice materialization.
        let mut records = self.collect_records(scope, &projects, request, &mut warnings)?;
        records = self.filter_records(records, &preset, &bag, &mut warnings)?;

        // Transforms.
        for record in &mut records {
            if !preset.settings.transform.whitelist.is_empty() {
                record.payload =
                    keep_paths(&record.payload, &preset.settings.transform.whitelist);
            }
            for path in &preset.settings.transform.blacklist {
                remove_path(&mut record.payload, path);
            }
        }
        if !preset.settings.transform.post.is_empty() {
            records = self.apply_filter_defs(
                records,
                &preset.settings.transform.post,
                &bag,
                &mut warnings,
            )?;
        }

        // Inline reference resolution.
        let include_refs = preset.settings.policies.references.include
            && preset.selection.include_references.enabled;
        if include_refs {
            let source = StoreResolverSource::new(Arc::clone(&self.store), scope.clone());
            let resolver = Resolver::new(&source, &bag);
            let depth = preset.selection.include_references.depth as usize;
            for record in &mut records {
                let ctx = ResolveContext {
                    project: record.project.clone(),
                    entity: record.entity.clone(),
                    path: record.path.clone(),
                    depth,
                };
                record.payload = resolver.resolve_payload(&record.payload, &ctx);
            }
            warnings.extend(resolver.warnings());
        }

        // Ordering and depth.
        let entities = materialize(&self.store, scope, records, nest_children)?;

        // Document contexts.
        let active_brain = self.store.active_brain_slug()?;
        let index: Vec<String> = entities
            .iter()
            .map(|e| format!("{}/{}@{}", e.project, e.slug, e.version))
            .collect();
        let project_rows = self.project_rows(scope, &projects)?;
        let doc = DocumentCtx {
            meta: json!({
                "title": format!("{} export", projects.join(", ")),
                "generated_at": time::now_iso(),
                "preset": preset_slug,
                "format": format.as_str(),
                "brain": active_brain,
            }),
            stats: json!({
                "projects": projects.len(),
                "entities": entities.len(),
                "versions": entities.len(),
            }),
            index: json!(index),
            projects: json!(project_rows),
            guide: json!(preset.meta.usage),
            policies: serde_json::to_value(&preset.settings.policies)
                .unwrap_or(Value::Null),
            warnings: json!(warnings),
        };

        let rendered = render_document(&preset, format, &doc, &entities, &bag)?;
        warnings.extend(rendered.warnings.clone());

        let saved_path = if save {
            Some(self.save_content(&rendered.content, &projects, preset_slug, format, request)?)
        } else {
            None
        };
        info!(
            preset = preset_slug,
            entities = entities.len(),
            format = format.as_str(),
            saved = saved_path.is_some(),
            "export completed"
        );

        let mut data = json!({
            "projects": project_rows,
            "entities": doc.index,
            "stats": doc.stats,
            "meta": doc.meta,
            "warnings": warnings,
        });
        if response {
            data["content"] = json!(rendered.content);
        }
        if let Some(path) = saved_path {
            data["saved_path"] = json!(path);
        }
        Ok(data)
    }

    fn resolve_projects(
        &self,
        scope: &Scope,
        spec: &str,
        preset: &Preset,
        bag: &PlaceholderBag,
    ) -> Result<Vec<String>, AavionError> {
        let expand_all = |scope: &Scope| -> Result<Vec<String>, AavionError> {
            self.store.read_active(|_, brain| {
                Ok(brain
                    .projects
                    .keys()
                    .filter(|slug| scope.allows_read(slug))
                    .cloned()
                    .collect())
            })
        };
        if spec == "*" {
            return expand_all(scope);
        }
        if !spec.is_empty() {
            return Ok(spec
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect());
        }
        // Preset mode: expand selection.projects placeholders.
        let mut out = Vec::new();
        for entry in &preset.selection.projects {
            let expanded = bag.expand(entry);
            if expanded == "*" {
                return expand_all(scope);
            }
            if expanded.starts_with("${") {
                return Err(invalid(
                    "project",
                    &format!("unresolved project placeholder '{entry}'"),
                ));
            }
            if !expanded.is_empty() {
                out.push(expanded);
            }
        }
        Ok(out)
    }

    fn collect_records(
        &self,
        scope: &Scope,
        projects: &[String],
        request: &ExportRequest,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<EntityRecord>, AavionError> {
        if request.selectors.is_empty() {
            return self.store.active_records(scope, projects);
        }
        let project = &projects[0];
        let mut records = Vec::new();
        for selector in &request.selectors {
            let (entity, reference) = refs::split_entity_selector(selector);
            match self
                .store
                .entity_record(scope, project, &entity, reference.as_deref())
            {
                Ok(record) => records.push(record),
                Err(AavionError::NotFound { kind, name }) => {
                    warnings.push(format!("selector '{selector}': {kind} '{name}' not found"));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(records)
    }

    fn filter_records(
        &self,
        records: Vec<EntityRecord>,
        preset: &Preset,
        bag: &PlaceholderBag,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<EntityRecord>, AavionError> {
        let records = self.apply_filter_defs(records, &preset.selection.entities, bag, warnings)?;
        self.apply_filter_defs(records, &preset.selection.payload_filters, bag, warnings)
    }

    fn apply_filter_defs(
        &self,
        records: Vec<EntityRecord>,
        filters: &[FilterDef],
        bag: &PlaceholderBag,
        _warnings: &mut [String],
    ) -> Result<Vec<EntityRecord>, AavionError> {
        if filters.is_empty() {
            return Ok(records);
        }
        let mut out = Vec::new();
        for record in records {
            let target = FilterTarget {
                project: &record.project,
                entity: &record.entity,
                status: &record.status,
                fieldset: record.fieldset.as_deref(),
                version: &record.version,
                path: &record.path,
                payload: &record.payload,
            };
            if aavion_filter::evaluate_all(filters, &target, bag)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn project_rows(
        &self,
        scope: &Scope,
        projects: &[String],
    ) -> Result<Vec<Value>, AavionError> {
        self.store.read_active(|_, brain| {
            Ok(projects
                .iter()
                .filter(|slug| scope.allows_read(slug))
                .filter_map(|slug| brain.projects.get(slug))
                .map(|p| {
                    json!({
                        "slug": p.slug,
                        "title": p.title,
                        "description": p.description,
                        "status": p.status,
                    })
                })
                .collect())
        })
    }

    fn save_content(
        &self,
        content: &str,
        projects: &[String],
        preset_slug: &str,
        format: ExportFormat,
        request: &ExportRequest,
    ) -> Result<String, AavionError> {
        let dir = request
            .path
            .clone()
            .unwrap_or_else(|| {
                self.store
                    .config_string("export.path", self.store.paths().exports_dir().as_str())
            });
        let dir = Utf8PathBuf::from(dir);
        let target = if dir.extension().is_some() {
            dir
        } else {
            paths::ensure_dir_all(&dir)?;
            dir.join(format!(
                "{}-{}-{}.{}",
                projects.join("_"),
                preset_slug,
                time::backup_stamp(),
                format.extension()
            ))
        };
        if let Some(parent) = target.parent() {
            paths::ensure_dir_all(&parent.to_path_buf())?;
        }
        fs::write(target.as_std_path(), content)
            .map_err(|e| AavionError::storage(target.clone(), e))?;
        Ok(target.to_string())
    }
}

fn materialize(
    store: &BrainStore,
    scope: &Scope,
    mut records: Vec<EntityRecord>,
    nest_children: bool,
) -> Result<Vec<EntityCtx>, AavionError> {
    if nest_children {
        records.sort_by(|a, b| (&a.project, &a.path).cmp(&(&b.project, &b.path)));
    }
    let titles: std::collections::BTreeMap<String, String> = store.read_active(|_, brain| {
        Ok(brain
            .projects
            .iter()
            .filter(|(slug, _)| scope.allows_read(slug))
            .map(|(slug, p)| (slug.clone(), p.title.clone()))
            .collect())
    })?;
    Ok(records
        .into_iter()
        .map(|record| {
            let depth = if nest_children {
                record.path.len().saturating_sub(1)
            } else {
                0
            };
            EntityCtx {
                project_title: titles
                    .get(&record.project)
                    .cloned()
                    .unwrap_or_else(|| record.project.clone()),
                project: record.project,
                slug: record.entity,
                version: record.version,
                status: record.status,
                fieldset: record.fieldset,
                path: record.path,
                depth,
                payload: record.payload,
            }
        })
        .collect())
}

/// Keep only the listed dot-paths of a payload.
fn keep_paths(payload: &Value, paths: &[String]) -> Value {
    let mut out = Value::Object(Map::new());
    for path in paths {
        if let Some(found) = aavion_filter::lookup_path(payload, path) {
            insert_path(&mut out, path, found.clone());
        }
    }
    out
}

fn insert_path(target: &mut Value, path: &str, value: Value) {
    let mut current = target;
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    for (i, segment) in segments.iter().enumerate() {
        let map = match current {
            Value::Object(map) => map,
            _ => return,
        };
        if i == segments.len() - 1 {
            map.insert((*segment).to_string(), value);
            return;
        }
        current = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

fn remove_path(payload: &mut Value, path: &str) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = payload;
    for segment in parents {
        match current {
            Value::Object(map) => match map.get_mut(*segment) {
                Some(next) => current = next,
                None => return,
            },
            _ => return,
        }
    }
    if let Value::Object(map) = current {
        map.remove(*last);
    }
}

fn invalid(name: &str, reason: &str) -> AavionError {
    AavionError::InvalidParameter {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Resolve declared preset variables from call parameters, enforcing
/// `required` and coercing by declared type.
fn resolve_variables(
    preset: &Preset,
    params: &Map<String, Value>,
) -> Result<Map<String, Value>, AavionError> {
    let mut vars = Map::new();
    for (name, def) in &preset.settings.variables {
        let raw = params.get(name).cloned().or_else(|| def.default.clone());
        match raw {
            Some(value) => {
                vars.insert(name.clone(), coerce_variable(name, def.kind, value)?);
            }
            None if def.required => {
                return Err(invalid(name, "required preset variable missing"));
            }
            None => {}
        }
    }
    Ok(vars)
}

fn coerce_variable(
    name: &str,
    kind: VariableKind,
    value: Value,
) -> Result<Value, AavionError> {
    let fail = |reason: &str| invalid(name, reason);
    Ok(match kind {
        VariableKind::Text => Value::String(aavion_filter::value_to_text(&value)),
        VariableKind::Int => match &value {
            Value::Number(n) if n.as_i64().is_some() => value,
            Value::String(s) => {
                json!(s.parse::<i64>().map_err(|_| fail("expected an integer"))?)
            }
            _ => return Err(fail("expected an integer")),
        },
        VariableKind::Number | VariableKind::Float => match &value {
            Value::Number(_) => value,
            Value::String(s) => {
                json!(s.parse::<f64>().map_err(|_| fail("expected a number"))?)
            }
            _ => return Err(fail("expected a number")),
        },
        VariableKind::Bool => match &value {
            Value::Bool(_) => value,
            Value::String(s) => match s.as_str() {
                "true" => json!(true),
                "false" => json!(false),
                _ => return Err(fail("expected a boolean")),
            },
            _ => return Err(fail("expected a boolean")),
        },
        VariableKind::Array => match value {
            Value::Array(_) => value,
            other => json!([other]),
        },
        VariableKind::Object => match value {
            Value::Object(_) => value,
            _ => return Err(fail("expected an object")),
        },
        VariableKind::CommaList => match &value {
            Value::Array(_) => value,
            Value::String(s) => json!(
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>()
            ),
            _ => return Err(fail("expected a comma list")),
        },
        VariableKind::Json => match &value {
            Value::String(s) => {
                serde_json::from_str(s).map_err(|_| fail("expected JSON"))?
            }
            _ => value,
        },
    })
}
