//! `entity *` commands.

use std::sync::Arc;

use serde_json::{Value, json};

use aavion_dispatch::{CommandMeta, CommandRequest, Response};
use aavion_export::StoreResolverSource;
use aavion_filter::PlaceholderBag;
use aavion_resolver::{DEFAULT_DEPTH, ResolveContext, Resolver};
use aavion_store::refs::split_save_selector;
use aavion_store::{BrainStore, SaveOptions};
use aavion_utils::error::AavionError;

use crate::runtime::Runtime;

fn path_segments(raw: &str) -> Vec<String> {
    raw.split(['/', '.'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn save_options(req: &CommandRequest, selector_fieldset: Option<String>, selector_reference: Option<String>) -> SaveOptions {
    let fieldset_param = req.params.get("fieldset");
    let fieldset_provided = selector_fieldset.is_some() || fieldset_param.is_some();
    let fieldset = selector_fieldset.or_else(|| match fieldset_param {
        Some(Value::String(s)) if !s.is_empty() && s != "null" => Some(s.clone()),
        _ => None,
    });
    SaveOptions {
        merge: match req.params.get("merge") {
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::String(s)) if s == "replace" || s == "false" => Some(false),
            Some(Value::String(s)) if s == "true" => Some(true),
            _ => None,
        },
        source_reference: req.opt_str_param("source").map(ToString::to_string),
        fieldset_provided,
        fieldset,
        fieldset_reference: selector_reference
            .or_else(|| req.opt_str_param("fieldset_reference").map(ToString::to_string)),
        parent_path: req.opt_str_param("parent").map(path_segments),
    }
}

/// Resolve an emitted payload's shortcodes (entity show, reports).
fn resolve_for_emit(
    store: &Arc<BrainStore>,
    req: &CommandRequest,
    record: &aavion_store::entities::EntityRecord,
) -> (Value, Vec<String>) {
    let source = StoreResolverSource::new(Arc::clone(store), req.scope.clone());
    let bag = PlaceholderBag {
        project: record.project.clone(),
        entity: record.entity.clone(),
        version: record.version.clone(),
        params: req.params.clone(),
        ..PlaceholderBag::default()
    };
    let resolver = Resolver::new(&source, &bag);
    let ctx = ResolveContext {
        project: record.project.clone(),
        entity: record.entity.clone(),
        path: record.path.clone(),
        depth: DEFAULT_DEPTH,
    };
    let payload = resolver.resolve_payload(&record.payload, &ctx);
    (payload, resolver.warnings())
}

#[allow(clippy::too_many_lines)]
pub(crate) fn register(runtime: &Arc<Runtime>) -> Result<(), AavionError> {
    let d = &runtime.dispatcher;

    let store = Arc::clone(&runtime.store);
    d.register(
        "entity save",
        CommandMeta {
            description: "Save a new entity version (merge by default)".to_string(),
        },
        move |req| {
            let project = req.str_param("project")?;
            let selector = req.str_param("entity")?;
            let (entity, selector_fieldset, selector_reference) = split_save_selector(selector);
            let payload = req.payload.clone().ok_or_else(|| {
                AavionError::InvalidParameter {
                    name: "payload".to_string(),
                    reason: "entity save requires a JSON payload".to_string(),
                }
            })?;
            let meta = req
                .params
                .get("meta")
                .cloned()
                .unwrap_or_else(|| json!({}));
            let options = save_options(req, selector_fieldset, selector_reference);
            let outcome =
                store.save_entity(&req.scope, project, &entity, payload, meta, &options)?;
            let message = format!(
                "saved {}/{} v{}",
                outcome.project, outcome.entity, outcome.version
            );
            Ok(Response::ok(
                &req.action,
                message,
                serde_json::to_value(&outcome).unwrap_or(Value::Null),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "entity show",
        CommandMeta {
            description: "Show one entity revision with resolved references".to_string(),
        },
        move |req| {
            let project = req.str_param("project")?;
            let selector = req.str_param("entity")?;
            let (entity, reference) = aavion_store::refs::split_entity_selector(selector);
            let reference = reference.or_else(|| {
                req.opt_str_param("reference").map(ToString::to_string)
            });
            let record =
                store.entity_record(&req.scope, project, &entity, reference.as_deref())?;
            let (payload, warnings) = resolve_for_emit(&store, req, &record);
            Ok(Response::ok(
                &req.action,
                format!("{}/{} v{}", record.project, record.entity, record.version),
                json!({
                    "project": record.project,
                    "entity": record.entity,
                    "version": record.version,
                    "status": record.status,
                    "path": record.path,
                    "fieldset": record.fieldset,
                    "payload": payload,
                    "warnings": warnings,
                }),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "entity list",
        CommandMeta {
            description: "List entities of a project".to_string(),
        },
        move |req| {
            let project = req.str_param("project")?;
            let segments = req
                .opt_str_param("path")
                .map(path_segments)
                .or_else(|| req.opt_str_param("entity").map(path_segments));
            let entities = store.list_entities(&req.scope, project, segments.as_deref())?;
            Ok(Response::ok(
                &req.action,
                format!("{} entit(ies)", entities.len()),
                json!({"entities": entities}),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "entity versions",
        CommandMeta {
            description: "List versions of an entity".to_string(),
        },
        move |req| {
            let versions = store.list_entity_versions(
                &req.scope,
                req.str_param("project")?,
                req.str_param("entity")?,
            )?;
            Ok(Response::ok(
                &req.action,
                format!("{} version(s)", versions.len()),
                json!({"versions": versions}),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "entity commits",
        CommandMeta {
            description: "List commit-index entries".to_string(),
        },
        move |req| {
            let commits = store.list_project_commits(
                &req.scope,
                req.str_param("project")?,
                req.opt_str_param("entity"),
            )?;
            Ok(Response::ok(
                &req.action,
                format!("{} commit(s)", commits.len()),
                json!({"commits": commits}),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "entity report",
        CommandMeta {
            description: "Entity report with active payload".to_string(),
        },
        move |req| {
            let report = store.entity_report(
                &req.scope,
                req.str_param("project")?,
                req.str_param("entity")?,
            )?;
            Ok(Response::ok(&req.action, "entity report", report))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "entity archive",
        CommandMeta {
            description: "Archive an entity".to_string(),
        },
        move |req| {
            let project = req.str_param("project")?;
            let entity = req.str_param("entity")?;
            store.archive_entity(&req.scope, project, entity)?;
            Ok(Response::ok_message(
                &req.action,
                format!("entity '{entity}' archived"),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "entity deactivate",
        CommandMeta {
            description: "Deactivate an entity (children promote unless recursive)".to_string(),
        },
        move |req| {
            let affected = store.deactivate_entity(
                &req.scope,
                req.str_param("project")?,
                req.str_param("entity")?,
                req.bool_param("recursive", false),
            )?;
            Ok(Response::ok(
                &req.action,
                format!("{} entit(ies) deactivated", affected.len()),
                json!({"entities": affected}),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "entity delete",
        CommandMeta {
            description: "Delete an entity, or one version when a reference is given".to_string(),
        },
        move |req| {
            let project = req.str_param("project")?;
            let entity = req.str_param("entity")?;
            match req.opt_str_param("reference") {
                Some(reference) => {
                    let result =
                        store.delete_entity_version(&req.scope, project, entity, reference)?;
                    Ok(Response::ok(
                        &req.action,
                        format!("version {reference} of '{entity}' deleted"),
                        result,
                    ))
                }
                None => {
                    let removed = store.delete_entity(
                        &req.scope,
                        project,
                        entity,
                        req.bool_param("purge", false),
                        req.bool_param("recursive", false),
                    )?;
                    Ok(Response::ok(
                        &req.action,
                        format!("{} entit(ies) deleted", removed.len()),
                        json!({"entities": removed}),
                    ))
                }
            }
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "entity restore",
        CommandMeta {
            description: "Restore a version as the active one".to_string(),
        },
        move |req| {
            let project = req.str_param("project")?;
            let entity = req.str_param("entity")?;
            let reference = req.opt_str_param("reference").unwrap_or_default();
            let reference = if reference.is_empty() {
                // No reference restores the current active version, which
                // reactivates an archived entity.
                store
                    .entity_record(&req.scope, project, entity, None)?
                    .version
            } else {
                reference.to_string()
            };
            let result =
                store.restore_entity_version(&req.scope, project, entity, &reference)?;
            Ok(Response::ok(
                &req.action,
                format!("'{entity}' restored to {reference}"),
                result,
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "entity move",
        CommandMeta {
            description: "Move an entity in the hierarchy".to_string(),
        },
        move |req| {
            let project = req.str_param("project")?;
            let entity = req.str_param("entity")?;
            let target = path_segments(req.str_param("target")?);
            let from = req.opt_str_param("from").map(|p| path_segments(p));
            let warnings = store.move_entity(
                &req.scope,
                project,
                entity,
                from.as_deref(),
                &target,
                req.bool_param("strict", false),
            )?;
            Ok(Response::ok(
                &req.action,
                format!("entity '{entity}' moved"),
                json!({"warnings": warnings}),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "entity purge",
        CommandMeta {
            description: "Purge inactive entity versions".to_string(),
        },
        move |req| {
            let plan = store.purge_inactive_entity_versions(
                &req.scope,
                req.str_param("project")?,
                req.opt_str_param("entity"),
                req.int_param("keep").unwrap_or(0).max(0) as usize,
                req.bool_param("dry-run", false) || req.bool_param("dry_run", false),
            )?;
            Ok(Response::ok(&req.action, "purge plan", plan))
        },
    )?;

    Ok(())
}
