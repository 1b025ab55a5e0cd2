//! `brain *` commands: lifecycle, backups, reports, maintenance.

use std::sync::Arc;

use serde_json::{Value, json};

use aavion_dispatch::{CommandMeta, Response};
use aavion_utils::error::AavionError;

use crate::runtime::Runtime;

#[allow(clippy::too_many_lines)]
pub(crate) fn register(runtime: &Arc<Runtime>) -> Result<(), AavionError> {
    let d = &runtime.dispatcher;

    let store = Arc::clone(&runtime.store);
    d.register(
        "brain list",
        CommandMeta {
            description: "List brains".to_string(),
        },
        move |req| {
            let brains = store.list_brains()?;
            Ok(Response::ok(
                &req.action,
                format!("{} brain(s)", brains.len()),
                serde_json::to_value(&brains).unwrap_or(Value::Null),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "brain create",
        CommandMeta {
            description: "Create a user brain".to_string(),
        },
        move |req| {
            let slug =
                store.create_brain(req.str_param("brain")?, req.bool_param("activate", false))?;
            Ok(Response::ok_message(
                &req.action,
                format!("brain '{slug}' created"),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "brain use",
        CommandMeta {
            description: "Switch the active brain".to_string(),
        },
        move |req| {
            let slug = req.str_param("brain")?;
            store.set_active_brain(slug)?;
            Ok(Response::ok_message(
                &req.action,
                format!("active brain is now '{slug}'"),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "brain delete",
        CommandMeta {
            description: "Delete a brain (never the active one)".to_string(),
        },
        move |req| {
            let slug = req.str_param("brain")?;
            store.delete_brain(slug)?;
            Ok(Response::ok_message(
                &req.action,
                format!("brain '{slug}' deleted"),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "brain backup",
        CommandMeta {
            description: "Back up a brain file".to_string(),
        },
        move |req| {
            let outcome = store.backup_brain(
                req.opt_str_param("brain"),
                req.opt_str_param("label"),
                req.bool_param("gz", false) || req.bool_param("compress", false),
            )?;
            Ok(Response::ok(
                &req.action,
                format!("backup written to {}", outcome.path),
                serde_json::to_value(&outcome).unwrap_or(Value::Null),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "brain backups",
        CommandMeta {
            description: "List backups".to_string(),
        },
        move |req| {
            let backups = store.list_backups(req.opt_str_param("brain"))?;
            Ok(Response::ok(
                &req.action,
                format!("{} backup(s)", backups.len()),
                serde_json::to_value(&backups).unwrap_or(Value::Null),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "brain prune",
        CommandMeta {
            description: "Prune old backups".to_string(),
        },
        move |req| {
            let outcome = store.prune_backups(
                req.opt_str_param("brain"),
                req.int_param("keep").unwrap_or(3).max(0) as usize,
                req.int_param("days").map(|d| d.max(0) as u64),
                req.bool_param("dry-run", false) || req.bool_param("dry_run", false),
            )?;
            Ok(Response::ok(
                &req.action,
                format!("{} backup(s) pruned", outcome.removed.len()),
                serde_json::to_value(&outcome).unwrap_or(Value::Null),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "brain restore",
        CommandMeta {
            description: "Restore a brain from a backup".to_string(),
        },
        move |req| {
            let slug = store.restore_brain(
                req.str_param("backup")?,
                req.opt_str_param("target"),
                req.bool_param("activate", false),
                req.bool_param("overwrite", false),
            )?;
            Ok(Response::ok_message(
                &req.action,
                format!("brain '{slug}' restored"),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "brain report",
        CommandMeta {
            description: "Brain structure report".to_string(),
        },
        move |req| {
            let report = store.brain_report(req.opt_str_param("brain"))?;
            Ok(Response::ok(&req.action, "brain report", report))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "brain integrity",
        CommandMeta {
            description: "Integrity verification".to_string(),
        },
        move |req| {
            let report = if req.bool_param("all", false) {
                store.integrity_report()?
            } else {
                store.integrity_report_for(req.opt_str_param("brain"))?
            };
            Ok(Response::ok(&req.action, "integrity report", report))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "brain compact",
        CommandMeta {
            description: "Rebuild the commit index from version records".to_string(),
        },
        move |req| {
            let result = store.compact_brain(
                &req.scope,
                req.opt_str_param("project"),
                req.bool_param("dry-run", false) || req.bool_param("dry_run", false),
            )?;
            Ok(Response::ok(&req.action, "brain compacted", result))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "brain repair",
        CommandMeta {
            description: "Repair structural drift".to_string(),
        },
        move |req| {
            let result = store.repair_brain(
                &req.scope,
                req.opt_str_param("project"),
                req.bool_param("dry-run", false) || req.bool_param("dry_run", false),
            )?;
            let repairs = result["repairs"].as_array().map_or(0, Vec::len);
            Ok(Response::ok(
                &req.action,
                format!("{repairs} repair(s)"),
                result,
            ))
        },
    )?;

    Ok(())
}
