//! `project *` commands.

use std::sync::Arc;

use serde_json::json;

use aavion_dispatch::{CommandMeta, Response};
use aavion_store::projects::RestoreProjectOptions;
use aavion_utils::error::AavionError;

use crate::runtime::Runtime;

pub(crate) fn register(runtime: &Arc<Runtime>) -> Result<(), AavionError> {
    let d = &runtime.dispatcher;

    let store = Arc::clone(&runtime.store);
    d.register(
        "project list",
        CommandMeta {
            description: "List projects in the active brain".to_string(),
        },
        move |req| {
            let projects = store.list_projects(&req.scope)?;
            Ok(Response::ok(
                &req.action,
                format!("{} project(s)", projects.len()),
                json!({"projects": projects}),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "project create",
        CommandMeta {
            description: "Create a project".to_string(),
        },
        move |req| {
            let slug = req.str_param("project")?;
            let project = store.create_project(
                &req.scope,
                slug,
                req.opt_str_param("title"),
                req.opt_str_param("description"),
            )?;
            Ok(Response::ok(
                &req.action,
                format!("project '{slug}' created"),
                project,
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "project update",
        CommandMeta {
            description: "Update project title/description".to_string(),
        },
        move |req| {
            let slug = req.str_param("project")?;
            let project = store.update_project_metadata(
                &req.scope,
                slug,
                req.opt_str_param("title"),
                req.opt_str_param("description"),
            )?;
            Ok(Response::ok(
                &req.action,
                format!("project '{slug}' updated"),
                project,
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "project archive",
        CommandMeta {
            description: "Archive a project and deactivate its entities".to_string(),
        },
        move |req| {
            let slug = req.str_param("project")?;
            let project = store.archive_project(&req.scope, slug)?;
            Ok(Response::ok(
                &req.action,
                format!("project '{slug}' archived"),
                project,
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "project restore",
        CommandMeta {
            description: "Restore an archived project".to_string(),
        },
        move |req| {
            let slug = req.str_param("project")?;
            let project = store.restore_project(
                &req.scope,
                slug,
                RestoreProjectOptions {
                    reactivate_entities: req.bool_param("reactivate", false),
                },
            )?;
            Ok(Response::ok(
                &req.action,
                format!("project '{slug}' restored"),
                project,
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "project delete",
        CommandMeta {
            description: "Delete a project".to_string(),
        },
        move |req| {
            let slug = req.str_param("project")?;
            store.delete_project(&req.scope, slug, req.bool_param("purge", false))?;
            Ok(Response::ok_message(
                &req.action,
                format!("project '{slug}' deleted"),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "project report",
        CommandMeta {
            description: "Project report".to_string(),
        },
        move |req| {
            let slug = req.str_param("project")?;
            let report =
                store.project_report(&req.scope, slug, req.bool_param("entities", false))?;
            Ok(Response::ok(&req.action, format!("report for '{slug}'"), report))
        },
    )?;

    Ok(())
}
