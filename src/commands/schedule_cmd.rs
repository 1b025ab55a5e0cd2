//! `schedule *` commands: task CRUD in the system brain. Execution
//! belongs to the external cron collaborator.

use std::sync::Arc;

use serde_json::{Value, json};

use aavion_dispatch::{CommandMeta, Response};
use aavion_store::SchedulerTask;
use aavion_utils::error::AavionError;
use aavion_utils::{normalize_slug, time};

use crate::runtime::Runtime;

pub(crate) fn register(runtime: &Arc<Runtime>) -> Result<(), AavionError> {
    let d = &runtime.dispatcher;

    let store = Arc::clone(&runtime.store);
    d.register(
        "schedule add",
        CommandMeta {
            description: "Register or replace a scheduled task".to_string(),
        },
        move |req| {
            let slug = normalize_slug(req.str_param("task")?)?;
            let command = req.str_param("command")?.to_string();
            let task = store.with_system(|brain| {
                let scheduler = brain.scheduler.get_or_insert_with(Default::default);
                let now = time::now_iso();
                let task = scheduler
                    .tasks
                    .entry(slug.clone())
                    .and_modify(|task| {
                        task.command = command.clone();
                        task.updated_at = now.clone();
                    })
                    .or_insert_with(|| SchedulerTask {
                        slug: slug.clone(),
                        command: command.clone(),
                        created_at: now.clone(),
                        updated_at: now,
                        last_run_at: None,
                        last_status: None,
                        last_message: None,
                    });
                Ok(serde_json::to_value(&*task).unwrap_or(Value::Null))
            })?;
            Ok(Response::ok(
                &req.action,
                format!("task '{slug}' scheduled"),
                task,
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "schedule list",
        CommandMeta {
            description: "List scheduled tasks and the recent run log".to_string(),
        },
        move |req| {
            let (tasks, log_len) = store.read_system(|brain| {
                let scheduler = brain.scheduler.clone().unwrap_or_default();
                Ok((
                    serde_json::to_value(&scheduler.tasks).unwrap_or(Value::Null),
                    scheduler.log.len(),
                ))
            })?;
            Ok(Response::ok(
                &req.action,
                "scheduled tasks",
                json!({"tasks": tasks, "log_entries": log_len}),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "schedule remove",
        CommandMeta {
            description: "Remove a scheduled task".to_string(),
        },
        move |req| {
            let slug = normalize_slug(req.str_param("task")?)?;
            let removed = store.with_system(|brain| {
                Ok(brain
                    .scheduler
                    .get_or_insert_with(Default::default)
                    .tasks
                    .remove(&slug)
                    .is_some())
            })?;
            if removed {
                Ok(Response::ok_message(
                    &req.action,
                    format!("task '{slug}' removed"),
                ))
            } else {
                Err(AavionError::not_found("task", slug))
            }
        },
    )?;

    Ok(())
}
