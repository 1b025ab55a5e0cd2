//! `preset *` commands.

use std::sync::Arc;

use serde_json::{Value, json};

use aavion_dispatch::{CommandMeta, CommandRequest, Response};
use aavion_utils::error::AavionError;

use crate::runtime::Runtime;

/// The preset document for create/update: trailing JSON fragment or the
/// `--payload=` parameter.
fn preset_payload(req: &CommandRequest) -> Result<Value, AavionError> {
    if let Some(payload) = &req.payload {
        return Ok(payload.clone());
    }
    if let Some(raw) = req.opt_str_param("payload") {
        return serde_json::from_str(raw).map_err(|e| AavionError::InvalidJson {
            reason: format!("--payload is not valid JSON: {e}"),
        });
    }
    Err(AavionError::InvalidParameter {
        name: "payload".to_string(),
        reason: "a preset document is required".to_string(),
    })
}

pub(crate) fn register(runtime: &Arc<Runtime>) -> Result<(), AavionError> {
    let d = &runtime.dispatcher;

    let presets = Arc::clone(&runtime.presets);
    d.register(
        "preset list",
        CommandMeta {
            description: "List export presets".to_string(),
        },
        move |req| {
            let listed = presets.list()?;
            Ok(Response::ok(
                &req.action,
                format!("{} preset(s)", listed.len()),
                json!({"presets": listed}),
            ))
        },
    )?;

    let presets = Arc::clone(&runtime.presets);
    d.register(
        "preset show",
        CommandMeta {
            description: "Show one preset document".to_string(),
        },
        move |req| {
            let slug = req.str_param("preset")?;
            let preset = presets.get(slug)?;
            Ok(Response::ok(&req.action, format!("preset '{slug}'"), preset))
        },
    )?;

    let presets = Arc::clone(&runtime.presets);
    d.register(
        "preset create",
        CommandMeta {
            description: "Create a preset".to_string(),
        },
        move |req| {
            let slug = req.str_param("preset")?;
            let write = presets.create(slug, &preset_payload(req)?)?;
            Ok(Response::ok(
                &req.action,
                format!("preset '{}' created", write.slug),
                json!({"slug": write.slug}),
            ))
        },
    )?;

    let presets = Arc::clone(&runtime.presets);
    d.register(
        "preset update",
        CommandMeta {
            description: "Update a preset; protected presets clone".to_string(),
        },
        move |req| {
            let slug = req.str_param("preset")?;
            let write = presets.update(slug, &preset_payload(req)?)?;
            let message = match &write.clone {
                Some(clone) => format!("preset '{slug}' is protected; changes written to '{clone}'"),
                None => format!("preset '{slug}' updated"),
            };
            Ok(Response::ok(
                &req.action,
                message,
                json!({"slug": write.slug, "clone": write.clone}),
            ))
        },
    )?;

    let presets = Arc::clone(&runtime.presets);
    d.register(
        "preset delete",
        CommandMeta {
            description: "Delete a preset (immutable presets refuse)".to_string(),
        },
        move |req| {
            let slug = req.str_param("preset")?;
            presets.delete(slug)?;
            Ok(Response::ok_message(
                &req.action,
                format!("preset '{slug}' deleted"),
            ))
        },
    )?;

    Ok(())
}
