//! `config *` commands.

use std::sync::Arc;

use serde_json::{Value, json};

use aavion_dispatch::{CommandMeta, Response};
use aavion_utils::error::AavionError;

use crate::runtime::Runtime;

pub(crate) fn register(runtime: &Arc<Runtime>) -> Result<(), AavionError> {
    let d = &runtime.dispatcher;

    let store = Arc::clone(&runtime.store);
    d.register(
        "config list",
        CommandMeta {
            description: "List system config keys".to_string(),
        },
        move |req| {
            let config = store.read_system(|brain| Ok(brain.config.clone()))?;
            Ok(Response::ok(
                &req.action,
                format!("{} key(s)", config.len()),
                json!({"config": config}),
            ))
        },
    )?;

    let store = Arc::clone(&runtime.store);
    d.register(
        "config get",
        CommandMeta {
            description: "Read one config key".to_string(),
        },
        move |req| {
            let key = req.str_param("key")?;
            let value = store
                .config_value(key)?
                .ok_or_else(|| AavionError::not_found("config key", key))?;
            Ok(Response::ok(
                &req.action,
                key,
                json!({"key": key, "value": value}),
            ))
        },
    )?;

    let runtime_handle = Arc::downgrade(runtime);
    let store = Arc::clone(&runtime.store);
    let cache = Arc::clone(&runtime.cache);
    d.register(
        "config set",
        CommandMeta {
            description: "Set one config key (JSON values accepted)".to_string(),
        },
        move |req| {
            let key = req.str_param("key")?;
            let raw = req.params.get("value").cloned().ok_or_else(|| {
                AavionError::InvalidParameter {
                    name: "value".to_string(),
                    reason: "required".to_string(),
                }
            })?;
            // A string value that parses as JSON is stored structurally.
            let value = match &raw {
                Value::String(s) => serde_json::from_str(s).unwrap_or(raw.clone()),
                _ => raw,
            };
            store.set_config_value(key, value.clone())?;

            // Live subsystems track their keys immediately.
            let normalized = aavion_store::normalize_config_key(key);
            if normalized.starts_with("security.") {
                if let Some(runtime) = runtime_handle.upgrade() {
                    runtime.reload_security_settings();
                }
            } else if normalized == "cache.active" {
                cache.set_enabled(value.as_bool().unwrap_or(true));
            } else if normalized == "cache.ttl" {
                if let Some(ttl) = value.as_u64() {
                    cache.set_ttl(ttl)?;
                }
            }
            Ok(Response::ok(
                &req.action,
                format!("'{normalized}' set"),
                json!({"key": normalized, "value": value}),
            ))
        },
    )?;

    Ok(())
}
