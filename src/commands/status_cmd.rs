//! The `status` command.

use std::sync::Arc;

use serde_json::json;

use aavion_dispatch::{CommandMeta, Response};
use aavion_utils::error::AavionError;

use crate::runtime::Runtime;

pub(crate) fn register(runtime: &Arc<Runtime>) -> Result<(), AavionError> {
    let store = Arc::clone(&runtime.store);
    let auth = Arc::clone(&runtime.auth);
    let handle = Arc::downgrade(runtime);
    runtime.dispatcher.register(
        "status",
        CommandMeta {
            description: "Runtime overview".to_string(),
        },
        move |req| {
            let active = store.active_brain_slug()?;
            let brains = store.list_brains()?.len();
            let api_enabled = auth.is_api_enabled()?;
            let commands = handle
                .upgrade()
                .map_or(0, |r| r.dispatcher.commands().len());
            Ok(Response::ok(
                &req.action,
                format!("active brain '{active}'"),
                json!({
                    "version": crate::aaviondb_version(),
                    "active_brain": active,
                    "brains": brains,
                    "api_enabled": api_enabled,
                    "commands": commands,
                    "last_write": store.writer().last_write(),
                }),
            ))
        },
    )?;
    Ok(())
}
