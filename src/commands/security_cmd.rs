//! `security *` commands.

use std::sync::Arc;

use serde_json::json;

use aavion_dispatch::{CommandMeta, Response};
use aavion_utils::error::AavionError;

use crate::runtime::Runtime;

pub(crate) fn register(runtime: &Arc<Runtime>) -> Result<(), AavionError> {
    let d = &runtime.dispatcher;

    let security = Arc::clone(&runtime.security);
    d.register(
        "security status",
        CommandMeta {
            description: "Rate-limit and lockdown status".to_string(),
        },
        move |req| Ok(Response::ok(&req.action, "security status", security.status())),
    )?;

    let security = Arc::clone(&runtime.security);
    d.register(
        "security lockdown",
        CommandMeta {
            description: "Engage a global lockdown".to_string(),
        },
        move |req| {
            let seconds = req
                .int_param("seconds")
                .map(|s| s.max(1) as u64);
            let duration = security.lockdown(seconds)?;
            Ok(Response::ok(
                &req.action,
                format!("lockdown for {duration}s"),
                json!({"duration_secs": duration}),
            ))
        },
    )?;

    let security = Arc::clone(&runtime.security);
    d.register(
        "security purge",
        CommandMeta {
            description: "Drop all security counters".to_string(),
        },
        move |req| {
            let removed = security.purge()?;
            Ok(Response::ok(
                &req.action,
                format!("{removed} counter(s) purged"),
                json!({"removed": removed}),
            ))
        },
    )?;

    Ok(())
}
