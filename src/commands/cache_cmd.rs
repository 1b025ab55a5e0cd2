//! `cache *` commands.

use std::sync::Arc;

use serde_json::{Value, json};

use aavion_dispatch::{CommandMeta, Response};
use aavion_utils::error::AavionError;

use crate::runtime::Runtime;

pub(crate) fn register(runtime: &Arc<Runtime>) -> Result<(), AavionError> {
    let d = &runtime.dispatcher;

    let cache = Arc::clone(&runtime.cache);
    d.register(
        "cache stats",
        CommandMeta {
            description: "Cache statistics".to_string(),
        },
        move |req| {
            let stats = cache.statistics()?;
            Ok(Response::ok(
                &req.action,
                format!("{} entr(ies)", stats.entries),
                serde_json::to_value(&stats).unwrap_or(Value::Null),
            ))
        },
    )?;

    let cache = Arc::clone(&runtime.cache);
    d.register(
        "cache clear",
        CommandMeta {
            description: "Drop every cache entry".to_string(),
        },
        move |req| {
            let removed = cache.clear()?;
            Ok(Response::ok(
                &req.action,
                format!("{removed} entr(ies) removed"),
                json!({"removed": removed}),
            ))
        },
    )?;

    Ok(())
}
