//! `auth *` and `api *` commands.

use std::sync::Arc;

use serde_json::json;

use aavion_auth::GrantOptions;
use aavion_dispatch::{CommandMeta, Response};
use aavion_utils::ScopeMode;
use aavion_utils::error::AavionError;

use crate::runtime::Runtime;

pub(crate) fn register(runtime: &Arc<Runtime>) -> Result<(), AavionError> {
    let d = &runtime.dispatcher;

    let auth = Arc::clone(&runtime.auth);
    d.register(
        "auth grant",
        CommandMeta {
            description: "Issue a new API token".to_string(),
        },
        move |req| {
            let scope: ScopeMode = req
                .opt_str_param("scope")
                .unwrap_or("RW")
                .parse()?;
            let projects = req
                .opt_str_param("projects")
                .map(|p| {
                    p.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_else(|| vec!["*".to_string()]);
            let outcome = auth.grant(&GrantOptions {
                scope,
                projects,
                label: req.opt_str_param("label").map(ToString::to_string),
                created_by: req.opt_str_param("actor").map(ToString::to_string),
                expires_at: req.opt_str_param("expires").map(ToString::to_string),
                length: req.int_param("length").map(|n| n.max(0) as usize),
            })?;
            // The token appears in this response and nowhere else.
            Ok(Response::ok(
                &req.action,
                "token granted; store it now, it is not retrievable later",
                json!({
                    "token": outcome.token,
                    "hash": outcome.hash,
                    "scope": outcome.entry.meta.scope.as_str(),
                    "projects": outcome.entry.meta.projects,
                    "label": outcome.entry.label,
                }),
            ))
        },
    )?;

    let auth = Arc::clone(&runtime.auth);
    d.register(
        "auth list",
        CommandMeta {
            description: "List registered keys".to_string(),
        },
        move |req| {
            let keys = auth.list(req.bool_param("revoked", false))?;
            Ok(Response::ok(
                &req.action,
                format!("{} key(s)", keys.len()),
                json!({"keys": keys}),
            ))
        },
    )?;

    let auth = Arc::clone(&runtime.auth);
    d.register(
        "auth revoke",
        CommandMeta {
            description: "Revoke a key by token or hash".to_string(),
        },
        move |req| {
            let revoked = auth.revoke(req.str_param("identifier")?)?;
            if revoked {
                Ok(Response::ok_message(&req.action, "key revoked"))
            } else {
                Ok(Response::error(&req.action, "no matching active key"))
            }
        },
    )?;

    let auth = Arc::clone(&runtime.auth);
    d.register(
        "auth reset",
        CommandMeta {
            description: "Revoke all keys and disable REST".to_string(),
        },
        move |req| {
            let revoked_count = auth.reset()?;
            Ok(Response::ok(
                &req.action,
                format!("{revoked_count} key(s) revoked, REST disabled"),
                json!({"revoked_count": revoked_count}),
            ))
        },
    )?;

    // `api enable` and its `api serve` alias share a handler body.
    for action in ["api enable", "api serve"] {
        let auth = Arc::clone(&runtime.auth);
        d.register(
            action,
            CommandMeta {
                description: "Enable the REST surface".to_string(),
            },
            move |req| {
                let changed = auth.set_api_enabled(
                    true,
                    req.opt_str_param("actor"),
                    req.opt_str_param("reason"),
                )?;
                let enabled = auth.is_api_enabled()?;
                let message = if changed {
                    "REST enabled"
                } else if enabled {
                    "REST already enabled"
                } else {
                    "REST stays disabled: grant a non-bootstrap key first"
                };
                Ok(Response::ok(
                    &req.action,
                    message,
                    json!({"enabled": enabled, "changed": changed}),
                ))
            },
        )?;
    }

    let auth = Arc::clone(&runtime.auth);
    d.register(
        "api disable",
        CommandMeta {
            description: "Disable the REST surface".to_string(),
        },
        move |req| {
            let changed = auth.set_api_enabled(
                false,
                req.opt_str_param("actor"),
                req.opt_str_param("reason"),
            )?;
            Ok(Response::ok(
                &req.action,
                "REST disabled",
                json!({"enabled": false, "changed": changed}),
            ))
        },
    )?;

    let auth = Arc::clone(&runtime.auth);
    d.register(
        "api status",
        CommandMeta {
            description: "REST surface status".to_string(),
        },
        move |req| {
            let enabled = auth.is_api_enabled()?;
            let keys = auth.list(false)?.len();
            Ok(Response::ok(
                &req.action,
                if enabled { "REST enabled" } else { "REST disabled" },
                json!({"enabled": enabled, "active_keys": keys}),
            ))
        },
    )?;

    Ok(())
}
