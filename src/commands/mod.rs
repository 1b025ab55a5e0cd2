//! Command handler registrations.
//!
//! Every family lives in its own module with thin handlers: parse
//! parameters, call into the store or a manager, wrap the result in the
//! response envelope. Parser handlers map statement positionals onto
//! named parameters per action.

mod auth_cmd;
mod brain_cmd;
mod cache_cmd;
mod config_cmd;
mod entity_cmd;
mod export_cmd;
mod preset_cmd;
mod project_cmd;
mod schedule_cmd;
mod security_cmd;
mod status_cmd;

use std::sync::Arc;

use aavion_utils::error::AavionError;

use crate::runtime::Runtime;

/// Positional parameter names per action, used by the statement parser.
fn positional_names(action: &str) -> &'static [&'static str] {
    match action {
        "project create" | "project update" | "project archive" | "project restore"
        | "project delete" | "project report" => &["project"],
        "entity save" => &["project", "entity"],
        "entity show" | "entity versions" | "entity report" | "entity archive"
        | "entity deactivate" => &["project", "entity"],
        "entity delete" | "entity restore" => &["project", "entity", "reference"],
        "entity list" | "entity commits" => &["project", "entity"],
        "entity move" => &["project", "entity", "target"],
        "entity purge" => &["project", "entity"],
        "brain create" | "brain use" | "brain delete" | "brain backup" | "brain backups"
        | "brain report" | "brain integrity" => &["brain"],
        "brain restore" => &["backup", "target"],
        "brain prune" => &["brain"],
        "brain compact" | "brain repair" => &["project"],
        "auth revoke" => &["identifier"],
        "preset show" | "preset create" | "preset update" | "preset delete" => &["preset"],
        "config get" => &["key"],
        "config set" => &["key", "value"],
        "security lockdown" => &["seconds"],
        "schedule add" => &["task", "command"],
        "schedule remove" => &["task"],
        "export" => &["project", "selectors"],
        _ => &[],
    }
}

/// Wire parser handlers and register every command family.
pub fn register_all(runtime: &Arc<Runtime>) -> Result<(), AavionError> {
    let dispatcher = &runtime.dispatcher;

    // Two-word families: consume the sub-verb, then bind positionals.
    for verb in [
        "project", "entity", "brain", "auth", "api", "preset", "config", "cache", "security",
        "schedule",
    ] {
        dispatcher.register_parser_handler(Some(verb), 0, |ctx| {
            ctx.consume_subaction();
            let action = ctx.action.clone();
            ctx.bind_positional(positional_names(&action));
            Ok(())
        });
    }
    // Single-word actions with positionals.
    dispatcher.register_parser_handler(Some("export"), 0, |ctx| {
        ctx.bind_positional(positional_names("export"));
        Ok(())
    });

    type RegisterFn = fn(&Arc<Runtime>) -> Result<(), AavionError>;
    let modules: &[(&str, RegisterFn)] = &[
        ("project", project_cmd::register),
        ("entity", entity_cmd::register),
        ("brain", brain_cmd::register),
        ("auth", auth_cmd::register),
        ("preset", preset_cmd::register),
        ("export", export_cmd::register),
        ("config", config_cmd::register),
        ("cache", cache_cmd::register),
        ("security", security_cmd::register),
        ("schedule", schedule_cmd::register),
        ("status", status_cmd::register),
    ];
    for (name, register) in modules {
        match register(runtime) {
            Ok(()) => runtime
                .bus
                .emit("module.initialized", serde_json::json!({"module": name})),
            Err(err) => {
                runtime.bus.emit(
                    "module.initialization_failed",
                    serde_json::json!({"module": name, "error": err.to_string()}),
                );
                return Err(err);
            }
        }
    }
    Ok(())
}
