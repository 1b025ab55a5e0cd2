//! The `export` command.

use std::sync::Arc;

use serde_json::Map;

use aavion_dispatch::{CommandMeta, Response};
use aavion_export::ExportRequest;
use aavion_utils::error::AavionError;

use crate::runtime::Runtime;

/// Parameters consumed by the export machinery itself; everything else
/// flows into the `${param.*}` bag.
const RESERVED: &[&str] = &[
    "project",
    "selectors",
    "preset",
    "format",
    "path",
    "save",
    "response",
    "nest",
    "nest_children",
];

pub(crate) fn register(runtime: &Arc<Runtime>) -> Result<(), AavionError> {
    let export = Arc::clone(&runtime.export);
    runtime.dispatcher.register(
        "export",
        CommandMeta {
            description: "Render a preset-driven export".to_string(),
        },
        move |req| {
            let selectors = req
                .opt_str_param("selectors")
                .map(|csv| {
                    csv.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let params: Map<String, serde_json::Value> = req
                .params
                .iter()
                .filter(|(key, _)| !RESERVED.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();

            let nest = if req.params.contains_key("nest") {
                Some(req.bool_param("nest", false))
            } else if req.params.contains_key("nest_children") {
                Some(req.bool_param("nest_children", false))
            } else {
                None
            };
            let request = ExportRequest {
                project_spec: req.opt_str_param("project").unwrap_or_default().to_string(),
                preset: req.opt_str_param("preset").map(ToString::to_string),
                selectors,
                format: req.opt_str_param("format").map(ToString::to_string),
                path: req.opt_str_param("path").map(ToString::to_string),
                save: req.params.contains_key("save").then(|| req.bool_param("save", false)),
                response: req
                    .params
                    .contains_key("response")
                    .then(|| req.bool_param("response", true)),
                nest_children: nest,
                params,
            };
            let data = export.export(&req.scope, &request)?;
            let entities = data["entities"].as_array().map_or(0, Vec::len);
            Ok(Response::ok(
                &req.action,
                format!("exported {entities} entit(ies)"),
                data,
            ))
        },
    )?;
    Ok(())
}
