//! REST gateway.
//!
//! A thin axum transport over the shared dispatch core. Admission runs
//! before dispatch: security preflight (lockdown, failed-attempt block,
//! global and per-client windows), then token admission (REST disabled →
//! 503, missing token → 401, unknown token → 401, bootstrap token →
//! 403). The admitted key's scope binds the request; a successful
//! request touches the key afterwards.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::any;
use serde_json::{Map, Value, json};
use tower_http::trace::TraceLayer;
use tracing::info;

use aavion_dispatch::{CommandRequest, Response, Status};
use aavion_utils::error::AavionError;

use crate::runtime::Runtime;

/// Build the gateway router.
pub fn router(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/", any(handle))
        .layer(TraceLayer::new_for_http())
        .with_state(runtime)
}

/// Bind and serve until the task is cancelled.
pub async fn serve(runtime: Arc<Runtime>, addr: SocketAddr) -> Result<(), std::io::Error> {
    let app = router(runtime);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "REST gateway listening");
    axum::serve(listener, app).await
}

async fn handle(
    State(runtime): State<Arc<Runtime>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResponse {
    let client_id = client_id(&headers);

    // Rate-limit preflight before any work.
    if let Err(err) = runtime.security.preflight(&client_id).into_result() {
        return error_response("request", &err);
    }

    // Token admission.
    let token = bearer_token(&headers, &query);
    let (scope, key_hash) = match runtime.auth.admit_rest(token.as_deref()) {
        Ok(admitted) => admitted,
        Err(err) => {
            if matches!(
                err,
                AavionError::InvalidToken | AavionError::BootstrapNotAllowed
            ) {
                let _ = runtime.security.register_failure(&client_id);
            }
            return error_response("request", &err);
        }
    };
    let _ = runtime.security.register_attempt(&client_id);
    let _ = runtime.security.register_success(&client_id);

    // Request shape: query `action` + params, optionally overridden and
    // extended by a JSON body `{action?, params?, payload?}`.
    let request = match build_request(&query, &body) {
        Ok(request) => request.with_scope(scope),
        Err(err) => return error_response("request", &err),
    };

    let response = runtime.dispatch(request);
    let _ = runtime.auth.touch_auth_key(&key_hash);
    let status = envelope_status(&response);
    (status, axum::Json(serde_json::to_value(&response).unwrap_or(Value::Null))).into_response()
}

fn client_id(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
        .unwrap_or_else(|| "local".to_string())
}

fn bearer_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(ToString::to_string)
        .or_else(|| query.get("api_key").cloned())
}

fn build_request(
    query: &HashMap<String, String>,
    body: &Bytes,
) -> Result<CommandRequest, AavionError> {
    let mut action = query.get("action").cloned();
    let mut params = Map::new();
    for (key, value) in query {
        if key == "action" || key == "api_key" {
            continue;
        }
        params.insert(key.clone(), json!(value));
    }
    let mut payload = None;

    if !body.is_empty() {
        let parsed: Value =
            serde_json::from_slice(body).map_err(|e| AavionError::InvalidJson {
                reason: format!("request body: {e}"),
            })?;
        if let Some(body_action) = parsed.get("action").and_then(Value::as_str) {
            action = Some(body_action.to_string());
        }
        if let Some(body_params) = parsed.get("params").and_then(Value::as_object) {
            for (key, value) in body_params {
                params.insert(key.clone(), value.clone());
            }
        }
        payload = parsed.get("payload").cloned().filter(|p| !p.is_null());
    }

    let action = action.ok_or_else(|| AavionError::InvalidParameter {
        name: "action".to_string(),
        reason: "required".to_string(),
    })?;
    Ok(CommandRequest::new(&action, params, payload))
}

fn error_response(action: &str, err: &AavionError) -> HttpResponse {
    let envelope = Response::from_error(action, err);
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response =
        (status, axum::Json(serde_json::to_value(&envelope).unwrap_or(Value::Null)))
            .into_response();
    if let AavionError::RateLimited {
        retry_after_secs,
        reason,
    } = err
    {
        if let Ok(value) = retry_after_secs.to_string().parse() {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        // Lockdowns surface as 503 rather than 429.
        if reason == "lockdown" {
            *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    response
}

/// Map a handler envelope onto an HTTP status.
fn envelope_status(response: &Response) -> StatusCode {
    match response.status {
        Status::Ok => StatusCode::OK,
        Status::Error => {
            let kind = response
                .meta
                .as_ref()
                .and_then(|m| m.pointer("/exception/type"))
                .and_then(Value::as_str);
            match kind {
                None => StatusCode::BAD_REQUEST,
                Some("ScopeDenied" | "BootstrapNotAllowed") => StatusCode::FORBIDDEN,
                Some("InvalidToken" | "MissingToken") => StatusCode::UNAUTHORIZED,
                Some("RateLimited") => StatusCode::TOO_MANY_REQUESTS,
                Some("ApiDisabled") => StatusCode::SERVICE_UNAVAILABLE,
                Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }
}
