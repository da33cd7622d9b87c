// Dynamic webhook routes
//
// Webhook paths are per-trigger configuration, so they cannot be registered
// as static routes; the router's fallback resolves the path against the
// trigger registry on every request.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Json;
use flowgate_core::DispatchStatus;
use flowgate_triggers::{TriggerRegistry, WebhookRequest};
use serde_json::{json, Value};
use tracing::debug;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TriggerRegistry>,
}

/// Fallback handler: looks the request path up among registered webhook
/// triggers. 404 when no trigger owns the path, 202 with the execution id on
/// a successful dispatch, 4xx/502 otherwise.
pub async fn handle_webhook(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Query(query_params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let path = uri.path().to_string();

    let Some(trigger) = state.registry.find_webhook(&path).await else {
        debug!(%path, "no webhook trigger registered for path");
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "no webhook registered for this path"})),
        );
    };

    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();

    let body: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
    };

    let request = WebhookRequest {
        method: method.to_string(),
        path,
        headers,
        query_params,
        body,
        remote_addr: connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()),
    };

    let outcome = trigger.process_webhook(request).await;
    match outcome.status {
        DispatchStatus::Started => (
            StatusCode::ACCEPTED,
            Json(json!({
                "execution_id": outcome.execution_id,
                "status": "started",
            })),
        ),
        DispatchStatus::Skipped | DispatchStatus::Failed => (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": outcome.message})),
        ),
        DispatchStatus::Error => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"detail": outcome.message})),
        ),
    }
}
