// Manual trigger endpoint

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use flowgate_core::DispatchStatus;
use flowgate_triggers::TriggerRegistry;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TriggerRegistry>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/triggers/manual/:workflow_id",
            post(trigger_manual_workflow),
        )
        .with_state(state)
}

/// POST /v1/triggers/manual/{workflow_id} - fire a manual trigger on behalf
/// of the authenticated caller. The gateway's auth layer validates the
/// bearer token and injects the caller identity as X-User-Id.
#[utoipa::path(
    post,
    path = "/v1/triggers/manual/{workflow_id}",
    params(
        ("workflow_id" = Uuid, Path, description = "Workflow to fire")
    ),
    responses(
        (status = 202, description = "Execution dispatched"),
        (status = 400, description = "Trigger rejected the request"),
        (status = 401, description = "Missing caller identity"),
        (status = 404, description = "No manual trigger deployed for this workflow")
    ),
    tag = "triggers"
)]
pub async fn trigger_manual_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    let access_token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.trim().is_empty());

    let Some(user_id) = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|u| !u.is_empty())
    else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "missing caller identity"})),
        );
    };

    let Some(trigger) = state.registry.manual_trigger(workflow_id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "no manual trigger deployed for this workflow"})),
        );
    };

    let outcome = trigger.trigger_manual(user_id, access_token).await;
    match outcome.status {
        DispatchStatus::Started => (
            StatusCode::ACCEPTED,
            Json(json!({
                "execution_id": outcome.execution_id,
                "status": "started",
            })),
        ),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": outcome.message})),
        ),
    }
}
