// Inbound GitHub webhook endpoint

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use flowgate_triggers::{Trigger, TriggerRegistry};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::signature::verify_github_signature;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TriggerRegistry>,
    pub webhook_secret: Option<String>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/github/webhook", post(handle_github_webhook))
        .with_state(state)
}

/// POST /github/webhook - verify the signature when required, then fan the
/// event out to every GitHub trigger (each filters by repository itself).
#[utoipa::path(
    post,
    path = "/github/webhook",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 202, description = "Event accepted and fanned out"),
        (status = 400, description = "Malformed event"),
        (status = 401, description = "Signature verification failed")
    ),
    tag = "inbound-events"
)]
pub async fn handle_github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let Some(event_type) = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "missing X-GitHub-Event header"})),
        );
    };

    let triggers = state.registry.github_triggers().await;

    // One verification per request; it applies when any deployed trigger
    // demands it
    let verification_required = triggers.iter().any(|t| t.require_signature_verification());
    if verification_required {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let verified = state
            .webhook_secret
            .as_deref()
            .is_some_and(|secret| verify_github_signature(secret, &body, signature));

        if !verified {
            warn!("github webhook signature verification failed");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"detail": "signature verification failed"})),
            );
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"detail": format!("invalid JSON payload: {e}")})),
            );
        }
    };

    let mut dispatched = Vec::new();
    for trigger in triggers {
        if let Some(outcome) = trigger.process_github_event(&event_type, &payload).await {
            dispatched.push(json!({
                "workflow_id": trigger.workflow_id(),
                "status": outcome.status,
                "execution_id": outcome.execution_id,
            }));
        }
    }

    debug!(event_type, matched = dispatched.len(), "github event processed");
    (
        StatusCode::ACCEPTED,
        Json(json!({"event_type": event_type, "dispatched": dispatched})),
    )
}
