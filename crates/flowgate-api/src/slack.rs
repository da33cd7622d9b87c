// Inbound Slack events endpoint

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use flowgate_triggers::SlackEventRouter;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::signature::verify_slack_signature;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<SlackEventRouter>,
    pub signing_secret: Option<String>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/slack/events", post(handle_slack_event))
        .with_state(state)
}

/// POST /slack/events - verify the signing secret, answer URL-verification
/// challenges, then fan the event out to the workspace's triggers.
#[utoipa::path(
    post,
    path = "/slack/events",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Event handled"),
        (status = 400, description = "Malformed event"),
        (status = 401, description = "Signature verification failed")
    ),
    tag = "inbound-events"
)]
pub async fn handle_slack_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if let Some(secret) = &state.signing_secret {
        let timestamp = headers
            .get("x-slack-request-timestamp")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let signature = headers
            .get("x-slack-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if !verify_slack_signature(secret, timestamp, &body, signature) {
            warn!("slack request signature verification failed");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"detail": "signature verification failed"})),
            );
        }
    } else {
        warn!("SLACK_SIGNING_SECRET not set, accepting slack event unverified");
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

    // Slack URL verification handshake
    if payload["type"].as_str() == Some("url_verification") {
        return (
            StatusCode::OK,
            Json(json!({"challenge": payload["challenge"]})),
        );
    }

    let team_id = payload["team_id"].as_str().unwrap_or("");
    let outcomes = state.router.route_event(team_id, &payload).await;
    debug!(team_id, matched = outcomes.len(), "slack event processed");

    // Slack expects a prompt 200 regardless of matches
    (
        StatusCode::OK,
        Json(json!({"ok": true, "dispatched": outcomes.len()})),
    )
}
