// Outbound dispatch to the workflow engine

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use flowgate_core::{ApiCallLog, DispatchOutcome, Repository, TriggerKind};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends `execute` requests to the workflow engine. One instance is shared
/// by every trigger in the process.
pub struct Dispatcher {
    client: reqwest::Client,
    engine_base: String,
    /// Audit sink for outbound-call metadata; None disables auditing
    audit: Option<Arc<dyn Repository>>,
}

impl Dispatcher {
    pub fn new(engine_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(DISPATCH_TIMEOUT)
                .build()
                .expect("reqwest client"),
            engine_base: engine_base.into().trim_end_matches('/').to_string(),
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn Repository>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn engine_base(&self) -> &str {
        &self.engine_base
    }

    /// POST {engine_base}/v1/workflows/{workflow_id}/execute.
    /// 202 -> started, any other status -> failed, transport error -> error.
    pub async fn dispatch(
        &self,
        workflow_id: Uuid,
        trigger_type: TriggerKind,
        trigger_data: &Value,
        access_token: Option<&str>,
    ) -> DispatchOutcome {
        let execution_id = format!("exec_{}", Uuid::new_v4());
        let url = format!("{}/v1/workflows/{}/execute", self.engine_base, workflow_id);
        let payload = json!({
            "execution_id": execution_id,
            "workflow_id": workflow_id,
            "trigger_type": trigger_type,
            "trigger_data": trigger_data,
            "triggered_at": Utc::now().to_rfc3339(),
        });

        info!(%workflow_id, %url, "dispatching workflow execution");

        let started = Instant::now();
        let mut request = self.client.post(&url).json(&payload);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }

        let (outcome, status_code, audit_error) = match request.send().await {
            Ok(response) if response.status() == reqwest::StatusCode::ACCEPTED => {
                // Prefer the engine-assigned id when the body carries one
                let body: Value = response.json().await.unwrap_or(Value::Null);
                let id = body
                    .get("execution_id")
                    .and_then(Value::as_str)
                    .unwrap_or(&execution_id)
                    .to_string();
                info!(%workflow_id, execution_id = %id, "workflow execution started");
                (DispatchOutcome::started(id), Some(202), None)
            }
            Ok(response) => {
                let code = response.status().as_u16();
                warn!(%workflow_id, code, "workflow engine rejected dispatch");
                (
                    DispatchOutcome::failed(format!("HTTP {code}")),
                    Some(code),
                    None,
                )
            }
            Err(e) => {
                error!(%workflow_id, "error calling workflow engine: {e}");
                (
                    DispatchOutcome::error(format!("Error calling workflow engine: {e}")),
                    None,
                    Some(e.to_string()),
                )
            }
        };

        self.audit_call(
            &url,
            status_code,
            started.elapsed(),
            audit_error,
            workflow_id,
            trigger_type,
        )
        .await;

        outcome
    }

    /// Metadata-only audit row; the trigger payload itself is never stored
    /// here.
    async fn audit_call(
        &self,
        url: &str,
        status_code: Option<u16>,
        elapsed: Duration,
        error: Option<String>,
        workflow_id: Uuid,
        trigger_type: TriggerKind,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };

        let entry = ApiCallLog {
            provider: "workflow_engine".to_string(),
            method: "POST".to_string(),
            url: url.to_string(),
            status_code,
            execution_time_ms: elapsed.as_millis() as u64,
            request_summary: json!({
                "workflow_id": workflow_id,
                "trigger_type": trigger_type,
            }),
            response_summary: Value::Null,
            error,
            called_at: Utc::now(),
        };

        if let Err(e) = audit.append_api_call_log(&entry).await {
            warn!("failed to append api call audit log: {e}");
        }
    }
}
