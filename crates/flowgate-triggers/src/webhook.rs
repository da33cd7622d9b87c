// Webhook trigger: fires on inbound HTTP requests routed in by the gateway

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use flowgate_core::{
    DispatchOutcome, Result, TriggerHealth, TriggerKind, TriggerStatus,
};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::WebhookTriggerConfig;
use crate::trigger::{Trigger, TriggerContext, TriggerState};

/// Inbound request data as handed over by the gateway. Header names are
/// lowercased by the gateway before they get here.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub body: Value,
    pub remote_addr: Option<String>,
}

pub struct WebhookTrigger {
    state: TriggerState,
    context: Arc<TriggerContext>,
    webhook_path: String,
    methods: Vec<String>,
    require_auth: bool,
    gateway_base: String,
}

impl WebhookTrigger {
    pub fn new(
        workflow_id: Uuid,
        enabled: bool,
        config: WebhookTriggerConfig,
        gateway_base: impl Into<String>,
        context: Arc<TriggerContext>,
    ) -> Self {
        let webhook_path = normalize_path(
            config
                .webhook_path
                .unwrap_or_else(|| format!("/webhook/{workflow_id}")),
        );

        Self {
            state: TriggerState::new(workflow_id, enabled),
            context,
            webhook_path,
            methods: config
                .methods
                .iter()
                .map(|m| m.to_ascii_uppercase())
                .collect(),
            require_auth: config.require_auth,
            gateway_base: gateway_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn webhook_path(&self) -> &str {
        &self.webhook_path
    }

    /// Absolute URL callers should POST to
    pub fn get_webhook_url(&self) -> String {
        format!("{}{}", self.gateway_base, self.webhook_path)
    }

    /// Process an inbound request: method allow-list, optional auth, then
    /// dispatch.
    pub async fn process_webhook(&self, request: WebhookRequest) -> DispatchOutcome {
        if !self.state.enabled {
            return DispatchOutcome::failed("Webhook trigger is disabled");
        }

        let status = self.state.status().await;
        if status != TriggerStatus::Active {
            return DispatchOutcome::failed(format!(
                "Webhook trigger is not active (status: {status})"
            ));
        }

        let method = request.method.to_ascii_uppercase();
        if !self.methods.contains(&method) {
            return DispatchOutcome::failed(format!(
                "HTTP method {method} not allowed. Allowed methods: {:?}",
                self.methods
            ));
        }

        if self.require_auth {
            if let Err(reason) = validate_webhook_auth(&request.headers) {
                warn!(
                    workflow_id = %self.state.workflow_id,
                    path = %self.webhook_path,
                    "webhook authentication failed: {reason}"
                );
                return DispatchOutcome::failed(format!("Authentication failed: {reason}"));
            }
        }

        let trigger_data = json!({
            "trigger_type": "webhook",
            "method": method,
            "path": request.path,
            "headers": request.headers,
            "query_params": request.query_params,
            "body": request.body,
            "remote_addr": request.remote_addr,
            "user_agent": request.headers.get("user-agent"),
            "content_type": request.headers.get("content-type"),
            "webhook_path": self.webhook_path,
            "triggered_at": Utc::now().to_rfc3339(),
        });

        self.context
            .fire(
                self.state.workflow_id,
                TriggerKind::Webhook,
                self.state.enabled,
                trigger_data,
            )
            .await
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &TriggerState {
        &self.state
    }
}

fn normalize_path(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

/// Bearer token or X-API-Key; exact validation is delegated to the gateway's
/// auth layer, but empty credentials always reject.
fn validate_webhook_auth(headers: &HashMap<String, String>) -> std::result::Result<(), String> {
    if let Some(auth) = headers.get("authorization") {
        return match auth.strip_prefix("Bearer ") {
            Some(token) if !token.trim().is_empty() => Ok(()),
            Some(_) => Err("Empty bearer token".to_string()),
            None => Err("Invalid authentication method".to_string()),
        };
    }

    if let Some(api_key) = headers.get("x-api-key") {
        if api_key.trim().is_empty() {
            return Err("Empty API key".to_string());
        }
        return Ok(());
    }

    Err("Missing Authorization header".to_string())
}

#[async_trait]
impl Trigger for WebhookTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Webhook
    }

    fn workflow_id(&self) -> Uuid {
        self.state.workflow_id
    }

    async fn start(&self) -> Result<()> {
        if !self.state.enabled {
            self.state.set_status(TriggerStatus::Paused).await;
            return Ok(());
        }

        self.state.set_status(TriggerStatus::Active).await;
        info!(
            workflow_id = %self.state.workflow_id,
            url = %self.get_webhook_url(),
            "webhook trigger started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.state.set_status(TriggerStatus::Stopped).await;
        info!(workflow_id = %self.state.workflow_id, "webhook trigger stopped");
        Ok(())
    }

    async fn health_check(&self) -> TriggerHealth {
        let active = self.state.is_active().await;
        self.state
            .base_health(TriggerKind::Webhook)
            .await
            .with_detail("webhook_path", json!(self.webhook_path))
            .with_detail("webhook_url", json!(self.get_webhook_url()))
            .with_detail("methods", json!(self.methods))
            .with_detail("require_auth", json!(self.require_auth))
            .with_detail("ready_for_webhooks", json!(self.state.enabled && active))
    }
}
