// Manual trigger: fires only on an authenticated caller's request

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use flowgate_core::{
    DispatchOutcome, Result, TriggerHealth, TriggerKind, TriggerStatus,
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::trigger::{Trigger, TriggerContext, TriggerState};

pub struct ManualTrigger {
    state: TriggerState,
    context: Arc<TriggerContext>,
}

impl ManualTrigger {
    pub fn new(workflow_id: Uuid, enabled: bool, context: Arc<TriggerContext>) -> Self {
        Self {
            state: TriggerState::new(workflow_id, enabled),
            context,
        }
    }

    /// Fire the workflow on behalf of `user_id`. Rejects when the trigger is
    /// disabled or not ACTIVE; no dispatch call is made in either case.
    pub async fn trigger_manual(
        &self,
        user_id: &str,
        access_token: Option<&str>,
    ) -> DispatchOutcome {
        if !self.state.enabled {
            return DispatchOutcome::error("Manual trigger is disabled");
        }

        let status = self.state.status().await;
        if status != TriggerStatus::Active {
            return DispatchOutcome::error(format!(
                "Manual trigger is not active (status: {status})"
            ));
        }

        let trigger_data = json!({
            "trigger_type": "manual",
            "user_id": user_id,
            "triggered_at": Utc::now().to_rfc3339(),
        });

        self.context
            .fire_with_token(
                self.state.workflow_id,
                TriggerKind::Manual,
                self.state.enabled,
                trigger_data,
                access_token,
            )
            .await
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &TriggerState {
        &self.state
    }
}

#[async_trait]
impl Trigger for ManualTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Manual
    }

    fn workflow_id(&self) -> Uuid {
        self.state.workflow_id
    }

    async fn start(&self) -> Result<()> {
        if !self.state.enabled {
            info!(workflow_id = %self.state.workflow_id, "manual trigger disabled");
            self.state.set_status(TriggerStatus::Paused).await;
            return Ok(());
        }

        self.state.set_status(TriggerStatus::Active).await;
        info!(workflow_id = %self.state.workflow_id, "manual trigger started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.state.set_status(TriggerStatus::Stopped).await;
        info!(workflow_id = %self.state.workflow_id, "manual trigger stopped");
        Ok(())
    }

    async fn health_check(&self) -> TriggerHealth {
        let active = self.state.is_active().await;
        self.state
            .base_health(TriggerKind::Manual)
            .await
            .with_detail(
                "ready_for_execution",
                json!(self.state.enabled && active),
            )
    }
}
