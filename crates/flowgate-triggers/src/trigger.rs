// The trigger capability set and the shared fire path

use std::sync::Arc;

use async_trait::async_trait;
use flowgate_core::{
    DispatchOutcome, DispatchStatus, LockManager, Notifier, Result, TriggerHealth, TriggerKind,
    TriggerStatus,
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::dispatcher::Dispatcher;

/// Capability set every trigger variant implements
#[async_trait]
pub trait Trigger: Send + Sync {
    fn kind(&self) -> TriggerKind;

    fn workflow_id(&self) -> Uuid;

    /// Idempotent. PENDING -> ACTIVE, or PAUSED when the trigger is
    /// disabled. A failed start leaves the trigger in ERROR.
    async fn start(&self) -> Result<()>;

    /// Idempotent. Transitions to STOPPED and releases resources.
    async fn stop(&self) -> Result<()>;

    async fn health_check(&self) -> TriggerHealth;
}

/// Lifecycle state shared by all trigger variants
pub struct TriggerState {
    pub workflow_id: Uuid,
    pub enabled: bool,
    status: RwLock<TriggerStatus>,
}

impl TriggerState {
    pub fn new(workflow_id: Uuid, enabled: bool) -> Self {
        Self {
            workflow_id,
            enabled,
            status: RwLock::new(TriggerStatus::Pending),
        }
    }

    pub async fn status(&self) -> TriggerStatus {
        *self.status.read().await
    }

    pub async fn set_status(&self, status: TriggerStatus) {
        *self.status.write().await = status;
    }

    pub async fn is_active(&self) -> bool {
        self.status().await == TriggerStatus::Active
    }

    pub async fn base_health(&self, kind: TriggerKind) -> TriggerHealth {
        TriggerHealth::new(kind, self.workflow_id, self.status().await, self.enabled)
    }
}

/// Shared collaborators injected into every trigger
pub struct TriggerContext {
    pub dispatcher: Arc<Dispatcher>,
    pub notifier: Arc<dyn Notifier>,
    pub locks: Arc<dyn LockManager>,
}

impl TriggerContext {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        notifier: Arc<dyn Notifier>,
        locks: Arc<dyn LockManager>,
    ) -> Self {
        Self {
            dispatcher,
            notifier,
            locks,
        }
    }

    /// The common fire path: disabled triggers skip without any HTTP call;
    /// a successful dispatch sends a best-effort notification whose failure
    /// never propagates.
    pub async fn fire(
        &self,
        workflow_id: Uuid,
        kind: TriggerKind,
        enabled: bool,
        trigger_data: Value,
    ) -> DispatchOutcome {
        self.fire_with_token(workflow_id, kind, enabled, trigger_data, None)
            .await
    }

    pub async fn fire_with_token(
        &self,
        workflow_id: Uuid,
        kind: TriggerKind,
        enabled: bool,
        trigger_data: Value,
        access_token: Option<&str>,
    ) -> DispatchOutcome {
        if !enabled {
            warn!(%workflow_id, kind = %kind, "trigger is disabled, skipping dispatch");
            return DispatchOutcome::skipped("Trigger is disabled");
        }

        let outcome = self
            .dispatcher
            .dispatch(workflow_id, kind, &trigger_data, access_token)
            .await;

        if outcome.status == DispatchStatus::Started {
            if let Err(e) = self
                .notifier
                .send_trigger_notification(workflow_id, kind, &trigger_data)
                .await
            {
                warn!(%workflow_id, "trigger notification failed (workflow still executed): {e}");
            }
        }

        outcome
    }
}
