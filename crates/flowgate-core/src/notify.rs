// Best-effort user notification on trigger fires

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::trigger::TriggerKind;

/// Outbound notification channel. Callers treat every failure as
/// non-fatal: a notifier error must never fail the trigger that fired.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_trigger_notification(
        &self,
        workflow_id: Uuid,
        trigger_type: TriggerKind,
        trigger_data: &Value,
    ) -> Result<()>;
}
