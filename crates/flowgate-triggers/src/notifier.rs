// Default notifier implementation

use async_trait::async_trait;
use flowgate_core::{Notifier, Result, TriggerKind};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

/// Logs trigger notifications instead of delivering them anywhere. Stands in
/// until a real channel (email, chat) is wired up.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send_trigger_notification(
        &self,
        workflow_id: Uuid,
        trigger_type: TriggerKind,
        _trigger_data: &Value,
    ) -> Result<()> {
        info!(%workflow_id, trigger_type = %trigger_type, "workflow triggered");
        Ok(())
    }
}
