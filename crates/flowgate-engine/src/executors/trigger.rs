// Trigger node executor: the entry node just hands the trigger payload on

use async_trait::async_trait;
use flowgate_core::Node;

use super::NodeExecutor;
use crate::context::{NodeExecutionContext, NodeExecutionResult};

pub struct TriggerNodeExecutor;

#[async_trait]
impl NodeExecutor for TriggerNodeExecutor {
    fn supported_subtypes(&self) -> Vec<&'static str> {
        vec!["manual", "webhook", "cron", "github", "slack", "email"]
    }

    fn validate(&self, _node: &Node) -> Vec<String> {
        Vec::new()
    }

    async fn execute(&self, context: &NodeExecutionContext) -> NodeExecutionResult {
        NodeExecutionResult::success(context.input_data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NodeStatus;
    use flowgate_core::NodeType;
    use serde_json::{json, Map};
    use uuid::Uuid;

    #[tokio::test]
    async fn passes_trigger_data_through() {
        let mut input = Map::new();
        input.insert("trigger_type".into(), json!("webhook"));
        input.insert("body".into(), json!({"key": "value"}));

        let context = NodeExecutionContext {
            node: Node::new("start", NodeType::Trigger, "webhook"),
            workflow_id: Uuid::new_v4(),
            execution_id: "exec_test".into(),
            user_id: "u1".into(),
            input_data: input.clone(),
            static_data: Map::new(),
            metadata: Map::new(),
        };

        let result = TriggerNodeExecutor.execute(&context).await;
        assert_eq!(result.status, NodeStatus::Success);
        assert_eq!(result.output_data, input);
    }
}
