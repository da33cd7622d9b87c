// Human-in-the-loop node executor
//
// First pass over the node pauses the execution; the resume path re-runs the
// node with the human response merged into its input, which is how the node
// knows it has been answered.

use std::time::Duration;

use async_trait::async_trait;
use flowgate_core::{Node, PauseReason};
use serde_json::{Map, Value};

use super::NodeExecutor;
use crate::context::{NodeExecutionContext, NodeExecutionResult};

pub struct HumanLoopNodeExecutor;

impl HumanLoopNodeExecutor {
    /// The input key whose presence marks the node as answered
    fn response_field(node: &Node) -> &str {
        node.parameter_str("response_field").unwrap_or(match node.subtype.as_str() {
            "approval" => "approved",
            _ => "response",
        })
    }
}

#[async_trait]
impl NodeExecutor for HumanLoopNodeExecutor {
    fn supported_subtypes(&self) -> Vec<&'static str> {
        vec!["approval", "input"]
    }

    fn validate(&self, node: &Node) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(action) = node.parameter_str("timeout_action") {
            if !matches!(action, "resume" | "cancel" | "fail") {
                errors.push(format!("unknown timeout_action: {action}"));
            }
        }
        if node.parameter("timeout_seconds").is_some()
            && node.parameter_u64("timeout_seconds").is_none()
        {
            errors.push("parameter 'timeout_seconds' must be a non-negative integer".to_string());
        }
        errors
    }

    async fn execute(&self, context: &NodeExecutionContext) -> NodeExecutionResult {
        let response_field = Self::response_field(&context.node);

        // Already answered (resume path): pass the response downstream
        if context.input_data.contains_key(response_field) {
            return NodeExecutionResult::success(context.input_data.clone());
        }

        let mut resume_conditions = Map::new();
        resume_conditions.insert(response_field.to_string(), Value::Null);
        if let Some(action) = context.parameter_str("timeout_action") {
            resume_conditions.insert("timeout_action".into(), Value::String(action.to_string()));
        }
        if let Some(default_data) = context.parameter("timeout_default_data") {
            resume_conditions.insert("timeout_default_data".into(), default_data.clone());
        }

        let timeout = context
            .node
            .parameter_u64("timeout_seconds")
            .map(Duration::from_secs);

        NodeExecutionResult::paused(PauseReason::HumanInteraction, resume_conditions, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NodeStatus;
    use flowgate_core::NodeType;
    use serde_json::json;
    use uuid::Uuid;

    fn context(node: Node, input: Map<String, Value>) -> NodeExecutionContext {
        NodeExecutionContext {
            node,
            workflow_id: Uuid::new_v4(),
            execution_id: "exec_test".into(),
            user_id: "u1".into(),
            input_data: input,
            static_data: Map::new(),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn first_pass_pauses_with_policy() {
        let node = Node::new("approve", NodeType::HumanInTheLoop, "approval")
            .with_parameter("timeout_seconds", json!(3600))
            .with_parameter("timeout_action", json!("resume"))
            .with_parameter("timeout_default_data", json!({"approved": false}));

        let result = HumanLoopNodeExecutor.execute(&context(node, Map::new())).await;
        assert_eq!(result.status, NodeStatus::Paused);

        let pause = result.pause.unwrap();
        assert_eq!(pause.reason, PauseReason::HumanInteraction);
        assert_eq!(pause.timeout, Some(Duration::from_secs(3600)));
        assert_eq!(pause.resume_conditions["timeout_action"], json!("resume"));
        assert_eq!(
            pause.resume_conditions["timeout_default_data"],
            json!({"approved": false})
        );
        assert!(pause.resume_conditions.contains_key("approved"));
    }

    #[tokio::test]
    async fn answered_input_passes_through() {
        let node = Node::new("approve", NodeType::HumanInTheLoop, "approval");
        let mut input = Map::new();
        input.insert("approved".into(), json!(false));

        let result = HumanLoopNodeExecutor.execute(&context(node, input)).await;
        assert_eq!(result.status, NodeStatus::Success);
        assert_eq!(result.output_data["approved"], json!(false));
    }

    #[test]
    fn validation_rejects_bad_timeout_action() {
        let node = Node::new("approve", NodeType::HumanInTheLoop, "approval")
            .with_parameter("timeout_action", json!("explode"));
        assert_eq!(
            HumanLoopNodeExecutor.validate(&node),
            vec!["unknown timeout_action: explode"]
        );
    }
}
