// Flow node executor: branching and gating

use std::time::Duration;

use async_trait::async_trait;
use flowgate_core::Node;
use serde_json::{json, Value};

use super::NodeExecutor;
use crate::context::{NodeExecutionContext, NodeExecutionResult};

pub struct FlowNodeExecutor;

#[async_trait]
impl NodeExecutor for FlowNodeExecutor {
    fn supported_subtypes(&self) -> Vec<&'static str> {
        vec!["if_condition", "filter", "merge", "wait"]
    }

    fn validate(&self, node: &Node) -> Vec<String> {
        let mut errors = Vec::new();
        if matches!(node.subtype.as_str(), "if_condition" | "filter") {
            if node.parameter_str("field").is_none() {
                errors.push("missing required parameter: field".to_string());
            }
            if let Some(op) = node.parameter_str("operator") {
                if !matches!(op, "eq" | "ne" | "contains" | "exists") {
                    errors.push(format!("unknown operator: {op}"));
                }
            }
        }
        errors
    }

    async fn execute(&self, context: &NodeExecutionContext) -> NodeExecutionResult {
        match context.node.subtype.as_str() {
            "merge" => NodeExecutionResult::success(context.input_data.clone()),
            "wait" => {
                let duration_ms = context.node.parameter_u64("duration_ms").unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(duration_ms)).await;
                NodeExecutionResult::success(context.input_data.clone())
            }
            "if_condition" => {
                let matched = evaluate(context);
                let mut output = context.input_data.clone();
                output.insert("condition_result".into(), json!(matched));
                NodeExecutionResult::success(output)
            }
            "filter" => {
                if evaluate(context) {
                    NodeExecutionResult::success(context.input_data.clone())
                } else {
                    NodeExecutionResult::skipped()
                }
            }
            other => NodeExecutionResult::error(format!("unknown flow subtype: {other}")),
        }
    }
}

/// Evaluate the node's predicate against its input. Missing fields compare
/// as null; the default operator is `eq`.
fn evaluate(context: &NodeExecutionContext) -> bool {
    let Some(field) = context.parameter_str("field") else {
        return false;
    };
    let operator = context.parameter_str("operator").unwrap_or("eq");
    let expected = context.parameter("value").cloned().unwrap_or(Value::Null);
    let actual = context.input(field).cloned().unwrap_or(Value::Null);

    match operator {
        "eq" => actual == expected,
        "ne" => actual != expected,
        "exists" => !actual.is_null(),
        "contains" => match (&actual, &expected) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.contains(needle),
            _ => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NodeStatus;
    use flowgate_core::NodeType;
    use serde_json::Map;
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
    async fn if_condition_annotates_result() {
        let node = Node::new("gate", NodeType::Flow, "if_condition")
            .with_parameter("field", json!("state"))
            .with_parameter("value", json!("open"));
        let mut input = Map::new();
        input.insert("state".into(), json!("open"));

        let result = FlowNodeExecutor.execute(&context(node, input)).await;
        assert_eq!(result.status, NodeStatus::Success);
        assert_eq!(result.output_data["condition_result"], json!(true));
    }

    #[tokio::test]
    async fn filter_skips_non_matching_input() {
        let node = Node::new("gate", NodeType::Flow, "filter")
            .with_parameter("field", json!("state"))
            .with_parameter("value", json!("open"));
        let mut input = Map::new();
        input.insert("state".into(), json!("closed"));

        let result = FlowNodeExecutor.execute(&context(node, input)).await;
        assert_eq!(result.status, NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn contains_works_on_strings_and_arrays() {
        let node = Node::new("gate", NodeType::Flow, "if_condition")
            .with_parameter("field", json!("labels"))
            .with_parameter("operator", json!("contains"))
            .with_parameter("value", json!("bug"));
        let mut input = Map::new();
        input.insert("labels".into(), json!(["bug", "urgent"]));

        let result = FlowNodeExecutor.execute(&context(node, input)).await;
        assert_eq!(result.output_data["condition_result"], json!(true));
    }

    #[test]
    fn validation_rejects_unknown_operator() {
        let node = Node::new("gate", NodeType::Flow, "filter")
            .with_parameter("field", json!("x"))
            .with_parameter("operator", json!("regex"));
        let errors = FlowNodeExecutor.validate(&node);
        assert_eq!(errors, vec!["unknown operator: regex"]);
    }
}
