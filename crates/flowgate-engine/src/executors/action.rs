// Action node executor: in-process data operations

use std::time::Duration;

use async_trait::async_trait;
use flowgate_core::Node;
use serde_json::{Map, Value};

use super::NodeExecutor;
use crate::context::{NodeExecutionContext, NodeExecutionResult};

pub struct ActionNodeExecutor;

#[async_trait]
impl NodeExecutor for ActionNodeExecutor {
    fn supported_subtypes(&self) -> Vec<&'static str> {
        vec!["noop", "data_transformation", "delay"]
    }

    fn validate(&self, node: &Node) -> Vec<String> {
        let mut errors = Vec::new();
        match node.subtype.as_str() {
            "data_transformation" => {
                match node.parameter("mapping") {
                    Some(Value::Object(_)) => {}
                    Some(_) => errors.push("parameter 'mapping' must be an object".to_string()),
                    None => errors.push("missing required parameter: mapping".to_string()),
                }
            }
            "delay" => {
                if node.parameter_u64("duration_ms").is_none() {
                    errors.push("missing required parameter: duration_ms".to_string());
                }
            }
            _ => {}
        }
        errors
    }

    async fn execute(&self, context: &NodeExecutionContext) -> NodeExecutionResult {
        match context.node.subtype.as_str() {
            "noop" => NodeExecutionResult::success(context.input_data.clone()),
            "delay" => {
                let duration_ms = context.node.parameter_u64("duration_ms").unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(duration_ms)).await;
                NodeExecutionResult::success(context.input_data.clone())
            }
            "data_transformation" => transform(context),
            other => NodeExecutionResult::error(format!("unknown action subtype: {other}")),
        }
    }
}

/// Build the output map from `mapping`: each entry maps an output key to a
/// dot-separated path into the input. With `passthrough = true` the input is
/// kept and mapped fields are layered on top.
fn transform(context: &NodeExecutionContext) -> NodeExecutionResult {
    let Some(Value::Object(mapping)) = context.parameter("mapping") else {
        return NodeExecutionResult::error("parameter 'mapping' must be an object");
    };

    let mut output = if context.node.parameter_bool("passthrough", false) {
        context.input_data.clone()
    } else {
        Map::new()
    };

    for (out_key, path) in mapping {
        let Some(path) = path.as_str() else {
            return NodeExecutionResult::error(format!(
                "mapping value for {out_key:?} must be a string path"
            ));
        };
        if let Some(value) = lookup_path(&context.input_data, path) {
            output.insert(out_key.clone(), value.clone());
        }
    }

    NodeExecutionResult::success(output)
}

fn lookup_path<'a>(input: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = input.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
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
    async fn transformation_maps_nested_paths() {
        let node = Node::new("map", NodeType::Action, "data_transformation").with_parameter(
            "mapping",
            json!({"author": "commit.author", "sha": "commit.id"}),
        );
        let mut input = Map::new();
        input.insert("commit".into(), json!({"author": "dev", "id": "abc123"}));

        let result = ActionNodeExecutor.execute(&context(node, input)).await;
        assert_eq!(result.status, NodeStatus::Success);
        assert_eq!(result.output_data["author"], json!("dev"));
        assert_eq!(result.output_data["sha"], json!("abc123"));
        assert!(result.output_data.get("commit").is_none());
    }

    #[tokio::test]
    async fn passthrough_keeps_input() {
        let node = Node::new("map", NodeType::Action, "data_transformation")
            .with_parameter("mapping", json!({"alias": "original"}))
            .with_parameter("passthrough", json!(true));
        let mut input = Map::new();
        input.insert("original".into(), json!(42));

        let result = ActionNodeExecutor.execute(&context(node, input)).await;
        assert_eq!(result.output_data["original"], json!(42));
        assert_eq!(result.output_data["alias"], json!(42));
    }

    #[test]
    fn validation_requires_mapping() {
        let node = Node::new("map", NodeType::Action, "data_transformation");
        let errors = ActionNodeExecutor.validate(&node);
        assert_eq!(errors, vec!["missing required parameter: mapping"]);
    }
}
