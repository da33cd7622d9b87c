// Memory node executor
//
// Memory providers run before their consumers (the scheduler inverts memory
// edges) and expose their context flatly, because downstream agents read
// memory fields straight off their input map.

use async_trait::async_trait;
use flowgate_core::Node;
use serde_json::{json, Map, Value};

use super::NodeExecutor;
use crate::context::{NodeExecutionContext, NodeExecutionResult};

pub struct MemoryNodeExecutor;

#[async_trait]
impl NodeExecutor for MemoryNodeExecutor {
    fn supported_subtypes(&self) -> Vec<&'static str> {
        vec!["buffer", "key_value"]
    }

    fn validate(&self, node: &Node) -> Vec<String> {
        if node.subtype == "key_value" && !matches!(node.parameter("entries"), Some(Value::Object(_)))
        {
            return vec!["parameter 'entries' must be an object".to_string()];
        }
        Vec::new()
    }

    async fn execute(&self, context: &NodeExecutionContext) -> NodeExecutionResult {
        let mut output = Map::new();
        output.insert("memory_type".into(), json!(context.node.subtype));

        match context.node.subtype.as_str() {
            "buffer" => {
                // Recent messages from parameters, latest input message appended
                let mut lines: Vec<String> = context
                    .parameter("messages")
                    .and_then(Value::as_array)
                    .map(|messages| {
                        messages
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();

                if let Some(message) = context.input("message").and_then(Value::as_str) {
                    lines.push(message.to_string());
                }

                let memory_context = lines.join("\n");
                output.insert("formatted_context".into(), json!(format!("Conversation so far:\n{memory_context}")));
                output.insert("memory_context".into(), json!(memory_context));
            }
            "key_value" => {
                if let Some(Value::Object(entries)) = context.parameter("entries") {
                    for (key, value) in entries {
                        output.insert(key.clone(), value.clone());
                    }
                    let memory_context = entries
                        .iter()
                        .map(|(k, v)| format!("{k}: {v}"))
                        .collect::<Vec<_>>()
                        .join("\n");
                    output.insert("memory_context".into(), json!(memory_context));
                }
            }
            other => {
                return NodeExecutionResult::error(format!("unknown memory subtype: {other}"));
            }
        }

        NodeExecutionResult::success(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NodeStatus;
    use flowgate_core::NodeType;
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
    async fn buffer_memory_appends_latest_message() {
        let node = Node::new("mem", NodeType::Memory, "buffer")
            .with_parameter("messages", json!(["hello", "how can I help?"]));
        let mut input = Map::new();
        input.insert("message".into(), json!("deploy please"));

        let result = MemoryNodeExecutor.execute(&context(node, input)).await;
        assert_eq!(result.status, NodeStatus::Success);
        let memory = result.output_data["memory_context"].as_str().unwrap();
        assert!(memory.ends_with("deploy please"));
        assert!(result.output_data["formatted_context"]
            .as_str()
            .unwrap()
            .starts_with("Conversation so far:"));
    }

    #[tokio::test]
    async fn key_value_memory_exposes_entries_flatly() {
        let node = Node::new("mem", NodeType::Memory, "key_value")
            .with_parameter("entries", json!({"project": "flowgate", "env": "prod"}));

        let result = MemoryNodeExecutor.execute(&context(node, Map::new())).await;
        assert_eq!(result.output_data["project"], json!("flowgate"));
        assert_eq!(result.output_data["env"], json!("prod"));
        assert!(result.output_data.contains_key("memory_context"));
    }
}
