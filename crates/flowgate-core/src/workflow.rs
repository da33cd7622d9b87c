// Workflow, node and connection types

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Top-level node kind. Executors are registered per kind and dispatch
/// internally on `subtype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Trigger,
    AiAgent,
    ExternalAction,
    Action,
    Flow,
    HumanInTheLoop,
    Tool,
    Memory,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Trigger => "TRIGGER",
            NodeType::AiAgent => "AI_AGENT",
            NodeType::ExternalAction => "EXTERNAL_ACTION",
            NodeType::Action => "ACTION",
            NodeType::Flow => "FLOW",
            NodeType::HumanInTheLoop => "HUMAN_IN_THE_LOOP",
            NodeType::Tool => "TOOL",
            NodeType::Memory => "MEMORY",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "TRIGGER" => Ok(NodeType::Trigger),
            "AI_AGENT" => Ok(NodeType::AiAgent),
            "EXTERNAL_ACTION" => Ok(NodeType::ExternalAction),
            "ACTION" => Ok(NodeType::Action),
            "FLOW" => Ok(NodeType::Flow),
            "HUMAN_IN_THE_LOOP" => Ok(NodeType::HumanInTheLoop),
            "TOOL" => Ok(NodeType::Tool),
            "MEMORY" => Ok(NodeType::Memory),
            other => Err(Error::validation(format!("unknown node type: {other}"))),
        }
    }
}

/// What the engine does when a node fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorPolicy {
    #[default]
    StopWorkflowOnError,
    ContinueOnError,
    Retry,
}

/// Typed inter-node connection kind. `Memory` edges invert direction for
/// scheduling: the provider must run before the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Main,
    Memory,
    AiAgent,
    AiChain,
    AiDocument,
    AiEmbedding,
    AiLanguageModel,
    AiMemory,
    AiOutputParser,
    AiRetriever,
    AiReranker,
    AiTextSplitter,
    AiTool,
    AiVectorStore,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Main => "main",
            ConnectionType::Memory => "memory",
            ConnectionType::AiAgent => "ai_agent",
            ConnectionType::AiChain => "ai_chain",
            ConnectionType::AiDocument => "ai_document",
            ConnectionType::AiEmbedding => "ai_embedding",
            ConnectionType::AiLanguageModel => "ai_language_model",
            ConnectionType::AiMemory => "ai_memory",
            ConnectionType::AiOutputParser => "ai_output_parser",
            ConnectionType::AiRetriever => "ai_retriever",
            ConnectionType::AiReranker => "ai_reranker",
            ConnectionType::AiTextSplitter => "ai_text_splitter",
            ConnectionType::AiTool => "ai_tool",
            ConnectionType::AiVectorStore => "ai_vector_store",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outgoing edge of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Target node id
    pub node: String,
    /// Output port index on the source node
    #[serde(default)]
    pub index: u32,
}

impl Connection {
    pub fn to(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            index: 0,
        }
    }
}

/// `source_node_id -> connection_type -> [targets]`
pub type ConnectionsMap = BTreeMap<String, BTreeMap<ConnectionType, Vec<Connection>>>;

/// A single node within a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub credentials: Map<String, Value>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub on_error: ErrorPolicy,
}

impl Node {
    pub fn new(name: impl Into<String>, node_type: NodeType, subtype: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            node_type,
            subtype: subtype.into(),
            parameters: Map::new(),
            credentials: Map::new(),
            disabled: false,
            on_error: ErrorPolicy::default(),
        }
    }

    /// Builder-style parameter setter, mostly used by tests
    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn parameter_bool(&self, key: &str, default: bool) -> bool {
        self.parameters
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    pub fn parameter_u64(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(Value::as_u64)
    }
}

/// Workflow-scoped execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Overall execution timeout
    pub timeout_seconds: Option<u64>,
    /// Retry budget for nodes with `on_error = RETRY`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff between retries, doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: None,
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// A deployable workflow definition. Owns its nodes and connections; an
/// execution only references a snapshot of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: ConnectionsMap,
    #[serde(default)]
    pub settings: WorkflowSettings,
    /// Static workflow-scoped variables visible to every executor
    #[serde(default)]
    pub static_data: Map<String, Value>,
}

impl Workflow {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            name: name.into(),
            version: 1,
            active: true,
            tags: Vec::new(),
            nodes: Vec::new(),
            connections: ConnectionsMap::new(),
            settings: WorkflowSettings::default(),
            static_data: Map::new(),
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Enabled trigger nodes of this workflow
    pub fn trigger_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Trigger)
    }

    /// Structural validation: referenced nodes exist, node names are unique,
    /// connection indexes are well-formed by construction (u32).
    pub fn validate(&self) -> Result<()> {
        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();

        let mut names = HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return Err(Error::validation(format!(
                    "duplicate node name: {}",
                    node.name
                )));
            }
        }

        for (source, by_type) in &self.connections {
            if !ids.contains(source.as_str()) {
                return Err(Error::validation(format!(
                    "connection source references unknown node: {source}"
                )));
            }
            for targets in by_type.values() {
                for conn in targets {
                    if !ids.contains(conn.node.as_str()) {
                        return Err(Error::validation(format!(
                            "connection target references unknown node: {}",
                            conn.node
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Add a typed connection between two nodes (test and builder helper)
    pub fn connect(&mut self, source: &str, conn_type: ConnectionType, target: &str) {
        self.connections
            .entry(source.to_string())
            .or_default()
            .entry(conn_type)
            .or_default()
            .push(Connection::to(target));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_round_trips_through_strings() {
        for ty in [
            NodeType::Trigger,
            NodeType::AiAgent,
            NodeType::ExternalAction,
            NodeType::Action,
            NodeType::Flow,
            NodeType::HumanInTheLoop,
            NodeType::Tool,
            NodeType::Memory,
        ] {
            assert_eq!(ty.as_str().parse::<NodeType>().unwrap(), ty);
        }
    }

    #[test]
    fn connection_type_serde_names() {
        let json = serde_json::to_string(&ConnectionType::AiLanguageModel).unwrap();
        assert_eq!(json, "\"ai_language_model\"");
        let back: ConnectionType = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(back, ConnectionType::Memory);
    }

    #[test]
    fn validate_rejects_dangling_connection_target() {
        let mut wf = Workflow::new("u1", "test");
        let mut a = Node::new("A", NodeType::Trigger, "manual");
        a.id = "trigger_manual_00000001".into();
        wf.nodes.push(a);
        wf.connect("trigger_manual_00000001", ConnectionType::Main, "missing");
        assert!(wf.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_names() {
        let mut wf = Workflow::new("u1", "test");
        let mut a = Node::new("same", NodeType::Action, "noop");
        a.id = "action_noop_00000001".into();
        let mut b = Node::new("same", NodeType::Action, "noop");
        b.id = "action_noop_00000002".into();
        wf.nodes.push(a);
        wf.nodes.push(b);
        assert!(wf.validate().is_err());
    }

    #[test]
    fn workflow_deserializes_with_defaults() {
        let wf: Workflow = serde_json::from_value(serde_json::json!({
            "id": "7b1c8d5e-0f3a-4b6c-9d2e-1f4a5b6c7d8e",
            "user_id": "u1",
            "name": "minimal",
            "nodes": [
                {"name": "start", "type": "TRIGGER", "subtype": "manual"}
            ]
        }))
        .unwrap();
        assert_eq!(wf.settings.max_retries, 3);
        assert!(!wf.active);
        assert_eq!(wf.nodes[0].on_error, ErrorPolicy::StopWorkflowOnError);
    }
}
