// Node executor contract and registry
//
// One executor is registered per top-level node type; each dispatches
// internally on subtype. AI_AGENT and EXTERNAL_ACTION executors are provided
// by the host — registering them here would drag provider SDKs into the
// engine.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use flowgate_core::{CredentialProvider, Node, NodeType, Workflow};

use crate::context::{NodeExecutionContext, NodeExecutionResult};

mod action;
mod flow;
mod human_loop;
mod memory;
mod tool;
mod trigger;

pub use action::ActionNodeExecutor;
pub use flow::FlowNodeExecutor;
pub use human_loop::HumanLoopNodeExecutor;
pub use memory::MemoryNodeExecutor;
pub use tool::ToolNodeExecutor;
pub use trigger::TriggerNodeExecutor;

/// A polymorphic node executor. Implementations must not panic; failures are
/// result values.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Subtypes this executor accepts. Empty means any subtype.
    fn supported_subtypes(&self) -> Vec<&'static str>;

    /// Configuration errors for `node`, checked at workflow save time
    fn validate(&self, node: &Node) -> Vec<String>;

    async fn execute(&self, context: &NodeExecutionContext) -> NodeExecutionResult;

    fn can_execute(&self, node: &Node) -> bool {
        let subtypes = self.supported_subtypes();
        subtypes.is_empty() || subtypes.contains(&node.subtype.as_str())
    }
}

/// Process-wide registry mapping node types to executors
#[derive(Clone, Default)]
pub struct NodeExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl NodeExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in executors registered. `credentials` feeds
    /// the executors that reach external services.
    pub fn with_builtins(credentials: Arc<dyn CredentialProvider>) -> Self {
        let mut registry = Self::new();
        registry.register(NodeType::Trigger, Arc::new(TriggerNodeExecutor));
        registry.register(NodeType::Action, Arc::new(ActionNodeExecutor));
        registry.register(NodeType::Flow, Arc::new(FlowNodeExecutor));
        registry.register(NodeType::HumanInTheLoop, Arc::new(HumanLoopNodeExecutor));
        registry.register(NodeType::Tool, Arc::new(ToolNodeExecutor::new(credentials)));
        registry.register(NodeType::Memory, Arc::new(MemoryNodeExecutor));
        registry
    }

    pub fn register(&mut self, node_type: NodeType, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(node_type, executor);
    }

    pub fn get(&self, node_type: NodeType) -> Option<&Arc<dyn NodeExecutor>> {
        self.executors.get(&node_type)
    }

    pub fn has(&self, node_type: NodeType) -> bool {
        self.executors.contains_key(&node_type)
    }

    /// Save-time validation of one node: unknown (type, subtype) pairs and
    /// executor-specific configuration errors.
    pub fn validate_node(&self, node: &Node) -> Vec<String> {
        match self.get(node.node_type) {
            None => vec![format!(
                "no executor registered for node type {}",
                node.node_type
            )],
            Some(executor) => {
                if !executor.can_execute(node) {
                    return vec![format!(
                        "unsupported subtype {:?} for node type {}",
                        node.subtype, node.node_type
                    )];
                }
                executor.validate(node)
            }
        }
    }

    /// Save-time validation of a whole workflow, errors prefixed by node id
    pub fn validate_workflow(&self, workflow: &Workflow) -> Vec<String> {
        workflow
            .nodes
            .iter()
            .flat_map(|node| {
                self.validate_node(node)
                    .into_iter()
                    .map(move |e| format!("{}: {}", node.id, e))
            })
            .collect()
    }
}

impl std::fmt::Debug for NodeExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types: Vec<_> = self.executors.keys().collect();
        f.debug_struct("NodeExecutorRegistry")
            .field("node_types", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_core::NoCredentials;

    #[test]
    fn builtins_cover_the_in_scope_types() {
        let registry = NodeExecutorRegistry::with_builtins(Arc::new(NoCredentials));
        assert!(registry.has(NodeType::Trigger));
        assert!(registry.has(NodeType::Action));
        assert!(registry.has(NodeType::Flow));
        assert!(registry.has(NodeType::HumanInTheLoop));
        assert!(registry.has(NodeType::Tool));
        assert!(registry.has(NodeType::Memory));
        // Host-registered types stay absent by default
        assert!(!registry.has(NodeType::AiAgent));
        assert!(!registry.has(NodeType::ExternalAction));
    }

    #[test]
    fn validate_flags_unknown_type_and_subtype() {
        let registry = NodeExecutorRegistry::with_builtins(Arc::new(NoCredentials));

        let mut node = Node::new("agent", NodeType::AiAgent, "router");
        node.id = "ai_agent_router_00000001".into();
        let errors = registry.validate_node(&node);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("no executor"));

        let mut node = Node::new("bad", NodeType::Action, "teleport");
        node.id = "action_teleport_00000001".into();
        let errors = registry.validate_node(&node);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("unsupported subtype"));
    }
}
