// Node execution context and result values

use std::time::Duration;

use flowgate_core::{Node, PauseReason};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Everything an executor may read while running one node
#[derive(Debug, Clone)]
pub struct NodeExecutionContext {
    pub node: Node,
    pub workflow_id: Uuid,
    pub execution_id: String,
    pub user_id: String,
    /// Assembled input map (trigger data or merged upstream outputs)
    pub input_data: Map<String, Value>,
    /// Workflow-scoped static variables
    pub static_data: Map<String, Value>,
    pub metadata: Map<String, Value>,
}

impl NodeExecutionContext {
    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.node.parameters.get(key)
    }

    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.node.parameter_str(key)
    }

    pub fn input(&self, key: &str) -> Option<&Value> {
        self.input_data.get(key)
    }
}

/// Terminal status of one node execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Success,
    Error,
    Skipped,
    Cancelled,
    Paused,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Success => "SUCCESS",
            NodeStatus::Error => "ERROR",
            NodeStatus::Skipped => "SKIPPED",
            NodeStatus::Cancelled => "CANCELLED",
            NodeStatus::Paused => "PAUSED",
        }
    }
}

/// HIL pause requested by an executor
#[derive(Debug, Clone)]
pub struct PauseRequest {
    pub reason: PauseReason,
    pub resume_conditions: Map<String, Value>,
    pub timeout: Option<Duration>,
}

/// What one node execution produced
#[derive(Debug, Clone)]
pub struct NodeExecutionResult {
    pub status: NodeStatus,
    pub output_data: Map<String, Value>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub logs: Vec<String>,
    pub metadata: Map<String, Value>,
    /// Wall-clock run time, canonical integer milliseconds
    pub execution_time_ms: u64,
    pub pause: Option<PauseRequest>,
}

impl NodeExecutionResult {
    pub fn success(output_data: Map<String, Value>) -> Self {
        Self {
            status: NodeStatus::Success,
            output_data,
            error_message: None,
            error_details: None,
            logs: Vec::new(),
            metadata: Map::new(),
            execution_time_ms: 0,
            pause: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Error,
            output_data: Map::new(),
            error_message: Some(message.into()),
            error_details: None,
            logs: Vec::new(),
            metadata: Map::new(),
            execution_time_ms: 0,
            pause: None,
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: NodeStatus::Skipped,
            output_data: Map::new(),
            error_message: None,
            error_details: None,
            logs: Vec::new(),
            metadata: Map::new(),
            execution_time_ms: 0,
            pause: None,
        }
    }

    pub fn paused(
        reason: PauseReason,
        resume_conditions: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            status: NodeStatus::Paused,
            output_data: Map::new(),
            error_message: None,
            error_details: None,
            logs: Vec::new(),
            metadata: Map::new(),
            execution_time_ms: 0,
            pause: Some(PauseRequest {
                reason,
                resume_conditions,
                timeout,
            }),
        }
    }

    pub fn with_error_details(mut self, details: Value) -> Self {
        self.error_details = Some(details);
        self
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }

    /// Whether the retry policy may re-attempt this node
    pub fn is_retryable(&self) -> bool {
        self.status == NodeStatus::Error
            && self
                .error_details
                .as_ref()
                .and_then(|d| d.get("retryable"))
                .and_then(Value::as_bool)
                .unwrap_or(true)
    }
}
