// Persistence seam used by the engine, the state manager and the triggers

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::execution::{Execution, PauseRecord};
use crate::workflow::Workflow;

/// Severity of a user-visible progress log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

/// One row of the user-visible execution progress log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub execution_id: String,
    pub created_at: DateTime<Utc>,
    pub event_type: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub data: Value,
    pub node_id: Option<String>,
    pub node_name: Option<String>,
    pub node_type: Option<String>,
    pub step_number: Option<u32>,
    pub total_steps: Option<u32>,
    pub duration_seconds: Option<f64>,
}

impl ExecutionLogEntry {
    pub fn new(
        execution_id: impl Into<String>,
        event_type: impl Into<String>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            created_at: Utc::now(),
            event_type: event_type.into(),
            level,
            message: message.into(),
            data: Value::Null,
            node_id: None,
            node_name: None,
            node_type: None,
            step_number: None,
            total_steps: None,
            duration_seconds: None,
        }
    }
}

/// Append-only audit row for outbound API calls. Metadata only — callers
/// must redact sensitive request fields before constructing one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallLog {
    pub provider: String,
    pub method: String,
    pub url: String,
    pub status_code: Option<u16>,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub request_summary: Value,
    #[serde(default)]
    pub response_summary: Value,
    pub error: Option<String>,
    pub called_at: DateTime<Utc>,
}

/// Persistence operations the orchestration service depends on.
///
/// Implementations enforce the at-most-one-active-pause invariant in
/// `insert_pause`.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_workflow(&self, workflow_id: Uuid) -> Result<Option<Workflow>>;

    async fn insert_execution(&self, execution: &Execution) -> Result<()>;

    async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>>;

    async fn update_execution(&self, execution: &Execution) -> Result<()>;

    /// Persist a new pause record. Fails when an active record already
    /// exists for the execution.
    async fn insert_pause(&self, pause: &PauseRecord) -> Result<()>;

    async fn active_pause(&self, execution_id: &str) -> Result<Option<PauseRecord>>;

    async fn update_pause(&self, pause: &PauseRecord) -> Result<()>;

    /// Active pause records whose `timeout_at` has passed
    async fn expired_active_pauses(&self, now: DateTime<Utc>) -> Result<Vec<PauseRecord>>;

    /// Active pause records expiring in the window `(now, deadline]`
    async fn active_pauses_expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<PauseRecord>>;

    async fn append_execution_log(&self, entry: &ExecutionLogEntry) -> Result<()>;

    async fn append_api_call_log(&self, entry: &ApiCallLog) -> Result<()>;
}
