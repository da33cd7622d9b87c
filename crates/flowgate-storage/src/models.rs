// Database rows (internal, mapped to and from the domain types)

use std::str::FromStr;

use chrono::{DateTime, Utc};
use flowgate_core::{
    Error, Execution, ExecutionStatus, PauseReason, PauseRecord, PauseStatus, ResumeReason,
    Result, Workflow,
};
use sqlx::FromRow;
use uuid::Uuid;

/// Workflow row: identity columns plus the full definition as jsonb
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub version: i32,
    pub active: bool,
    pub tags: sqlx::types::JsonValue,
    pub workflow_data: sqlx::types::JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    /// Rebuild the domain workflow: definition from `workflow_data`, identity
    /// from the row columns (columns win — they are the queryable truth).
    pub fn into_workflow(self) -> Result<Workflow> {
        let mut workflow: Workflow = serde_json::from_value(self.workflow_data)
            .map_err(|e| Error::repository(format!("corrupt workflow_data: {e}")))?;
        workflow.id = self.id;
        workflow.user_id = self.user_id;
        workflow.name = self.name;
        workflow.version = self.version;
        workflow.active = self.active;
        workflow.tags = serde_json::from_value(self.tags).unwrap_or_default();
        Ok(workflow)
    }
}

/// Execution row for `workflow_executions`
#[derive(Debug, Clone, FromRow)]
pub struct ExecutionRow {
    pub execution_id: String,
    pub workflow_id: Uuid,
    pub user_id: String,
    pub status: String,
    pub trigger_source: Option<String>,
    pub trigger_data: sqlx::types::JsonValue,
    pub execution_data: sqlx::types::JsonValue,
    pub result_data: Option<sqlx::types::JsonValue>,
    pub error_data: Option<sqlx::types::JsonValue>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRow {
    pub fn into_execution(self) -> Result<Execution> {
        Ok(Execution {
            status: ExecutionStatus::from_str(&self.status)?,
            execution_id: self.execution_id,
            workflow_id: self.workflow_id,
            user_id: self.user_id,
            trigger_source: self.trigger_source,
            trigger_data: self.trigger_data,
            execution_data: self.execution_data,
            result_data: self.result_data,
            error_data: self.error_data,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            updated_at: self.updated_at,
        })
    }
}

/// Pause row for `workflow_execution_pauses`
#[derive(Debug, Clone, FromRow)]
pub struct PauseRow {
    pub id: Uuid,
    pub execution_id: String,
    pub paused_at: DateTime<Utc>,
    pub paused_node_id: String,
    pub pause_reason: String,
    pub resume_conditions: sqlx::types::JsonValue,
    pub status: String,
    pub timeout_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub resume_trigger: Option<String>,
    pub resume_data: Option<sqlx::types::JsonValue>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl PauseRow {
    pub fn into_pause(self) -> Result<PauseRecord> {
        let pause_reason = match self.pause_reason.as_str() {
            "human_interaction" => PauseReason::HumanInteraction,
            "timeout" => PauseReason::Timeout,
            "error" => PauseReason::Error,
            "manual" => PauseReason::Manual,
            "system_maintenance" => PauseReason::SystemMaintenance,
            other => {
                return Err(Error::repository(format!("unknown pause reason: {other}")));
            }
        };
        let resume_trigger = match self.resume_trigger.as_deref() {
            None => None,
            Some("human_response") => Some(ResumeReason::HumanResponse),
            Some("timeout_reached") => Some(ResumeReason::TimeoutReached),
            Some("manual_resume") => Some(ResumeReason::ManualResume),
            Some("error_resolved") => Some(ResumeReason::ErrorResolved),
            Some("system_ready") => Some(ResumeReason::SystemReady),
            Some(other) => {
                return Err(Error::repository(format!("unknown resume trigger: {other}")));
            }
        };

        Ok(PauseRecord {
            id: self.id,
            execution_id: self.execution_id,
            paused_node_id: self.paused_node_id,
            pause_reason,
            resume_conditions: match self.resume_conditions {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            },
            status: PauseStatus::from_str(&self.status)?,
            paused_at: self.paused_at,
            timeout_at: self.timeout_at,
            resumed_at: self.resumed_at,
            resume_trigger,
            resume_data: self.resume_data,
            cancelled_at: self.cancelled_at,
            cancellation_reason: self.cancellation_reason,
        })
    }
}

/// Credential row for `user_external_credentials`
#[derive(Debug, Clone, FromRow)]
pub struct CredentialRow {
    pub user_id: String,
    pub provider: String,
    pub encrypted_access_token: String,
    pub encrypted_refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub scope: Vec<String>,
    pub token_type: String,
    pub is_valid: bool,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub validation_error: Option<String>,
}

/// Input for upserting a credential
#[derive(Debug, Clone)]
pub struct UpsertCredential {
    pub user_id: String,
    pub provider: String,
    pub encrypted_access_token: String,
    pub encrypted_refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub scope: Vec<String>,
    pub token_type: String,
}
