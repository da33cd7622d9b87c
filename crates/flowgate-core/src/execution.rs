// Execution state machine and HIL pause records

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Lifecycle state of a workflow execution.
///
/// ```text
/// PENDING -> RUNNING -> { COMPLETED | FAILED | CANCELLED }
/// RUNNING <-> PAUSED
/// PAUSED  -> CANCELLED | FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Paused => "PAUSED",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// The full transition table. Anything not listed here is invalid.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Paused)
                | (Paused, Running)
                | (Paused, Cancelled)
                | (Paused, Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(ExecutionStatus::Pending),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "PAUSED" => Ok(ExecutionStatus::Paused),
            "COMPLETED" => Ok(ExecutionStatus::Completed),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "CANCELLED" => Ok(ExecutionStatus::Cancelled),
            other => Err(Error::validation(format!("unknown execution status: {other}"))),
        }
    }
}

/// One workflow run. References a workflow snapshot; owns its pause records
/// and per-node output map (stored inside `execution_data`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: String,
    pub workflow_id: Uuid,
    pub user_id: String,
    pub status: ExecutionStatus,
    /// Trigger kind that started this run
    pub trigger_source: Option<String>,
    /// The data the firing trigger assembled
    pub trigger_data: Value,
    /// Per-node outputs plus the engine's resume cursor
    pub execution_data: Value,
    pub result_data: Option<Value>,
    pub error_data: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Execution {
    pub fn new(
        workflow_id: Uuid,
        user_id: impl Into<String>,
        trigger_source: Option<String>,
        trigger_data: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            execution_id: format!("exec_{}", Uuid::new_v4()),
            workflow_id,
            user_id: user_id.into(),
            status: ExecutionStatus::Pending,
            trigger_source,
            trigger_data,
            execution_data: Value::Object(Map::new()),
            result_data: None,
            error_data: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Apply a state transition, enforcing the transition table and the
    /// timestamp invariants (`started_at >= created_at`,
    /// `completed_at >= started_at`).
    pub fn transition_to(&mut self, next: ExecutionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        if next == ExecutionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

/// Why an execution is paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    HumanInteraction,
    Timeout,
    Error,
    Manual,
    SystemMaintenance,
}

impl PauseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseReason::HumanInteraction => "human_interaction",
            PauseReason::Timeout => "timeout",
            PauseReason::Error => "error",
            PauseReason::Manual => "manual",
            PauseReason::SystemMaintenance => "system_maintenance",
        }
    }
}

/// Lifecycle state of a pause record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseStatus {
    Active,
    Resumed,
    Cancelled,
    Timeout,
}

impl PauseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseStatus::Active => "active",
            PauseStatus::Resumed => "resumed",
            PauseStatus::Cancelled => "cancelled",
            PauseStatus::Timeout => "timeout",
        }
    }
}

impl FromStr for PauseStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(PauseStatus::Active),
            "resumed" => Ok(PauseStatus::Resumed),
            "cancelled" => Ok(PauseStatus::Cancelled),
            "timeout" => Ok(PauseStatus::Timeout),
            other => Err(Error::validation(format!("unknown pause status: {other}"))),
        }
    }
}

/// Why a paused execution was resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeReason {
    HumanResponse,
    TimeoutReached,
    ManualResume,
    ErrorResolved,
    SystemReady,
}

impl ResumeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeReason::HumanResponse => "human_response",
            ResumeReason::TimeoutReached => "timeout_reached",
            ResumeReason::ManualResume => "manual_resume",
            ResumeReason::ErrorResolved => "error_resolved",
            ResumeReason::SystemReady => "system_ready",
        }
    }
}

/// Persistent record of one pause. At most one `active` record exists per
/// execution at any instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseRecord {
    pub id: Uuid,
    pub execution_id: String,
    pub paused_node_id: String,
    pub pause_reason: PauseReason,
    /// Predicate over resume data; also carries the reaper's
    /// `timeout_action` / `timeout_default_data` policy keys
    pub resume_conditions: Map<String, Value>,
    pub status: PauseStatus,
    pub paused_at: DateTime<Utc>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub resume_trigger: Option<ResumeReason>,
    pub resume_data: Option<Value>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl PauseRecord {
    pub fn new(
        execution_id: impl Into<String>,
        paused_node_id: impl Into<String>,
        pause_reason: PauseReason,
        resume_conditions: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            execution_id: execution_id.into(),
            paused_node_id: paused_node_id.into(),
            pause_reason,
            resume_conditions,
            status: PauseStatus::Active,
            paused_at: now,
            timeout_at: timeout
                .and_then(|t| chrono::Duration::from_std(t).ok())
                .map(|t| now + t),
            resumed_at: None,
            resume_trigger: None,
            resume_data: None,
            cancelled_at: None,
            cancellation_reason: None,
        }
    }

    /// Reaper policy for an expired pause; `fail` when unspecified
    pub fn timeout_action(&self) -> &str {
        self.resume_conditions
            .get("timeout_action")
            .and_then(Value::as_str)
            .unwrap_or("fail")
    }

    /// Default resume payload used by the `resume` timeout action
    pub fn timeout_default_data(&self) -> Value {
        self.resume_conditions
            .get("timeout_default_data")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}

/// Where the engine re-enters after a resume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextStep {
    pub node_id: String,
    pub action: String,
    pub pause_duration_seconds: i64,
}
