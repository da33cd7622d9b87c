// Execution state manager: pause, resume and cancel

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flowgate_core::{
    Error, Execution, ExecutionStatus, NextStep, PauseReason, PauseRecord, PauseStatus,
    Repository, Result, ResumeReason,
};
use serde_json::{json, Map, Value};
use tracing::info;

/// Keys inside `resume_conditions` that carry the reaper's timeout policy
/// rather than a predicate over the resume data.
const POLICY_KEYS: [&str; 2] = ["timeout_action", "timeout_default_data"];

/// All execution state transitions in a process funnel through one of these.
#[derive(Clone)]
pub struct ExecutionStateManager {
    repository: Arc<dyn Repository>,
}

impl ExecutionStateManager {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    async fn load(&self, execution_id: &str) -> Result<Execution> {
        self.repository
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("execution {execution_id}")))
    }

    /// Transition an execution, enforcing the state machine, and persist it.
    pub async fn transition(
        &self,
        execution_id: &str,
        next: ExecutionStatus,
    ) -> Result<Execution> {
        let mut execution = self.load(execution_id).await?;
        execution.transition_to(next)?;
        self.repository.update_execution(&execution).await?;
        Ok(execution)
    }

    /// Pause a RUNNING execution at `node_id` and persist the pause record.
    pub async fn pause_execution(
        &self,
        execution_id: &str,
        node_id: &str,
        reason: PauseReason,
        resume_conditions: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<PauseRecord> {
        let mut execution = self.load(execution_id).await?;
        if execution.status != ExecutionStatus::Running {
            return Err(Error::InvalidStateTransition {
                from: execution.status,
                to: ExecutionStatus::Paused,
            });
        }

        let record = PauseRecord::new(execution_id, node_id, reason, resume_conditions, timeout);
        self.repository.insert_pause(&record).await?;

        execution.transition_to(ExecutionStatus::Paused)?;
        self.repository.update_execution(&execution).await?;

        info!(
            execution_id,
            node_id,
            reason = reason.as_str(),
            "paused workflow execution"
        );
        Ok(record)
    }

    /// Resume a paused execution. Validates the resume conditions, closes the
    /// pause record and returns where the engine should re-enter.
    pub async fn resume_execution(
        &self,
        execution_id: &str,
        reason: ResumeReason,
        resume_data: Value,
    ) -> Result<NextStep> {
        let mut pause = self
            .repository
            .active_pause(execution_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("no active pause record for execution {execution_id}"))
            })?;

        validate_resume_conditions(&pause.resume_conditions, &resume_data)?;

        let now = Utc::now();
        pause.status = PauseStatus::Resumed;
        pause.resumed_at = Some(now);
        pause.resume_trigger = Some(reason);
        pause.resume_data = Some(resume_data);
        self.repository.update_pause(&pause).await?;

        let mut execution = self.load(execution_id).await?;
        execution.transition_to(ExecutionStatus::Running)?;
        self.repository.update_execution(&execution).await?;

        info!(
            execution_id,
            reason = reason.as_str(),
            node_id = %pause.paused_node_id,
            "resumed workflow execution"
        );

        Ok(NextStep {
            node_id: pause.paused_node_id,
            action: "continue".to_string(),
            pause_duration_seconds: (now - pause.paused_at).num_seconds(),
        })
    }

    /// Cancel a paused execution
    pub async fn cancel_paused_execution(
        &self,
        execution_id: &str,
        cancellation_reason: &str,
    ) -> Result<()> {
        let mut pause = self
            .repository
            .active_pause(execution_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("no active pause record for execution {execution_id}"))
            })?;

        pause.status = PauseStatus::Cancelled;
        pause.cancelled_at = Some(Utc::now());
        pause.cancellation_reason = Some(cancellation_reason.to_string());
        self.repository.update_pause(&pause).await?;

        let mut execution = self.load(execution_id).await?;
        execution.transition_to(ExecutionStatus::Cancelled)?;
        self.repository.update_execution(&execution).await?;

        info!(execution_id, cancellation_reason, "cancelled paused execution");
        Ok(())
    }

    /// Fail a paused execution whose pause timed out (the reaper's default
    /// policy). The pause record is closed as `timeout`.
    pub async fn fail_expired_pause(&self, pause: &PauseRecord) -> Result<()> {
        let mut pause = pause.clone();
        pause.status = PauseStatus::Timeout;
        self.repository.update_pause(&pause).await?;

        let mut execution = self.load(&pause.execution_id).await?;
        execution.error_data = Some(json!({
            "error": "pause timed out",
            "paused_node_id": pause.paused_node_id,
        }));
        execution.transition_to(ExecutionStatus::Failed)?;
        self.repository.update_execution(&execution).await?;

        info!(
            execution_id = %pause.execution_id,
            node_id = %pause.paused_node_id,
            "failed execution after pause timeout"
        );
        Ok(())
    }
}

/// Every non-policy condition key must be present in the resume data;
/// non-null expected values must match exactly.
fn validate_resume_conditions(conditions: &Map<String, Value>, resume_data: &Value) -> Result<()> {
    let data = resume_data.as_object();
    for (key, expected) in conditions {
        if POLICY_KEYS.contains(&key.as_str()) {
            continue;
        }
        let provided = data.and_then(|d| d.get(key));
        match provided {
            None => {
                return Err(Error::validation(format!(
                    "missing required resume condition: {key}"
                )));
            }
            Some(value) if !expected.is_null() && value != expected => {
                return Err(Error::validation(format!("resume condition not met: {key}")));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
