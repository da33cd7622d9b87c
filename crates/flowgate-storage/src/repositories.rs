// Repository layer for database operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowgate_core::{
    ApiCallLog, Error, Execution, ExecutionLogEntry, PauseRecord, Repository, Result, Workflow,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::*;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| Error::repository(format!("connect failed: {e}")))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ============================================
    // Workflows
    // ============================================

    pub async fn upsert_workflow(&self, workflow: &Workflow) -> Result<()> {
        let workflow_data = serde_json::to_value(workflow)
            .map_err(|e| Error::repository(format!("serialize workflow: {e}")))?;
        let tags = serde_json::to_value(&workflow.tags)
            .map_err(|e| Error::repository(format!("serialize tags: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, user_id, name, version, active, tags, workflow_data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                version = EXCLUDED.version,
                active = EXCLUDED.active,
                tags = EXCLUDED.tags,
                workflow_data = EXCLUDED.workflow_data,
                updated_at = NOW()
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.user_id)
        .bind(&workflow.name)
        .bind(workflow.version)
        .bind(workflow.active)
        .bind(&tags)
        .bind(&workflow_data)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        Ok(())
    }

    pub async fn get_workflow_row(&self, id: Uuid) -> Result<Option<WorkflowRow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            SELECT id, user_id, name, version, active, tags, workflow_data, created_at, updated_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        Ok(row)
    }

    /// Workflows eligible for trigger deployment
    pub async fn list_active_workflows(&self) -> Result<Vec<Workflow>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(
            r#"
            SELECT id, user_id, name, version, active, tags, workflow_data, created_at, updated_at
            FROM workflows
            WHERE active = TRUE
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        rows.into_iter().map(WorkflowRow::into_workflow).collect()
    }

    // ============================================
    // Executions
    // ============================================

    pub async fn get_execution_row(&self, execution_id: &str) -> Result<Option<ExecutionRow>> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT execution_id, workflow_id, user_id, status, trigger_source, trigger_data,
                   execution_data, result_data, error_data, created_at, started_at, completed_at, updated_at
            FROM workflow_executions
            WHERE execution_id = $1
            "#,
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        Ok(row)
    }

    pub async fn list_executions_for_workflow(
        &self,
        workflow_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ExecutionRow>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT execution_id, workflow_id, user_id, status, trigger_source, trigger_data,
                   execution_data, result_data, error_data, created_at, started_at, completed_at, updated_at
            FROM workflow_executions
            WHERE workflow_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(workflow_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        Ok(rows)
    }

    // ============================================
    // Pause records
    // ============================================

    pub async fn get_pause_row(&self, id: Uuid) -> Result<Option<PauseRow>> {
        let row = sqlx::query_as::<_, PauseRow>(
            r#"
            SELECT id, execution_id, paused_at, paused_node_id, pause_reason, resume_conditions,
                   status, timeout_at, resumed_at, resume_trigger, resume_data, cancelled_at, cancellation_reason
            FROM workflow_execution_pauses
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        Ok(row)
    }
}

#[async_trait]
impl Repository for Database {
    async fn get_workflow(&self, workflow_id: Uuid) -> Result<Option<Workflow>> {
        match self.get_workflow_row(workflow_id).await? {
            Some(row) => Ok(Some(row.into_workflow()?)),
            None => Ok(None),
        }
    }

    async fn insert_execution(&self, execution: &Execution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (execution_id, workflow_id, user_id, status, trigger_source, trigger_data,
                 execution_data, result_data, error_data, created_at, started_at, completed_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&execution.execution_id)
        .bind(execution.workflow_id)
        .bind(&execution.user_id)
        .bind(execution.status.as_str())
        .bind(&execution.trigger_source)
        .bind(&execution.trigger_data)
        .bind(&execution.execution_data)
        .bind(&execution.result_data)
        .bind(&execution.error_data)
        .bind(execution.created_at)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>> {
        match self.get_execution_row(execution_id).await? {
            Some(row) => Ok(Some(row.into_execution()?)),
            None => Ok(None),
        }
    }

    async fn update_execution(&self, execution: &Execution) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET
                status = $2,
                execution_data = $3,
                result_data = $4,
                error_data = $5,
                started_at = $6,
                completed_at = $7,
                updated_at = $8
            WHERE execution_id = $1
            "#,
        )
        .bind(&execution.execution_id)
        .bind(execution.status.as_str())
        .bind(&execution.execution_data)
        .bind(&execution.result_data)
        .bind(&execution.error_data)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "execution {}",
                execution.execution_id
            )));
        }
        Ok(())
    }

    async fn insert_pause(&self, pause: &PauseRecord) -> Result<()> {
        // The WHERE NOT EXISTS guard enforces at most one active pause per
        // execution without a separate lookup round-trip.
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_execution_pauses
                (id, execution_id, paused_at, paused_node_id, pause_reason, resume_conditions,
                 status, timeout_at)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8
            WHERE NOT EXISTS (
                SELECT 1 FROM workflow_execution_pauses
                WHERE execution_id = $2 AND status = 'active'
            )
            "#,
        )
        .bind(pause.id)
        .bind(&pause.execution_id)
        .bind(pause.paused_at)
        .bind(&pause.paused_node_id)
        .bind(pause.pause_reason.as_str())
        .bind(sqlx::types::JsonValue::Object(
            pause.resume_conditions.clone(),
        ))
        .bind(pause.status.as_str())
        .bind(pause.timeout_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::validation(format!(
                "execution {} already has an active pause",
                pause.execution_id
            )));
        }
        Ok(())
    }

    async fn active_pause(&self, execution_id: &str) -> Result<Option<PauseRecord>> {
        let row = sqlx::query_as::<_, PauseRow>(
            r#"
            SELECT id, execution_id, paused_at, paused_node_id, pause_reason, resume_conditions,
                   status, timeout_at, resumed_at, resume_trigger, resume_data, cancelled_at, cancellation_reason
            FROM workflow_execution_pauses
            WHERE execution_id = $1 AND status = 'active'
            "#,
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(row.into_pause()?)),
            None => Ok(None),
        }
    }

    async fn update_pause(&self, pause: &PauseRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_execution_pauses
            SET
                status = $2,
                resumed_at = $3,
                resume_trigger = $4,
                resume_data = $5,
                cancelled_at = $6,
                cancellation_reason = $7,
                timeout_at = $8
            WHERE id = $1
            "#,
        )
        .bind(pause.id)
        .bind(pause.status.as_str())
        .bind(pause.resumed_at)
        .bind(pause.resume_trigger.map(|r| r.as_str()))
        .bind(&pause.resume_data)
        .bind(pause.cancelled_at)
        .bind(&pause.cancellation_reason)
        .bind(pause.timeout_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("pause record {}", pause.id)));
        }
        Ok(())
    }

    async fn expired_active_pauses(&self, now: DateTime<Utc>) -> Result<Vec<PauseRecord>> {
        let rows = sqlx::query_as::<_, PauseRow>(
            r#"
            SELECT id, execution_id, paused_at, paused_node_id, pause_reason, resume_conditions,
                   status, timeout_at, resumed_at, resume_trigger, resume_data, cancelled_at, cancellation_reason
            FROM workflow_execution_pauses
            WHERE status = 'active' AND timeout_at IS NOT NULL AND timeout_at <= $1
            ORDER BY timeout_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        rows.into_iter().map(PauseRow::into_pause).collect()
    }

    async fn active_pauses_expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<PauseRecord>> {
        let rows = sqlx::query_as::<_, PauseRow>(
            r#"
            SELECT id, execution_id, paused_at, paused_node_id, pause_reason, resume_conditions,
                   status, timeout_at, resumed_at, resume_trigger, resume_data, cancelled_at, cancellation_reason
            FROM workflow_execution_pauses
            WHERE status = 'active' AND timeout_at IS NOT NULL
              AND timeout_at > NOW() AND timeout_at <= $1
            ORDER BY timeout_at ASC
            "#,
        )
        .bind(deadline)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        rows.into_iter().map(PauseRow::into_pause).collect()
    }

    async fn append_execution_log(&self, entry: &ExecutionLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_execution_logs
                (execution_id, created_at, event_type, level, message, data,
                 node_id, node_name, node_type, step_number, total_steps, duration_seconds)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&entry.execution_id)
        .bind(entry.created_at)
        .bind(&entry.event_type)
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .bind(&entry.data)
        .bind(&entry.node_id)
        .bind(&entry.node_name)
        .bind(&entry.node_type)
        .bind(entry.step_number.map(|n| n as i32))
        .bind(entry.total_steps.map(|n| n as i32))
        .bind(entry.duration_seconds)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        Ok(())
    }

    async fn append_api_call_log(&self, entry: &ApiCallLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO external_api_call_logs
                (provider, method, url, status_code, execution_time_ms,
                 request_summary, response_summary, error, called_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&entry.provider)
        .bind(&entry.method)
        .bind(&entry.url)
        .bind(entry.status_code.map(|c| c as i32))
        .bind(entry.execution_time_ms as i64)
        .bind(&entry.request_summary)
        .bind(&entry.response_summary)
        .bind(&entry.error)
        .bind(entry.called_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        Ok(())
    }
}

// ============================================
// Credentials
// ============================================

impl Database {
    pub async fn get_credential(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<Option<CredentialRow>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT user_id, provider, encrypted_access_token, encrypted_refresh_token,
                   token_expires_at, scope, token_type, is_valid, last_validated_at, validation_error
            FROM user_external_credentials
            WHERE user_id = $1 AND provider = $2
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        Ok(row)
    }

    pub async fn upsert_credential(&self, input: UpsertCredential) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_external_credentials
                (user_id, provider, encrypted_access_token, encrypted_refresh_token,
                 token_expires_at, scope, token_type, is_valid, last_validated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, NOW())
            ON CONFLICT (user_id, provider) DO UPDATE SET
                encrypted_access_token = EXCLUDED.encrypted_access_token,
                encrypted_refresh_token = EXCLUDED.encrypted_refresh_token,
                token_expires_at = EXCLUDED.token_expires_at,
                scope = EXCLUDED.scope,
                token_type = EXCLUDED.token_type,
                is_valid = TRUE,
                last_validated_at = NOW(),
                validation_error = NULL
            "#,
        )
        .bind(&input.user_id)
        .bind(&input.provider)
        .bind(&input.encrypted_access_token)
        .bind(&input.encrypted_refresh_token)
        .bind(input.token_expires_at)
        .bind(&input.scope)
        .bind(&input.token_type)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        Ok(())
    }

    pub async fn mark_credential_invalid(
        &self,
        user_id: &str,
        provider: &str,
        validation_error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE user_external_credentials
            SET is_valid = FALSE, last_validated_at = NOW(), validation_error = $3
            WHERE user_id = $1 AND provider = $2
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(validation_error)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        Ok(())
    }
}
