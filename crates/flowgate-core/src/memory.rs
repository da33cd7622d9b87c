// In-memory repository and lock manager
//
// Backs tests and single-process deployments; the Postgres implementations
// live in flowgate-storage.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::execution::{Execution, PauseRecord, PauseStatus};
use crate::locks::LockManager;
use crate::repository::{ApiCallLog, ExecutionLogEntry, Repository};
use crate::workflow::Workflow;

/// HashMap-backed `Repository`
#[derive(Default)]
pub struct InMemoryRepository {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    executions: RwLock<HashMap<String, Execution>>,
    pauses: RwLock<HashMap<Uuid, PauseRecord>>,
    execution_logs: Mutex<Vec<ExecutionLogEntry>>,
    api_call_logs: Mutex<Vec<ApiCallLog>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_workflow(&self, workflow: Workflow) {
        self.workflows.write().await.insert(workflow.id, workflow);
    }

    /// Test helper: snapshot of all stored executions
    pub async fn executions(&self) -> Vec<Execution> {
        self.executions.read().await.values().cloned().collect()
    }

    /// Test helper: snapshot of all pause records
    pub async fn pauses(&self) -> Vec<PauseRecord> {
        self.pauses.read().await.values().cloned().collect()
    }

    /// Test helper: snapshot of the progress log
    pub async fn execution_logs(&self) -> Vec<ExecutionLogEntry> {
        self.execution_logs.lock().await.clone()
    }

    /// Test helper: snapshot of the outbound-call audit log
    pub async fn api_call_logs(&self) -> Vec<ApiCallLog> {
        self.api_call_logs.lock().await.clone()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_workflow(&self, workflow_id: Uuid) -> Result<Option<Workflow>> {
        Ok(self.workflows.read().await.get(&workflow_id).cloned())
    }

    async fn insert_execution(&self, execution: &Execution) -> Result<()> {
        self.executions
            .write()
            .await
            .insert(execution.execution_id.clone(), execution.clone());
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>> {
        Ok(self.executions.read().await.get(execution_id).cloned())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<()> {
        let mut executions = self.executions.write().await;
        if !executions.contains_key(&execution.execution_id) {
            return Err(Error::NotFound(format!(
                "execution {}",
                execution.execution_id
            )));
        }
        executions.insert(execution.execution_id.clone(), execution.clone());
        Ok(())
    }

    async fn insert_pause(&self, pause: &PauseRecord) -> Result<()> {
        let mut pauses = self.pauses.write().await;
        let has_active = pauses
            .values()
            .any(|p| p.execution_id == pause.execution_id && p.status == PauseStatus::Active);
        if has_active {
            return Err(Error::validation(format!(
                "execution {} already has an active pause",
                pause.execution_id
            )));
        }
        pauses.insert(pause.id, pause.clone());
        Ok(())
    }

    async fn active_pause(&self, execution_id: &str) -> Result<Option<PauseRecord>> {
        Ok(self
            .pauses
            .read()
            .await
            .values()
            .find(|p| p.execution_id == execution_id && p.status == PauseStatus::Active)
            .cloned())
    }

    async fn update_pause(&self, pause: &PauseRecord) -> Result<()> {
        let mut pauses = self.pauses.write().await;
        if !pauses.contains_key(&pause.id) {
            return Err(Error::NotFound(format!("pause record {}", pause.id)));
        }
        pauses.insert(pause.id, pause.clone());
        Ok(())
    }

    async fn expired_active_pauses(&self, now: DateTime<Utc>) -> Result<Vec<PauseRecord>> {
        Ok(self
            .pauses
            .read()
            .await
            .values()
            .filter(|p| {
                p.status == PauseStatus::Active && p.timeout_at.is_some_and(|t| t <= now)
            })
            .cloned()
            .collect())
    }

    async fn active_pauses_expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<PauseRecord>> {
        let now = Utc::now();
        Ok(self
            .pauses
            .read()
            .await
            .values()
            .filter(|p| {
                p.status == PauseStatus::Active
                    && p.timeout_at.is_some_and(|t| t > now && t <= deadline)
            })
            .cloned()
            .collect())
    }

    async fn append_execution_log(&self, entry: &ExecutionLogEntry) -> Result<()> {
        self.execution_logs.lock().await.push(entry.clone());
        Ok(())
    }

    async fn append_api_call_log(&self, entry: &ApiCallLog) -> Result<()> {
        self.api_call_logs.lock().await.push(entry.clone());
        Ok(())
    }
}

struct Lease {
    expires_at: Instant,
}

/// Single-process `LockManager` with the same lease semantics as the
/// Postgres implementation.
#[derive(Default)]
pub struct InMemoryLockManager {
    leases: Mutex<HashMap<String, Lease>>,
    acquired_total: Mutex<u64>,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: how many acquisitions have succeeded since creation
    pub async fn acquired_total(&self) -> u64 {
        *self.acquired_total.lock().await
    }
}

#[async_trait]
impl LockManager for InMemoryLockManager {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();
        if let Some(lease) = leases.get(key) {
            if lease.expires_at > now {
                return Ok(false);
            }
        }
        leases.insert(
            key.to_string(),
            Lease {
                expires_at: now + ttl,
            },
        );
        *self.acquired_total.lock().await += 1;
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.leases.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::PauseReason;
    use serde_json::Map;

    #[tokio::test]
    async fn insert_pause_enforces_single_active_record() {
        let repo = InMemoryRepository::new();
        let first = PauseRecord::new("exec_1", "node_a", PauseReason::HumanInteraction, Map::new(), None);
        let second = PauseRecord::new("exec_1", "node_b", PauseReason::HumanInteraction, Map::new(), None);

        repo.insert_pause(&first).await.unwrap();
        assert!(repo.insert_pause(&second).await.is_err());

        // Resolving the first makes room for a new one
        let mut resolved = first.clone();
        resolved.status = PauseStatus::Resumed;
        repo.update_pause(&resolved).await.unwrap();
        repo.insert_pause(&second).await.unwrap();
    }

    #[tokio::test]
    async fn expired_queries_split_on_timeout() {
        let repo = InMemoryRepository::new();
        let mut expired = PauseRecord::new(
            "exec_1",
            "node_a",
            PauseReason::HumanInteraction,
            Map::new(),
            Some(Duration::from_secs(60)),
        );
        expired.timeout_at = Some(Utc::now() - chrono::Duration::seconds(5));
        repo.insert_pause(&expired).await.unwrap();

        let upcoming = PauseRecord::new(
            "exec_2",
            "node_a",
            PauseReason::HumanInteraction,
            Map::new(),
            Some(Duration::from_secs(600)),
        );
        repo.insert_pause(&upcoming).await.unwrap();

        let now = Utc::now();
        let hits = repo.expired_active_pauses(now).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].execution_id, "exec_1");

        let soon = repo
            .active_pauses_expiring_before(now + chrono::Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(soon.len(), 1);
        assert_eq!(soon[0].execution_id, "exec_2");
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released_or_expired() {
        let locks = InMemoryLockManager::new();
        let ttl = Duration::from_secs(30);

        assert!(locks.try_acquire("workflow_w1", ttl).await.unwrap());
        assert!(!locks.try_acquire("workflow_w1", ttl).await.unwrap());
        assert!(locks.try_acquire("workflow_w2", ttl).await.unwrap());

        locks.release("workflow_w1").await.unwrap();
        assert!(locks.try_acquire("workflow_w1", ttl).await.unwrap());
        assert_eq!(locks.acquired_total().await, 3);
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimable() {
        let locks = InMemoryLockManager::new();
        assert!(locks
            .try_acquire("workflow_w1", Duration::from_millis(0))
            .await
            .unwrap());
        assert!(locks
            .try_acquire("workflow_w1", Duration::from_secs(30))
            .await
            .unwrap());
    }
}
