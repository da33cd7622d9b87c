// Distributed advisory locks as Postgres lease rows
//
// A lease is a (key, holder, expires_at) row. Acquisition wins when the key
// is free or the previous lease has expired, which makes locks from crashed
// holders reclaimable without operator action.

use std::time::Duration;

use async_trait::async_trait;
use flowgate_core::{Error, LockManager, Result};
use uuid::Uuid;

use crate::repositories::Database;

pub struct PgLockManager {
    db: Database,
    /// Identifies this process's leases so release cannot drop another
    /// holder's lock
    holder: Uuid,
}

impl PgLockManager {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            holder: Uuid::new_v4(),
        }
    }
}

#[async_trait]
impl LockManager for PgLockManager {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_locks (key, holder, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE SET
                holder = EXCLUDED.holder,
                expires_at = EXCLUDED.expires_at
            WHERE workflow_locks.expires_at <= NOW()
            "#,
        )
        .bind(key)
        .bind(self.holder)
        .bind(ttl.as_secs_f64())
        .execute(self.db.pool())
        .await
        .map_err(|e| Error::repository(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM workflow_locks WHERE key = $1 AND holder = $2")
            .bind(key)
            .bind(self.holder)
            .execute(self.db.pool())
            .await
            .map_err(|e| Error::repository(e.to_string()))?;

        Ok(())
    }
}
