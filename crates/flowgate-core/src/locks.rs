// Advisory distributed locks for cross-replica single-flight

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Keyed, TTL'd advisory lock. The TTL bounds how long a crashed holder can
/// block other replicas; implementations must make expired leases
/// reclaimable without operator action.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Try to take the lock. Returns false when another holder owns a live
    /// lease for `key`.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Release the lock. Releasing a lock that is not held is a no-op.
    async fn release(&self, key: &str) -> Result<()>;
}
