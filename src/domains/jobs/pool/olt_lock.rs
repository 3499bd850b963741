//! Per-OLT mutual exclusion, held for the duration of a master's execution.

use crate::common::entity_ids::OltId;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry of one exclusive, non-reentrant lock per OLT.
#[derive(Default)]
pub struct OltLockRegistry {
    locks: Mutex<HashMap<OltId, std::sync::Arc<AsyncMutex<()>>>>,
}

impl OltLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, olt_id: OltId) -> std::sync::Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(olt_id)
            .or_insert_with(|| std::sync::Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Attempts to acquire the lock for `olt_id`, giving up after `timeout`.
    /// Returns `None` on timeout — the caller requeues the node.
    pub async fn try_acquire(
        &self,
        olt_id: OltId,
        timeout: Duration,
    ) -> Option<OwnedMutexGuard<()>> {
        let lock = self.lock_for(olt_id);
        tokio::time::timeout(timeout, lock.lock_owned()).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_times_out_while_first_is_held() {
        let registry = OltLockRegistry::new();
        let olt_id = OltId::new();

        let guard = registry
            .try_acquire(olt_id, Duration::from_millis(50))
            .await;
        assert!(guard.is_some());

        let second = registry
            .try_acquire(olt_id, Duration::from_millis(50))
            .await;
        assert!(second.is_none());

        drop(guard);

        let third = registry
            .try_acquire(olt_id, Duration::from_millis(50))
            .await;
        assert!(third.is_some());
    }
}
