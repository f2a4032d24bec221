// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Token-guarded mutual exclusion backed by the shared store.

use std::time::{Duration, Instant};

use uuid::Uuid;

use strata_tier::Result;

use crate::RemoteStore;

/// How often [`DistributedLock::lock`] re-attempts acquisition.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A short-lease, cross-process lock.
///
/// Acquisition writes a uniquely-tokened entry with a TTL, so a crashed
/// holder cannot block others past the lease. Release is conditional on the
/// token still matching: once the lease has expired and another process has
/// acquired the lock, the previous holder's [`unlock`](Self::unlock) is a
/// no-op rather than a theft.
///
/// Contention is not an error. Both acquisition methods return `false` when
/// the lock is held elsewhere; callers retry, skip the cycle, or fall back.
#[derive(Debug)]
pub struct DistributedLock<S> {
    store: S,
    key: String,
    token: String,
    lease: Duration,
}

impl<S: RemoteStore> DistributedLock<S> {
    /// Creates a lock handle for `key` with the given lease.
    ///
    /// Each handle carries a fresh token; two handles for the same key are
    /// distinct claimants.
    pub fn new(store: S, key: impl Into<String>, lease: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            token: Uuid::new_v4().to_string(),
            lease,
        }
    }

    /// Attempts to acquire the lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`strata_tier::Error::Store`] if the store cannot be reached.
    pub async fn try_lock(&self) -> Result<bool> {
        self.store
            .put_if_absent(&self.key, self.token.clone().into_bytes(), Some(self.lease))
            .await
    }

    /// Acquires the lock, polling until it succeeds or `timeout` elapses.
    ///
    /// Returns `false` on timeout.
    ///
    /// # Errors
    ///
    /// Returns [`strata_tier::Error::Store`] if the store cannot be reached.
    pub async fn lock(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_lock().await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Releases the lock if this handle still owns it.
    ///
    /// # Errors
    ///
    /// Returns [`strata_tier::Error::Store`] if the store cannot be reached.
    pub async fn unlock(&self) -> Result<()> {
        self.store.compare_and_delete(&self.key, self.token.as_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[tokio::test]
    async fn second_claimant_fails_while_held() {
        let store = MemoryStore::new();
        let first = DistributedLock::new(store.clone(), "job", Duration::from_secs(10));
        let second = DistributedLock::new(store, "job", Duration::from_secs(10));

        assert!(first.try_lock().await.expect("lock"));
        assert!(!second.try_lock().await.expect("lock"));

        first.unlock().await.expect("unlock");
        assert!(second.try_lock().await.expect("lock"));
    }

    #[tokio::test]
    async fn lease_expiry_frees_a_dead_holder() {
        let store = MemoryStore::new();
        let dead = DistributedLock::new(store.clone(), "job", Duration::from_millis(30));
        assert!(dead.try_lock().await.expect("lock"));
        // The holder crashes without unlocking; a waiter proceeds after the
        // lease, well before any larger retry bound.
        let waiter = DistributedLock::new(store, "job", Duration::from_secs(10));
        let acquired = waiter.lock(Duration::from_secs(1)).await.expect("lock");
        assert!(acquired);
    }

    #[tokio::test]
    async fn unlock_does_not_release_a_reassigned_lock() {
        let store = MemoryStore::new();
        let expired = DistributedLock::new(store.clone(), "job", Duration::from_millis(20));
        assert!(expired.try_lock().await.expect("lock"));
        tokio::time::sleep(Duration::from_millis(40)).await;

        let current = DistributedLock::new(store.clone(), "job", Duration::from_secs(10));
        assert!(current.try_lock().await.expect("lock"));

        // The stale holder's unlock must not free the new owner's lock.
        expired.unlock().await.expect("unlock");
        let third = DistributedLock::new(store, "job", Duration::from_secs(10));
        assert!(!third.try_lock().await.expect("lock"));
    }
}
