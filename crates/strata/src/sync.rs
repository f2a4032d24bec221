// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Scheduled local-tier resync.
//!
//! Refresh-ahead only fires on read traffic, so a local entry that stops
//! being read can drift from the remote tier until it expires. The sync
//! cycle is the safety net: for each configured cache it reconciles the
//! entry whose key equals the cache name, seeding cold local tiers and
//! overwriting or evicting warm ones.

use std::time::Duration;

use tracing::debug;

use strata_remote::{DistributedLock, MessageBus, RemoteStore};
use strata_tier::{CacheSettings, CacheTier, Result};

use crate::cache::TieredCache;

const SYNC_LOCK_SUFFIX: &str = "_sync_lock";
const SYNC_LOCK_LEASE: Duration = Duration::from_secs(30);

/// One cache enrolled in scheduled resync.
#[derive(Clone, Debug)]
pub(crate) struct SyncEntry {
    pub(crate) name: String,
    pub(crate) settings: CacheSettings,
}

/// Reconciles one cache's synced entry with the remote tier.
///
/// `cold` marks a cache that did not exist on this process before this
/// cycle: it is seeded without a lock, since there is no populated local
/// state to race against.
pub(crate) async fn sync_cache<S: RemoteStore, B: MessageBus>(
    store: &S,
    cache: &TieredCache<S, B>,
    cold: bool,
) -> Result<()> {
    let Some(local) = cache.local() else {
        return Ok(());
    };
    // The synced entry's key is the cache name itself.
    let key = cache.name();

    if cold {
        if let Some(value) = cache.remote().get(key).await? {
            local.put(key, value).await?;
            debug!(cache = key, "seeded cold local tier from remote");
        }
        return Ok(());
    }

    let lock = DistributedLock::new(store.clone(), format!("{key}{SYNC_LOCK_SUFFIX}"), SYNC_LOCK_LEASE);
    if !lock.try_lock().await? {
        // Another process is reconciling this cycle.
        return Ok(());
    }
    let outcome = match cache.remote().get(key).await? {
        Some(value) => local.put(key, value).await,
        None => local.evict(key).await,
    };
    if let Err(err) = lock.unlock().await {
        debug!(cache = key, error = %err, "sync lock release failed, lease will expire it");
    }
    outcome
}
