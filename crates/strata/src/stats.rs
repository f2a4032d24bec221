// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fleet-wide cache statistics.
//!
//! Each process accumulates atomic per-tier counters; the aggregator
//! periodically drains them into a shared snapshot under a distributed
//! lock. Losing the lock skips the cycle without resetting anything, so
//! deltas merge exactly once no matter how contended the lock is.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use strata_remote::{DistributedLock, MessageBus, RemoteStore};
use strata_tier::{Error, Result};

use crate::cache::TieredCache;

/// Prefix of every shared snapshot key.
pub const STATS_KEY_PREFIX: &str = "strata:cache:cache_stats_info:";

/// How long an unrefreshed snapshot survives in the store.
const SNAPSHOT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Lease on the per-snapshot merge lock.
const MERGE_LOCK_LEASE: Duration = Duration::from_secs(60);

/// Suffix of the per-snapshot merge lock key.
const MERGE_LOCK_SUFFIX: &str = "_lock";

/// The merged statistics of one cache across all processes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheStatsSnapshot {
    /// The cache name.
    pub cache_name: String,
    /// The settings fingerprint of the instance these numbers belong to.
    pub fingerprint: String,
    /// The free-text description from the cache settings.
    pub depict: String,
    /// Requests against the tiered cache.
    pub request_count: u64,
    /// Full misses, i.e. loader executions.
    pub miss_count: u64,
    /// Accumulated loader wall time in milliseconds.
    pub total_load_time_ms: u64,
    /// Requests answered by consulting the in-process tier.
    pub first_tier_request_count: u64,
    /// In-process tier misses.
    pub first_tier_miss_count: u64,
    /// Requests that reached the remote tier.
    pub second_tier_request_count: u64,
    /// Remote tier misses.
    pub second_tier_miss_count: u64,
    /// `(request_count - miss_count) / request_count`, zero when idle.
    pub hit_rate: f64,
}

impl CacheStatsSnapshot {
    /// The store key holding the snapshot for one cache instance.
    #[must_use]
    pub fn stats_key(cache_name: &str, fingerprint: &str) -> String {
        format!("{STATS_KEY_PREFIX}{cache_name}{fingerprint}")
    }

    fn identified(cache_name: &str, fingerprint: &str, depict: &str) -> Self {
        Self {
            cache_name: cache_name.to_string(),
            fingerprint: fingerprint.to_string(),
            depict: depict.to_string(),
            ..Self::default()
        }
    }

    fn recompute_hit_rate(&mut self) {
        if self.request_count == 0 {
            self.hit_rate = 0.0;
            return;
        }
        let hits = self.request_count.saturating_sub(self.miss_count);
        #[expect(clippy::cast_precision_loss, reason = "hit rate is a display figure, not an exact count")]
        let rate = hits as f64 / self.request_count as f64;
        self.hit_rate = rate;
    }
}

/// Drains local counters into the shared snapshots.
#[derive(Clone, Debug)]
pub(crate) struct StatsAggregator<S> {
    store: S,
}

impl<S: RemoteStore> StatsAggregator<S> {
    pub(crate) fn new(store: S) -> Self {
        Self { store }
    }

    /// Merges one cache's counters into its shared snapshot.
    ///
    /// Returns `false` if the merge lock was contended; counters are left
    /// untouched and accumulate until a later cycle wins the lock.
    pub(crate) async fn merge<B: MessageBus>(&self, cache: &TieredCache<S, B>) -> Result<bool> {
        let stats_key = CacheStatsSnapshot::stats_key(cache.name(), cache.fingerprint());
        let lock = DistributedLock::new(
            self.store.clone(),
            format!("{stats_key}{MERGE_LOCK_SUFFIX}"),
            MERGE_LOCK_LEASE,
        );
        if !lock.try_lock().await? {
            debug!(cache = cache.name(), "stats merge lock contended, deferring to a later cycle");
            return Ok(false);
        }
        let merged = self.merge_locked(cache, &stats_key).await;
        if let Err(err) = lock.unlock().await {
            debug!(cache = cache.name(), error = %err, "merge lock release failed, lease will expire it");
        }
        merged.map(|()| true)
    }

    /// Serialized read-modify-write of the shared snapshot. Counters are
    /// drained only here, while the lock is held, so a delta is merged
    /// exactly once.
    async fn merge_locked<B: MessageBus>(&self, cache: &TieredCache<S, B>, stats_key: &str) -> Result<()> {
        let mut snapshot = match self.store.get(stats_key).await? {
            Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!(cache = cache.name(), error = %err, "discarding undecodable stats snapshot");
                CacheStatsSnapshot::identified(cache.name(), cache.fingerprint(), &cache.settings().depict)
            }),
            None => CacheStatsSnapshot::identified(cache.name(), cache.fingerprint(), &cache.settings().depict),
        };

        let remote = cache.remote().counters();
        let loads = remote.take_misses();
        snapshot.request_count += cache.counters().take_requests();
        snapshot.miss_count += loads;
        snapshot.total_load_time_ms += remote.take_load_time_ms();
        snapshot.second_tier_request_count += remote.take_requests();
        snapshot.second_tier_miss_count += loads;
        if let Some(local) = cache.local() {
            let counters = local.counters();
            snapshot.first_tier_request_count += counters.take_requests();
            snapshot.first_tier_miss_count += counters.take_misses();
        }
        snapshot.recompute_hit_rate();

        let bytes = serde_json::to_vec(&snapshot).map_err(Error::codec)?;
        self.store.put(stats_key, bytes, Some(SNAPSHOT_TTL)).await
    }

    /// Lists every shared snapshot, optionally filtered by cache name.
    pub(crate) async fn list(&self, filter: Option<&str>) -> Result<Vec<CacheStatsSnapshot>> {
        let pattern = match filter {
            Some(name) => format!("{STATS_KEY_PREFIX}{name}*"),
            None => format!("{STATS_KEY_PREFIX}*"),
        };
        let mut snapshots = Vec::new();
        for key in self.store.keys(&pattern).await? {
            let Some(bytes) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<CacheStatsSnapshot>(&bytes) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(err) => warn!(key, error = %err, "skipping undecodable stats snapshot"),
            }
        }
        // Worst performers first.
        snapshots.sort_by(|a, b| a.hit_rate.total_cmp(&b.hit_rate));
        Ok(snapshots)
    }

    /// Deletes every shared snapshot.
    pub(crate) async fn reset(&self) -> Result<()> {
        let pattern = format!("{STATS_KEY_PREFIX}*");
        for key in self.store.keys(&pattern).await? {
            self.store.delete(&key).await?;
        }
        Ok(())
    }
}
