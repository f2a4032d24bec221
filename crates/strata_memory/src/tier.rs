// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! First-tier implementation using Moka.

use std::sync::Arc;

use moka::future::Cache;

use strata_tier::{CacheTier, ExpireMode, FirstTierSettings, Result, StoredValue, TierCounters};

/// A bounded in-process cache tier backed by Moka.
///
/// Capacity eviction uses Moka's `TinyLFU` policy; time-based expiry counts
/// from the last write or the last access depending on
/// [`ExpireMode`]. Request and miss counters feed the stats aggregator.
///
/// Operations only ever touch the in-process structure, so a `MemoryTier`
/// can never block a request on network I/O.
#[derive(Clone, Debug)]
pub struct MemoryTier {
    inner: Cache<String, StoredValue>,
    counters: Arc<TierCounters>,
}

impl MemoryTier {
    /// Creates a tier sized and expiring per the given settings.
    #[must_use]
    pub fn new(settings: &FirstTierSettings) -> Self {
        let mut builder = Cache::builder()
            .initial_capacity(settings.initial_capacity)
            .max_capacity(settings.maximum_size);

        builder = match settings.expire_mode {
            ExpireMode::SinceWrite => builder.time_to_live(settings.expire_time),
            ExpireMode::SinceAccess => builder.time_to_idle(settings.expire_time),
        };

        Self {
            inner: builder.build(),
            counters: Arc::new(TierCounters::new()),
        }
    }

    /// The request/miss counters maintained by this tier.
    #[must_use]
    pub fn counters(&self) -> &Arc<TierCounters> {
        &self.counters
    }
}

impl CacheTier for MemoryTier {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        self.counters.record_request();
        let value = self.inner.get(key).await;
        if value.is_none() {
            self.counters.record_miss();
        }
        Ok(value)
    }

    async fn put(&self, key: &str, value: StoredValue) -> Result<()> {
        self.inner.insert(key.to_string(), value).await;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: StoredValue) -> Result<Option<StoredValue>> {
        // entry() gives Moka's atomic compute-if-absent; or_insert only
        // writes when the key is vacant.
        let entry = self.inner.entry(key.to_string()).or_insert(value).await;
        if entry.is_fresh() {
            Ok(None)
        } else {
            Ok(Some(entry.into_value()))
        }
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.inner.invalidate(key).await;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.inner.invalidate_all();
        Ok(())
    }

    fn len(&self) -> Option<u64> {
        Some(self.inner.entry_count())
    }
}
