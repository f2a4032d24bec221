// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The two-tier cache composition.
//!
//! [`TieredCache`] glues one in-process tier to the authoritative remote
//! tier. Reads go local-first and backfill on the way out; writes go
//! remote-first and then broadcast an eviction so every process's local
//! tier converges. The local tier is never written directly from a write
//! path. A concurrent reader could otherwise fetch the pre-write remote
//! value and repopulate local storage after the write, resurrecting stale
//! state.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use strata_memory::MemoryTier;
use strata_remote::{Loaded, MessageBus, RemoteStore, RemoteTier};
use strata_tier::{CacheSettings, CacheTier, Result, StoredValue, TierCounters};

use crate::message::InvalidationMessage;

struct CacheInner<S, B> {
    name: String,
    settings: CacheSettings,
    fingerprint: String,
    local: Option<MemoryTier>,
    remote: RemoteTier<S>,
    bus: B,
    counters: TierCounters,
}

/// One named cache: a local tier shadowing the shared remote tier.
///
/// Instances are cheap handles; clones share tiers and counters. Obtain
/// them from the [`CacheRegistry`](crate::CacheRegistry) so that one
/// instance exists per name and settings fingerprint and invalidation
/// dispatch reaches it.
pub struct TieredCache<S, B> {
    inner: Arc<CacheInner<S, B>>,
}

impl<S, B> Clone for TieredCache<S, B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, B> std::fmt::Debug for TieredCache<S, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("name", &self.inner.name)
            .field("fingerprint", &self.inner.fingerprint)
            .finish_non_exhaustive()
    }
}

impl<S: RemoteStore, B: MessageBus> TieredCache<S, B> {
    /// Composes the cache called `name` over the given store and bus.
    pub fn new(name: impl Into<String>, settings: CacheSettings, store: S, bus: B) -> Self {
        let name = name.into();
        let fingerprint = settings.fingerprint();
        let local = settings.use_first_tier.then(|| MemoryTier::new(&settings.first));
        let remote = RemoteTier::new(name.clone(), store, settings.second.clone());
        Self {
            inner: Arc::new(CacheInner {
                name,
                settings,
                fingerprint,
                local,
                remote,
                bus,
                counters: TierCounters::new(),
            }),
        }
    }

    /// The cache name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The settings this cache was created with.
    #[must_use]
    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    /// The settings fingerprint identifying this instance.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.inner.fingerprint
    }

    /// Returns the cached value for `key`, running `loader` on a full miss.
    ///
    /// The local tier answers without touching the network. On a local
    /// miss, the remote tier arbitrates concurrent loads across all
    /// processes; the result backfills the local tier on the way out. Only
    /// the remote tier ever invokes the loader, so an in-flight load is
    /// never duplicated across tiers.
    ///
    /// # Errors
    ///
    /// Returns [`strata_tier::Error::Loader`] if the loader fails, and
    /// store or decode failures per the cache's `ignore_exception` policy.
    pub async fn get_or_load<F, Fut>(&self, key: &str, loader: F) -> Result<Option<Value>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Loaded> + Send + 'static,
    {
        self.inner.counters.record_request();
        if let Some(local) = &self.inner.local {
            if let Some(value) = local.get(key).await? {
                return Ok(value.into_value());
            }
        }

        let value = self.inner.remote.get_or_load(key, loader).await?;
        self.backfill(key, value.as_ref()).await?;
        Ok(value)
    }

    /// Forces every process to overwrite its local entry for `key` with the
    /// current remote value.
    ///
    /// This is the proactive-resync path used by the refresh scheduler, not
    /// the request path; ordinary consistency relies on the cheaper
    /// evict-then-reload pattern.
    ///
    /// # Errors
    ///
    /// Returns [`strata_tier::Error::Store`] if the broadcast fails.
    pub async fn push_local(&self, key: &str) -> Result<()> {
        debug!(key, cache = self.inner.name, "broadcasting forced resync");
        self.publish(&InvalidationMessage::update(&self.inner.name, key)).await
    }

    /// Applies a received invalidation message to the local tier.
    pub(crate) async fn apply(&self, message: &InvalidationMessage) -> Result<()> {
        let Some(local) = &self.inner.local else {
            return Ok(());
        };
        match (&message.message_type, &message.key) {
            (crate::message::MessageType::Evict, Some(key)) => local.evict(key).await,
            (crate::message::MessageType::Clear, _) => local.clear().await,
            (crate::message::MessageType::Update, Some(key)) => {
                match self.inner.remote.get(key).await? {
                    Some(value) => local.put(key, value).await,
                    None => local.evict(key).await,
                }
            }
            // Evict and update without a key have nothing to apply.
            _ => Ok(()),
        }
    }

    pub(crate) fn local(&self) -> Option<&MemoryTier> {
        self.inner.local.as_ref()
    }

    pub(crate) fn remote(&self) -> &RemoteTier<S> {
        &self.inner.remote
    }

    pub(crate) fn counters(&self) -> &TierCounters {
        &self.inner.counters
    }

    async fn backfill(&self, key: &str, value: Option<&Value>) -> Result<()> {
        let Some(local) = &self.inner.local else {
            return Ok(());
        };
        match value {
            Some(v) => local.put(key, StoredValue::Present(v.clone())).await,
            // Cache the absence locally only when the remote tier does too,
            // so both tiers answer alike until the next invalidation.
            None if self.inner.settings.second.allow_null => local.put(key, StoredValue::Null).await,
            None => Ok(()),
        }
    }

    async fn publish(&self, message: &InvalidationMessage) -> Result<()> {
        self.inner.bus.publish(&self.inner.name, message.to_bytes()?).await
    }
}

impl<S: RemoteStore, B: MessageBus> CacheTier for TieredCache<S, B> {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        self.inner.counters.record_request();
        if let Some(local) = &self.inner.local {
            if let Some(value) = local.get(key).await? {
                debug!(key, cache = self.inner.name, "local tier hit");
                return Ok(Some(value));
            }
        }
        let value = self.inner.remote.get(key).await?;
        if let (Some(local), Some(value)) = (&self.inner.local, &value) {
            local.put(key, value.clone()).await?;
        }
        Ok(value)
    }

    async fn put(&self, key: &str, value: StoredValue) -> Result<()> {
        // Remote first, then converge every local tier via eviction.
        self.inner.remote.put(key, value).await?;
        self.publish(&InvalidationMessage::evict(&self.inner.name, key)).await
    }

    async fn put_if_absent(&self, key: &str, value: StoredValue) -> Result<Option<StoredValue>> {
        let existing = self.inner.remote.put_if_absent(key, value).await?;
        if existing.is_none() {
            self.publish(&InvalidationMessage::evict(&self.inner.name, key)).await?;
        }
        Ok(existing)
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.inner.remote.evict(key).await?;
        self.publish(&InvalidationMessage::evict(&self.inner.name, key)).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.remote.clear().await?;
        self.publish(&InvalidationMessage::clear(&self.inner.name)).await
    }
}
