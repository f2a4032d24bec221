// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache creation, invalidation dispatch, and background jobs.
//!
//! The registry is the composition root's handle on the whole cache
//! subsystem: it lazily creates one [`TieredCache`] per name and settings
//! fingerprint, subscribes each name's invalidation channel exactly once,
//! and runs the periodic stats-merge and local-resync jobs between
//! [`init`](CacheRegistry::init) and [`shutdown`](CacheRegistry::shutdown).

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use strata_remote::{MessageBus, RemoteStore};
use strata_tier::{CacheSettings, CacheTier, Result};

use crate::{
    cache::TieredCache,
    message::InvalidationMessage,
    stats::{CacheStatsSnapshot, StatsAggregator},
    sync::{SyncEntry, sync_cache},
};

const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Configures and builds a [`CacheRegistry`].
pub struct RegistryBuilder<S, B> {
    store: S,
    bus: B,
    stats_interval: Duration,
    sync_interval: Duration,
    sync_entries: Vec<SyncEntry>,
}

impl<S, B> std::fmt::Debug for RegistryBuilder<S, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("stats_interval", &self.stats_interval)
            .field("sync_interval", &self.sync_interval)
            .field("sync_entries", &self.sync_entries.len())
            .finish_non_exhaustive()
    }
}

impl<S: RemoteStore, B: MessageBus> RegistryBuilder<S, B> {
    /// Starts a builder over the given store and bus.
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            stats_interval: DEFAULT_STATS_INTERVAL,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            sync_entries: Vec::new(),
        }
    }

    /// How often local counters merge into the shared stats snapshots.
    #[must_use]
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// How often enrolled caches resync their local tier.
    #[must_use]
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Enrolls a cache in the scheduled local-tier resync.
    #[must_use]
    pub fn sync_cache(mut self, name: impl Into<String>, settings: CacheSettings) -> Self {
        self.sync_entries.push(SyncEntry {
            name: name.into(),
            settings,
        });
        self
    }

    /// Builds the registry. Background jobs start on
    /// [`init`](CacheRegistry::init), not here.
    #[must_use]
    pub fn build(self) -> CacheRegistry<S, B> {
        CacheRegistry {
            inner: Arc::new(RegistryInner {
                stats: StatsAggregator::new(self.store.clone()),
                store: self.store,
                bus: self.bus,
                caches: DashMap::new(),
                creation: tokio::sync::Mutex::new(()),
                jobs: parking_lot::Mutex::new(Vec::new()),
                initialized: AtomicBool::new(false),
                stats_interval: self.stats_interval,
                sync_interval: self.sync_interval,
                sync_entries: self.sync_entries,
            }),
        }
    }
}

struct RegistryInner<S, B> {
    store: S,
    bus: B,
    /// Name to instances, one per settings fingerprint.
    caches: DashMap<String, Vec<TieredCache<S, B>>>,
    /// Serializes the creation slow path. The fast path never takes it.
    creation: tokio::sync::Mutex<()>,
    jobs: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    initialized: AtomicBool,
    stats: StatsAggregator<S>,
    stats_interval: Duration,
    sync_interval: Duration,
    sync_entries: Vec<SyncEntry>,
}

/// Creates, memoizes, and wires up [`TieredCache`] instances.
///
/// Held by the application's composition root; clones share state.
pub struct CacheRegistry<S, B> {
    inner: Arc<RegistryInner<S, B>>,
}

impl<S, B> Clone for CacheRegistry<S, B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, B> std::fmt::Debug for CacheRegistry<S, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("names", &self.inner.caches.len())
            .finish_non_exhaustive()
    }
}

impl<S: RemoteStore, B: MessageBus> CacheRegistry<S, B> {
    /// Returns the cache for `name` with these settings, creating it on
    /// first use.
    ///
    /// Identical settings always return the same instance. The first cache
    /// created under a name also subscribes that name's invalidation
    /// channel; a second fingerprint under the same name is tolerated but
    /// logged as a configuration hazard.
    ///
    /// # Errors
    ///
    /// Returns [`strata_tier::Error::Store`] if subscribing the
    /// invalidation channel fails.
    pub async fn get_or_create(&self, name: &str, settings: CacheSettings) -> Result<TieredCache<S, B>> {
        let fingerprint = settings.fingerprint();
        if let Some(cache) = self.lookup(name, &fingerprint) {
            return Ok(cache);
        }

        let _guard = self.inner.creation.lock().await;
        if let Some(cache) = self.lookup(name, &fingerprint) {
            return Ok(cache);
        }

        let first_for_name = !self.inner.caches.contains_key(name);
        let cache = TieredCache::new(name, settings, self.inner.store.clone(), self.inner.bus.clone());
        {
            let mut instances = self.inner.caches.entry(name.to_string()).or_default();
            instances.push(cache.clone());
            if instances.len() >= 2 {
                warn!(
                    cache = name,
                    fingerprints = instances.len(),
                    "one cache name maps to multiple configurations; keys may collide and ttls may disagree"
                );
            }
        }
        if first_for_name {
            self.subscribe(name).await?;
        }
        debug!(cache = name, fingerprint, "created cache instance");
        Ok(cache)
    }

    /// The cache for `name` and `fingerprint`, if this process created one.
    #[must_use]
    pub fn lookup(&self, name: &str, fingerprint: &str) -> Option<TieredCache<S, B>> {
        self.inner
            .caches
            .get(name)
            .and_then(|instances| instances.iter().find(|c| c.fingerprint() == fingerprint).cloned())
    }

    /// Starts the periodic stats-merge and local-resync jobs.
    ///
    /// Calling `init` more than once is a no-op.
    pub fn init(&self) {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            warn!("cache registry already initialized");
            return;
        }

        let mut jobs = self.inner.jobs.lock();

        let weak = Arc::downgrade(&self.inner);
        let stats_interval = self.inner.stats_interval;
        jobs.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(stats_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                aggregate_stats(&inner).await;
            }
        }));

        if !self.inner.sync_entries.is_empty() {
            let weak = Arc::downgrade(&self.inner);
            let sync_interval = self.inner.sync_interval;
            jobs.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(sync_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let Some(inner) = weak.upgrade() else { break };
                    sync_local_tiers(&Self { inner }).await;
                }
            }));
        }

        info!("cache registry initialized");
    }

    /// Stops background jobs and drops invalidation subscriptions.
    ///
    /// Existing cache handles keep working; they just stop receiving
    /// invalidation and stop merging stats.
    pub fn shutdown(&self) {
        let mut jobs = self.inner.jobs.lock();
        for job in jobs.drain(..) {
            job.abort();
        }
        self.inner.initialized.store(false, Ordering::SeqCst);
        info!("cache registry shut down");
    }

    /// Runs one stats-merge cycle over every cache on this process.
    ///
    /// The periodic job does exactly this; exposed so deployments without
    /// the job (and tests) can flush counters deterministically.
    pub async fn aggregate_stats_once(&self) {
        aggregate_stats(&self.inner).await;
    }

    /// Runs one local-resync cycle over the enrolled caches.
    ///
    /// # Errors
    ///
    /// Returns the first store failure encountered; remaining entries are
    /// still attempted on the next cycle.
    pub async fn sync_once(&self) -> Result<()> {
        let mut first_error = None;
        for entry in self.inner.sync_entries.clone() {
            let cold = !self.inner.caches.contains_key(&entry.name);
            let outcome = match self.get_or_create(&entry.name, entry.settings).await {
                Ok(cache) => sync_cache(&self.inner.store, &cache, cold).await,
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                warn!(cache = entry.name, error = %err, "local resync failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Lists shared stats snapshots, worst hit rate first.
    ///
    /// `filter` restricts the listing to cache names starting with it.
    ///
    /// # Errors
    ///
    /// Returns [`strata_tier::Error::Store`] if the store cannot be reached.
    pub async fn list_stats(&self, filter: Option<&str>) -> Result<Vec<CacheStatsSnapshot>> {
        self.inner.stats.list(filter).await
    }

    /// Deletes every shared stats snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`strata_tier::Error::Store`] if the store cannot be reached.
    pub async fn reset_stats(&self) -> Result<()> {
        self.inner.stats.reset().await
    }

    /// Evicts `key` from the identified cache, or clears the whole cache
    /// when `key` is absent.
    ///
    /// A name and fingerprint this process has not created is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`strata_tier::Error::Store`] if the mutation or its
    /// invalidation broadcast fails.
    pub async fn delete_cache(&self, name: &str, fingerprint: &str, key: Option<&str>) -> Result<()> {
        let Some(cache) = self.lookup(name, fingerprint) else {
            warn!(cache = name, fingerprint, "delete requested for an unknown cache instance");
            return Ok(());
        };
        match key {
            Some(key) => cache.evict(key).await,
            None => cache.clear().await,
        }
    }

    async fn subscribe(&self, name: &str) -> Result<()> {
        let mut subscription = self.inner.bus.subscribe(name).await?;
        let weak: Weak<RegistryInner<S, B>> = Arc::downgrade(&self.inner);
        let channel = name.to_string();
        let handle = tokio::spawn(async move {
            while let Some(payload) = subscription.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                match InvalidationMessage::from_bytes(&payload) {
                    Ok(message) => dispatch(&inner, &message).await,
                    Err(err) => warn!(channel, error = %err, "dropping malformed invalidation message"),
                }
            }
            debug!(channel, "invalidation subscription ended");
        });
        self.inner.jobs.lock().push(handle);
        Ok(())
    }
}

/// Applies a received message to every instance registered under its name.
async fn dispatch<S: RemoteStore, B: MessageBus>(inner: &RegistryInner<S, B>, message: &InvalidationMessage) {
    let instances: Vec<_> = inner
        .caches
        .get(&message.cache_name)
        .map(|entry| entry.value().clone())
        .unwrap_or_default();
    for cache in instances {
        if let Err(err) = cache.apply(message).await {
            warn!(cache = message.cache_name, error = %err, "invalidation dispatch failed");
        }
    }
}

async fn aggregate_stats<S: RemoteStore, B: MessageBus>(inner: &RegistryInner<S, B>) {
    let caches: Vec<_> = inner.caches.iter().flat_map(|entry| entry.value().clone()).collect();
    for cache in caches {
        match inner.stats.merge(&cache).await {
            Ok(true) => debug!(cache = cache.name(), "merged stats into shared snapshot"),
            Ok(false) => {}
            Err(err) => warn!(cache = cache.name(), error = %err, "stats merge failed"),
        }
    }
}

async fn sync_local_tiers<S: RemoteStore, B: MessageBus>(registry: &CacheRegistry<S, B>) {
    if let Err(err) = registry.sync_once().await {
        warn!(error = %err, "local resync cycle failed");
    }
}
