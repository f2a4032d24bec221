// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The shared, authoritative second tier.
//!
//! [`RemoteTier`] owns everything that makes the remote store behave like a
//! cache: key namespacing, the null-sentinel policy, self-healing of
//! undecodable entries, stampede-protected [`get_or_load`], and
//! refresh-ahead of near-expiry entries.
//!
//! [`get_or_load`]: RemoteTier::get_or_load

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use strata_tier::{BoxError, CacheTier, Error, Result, SecondTierSettings, StoredValue, TierCounters};

use crate::{BackgroundRunner, DistributedLock, RemoteStore, WaitCoordinator};

/// How many times a miss re-checks the store and re-attempts the load lock
/// before giving up on protection.
const LOAD_RETRIES: u32 = 20;

/// How long a contended caller parks between retries.
const LOAD_RETRY_WAIT: Duration = Duration::from_millis(20);

/// Lease on the per-key load and refresh locks.
const LOCK_LEASE: Duration = Duration::from_secs(10);

/// How long a hard-refresh task waits for the refresh lock.
const HARD_REFRESH_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Concurrent hard-refresh tasks per tier.
const HARD_REFRESH_CAPACITY: usize = 8;

/// Suffix of the per-key lock guarding loads.
const LOAD_LOCK_SUFFIX: &str = "_sync_lock";

/// Suffix of the per-key lock guarding refresh-ahead.
const REFRESH_LOCK_SUFFIX: &str = "_lock";

/// Outcome of a caller-supplied loader: a value, a legitimate absence, or
/// a failure.
pub type Loaded = std::result::Result<Option<Value>, BoxError>;

struct Inner<S> {
    name: String,
    store: S,
    settings: SecondTierSettings,
    waiters: WaitCoordinator,
    counters: TierCounters,
    refresh_pool: BackgroundRunner,
}

/// The shared second tier over a [`RemoteStore`].
///
/// A miss in [`get_or_load`](Self::get_or_load) is single-flighted across
/// every process sharing the store: one caller wins a per-key distributed
/// lock and runs the loader while the rest park briefly and re-check. The
/// retry loop is hard-bounded, so pathological contention degrades to a
/// duplicate load instead of unbounded waiting.
pub struct RemoteTier<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for RemoteTier<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> std::fmt::Debug for RemoteTier<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTier")
            .field("name", &self.inner.name)
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl<S: RemoteStore> RemoteTier<S> {
    /// Creates the second tier of the cache called `name`.
    pub fn new(name: impl Into<String>, store: S, settings: SecondTierSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                store,
                settings,
                waiters: WaitCoordinator::new(),
                counters: TierCounters::new(),
                refresh_pool: BackgroundRunner::new(HARD_REFRESH_CAPACITY),
            }),
        }
    }

    /// The cache name this tier serves.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The settings this tier was created with.
    #[must_use]
    pub fn settings(&self) -> &SecondTierSettings {
        &self.inner.settings
    }

    /// The request/loader counters maintained by this tier.
    #[must_use]
    pub fn counters(&self) -> &TierCounters {
        &self.inner.counters
    }

    /// The store key holding `key`'s entry.
    #[must_use]
    pub fn entry_key(&self, key: &str) -> String {
        if self.inner.settings.use_prefix {
            format!("{}:{key}", self.inner.name)
        } else {
            key.to_string()
        }
    }

    fn lock_key(&self, key: &str, suffix: &str) -> String {
        let mut lock_key = self.entry_key(key);
        lock_key.push_str(suffix);
        lock_key
    }

    fn value_ttl(&self, value: &StoredValue) -> Duration {
        let settings = &self.inner.settings;
        if value.is_null() {
            settings.expiration / settings.magnification()
        } else {
            settings.expiration
        }
    }

    /// Returns the cached value for `key`, running `loader` under stampede
    /// protection on a miss.
    ///
    /// A hit near expiry triggers refresh-ahead: a soft TTL extension, or
    /// with `force_refresh` a background reload that never blocks this call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Loader`] if the loader fails; the per-key lock is
    /// released and parked callers are signaled first. Store and decode
    /// failures surface unless `ignore_exception` degrades them to a miss.
    pub async fn get_or_load<F, Fut>(&self, key: &str, loader: F) -> Result<Option<Value>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Loaded> + Send + 'static,
    {
        self.inner.counters.record_request();
        let loader = Arc::new(loader);

        if let Some(value) = self.read_live(key).await? {
            self.refresh_ahead(key, loader).await;
            return Ok(value.into_value());
        }

        let entry_key = self.entry_key(key);
        let lock_key = self.lock_key(key, LOAD_LOCK_SUFFIX);
        for _ in 0..LOAD_RETRIES {
            // Cheap early exit: another process may have loaded it already.
            if let Some(value) = self.read_live(key).await? {
                return Ok(value.into_value());
            }

            let lock = DistributedLock::new(self.inner.store.clone(), lock_key.clone(), LOCK_LEASE);
            if lock.try_lock().await.unwrap_or(false) {
                let loaded = self.load_and_store(key, loader.as_ref()).await;
                self.inner.waiters.signal_all(&entry_key);
                if let Err(err) = lock.unlock().await {
                    debug!(key, error = %err, "load lock release failed, lease will expire it");
                }
                return loaded.map(StoredValue::into_value);
            }

            self.inner.waiters.wait(&entry_key, LOAD_RETRY_WAIT).await;
        }

        // Contention past the bound: duplicate work beats unbounded latency.
        debug!(key, cache = self.inner.name, "load lock contended past retry bound, loading unprotected");
        let loaded = self.load_and_store(key, loader.as_ref()).await;
        self.inner.waiters.signal_all(&entry_key);
        loaded.map(StoredValue::into_value)
    }

    /// Reads `key`'s entry with the null policy applied: a sentinel read
    /// while `allow_null` is off counts as a miss.
    async fn read_live(&self, key: &str) -> Result<Option<StoredValue>> {
        match self.read_entry(key).await? {
            Some(value) if value.is_null() && !self.inner.settings.allow_null => Ok(None),
            other => Ok(other),
        }
    }

    async fn read_entry(&self, key: &str) -> Result<Option<StoredValue>> {
        let entry_key = self.entry_key(key);
        let bytes = match self.inner.store.get(&entry_key).await {
            Ok(bytes) => bytes,
            Err(err) if self.inner.settings.ignore_exception => {
                warn!(key, error = %err, "remote read failed, degrading to a miss");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        match StoredValue::from_bytes(key, &bytes) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                // Self-heal: drop the corrupted entry so the next read
                // falls through to the loader.
                if let Err(evict_err) = self.inner.store.delete(&entry_key).await {
                    warn!(key, error = %evict_err, "failed to evict undecodable entry");
                }
                if self.inner.settings.ignore_exception {
                    warn!(key, error = %err, "evicted undecodable entry, degrading to a miss");
                    Ok(None)
                } else {
                    error!(key, error = %err, "evicted undecodable entry");
                    Err(err)
                }
            }
        }
    }

    async fn load_and_store<F, Fut>(&self, key: &str, loader: &F) -> Result<StoredValue>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Loaded> + Send,
    {
        let started = Instant::now();
        let loaded = loader().await;
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.inner.counters.record_miss();
        self.inner.counters.add_load_time_ms(elapsed);

        let loaded = loaded.map_err(|err| Error::loader(key, err))?;
        let value = StoredValue::from_loaded(loaded);
        self.write_entry(key, &value).await?;
        Ok(value)
    }

    async fn write_entry(&self, key: &str, value: &StoredValue) -> Result<()> {
        let entry_key = self.entry_key(key);
        if value.is_null() && !self.inner.settings.allow_null {
            // Caching absence is off: make sure no stale entry lingers.
            self.inner.store.delete(&entry_key).await
        } else {
            let ttl = self.value_ttl(value);
            self.inner.store.put(&entry_key, value.to_bytes()?, Some(ttl)).await
        }
    }

    async fn refresh_ahead<F, Fut>(&self, key: &str, loader: Arc<F>)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Loaded> + Send + 'static,
    {
        let settings = &self.inner.settings;
        if settings.preload_time.is_zero() {
            return;
        }
        let Ok(Some(remaining)) = self.inner.store.ttl(&self.entry_key(key)).await else {
            return;
        };
        if remaining > settings.preload_time {
            return;
        }
        if settings.force_refresh {
            self.hard_refresh(key, loader);
        } else {
            self.soft_refresh(key).await;
        }
    }

    /// Extends the entry's TTL in place. Single-flight per window via the
    /// refresh lock; losing the lock means someone else is extending.
    async fn soft_refresh(&self, key: &str) {
        let lock = DistributedLock::new(
            self.inner.store.clone(),
            self.lock_key(key, REFRESH_LOCK_SUFFIX),
            LOCK_LEASE,
        );
        if lock.try_lock().await.unwrap_or(false) {
            let entry_key = self.entry_key(key);
            match self.inner.store.expire(&entry_key, self.inner.settings.expiration).await {
                Ok(()) => debug!(key, cache = self.inner.name, "extended ttl ahead of expiry"),
                Err(err) => warn!(key, error = %err, "ttl extension failed"),
            }
            if let Err(err) = lock.unlock().await {
                debug!(key, error = %err, "refresh lock release failed, lease will expire it");
            }
        }
    }

    /// Re-runs the loader in the background and overwrites the entry. The
    /// triggering caller keeps the pre-refresh value and never blocks.
    fn hard_refresh<F, Fut>(&self, key: &str, loader: Arc<F>)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Loaded> + Send + 'static,
    {
        let spawned = self.inner.refresh_pool.try_spawn({
            let tier = self.clone();
            let key = key.to_owned();
            async move {
                let lock = DistributedLock::new(
                    tier.inner.store.clone(),
                    tier.lock_key(&key, REFRESH_LOCK_SUFFIX),
                    LOCK_LEASE,
                );
                match lock.lock(HARD_REFRESH_LOCK_TIMEOUT).await {
                    Ok(true) => {
                        // Double-check under the lock: another process may
                        // have refreshed while this task waited.
                        let still_stale = matches!(
                            tier.inner.store.ttl(&tier.entry_key(&key)).await,
                            Ok(Some(remaining)) if remaining <= tier.inner.settings.preload_time
                        );
                        if still_stale {
                            if let Err(err) = tier.load_and_store(&key, loader.as_ref()).await {
                                warn!(key, error = %err, "refresh-ahead reload failed");
                            }
                        }
                        if let Err(err) = lock.unlock().await {
                            debug!(key, error = %err, "refresh lock release failed, lease will expire it");
                        }
                    }
                    Ok(false) => {}
                    Err(err) => debug!(key, error = %err, "refresh lock unavailable"),
                }
            }
        });
        if !spawned {
            debug!(key, "refresh pool saturated, skipping hard refresh");
        }
    }
}

impl<S: RemoteStore> CacheTier for RemoteTier<S> {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        self.inner.counters.record_request();
        self.read_live(key).await
    }

    async fn put(&self, key: &str, value: StoredValue) -> Result<()> {
        self.write_entry(key, &value).await
    }

    async fn put_if_absent(&self, key: &str, value: StoredValue) -> Result<Option<StoredValue>> {
        if let Some(existing) = self.read_live(key).await? {
            return Ok(Some(existing));
        }
        if value.is_null() && !self.inner.settings.allow_null {
            return Ok(None);
        }
        let ttl = self.value_ttl(&value);
        let inserted = self
            .inner
            .store
            .put_if_absent(&self.entry_key(key), value.to_bytes()?, Some(ttl))
            .await?;
        if inserted {
            Ok(None)
        } else {
            // Lost the race; report what won it.
            self.read_live(key).await
        }
    }

    async fn evict(&self, key: &str) -> Result<()> {
        debug!(key, cache = self.inner.name, "evicting remote entry");
        self.inner.store.delete(&self.entry_key(key)).await
    }

    async fn clear(&self) -> Result<()> {
        if !self.inner.settings.use_prefix {
            // Unprefixed keys cannot be enumerated without sweeping the
            // whole store.
            warn!(cache = self.inner.name, "clear requires key prefixing, skipping");
            return Ok(());
        }
        let pattern = format!("{}:*", self.inner.name);
        let keys = self.inner.store.keys(&pattern).await?;
        let count = keys.len();
        for key in keys {
            self.inner.store.delete(&key).await?;
        }
        info!(cache = self.inner.name, count, "cleared remote entries");
        Ok(())
    }
}
