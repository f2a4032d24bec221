// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The core trait for cache storage tiers.
//!
//! [`CacheTier`] defines the contract shared by the in-process tier, the
//! remote tier, and the composed tiered cache. Implement the storage
//! operations here; load arbitration, invalidation broadcasts, and stats
//! live in the composition layer.

use crate::{Result, StoredValue};

/// Trait for cache tier implementations.
///
/// Keys are plain strings, resolved by the caller before they reach the
/// cache. Values are [`StoredValue`]s so a cached absence survives every
/// tier boundary.
///
/// All five core methods are required; only `len` and `is_empty` have
/// default implementations (`len` returns `None` for tiers that cannot
/// cheaply count their entries).
pub trait CacheTier: Send + Sync {
    /// Gets a value, returning `None` when the key is absent or expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<StoredValue>>> + Send;

    /// Inserts or overwrites a value.
    fn put(&self, key: &str, value: StoredValue) -> impl Future<Output = Result<()>> + Send;

    /// Inserts a value only when the key is absent, returning the existing
    /// value otherwise.
    fn put_if_absent(&self, key: &str, value: StoredValue) -> impl Future<Output = Result<Option<StoredValue>>> + Send;

    /// Removes a single entry.
    fn evict(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Removes all entries belonging to this cache.
    fn clear(&self) -> impl Future<Output = Result<()>> + Send;

    /// Returns the number of entries, if the tier tracks it.
    fn len(&self) -> Option<u64> {
        None
    }

    /// Returns `true` if the cache contains no entries, if the tier tracks it.
    fn is_empty(&self) -> Option<bool> {
        self.len().map(|len| len == 0)
    }
}
