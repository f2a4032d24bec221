// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock tier implementation for testing.
//!
//! [`MockTier`] stores values in memory, records every operation, and can be
//! told to fail operations on demand, which makes error paths testable
//! without a real backend.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{CacheTier, Error, Result, StoredValue};

/// Recorded cache operation with full context.
#[derive(Debug, Clone, PartialEq)]
pub enum TierOp {
    /// A get was performed with the given key.
    Get(String),
    /// A put was performed.
    Put {
        /// The key that was written.
        key: String,
        /// The value that was written.
        value: StoredValue,
    },
    /// A put-if-absent was performed.
    PutIfAbsent {
        /// The key that was written.
        key: String,
        /// The value that was offered.
        value: StoredValue,
    },
    /// An evict was performed with the given key.
    Evict(String),
    /// A clear was performed.
    Clear,
}

type FailPredicate = Box<dyn Fn(&TierOp) -> bool + Send + Sync>;

/// A configurable mock tier for testing.
///
/// # Examples
///
/// ```
/// use strata_tier::{CacheTier, StoredValue, testing::{MockTier, TierOp}};
/// use serde_json::json;
///
/// # futures::executor::block_on(async {
/// let tier = MockTier::new();
/// tier.put("key", StoredValue::Present(json!(42))).await?;
/// assert!(tier.get("key").await?.is_some());
/// assert_eq!(tier.operations().len(), 2);
///
/// // Fail every get from now on.
/// tier.fail_when(|op| matches!(op, TierOp::Get(_)));
/// assert!(tier.get("key").await.is_err());
/// # Ok::<(), strata_tier::Error>(())
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MockTier {
    data: Arc<Mutex<HashMap<String, StoredValue>>>,
    operations: Arc<Mutex<Vec<TierOp>>>,
    fail_when: Arc<Mutex<Option<FailPredicate>>>,
}

impl std::fmt::Debug for MockTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTier")
            .field("data", &self.data)
            .field("operations", &self.operations)
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish()
    }
}

impl MockTier {
    /// Creates a new empty mock tier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a predicate that determines which operations fail.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&TierOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Clears the failure predicate.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Returns a clone of all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<TierOp> {
        self.operations.lock().clone()
    }

    /// Returns `true` if the tier currently holds the key.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.lock().contains_key(key)
    }

    fn check(&self, op: TierOp) -> Result<()> {
        let should_fail = self.fail_when.lock().as_ref().is_some_and(|pred| pred(&op));
        self.operations.lock().push(op);
        if should_fail {
            return Err(Error::store("mock: operation failed"));
        }
        Ok(())
    }
}

impl CacheTier for MockTier {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        self.check(TierOp::Get(key.to_string()))?;
        Ok(self.data.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: StoredValue) -> Result<()> {
        self.check(TierOp::Put {
            key: key.to_string(),
            value: value.clone(),
        })?;
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: StoredValue) -> Result<Option<StoredValue>> {
        self.check(TierOp::PutIfAbsent {
            key: key.to_string(),
            value: value.clone(),
        })?;
        let mut data = self.data.lock();
        if let Some(existing) = data.get(key) {
            return Ok(Some(existing.clone()));
        }
        data.insert(key.to_string(), value);
        Ok(None)
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.check(TierOp::Evict(key.to_string()))?;
        self.data.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.check(TierOp::Clear)?;
        self.data.lock().clear();
        Ok(())
    }

    fn len(&self) -> Option<u64> {
        Some(self.data.lock().len() as u64)
    }
}
