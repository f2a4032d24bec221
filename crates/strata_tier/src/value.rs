// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The tagged value stored by every cache tier.
//!
//! A cache that may legitimately compute "no result" needs to tell the
//! difference between "we cached the absence" and "we never cached anything."
//! [`StoredValue`] makes that explicit at the storage boundary: an entry is
//! either [`Present`](StoredValue::Present) with a payload or the
//! [`Null`](StoredValue::Null) sentinel, never a raw null.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// A cached value: either a real payload or a cached absence.
///
/// # Examples
///
/// ```
/// use strata_tier::StoredValue;
/// use serde_json::json;
///
/// let hit = StoredValue::from_loaded(Some(json!({"id": 42})));
/// assert!(!hit.is_null());
///
/// let absent = StoredValue::from_loaded(None);
/// assert!(absent.is_null());
/// assert_eq!(absent.into_value(), None);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StoredValue {
    /// A real cached payload.
    Present(Value),
    /// The cached-absence sentinel.
    Null,
}

impl StoredValue {
    /// Converts a loader result into a stored value.
    pub fn from_loaded(value: Option<Value>) -> Self {
        match value {
            Some(v) => Self::Present(v),
            None => Self::Null,
        }
    }

    /// Returns `true` if this is the cached-absence sentinel.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the payload, mapping the sentinel back to `None`.
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Present(v) => Some(v),
            Self::Null => None,
        }
    }

    /// Returns a reference to the payload, if present.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Present(v) => Some(v),
            Self::Null => None,
        }
    }

    /// Encodes this value for the remote store.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::codec)
    }

    /// Decodes a value read back from the remote store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] naming `key` when the bytes are not a valid
    /// stored entry, so the caller can evict the corrupted entry.
    pub fn from_bytes(key: &str, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::decode(key, e))
    }
}

impl From<Value> for StoredValue {
    fn from(value: Value) -> Self {
        Self::Present(value)
    }
}
