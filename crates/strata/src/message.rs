// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The invalidation message carried over the bus.
//!
//! One channel per cache name; the wire shape is stable JSON so processes
//! running different builds keep understanding each other.

use serde::{Deserialize, Serialize};

use strata_tier::{Error, Result};

/// What a receiving process should do to its local tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Drop the named key from the local tier.
    Evict,
    /// Drop every local entry of the cache.
    Clear,
    /// Re-read the key from the remote tier and overwrite the local entry.
    Update,
}

/// A cache mutation broadcast to every subscribed process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationMessage {
    /// The cache the message applies to; also the channel it travels on.
    pub cache_name: String,
    /// The affected key. Absent for [`MessageType::Clear`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// The action to apply.
    pub message_type: MessageType,
}

impl InvalidationMessage {
    /// An eviction notice for one key.
    pub fn evict(cache_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            cache_name: cache_name.into(),
            key: Some(key.into()),
            message_type: MessageType::Evict,
        }
    }

    /// A whole-cache clear notice.
    pub fn clear(cache_name: impl Into<String>) -> Self {
        Self {
            cache_name: cache_name.into(),
            key: None,
            message_type: MessageType::Clear,
        }
    }

    /// A forced-resync notice for one key.
    pub fn update(cache_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            cache_name: cache_name.into(),
            key: Some(key.into()),
            message_type: MessageType::Update,
        }
    }

    /// Encodes the message for the bus.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::codec)
    }

    /// Decodes a message received from the bus.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] for malformed payloads; dispatch logs and
    /// skips those rather than tearing down the subscription.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(Error::codec)
    }
}
