// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache operations.
//!
//! Lock contention and transient misses are handled inside the components
//! with retry and backoff; only loader failures, remote-store failures, and
//! data-integrity failures surface through [`Error`].

/// A boxed error source, used for loader and store failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error from a cache operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller-supplied loader failed while computing a value.
    ///
    /// Always propagated to the caller; the per-key lock is released and
    /// waiters are signaled before this is returned.
    #[error("loader failed for key `{key}`")]
    Loader {
        /// The cache key whose load failed.
        key: String,
        /// The loader's underlying error.
        #[source]
        source: BoxError,
    },

    /// The shared remote store could not be reached or rejected the operation.
    ///
    /// The remote tier is authoritative, so this surfaces to the caller
    /// unless the cache is configured to degrade to a forced miss.
    #[error("remote store unavailable")]
    Store {
        /// The transport or store error.
        #[source]
        source: BoxError,
    },

    /// A stored entry failed to decode (format or version mismatch).
    ///
    /// The corrupted entry is evicted before this is reported; with
    /// `ignore_exception` set the call proceeds as a cache miss instead.
    #[error("failed to decode stored entry for key `{key}`")]
    Decode {
        /// The cache key whose entry was corrupted.
        key: String,
        /// The decode error.
        #[source]
        source: serde_json::Error,
    },

    /// A payload or bus message failed to encode or decode.
    #[error("failed to encode or decode cache payload")]
    Codec {
        /// The encode error.
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// Wraps a loader failure for the given key.
    pub fn loader(key: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Loader {
            key: key.into(),
            source: source.into(),
        }
    }

    /// Wraps a remote store failure.
    pub fn store(source: impl Into<BoxError>) -> Self {
        Self::Store { source: source.into() }
    }

    /// Wraps a decode failure for the given key.
    pub fn decode(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            key: key.into(),
            source,
        }
    }

    /// Wraps an encode failure.
    pub fn codec(source: serde_json::Error) -> Self {
        Self::Codec { source }
    }
}

/// A specialized [`Result`] type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;
