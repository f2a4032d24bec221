// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache configuration and the settings fingerprint.
//!
//! Settings are immutable once a cache is created. The
//! [`fingerprint`](CacheSettings::fingerprint) is a deterministic string
//! derived from every behavior-affecting field; two caches registered under
//! the same name with different settings get different fingerprints and
//! therefore separate instances.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Expiry mode for the in-process tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpireMode {
    /// Entries expire a fixed duration after the last write.
    #[default]
    SinceWrite,
    /// Entries expire a fixed duration after the last read or write.
    SinceAccess,
}

/// Settings for the in-process first tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirstTierSettings {
    /// Pre-allocation hint for the backing map.
    pub initial_capacity: usize,
    /// Maximum number of entries before recency-based eviction kicks in.
    pub maximum_size: u64,
    /// Time-based expiry for local entries.
    pub expire_time: Duration,
    /// Whether expiry counts from last write or last access.
    pub expire_mode: ExpireMode,
}

impl Default for FirstTierSettings {
    fn default() -> Self {
        Self {
            initial_capacity: 10,
            maximum_size: 5000,
            expire_time: Duration::from_secs(30 * 60),
            expire_mode: ExpireMode::SinceWrite,
        }
    }
}

/// Settings for the shared second tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondTierSettings {
    /// Time-to-live of remote entries.
    pub expiration: Duration,
    /// Window before expiry in which a hit triggers refresh-ahead.
    /// Zero disables refresh-ahead.
    pub preload_time: Duration,
    /// When refreshing ahead, re-run the loader (hard refresh) instead of
    /// extending the TTL in place (soft refresh).
    pub force_refresh: bool,
    /// Namespace remote keys with the cache name.
    pub use_prefix: bool,
    /// Cache loader results of "no value" as a null sentinel.
    pub allow_null: bool,
    /// Divisor applied to the TTL of null-sentinel entries, so cached
    /// absences retry sooner than real values. Values below 1 behave as 1.
    pub magnification: u32,
    /// Degrade decode and connectivity failures to a forced cache miss
    /// instead of surfacing them to the caller.
    pub ignore_exception: bool,
}

impl Default for SecondTierSettings {
    fn default() -> Self {
        Self {
            expiration: Duration::from_secs(60 * 60),
            preload_time: Duration::ZERO,
            force_refresh: false,
            use_prefix: true,
            allow_null: true,
            magnification: 1,
            ignore_exception: true,
        }
    }
}

impl SecondTierSettings {
    /// The magnification divisor, clamped to at least 1.
    #[must_use]
    pub fn magnification(&self) -> u32 {
        self.magnification.max(1)
    }
}

/// Full configuration of one tiered cache.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use strata_tier::{CacheSettings, SecondTierSettings};
///
/// let settings = CacheSettings {
///     second: SecondTierSettings {
///         expiration: Duration::from_secs(600),
///         preload_time: Duration::from_secs(60),
///         ..SecondTierSettings::default()
///     },
///     ..CacheSettings::default()
/// };
/// assert_ne!(settings.fingerprint(), CacheSettings::default().fingerprint());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Whether the in-process tier participates at all.
    pub use_first_tier: bool,
    /// First (in-process) tier settings.
    pub first: FirstTierSettings,
    /// Second (remote) tier settings.
    pub second: SecondTierSettings,
    /// Free-text description, carried into stats snapshots.
    pub depict: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            use_first_tier: true,
            first: FirstTierSettings::default(),
            second: SecondTierSettings::default(),
            depict: String::new(),
        }
    }
}

impl CacheSettings {
    /// Returns the deterministic fingerprint of these settings.
    ///
    /// Identical settings always produce an identical fingerprint, and every
    /// behavior-affecting field participates, so same-named caches with
    /// different configurations never share an instance. The `depict` text
    /// is descriptive only and does not participate.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mode = match self.first.expire_mode {
            ExpireMode::SinceWrite => 'w',
            ExpireMode::SinceAccess => 'a',
        };
        format!(
            "{}{}-{}{}-{}-{}-{}{}{}{}-{}",
            u8::from(self.use_first_tier),
            self.first.expire_time.as_millis(),
            mode,
            self.first.maximum_size,
            self.second.expiration.as_millis(),
            self.second.preload_time.as_millis(),
            u8::from(self.second.force_refresh),
            u8::from(self.second.use_prefix),
            u8::from(self.second.allow_null),
            u8::from(self.second.ignore_exception),
            self.second.magnification()
        )
    }
}
