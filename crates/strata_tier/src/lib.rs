// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Storage contract and shared types for the strata two-tier cache.
//!
//! This crate defines the pieces every tier implementation depends on:
//! - [`CacheTier`], the trait all storage backends implement
//! - [`StoredValue`], the tagged value that distinguishes a cached null
//!   from an absent entry
//! - [`CacheSettings`] and its per-tier halves, plus the settings
//!   [`fingerprint`](CacheSettings::fingerprint) that disambiguates
//!   same-named caches
//! - [`TierCounters`], the atomic hit/miss/load-time counters each tier
//!   maintains for the stats aggregator
//! - [`Error`] and [`Result`] for all cache operations
//!
//! # Examples
//!
//! ```
//! use strata_tier::{CacheSettings, StoredValue};
//!
//! let settings = CacheSettings::default();
//! let fingerprint = settings.fingerprint();
//! assert_eq!(fingerprint, CacheSettings::default().fingerprint());
//!
//! let value = StoredValue::from_loaded(None);
//! assert!(value.is_null());
//! ```

pub mod counters;
pub mod error;
pub mod settings;
pub mod tier;
pub mod value;

#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use counters::TierCounters;
#[doc(inline)]
pub use error::{BoxError, Error, Result};
#[doc(inline)]
pub use settings::{CacheSettings, ExpireMode, FirstTierSettings, SecondTierSettings};
#[doc(inline)]
pub use tier::CacheTier;
#[doc(inline)]
pub use value::StoredValue;
