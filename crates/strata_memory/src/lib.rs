// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-process first tier for the strata two-tier cache.
//!
//! [`MemoryTier`] is a bounded, recency-evicting store backed by Moka. It
//! never performs network I/O and never runs the loader; it only answers
//! from and is fed by the composition layer.
//!
//! # Examples
//!
//! ```
//! use strata_memory::MemoryTier;
//! use strata_tier::{CacheTier, FirstTierSettings, StoredValue};
//! use serde_json::json;
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//!
//! let tier = MemoryTier::new(&FirstTierSettings::default());
//! tier.put("key", StoredValue::Present(json!(42))).await?;
//! let value = tier.get("key").await?;
//! assert!(value.is_some());
//! # Ok::<(), strata_tier::Error>(())
//! # });
//! ```

mod tier;

#[doc(inline)]
pub use tier::MemoryTier;
