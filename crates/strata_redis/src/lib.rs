// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Redis adapter for the strata two-tier cache.
//!
//! Implements the [`strata_remote`] contracts over a shared Redis
//! deployment: [`RedisStore`] for entries, locks, and stats snapshots, and
//! [`RedisBus`] for invalidation fan-out over pub/sub.
//!
//! # Examples
//!
//! ```no_run
//! use strata_redis::{RedisBus, RedisStore};
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//!
//! let store = RedisStore::connect("redis://127.0.0.1/").await?;
//! let bus = RedisBus::connect("redis://127.0.0.1/").await?;
//! # let _ = (store, bus);
//! # Ok::<(), strata_tier::Error>(())
//! # });
//! ```

mod bus;
mod store;

pub use bus::RedisBus;
pub use store::RedisStore;
