// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A two-tier result cache.
//!
//! `strata` puts a fast in-process tier in front of a shared, authoritative
//! remote tier to cut load on an expensive backing computation while keeping
//! a fleet of processes loosely consistent:
//!
//! - reads go local-first and backfill the local tier on a remote hit
//! - misses run the loader under cross-process stampede protection, so one
//!   loader execution serves every concurrent caller
//! - writes and evictions mutate the remote tier first, then broadcast an
//!   invalidation so every process's local tier converges
//! - hits near expiry trigger refresh-ahead, extending or reloading entries
//!   before callers ever see a miss
//! - per-process counters merge into fleet-wide stats snapshots under a
//!   distributed lock
//!
//! Consistency across processes is eventual and best-effort by design; a
//! process that misses an invalidation self-heals on its next miss.
//!
//! # Examples
//!
//! ```
//! use strata::RegistryBuilder;
//! use strata_remote::{MemoryBus, MemoryStore};
//! use strata_tier::CacheSettings;
//! use serde_json::json;
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
//! # rt.block_on(async {
//!
//! let registry = RegistryBuilder::new(MemoryStore::new(), MemoryBus::new()).build();
//! registry.init();
//!
//! let users = registry.get_or_create("users", CacheSettings::default()).await?;
//! let value = users.get_or_load("42", || async { Ok(Some(json!("alice"))) }).await?;
//! assert_eq!(value, Some(json!("alice")));
//!
//! registry.shutdown();
//! # Ok::<(), strata_tier::Error>(())
//! # });
//! ```

mod cache;
mod message;
mod registry;
mod stats;
mod sync;

pub use cache::TieredCache;
pub use message::{InvalidationMessage, MessageType};
pub use registry::{CacheRegistry, RegistryBuilder};
pub use stats::{CacheStatsSnapshot, STATS_KEY_PREFIX};
