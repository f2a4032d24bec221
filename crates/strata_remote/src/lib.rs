// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared second tier for the strata two-tier cache.
//!
//! This crate holds everything that touches the shared store:
//! - [`RemoteStore`] and [`MessageBus`], the contracts adapters implement
//! - [`MemoryStore`] and [`MemoryBus`], in-process reference implementations
//! - [`DistributedLock`], short-lease token-guarded mutual exclusion
//! - [`WaitCoordinator`], per-key parking for stampeded callers
//! - [`RemoteTier`], the authoritative tier with stampede-protected
//!   [`get_or_load`](RemoteTier::get_or_load) and refresh-ahead
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use strata_remote::{MemoryStore, RemoteTier};
//! use strata_tier::SecondTierSettings;
//! use serde_json::json;
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
//! # rt.block_on(async {
//!
//! let settings = SecondTierSettings {
//!     expiration: Duration::from_secs(300),
//!     ..SecondTierSettings::default()
//! };
//! let tier = RemoteTier::new("users", MemoryStore::new(), settings);
//!
//! // The loader runs once; a second call is a pure hit.
//! let value = tier.get_or_load("42", || async { Ok(Some(json!("alice"))) }).await?;
//! assert_eq!(value, Some(json!("alice")));
//! # Ok::<(), strata_tier::Error>(())
//! # });
//! ```

mod bus;
mod lock;
mod runner;
mod store;
mod tier;
mod waiter;

pub use bus::{MemoryBus, MessageBus, Subscription};
pub use lock::DistributedLock;
pub use runner::BackgroundRunner;
pub use store::{MemoryStore, RemoteStore};
pub use tier::{Loaded, RemoteTier};
pub use waiter::WaitCoordinator;
