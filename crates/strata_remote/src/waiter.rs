// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-key parking for callers waiting on an in-flight load.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Notify;

use std::time::Duration;

/// Parks callers per key until signaled or timed out.
///
/// This only exists to avoid busy-polling while another process or task
/// loads a key; a wake-up means "check again," never "the value is ready."
/// Every wait carries an explicit timeout, so a missed signal costs one
/// interval, not a hang.
#[derive(Debug, Default)]
pub struct WaitCoordinator {
    parked: DashMap<String, Arc<Notify>>,
}

impl WaitCoordinator {
    /// Creates a coordinator with no parked callers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks the caller until [`signal_all`](Self::signal_all) fires for
    /// `key` or `timeout` elapses, whichever comes first.
    pub async fn wait(&self, key: &str, timeout: Duration) {
        let notify = Arc::clone(
            &self
                .parked
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        );
        // Register interest before awaiting so a signal racing this call is
        // not lost.
        let _ = tokio::time::timeout(timeout, notify.notified()).await;
        drop(notify);
        // The signaler may live in another process and never fire here, so
        // the last waiter out removes the entry itself; otherwise every
        // distinct contended key would stay in the map for good.
        self.parked.remove_if(key, |_, parked| Arc::strong_count(parked) <= 1);
    }

    /// Wakes every caller currently parked on `key`.
    pub fn signal_all(&self, key: &str) {
        if let Some((_, notify)) = self.parked.remove(key) {
            notify.notify_waiters();
        }
    }
}
