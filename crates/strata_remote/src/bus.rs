// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The publish/subscribe contract invalidation travels over.
//!
//! Delivery is at-least-once and best-effort: a process that is offline at
//! publish time never sees the message and self-heals on its next cache
//! miss. [`MemoryBus`] is the in-process reference implementation used in
//! tests and single-process deployments.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use strata_tier::Result;

/// A stream of raw messages received on one channel.
///
/// Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Subscription {
    /// Wraps a receiver producing the channel's messages.
    #[must_use]
    pub fn new(receiver: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self { receiver }
    }

    /// Waits for the next message.
    ///
    /// Returns `None` once the bus side has shut down.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }
}

/// A named-channel publish/subscribe bus.
pub trait MessageBus: Clone + Send + Sync + 'static {
    /// Publishes `payload` to every current subscriber of `channel`.
    fn publish(&self, channel: &str, payload: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Subscribes to `channel`, receiving messages published from now on.
    fn subscribe(&self, channel: &str) -> impl Future<Output = Result<Subscription>> + Send;
}

/// An in-process [`MessageBus`].
///
/// Messages fan out to all live subscribers of the channel; subscribers
/// whose receiving half was dropped are pruned on the next publish.
#[derive(Clone, Debug, Default)]
pub struct MemoryBus {
    channels: Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>>>,
}

impl MemoryBus {
    /// Creates a bus with no subscriptions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let mut channels = self.channels.lock();
        if let Some(senders) = channels.get_mut(channel) {
            senders.retain(|sender| sender.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.channels.lock().entry(channel.to_string()).or_default().push(sender);
        Ok(Subscription::new(receiver))
    }
}
