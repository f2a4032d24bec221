// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`MessageBus`] over Redis pub/sub.

use futures::StreamExt;
use redis::{Client, aio::ConnectionManager, cmd};
use tokio::sync::mpsc;
use tracing::debug;

use strata_remote::{MessageBus, Subscription};
use strata_tier::{Error, Result};

/// A [`MessageBus`] backed by Redis pub/sub channels.
///
/// Each subscription holds its own pub/sub connection and a forwarder task
/// pumping payloads into the subscriber's queue; publishing reuses a shared
/// multiplexed connection. Delivery follows Redis semantics: subscribers
/// offline at publish time never see the message.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus").finish_non_exhaustive()
    }
}

impl RedisBus {
    /// Connects to the Redis instance at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the URL is invalid or the initial
    /// connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(Error::store)?;
        let connection = ConnectionManager::new(client.clone()).await.map_err(Error::store)?;
        Ok(Self { client, connection })
    }
}

impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let mut connection = self.connection.clone();
        cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<()>(&mut connection)
            .await
            .map_err(Error::store)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(Error::store)?;
        pubsub.subscribe(channel).await.map_err(Error::store)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let channel = channel.to_string();
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(message) = messages.next().await {
                if sender.send(message.get_payload_bytes().to_vec()).is_err() {
                    // Subscriber dropped its end.
                    break;
                }
            }
            debug!(channel, "pub/sub forwarder stopped");
        });
        Ok(Subscription::new(receiver))
    }
}
