// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`RemoteStore`] over a shared Redis deployment.

use std::time::Duration;

use redis::{Script, aio::ConnectionManager, cmd};

use strata_remote::RemoteStore;
use strata_tier::{Error, Result};

/// PTTL reply for a key that exists without an expiry.
const PTTL_NO_EXPIRY: i64 = -1;

/// Removes a key only when its value matches, in one atomic step.
const COMPARE_AND_DELETE: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end";

/// A [`RemoteStore`] backed by Redis.
///
/// Holds a multiplexed connection with automatic reconnection; clones share
/// it. TTLs map onto Redis key expiry, so lock leases and entry lifetimes
/// are enforced server-side.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connects to the Redis instance at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the URL is invalid or the initial
    /// connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(Error::store)?;
        let connection = ConnectionManager::new(client).await.map_err(Error::store)?;
        Ok(Self { connection })
    }

    /// Wraps an already-established connection.
    #[must_use]
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    #[expect(clippy::cast_possible_truncation, reason = "a TTL past u64::MAX ms is not representable in Redis anyway")]
    fn ttl_ms(ttl: Duration) -> u64 {
        ttl.as_millis() as u64
    }
}

impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut connection = self.connection.clone();
        cmd("GET")
            .arg(key)
            .query_async(&mut connection)
            .await
            .map_err(Error::store)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut connection = self.connection.clone();
        let mut set = cmd("SET");
        set.arg(key).arg(value);
        if let Some(ttl) = ttl {
            set.arg("PX").arg(Self::ttl_ms(ttl));
        }
        set.query_async::<()>(&mut connection).await.map_err(Error::store)
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool> {
        let mut connection = self.connection.clone();
        let mut set = cmd("SET");
        set.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            set.arg("PX").arg(Self::ttl_ms(ttl));
        }
        // SET NX replies OK on success and nil when the key exists.
        let reply: Option<String> = set.query_async(&mut connection).await.map_err(Error::store)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut connection)
            .await
            .map_err(Error::store)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut connection = self.connection.clone();
        let mut iter = cmd("SCAN")
            .cursor_arg(0)
            .arg("MATCH")
            .arg(pattern)
            .clone()
            .iter_async::<String>(&mut connection)
            .await
            .map_err(Error::store)?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut connection = self.connection.clone();
        let ms: i64 = cmd("PTTL")
            .arg(key)
            .query_async(&mut connection)
            .await
            .map_err(Error::store)?;
        if ms < PTTL_NO_EXPIRY {
            // Key absent.
            return Ok(None);
        }
        Ok(u64::try_from(ms).ok().map(Duration::from_millis))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut connection = self.connection.clone();
        cmd("PEXPIRE")
            .arg(key)
            .arg(Self::ttl_ms(ttl))
            .query_async::<()>(&mut connection)
            .await
            .map_err(Error::store)
    }

    async fn compare_and_delete(&self, key: &str, token: &[u8]) -> Result<bool> {
        let mut connection = self.connection.clone();
        let removed: i64 = Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(token)
            .invoke_async(&mut connection)
            .await
            .map_err(Error::store)?;
        Ok(removed > 0)
    }
}
