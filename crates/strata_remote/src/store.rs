// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The key-value contract the second tier is built on.
//!
//! [`RemoteStore`] is the narrow surface the remote tier, the distributed
//! lock, and the stats aggregator need from a shared store. [`MemoryStore`]
//! is a process-local implementation of the same contract, used as the
//! reference backend in tests and as a stand-in where no shared store is
//! deployed.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use strata_tier::Result;

/// A shared key-value store holding raw entry bytes.
///
/// Implementations are cheap handles onto a shared backend; cloning must not
/// duplicate state. All TTLs are enforced by the store itself, which is what
/// lets a crashed lock holder's lease expire without anyone's help.
pub trait RemoteStore: Clone + Send + Sync + 'static {
    /// Reads the raw bytes stored under `key`, if any.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Writes `value` under `key`, replacing any existing entry.
    ///
    /// With `ttl` set the entry self-expires; `None` means no expiry.
    fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> impl Future<Output = Result<()>> + Send;

    /// Writes `value` under `key` only if the key is vacant.
    ///
    /// Returns `true` if the write happened. The check and the write are a
    /// single atomic step on the backend.
    fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Removes the entry under `key`, if any.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Lists every key matching `pattern`, a literal prefix followed by `*`.
    fn keys(&self, pattern: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// The remaining time-to-live of `key`.
    ///
    /// `None` when the key is absent or has no expiry.
    fn ttl(&self, key: &str) -> impl Future<Output = Result<Option<Duration>>> + Send;

    /// Resets the time-to-live of `key` to `ttl`, leaving the value alone.
    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Removes the entry under `key` only if its value equals `token`.
    ///
    /// Returns `true` if the entry was removed. The comparison and the
    /// delete are a single atomic step, so a lock reassigned after lease
    /// expiry is never released by the previous holder.
    fn compare_and_delete(&self, key: &str, token: &[u8]) -> impl Future<Output = Result<bool>> + Send;
}

#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// An in-process [`RemoteStore`] with lazily enforced TTLs.
///
/// Entries past their expiry are dropped on the next operation that touches
/// them, which is indistinguishable from eager expiry through this contract.
///
/// # Examples
///
/// ```
/// use strata_remote::{MemoryStore, RemoteStore};
/// # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// # rt.block_on(async {
///
/// let store = MemoryStore::new();
/// store.put("key", b"value".to_vec(), None).await?;
/// assert_eq!(store.get("key").await?, Some(b"value".to_vec()));
/// # Ok::<(), strata_tier::Error>(())
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn live_entry(entries: &mut HashMap<String, Entry>, key: &str) -> Option<Entry> {
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }
}

impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();
        Ok(Self::live_entry(&mut entries, key).map(|e| e.bytes))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            bytes: value,
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool> {
        let mut entries = self.entries.lock();
        if Self::live_entry(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                bytes: value,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(entries.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut entries = self.entries.lock();
        Ok(Self::live_entry(&mut entries, key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock();
        if Self::live_entry(&mut entries, key).is_some() {
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        }
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, token: &[u8]) -> Result<bool> {
        let mut entries = self.entries.lock();
        match Self::live_entry(&mut entries, key) {
            Some(entry) if entry.bytes == token => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_if_absent_is_first_writer_wins() {
        let store = MemoryStore::new();
        assert!(store.put_if_absent("k", b"a".to_vec(), None).await.expect("pia"));
        assert!(!store.put_if_absent("k", b"b".to_vec(), None).await.expect("pia"));
        assert_eq!(store.get("k").await.expect("get"), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = MemoryStore::new();
        store
            .put("k", b"v".to_vec(), Some(Duration::from_millis(20)))
            .await
            .expect("put");
        assert!(store.get("k").await.expect("get").is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("k").await.expect("get").is_none());
        // A vacant slot after expiry accepts a conditional write.
        assert!(store.put_if_absent("k", b"w".to_vec(), None).await.expect("pia"));
    }

    #[tokio::test]
    async fn keys_matches_a_prefix_pattern() {
        let store = MemoryStore::new();
        store.put("users:1", b"a".to_vec(), None).await.expect("put");
        store.put("users:2", b"b".to_vec(), None).await.expect("put");
        store.put("orders:1", b"c".to_vec(), None).await.expect("put");

        let mut keys = store.keys("users:*").await.expect("keys");
        keys.sort();
        assert_eq!(keys, vec!["users:1", "users:2"]);
    }

    #[tokio::test]
    async fn expire_resets_the_ttl() {
        let store = MemoryStore::new();
        store
            .put("k", b"v".to_vec(), Some(Duration::from_millis(30)))
            .await
            .expect("put");
        store.expire("k", Duration::from_secs(60)).await.expect("expire");

        let ttl = store.ttl("k").await.expect("ttl").expect("should have a ttl");
        assert!(ttl > Duration::from_secs(30));
    }

    #[tokio::test]
    async fn compare_and_delete_requires_a_token_match() {
        let store = MemoryStore::new();
        store.put("k", b"owner-a".to_vec(), None).await.expect("put");

        assert!(!store.compare_and_delete("k", b"owner-b").await.expect("cad"));
        assert!(store.get("k").await.expect("get").is_some());

        assert!(store.compare_and_delete("k", b"owner-a").await.expect("cad"));
        assert!(store.get("k").await.expect("get").is_none());
    }
}
