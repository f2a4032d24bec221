// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tiered read/write ordering and cross-process convergence.
//!
//! Two registries over one shared store and bus stand in for two processes.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use serde_json::{Value, json};

use strata::{CacheRegistry, RegistryBuilder};
use strata_remote::{MemoryBus, MemoryStore, RemoteStore};
use strata_tier::{CacheSettings, CacheTier, SecondTierSettings, StoredValue};

fn registry(store: &MemoryStore, bus: &MemoryBus) -> CacheRegistry<MemoryStore, MemoryBus> {
    RegistryBuilder::new(store.clone(), bus.clone()).build()
}

/// Waits out bus delivery and dispatch.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

type Loader = std::pin::Pin<Box<dyn Future<Output = strata_remote::Loaded> + Send>>;

fn counting_loader(loads: &Arc<AtomicU32>, value: Value) -> impl Fn() -> Loader + Send + Sync + 'static {
    let loads = Arc::clone(loads);
    move || {
        let loads = Arc::clone(&loads);
        let value = value.clone();
        Box::pin(async move {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(Some(value))
        })
    }
}

#[tokio::test]
async fn local_tier_answers_repeat_reads_without_loading() {
    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let registry = registry(&store, &bus);
    let cache = registry
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");

    let loads = Arc::new(AtomicU32::new(0));
    for _ in 0..3 {
        let value = cache
            .get_or_load("42", counting_loader(&loads, json!("alice")))
            .await
            .expect("get");
        assert_eq!(value, Some(json!("alice")));
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cached_absence_is_served_locally() {
    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let registry = registry(&store, &bus);
    let cache = registry
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");

    let loads = Arc::new(AtomicU32::new(0));
    let loader = {
        let loads = Arc::clone(&loads);
        move || {
            let loads = Arc::clone(&loads);
            async move {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        }
    };
    assert_eq!(cache.get_or_load("missing", loader.clone()).await.expect("get"), None);
    assert_eq!(cache.get_or_load("missing", loader).await.expect("get"), None);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_write_converges_every_process_to_the_new_value() {
    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let registry_a = registry(&store, &bus);
    let registry_b = registry(&store, &bus);
    let cache_a = registry_a
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");
    let cache_b = registry_b
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");

    // Both processes hold the old value in their local tier.
    let loads = Arc::new(AtomicU32::new(0));
    cache_a
        .get_or_load("42", counting_loader(&loads, json!("old")))
        .await
        .expect("get");
    cache_b
        .get_or_load("42", counting_loader(&loads, json!("old")))
        .await
        .expect("get");

    cache_a.put("42", StoredValue::Present(json!("new"))).await.expect("put");
    settle().await;

    // The eviction broadcast converged both local tiers; the next read on
    // either side reloads the post-write value from the remote tier.
    assert_eq!(
        cache_b.get("42").await.expect("get"),
        Some(StoredValue::Present(json!("new")))
    );
    assert_eq!(
        cache_a.get("42").await.expect("get"),
        Some(StoredValue::Present(json!("new")))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_read_racing_a_write_cannot_resurrect_the_old_value() {
    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let registry_a = registry(&store, &bus);
    let registry_b = registry(&store, &bus);
    let cache_a = registry_a
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");
    let cache_b = registry_b
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");

    let loads = Arc::new(AtomicU32::new(0));
    cache_a
        .get_or_load("42", counting_loader(&loads, json!("old")))
        .await
        .expect("get");
    cache_b
        .get_or_load("42", counting_loader(&loads, json!("old")))
        .await
        .expect("get");

    // The read may still serve the pre-write value, but its backfill must
    // never reinstall it over the eviction broadcast.
    let writer = {
        let cache = cache_a.clone();
        tokio::spawn(async move { cache.put("42", StoredValue::Present(json!("new"))).await })
    };
    let reader = {
        let cache = cache_b.clone();
        tokio::spawn(async move { cache.get("42").await })
    };
    writer.await.expect("join").expect("put");
    reader.await.expect("join").expect("get");
    settle().await;

    assert_eq!(
        cache_b.get("42").await.expect("get"),
        Some(StoredValue::Present(json!("new")))
    );
    assert_eq!(
        cache_a.get("42").await.expect("get"),
        Some(StoredValue::Present(json!("new")))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn evict_fans_out_to_subscribed_processes() {
    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let registry_a = registry(&store, &bus);
    let registry_b = registry(&store, &bus);
    let cache_a = registry_a
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");
    let cache_b = registry_b
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");

    let loads = Arc::new(AtomicU32::new(0));
    cache_b
        .get_or_load("42", counting_loader(&loads, json!("alice")))
        .await
        .expect("get");

    cache_a.evict("42").await.expect("evict");
    settle().await;

    // B's local tier no longer holds the key; the next read goes through
    // to the (now empty) remote tier.
    assert_eq!(cache_b.get("42").await.expect("get"), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clear_empties_local_tiers_everywhere() {
    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let registry_a = registry(&store, &bus);
    let registry_b = registry(&store, &bus);
    let cache_a = registry_a
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");
    let cache_b = registry_b
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");

    let loads = Arc::new(AtomicU32::new(0));
    cache_b
        .get_or_load("1", counting_loader(&loads, json!("a")))
        .await
        .expect("get");
    cache_b
        .get_or_load("2", counting_loader(&loads, json!("b")))
        .await
        .expect("get");

    cache_a.clear().await.expect("clear");
    settle().await;

    assert_eq!(cache_b.get("1").await.expect("get"), None);
    assert_eq!(cache_b.get("2").await.expect("get"), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn push_local_overwrites_without_a_reload() {
    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let registry_a = registry(&store, &bus);
    let registry_b = registry(&store, &bus);
    let cache_a = registry_a
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");
    let cache_b = registry_b
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");

    let loads = Arc::new(AtomicU32::new(0));
    cache_a
        .get_or_load("42", counting_loader(&loads, json!("v1")))
        .await
        .expect("get");
    cache_b
        .get_or_load("42", counting_loader(&loads, json!("v1")))
        .await
        .expect("get");
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    // The remote entry changes out of band.
    let bytes = StoredValue::Present(json!("v2")).to_bytes().expect("encode");
    store.put("users:42", bytes, None).await.expect("put");

    cache_a.push_local("42").await.expect("push");
    settle().await;

    // Every process's local tier now holds v2, with no loader run and no
    // intermediate eviction miss.
    assert_eq!(
        cache_b.get_or_load("42", counting_loader(&loads, json!("wrong"))).await.expect("get"),
        Some(json!("v2"))
    );
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn first_tier_can_be_disabled() {
    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let registry = registry(&store, &bus);
    let settings = CacheSettings {
        use_first_tier: false,
        second: SecondTierSettings {
            expiration: Duration::from_secs(300),
            ..SecondTierSettings::default()
        },
        ..CacheSettings::default()
    };
    let cache = registry.get_or_create("users", settings).await.expect("create");

    let loads = Arc::new(AtomicU32::new(0));
    for _ in 0..3 {
        let value = cache
            .get_or_load("42", counting_loader(&loads, json!("alice")))
            .await
            .expect("get");
        assert_eq!(value, Some(json!("alice")));
    }
    // Every read consults the remote tier, but the entry is a hit there.
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}
