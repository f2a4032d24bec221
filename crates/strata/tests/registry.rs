// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Registry creation, deduplication, lifecycle, and management surface.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use serde_json::json;

use strata::{CacheRegistry, RegistryBuilder};
use strata_remote::{MemoryBus, MemoryStore, RemoteStore};
use strata_tier::{CacheSettings, CacheTier, SecondTierSettings, StoredValue};

fn registry(store: &MemoryStore, bus: &MemoryBus) -> CacheRegistry<MemoryStore, MemoryBus> {
    RegistryBuilder::new(store.clone(), bus.clone()).build()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn identical_settings_share_one_instance() {
    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let registry = registry(&store, &bus);

    let first = registry
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");
    let second = registry
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");
    assert_eq!(first.fingerprint(), second.fingerprint());

    // The handles share a local tier: populate through one, then remove the
    // remote entry; the other still answers locally.
    let loads = Arc::new(AtomicU32::new(0));
    let loads_in = Arc::clone(&loads);
    first
        .get_or_load("42", move || {
            let loads = Arc::clone(&loads_in);
            async move {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(Some(json!("alice")))
            }
        })
        .await
        .expect("get");
    store.delete("users:42").await.expect("delete");

    assert_eq!(
        second.get("42").await.expect("get"),
        Some(StoredValue::Present(json!("alice")))
    );
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn different_settings_get_separate_instances() {
    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let registry = registry(&store, &bus);

    let default = registry
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");
    let tuned = registry
        .get_or_create(
            "users",
            CacheSettings {
                second: SecondTierSettings {
                    expiration: Duration::from_secs(5),
                    ..SecondTierSettings::default()
                },
                ..CacheSettings::default()
            },
        )
        .await
        .expect("create");

    assert_ne!(default.fingerprint(), tuned.fingerprint());
    assert!(registry.lookup("users", default.fingerprint()).is_some());
    assert!(registry.lookup("users", tuned.fingerprint()).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creation_yields_one_instance() {
    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let registry = registry(&store, &bus);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            registry.get_or_create("users", CacheSettings::default()).await
        }));
    }
    for task in tasks {
        task.await.expect("join").expect("create");
    }

    // One instance for the fingerprint, reachable by lookup.
    let fingerprint = CacheSettings::default().fingerprint();
    assert!(registry.lookup("users", &fingerprint).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_fingerprint_under_a_name_receives_invalidation() {
    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let registry_a = registry(&store, &bus);
    let registry_b = registry(&store, &bus);

    let tuned_settings = CacheSettings {
        second: SecondTierSettings {
            expiration: Duration::from_secs(500),
            ..SecondTierSettings::default()
        },
        ..CacheSettings::default()
    };
    let cache_b_default = registry_b
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");
    let cache_b_tuned = registry_b
        .get_or_create("users", tuned_settings)
        .await
        .expect("create");

    // Populate both local tiers, then remove remote state so the only
    // remaining copies are local.
    let load = || async { Ok(Some(json!("alice"))) };
    cache_b_default.get_or_load("42", load).await.expect("get");
    cache_b_tuned.get_or_load("42", load).await.expect("get");

    let cache_a = registry_a
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");
    cache_a.evict("42").await.expect("evict");
    settle().await;

    assert_eq!(cache_b_default.get("42").await.expect("get"), None);
    assert_eq!(cache_b_tuned.get("42").await.expect("get"), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_stops_invalidation_dispatch() {
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

    cache_b
        .get_or_load("42", || async { Ok(Some(json!("alice"))) })
        .await
        .expect("get");

    registry_b.shutdown();
    settle().await;

    cache_a.evict("42").await.expect("evict");
    settle().await;

    // B no longer listens; its local tier still holds the value.
    assert_eq!(
        cache_b.get("42").await.expect("get"),
        Some(StoredValue::Present(json!("alice")))
    );
}

#[tokio::test]
async fn delete_cache_evicts_one_key_or_clears_all() {
    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let registry = registry(&store, &bus);
    let cache = registry
        .get_or_create("users", CacheSettings::default())
        .await
        .expect("create");

    cache.put("1", StoredValue::Present(json!("a"))).await.expect("put");
    cache.put("2", StoredValue::Present(json!("b"))).await.expect("put");
    let fingerprint = cache.fingerprint().to_string();

    registry
        .delete_cache("users", &fingerprint, Some("1"))
        .await
        .expect("delete");
    settle().await;
    assert_eq!(cache.get("1").await.expect("get"), None);
    assert!(cache.get("2").await.expect("get").is_some());

    registry.delete_cache("users", &fingerprint, None).await.expect("delete");
    settle().await;
    assert_eq!(cache.get("2").await.expect("get"), None);

    // Unknown instances are a logged no-op.
    registry
        .delete_cache("orders", "no-such-fingerprint", None)
        .await
        .expect("delete");
}
