#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Cache layer tests.
//!
//! Two-tier behavior against store doubles: sharing through L2, degradation
//! on slow or failing backends, and the write-behind sync loop.

use std::sync::Arc;
use std::time::Duration;

use navscope_kernel::NavError;
use navscope_kernel::cache::{CacheLayer, PersistentStore, SetOptions};
use navscope_kernel::config::CacheConfig;
use navscope_test_utils::{FlakyStore, SlowStore};
use tokio_util::sync::CancellationToken;

fn config() -> CacheConfig {
    CacheConfig {
        l2_timeout: Duration::from_millis(50),
        ..CacheConfig::default()
    }
}

fn tagged(tags: &[&str]) -> SetOptions {
    SetOptions::ttl(Duration::from_secs(60)).with_tags(tags.iter().copied())
}

#[tokio::test]
async fn layers_share_results_through_l2() {
    let store: Arc<dyn PersistentStore> = Arc::new(FlakyStore::default());
    let writer = CacheLayer::with_store(config(), Arc::clone(&store));
    let reader = CacheLayer::with_store(config(), store);

    writer.set("nav:main", "[]", tagged(&["menu:main"])).await;

    assert_eq!(reader.get("nav:main").await.as_deref(), Some("[]"));
    assert_eq!(reader.get("nav:main").await.as_deref(), Some("[]"));

    let stats = reader.get_statistics().await;
    assert_eq!(stats.hit_count, 2);
    assert_eq!(stats.l2_hits, 1);
    assert_eq!(stats.entry_count, 1);

    // Tags survive promotion, so the reader can invalidate what it pulled in.
    assert_eq!(reader.invalidate_by_tag("menu:main").await.unwrap(), 1);
    assert!(writer.get("nav:main").await.is_some());
}

#[tokio::test]
async fn slow_backend_reads_degrade_to_misses() {
    let store = Arc::new(SlowStore::new(Duration::from_millis(500)));
    let writer = CacheLayer::with_store(config(), store.clone());
    let reader = CacheLayer::with_store(config(), store.clone());

    writer.set("k", "v", SetOptions::default()).await;
    assert!(store.inner().contains("k"));

    let started = std::time::Instant::now();
    assert!(reader.get("k").await.is_none());
    assert!(started.elapsed() < Duration::from_millis(400));

    let stats = reader.get_statistics().await;
    assert_eq!(stats.miss_count, 1);
    assert_eq!(stats.backend_errors, 1);

    // L1 hits never touch the slow tier.
    assert_eq!(writer.get("k").await.as_deref(), Some("v"));
}

#[tokio::test]
async fn failing_backend_keeps_l1_working() {
    let store = Arc::new(FlakyStore::failing());
    let cache = CacheLayer::with_store(config(), store.clone());

    cache.set("k", "v", tagged(&["t"])).await;
    assert_eq!(cache.get("k").await.as_deref(), Some("v"));
    assert!(cache.get("absent").await.is_none());

    let err = cache.invalidate_by_tag("t").await.unwrap_err();
    assert!(matches!(err, NavError::CacheBackendUnavailable(_)));
    // L1 is cleared even though L2 refused.
    assert!(cache.get("k").await.is_none());

    assert!(cache.clear().await.is_err());
    assert!(store.calls() > 0);

    // The write, two L2 reads, the invalidation and the clear.
    let stats = cache.get_statistics().await;
    assert_eq!(stats.backend_errors, 5);
}

#[tokio::test]
async fn write_behind_flushes_on_shutdown() {
    let store = Arc::new(FlakyStore::default());
    let cfg = CacheConfig {
        l2_sync_interval: Duration::from_secs(3600),
        ..config()
    };
    let cache = CacheLayer::with_store(cfg, store.clone());

    cache.set("k", "v", SetOptions::default()).await;
    assert!(!store.inner().contains("k"));

    let shutdown = CancellationToken::new();
    let task = cache.spawn_sync_task(Duration::from_secs(3600), shutdown.clone());
    // The first tick fires immediately.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(store.inner().contains("k"));

    cache.set("k2", "v2", SetOptions::default()).await;
    shutdown.cancel();
    task.await.unwrap();
    assert!(store.inner().contains("k2"));
}

#[tokio::test]
async fn write_behind_retries_failed_syncs() {
    let store = Arc::new(FlakyStore::failing());
    let cfg = CacheConfig {
        l2_sync_interval: Duration::from_secs(3600),
        ..config()
    };
    let cache = CacheLayer::with_store(cfg, store.clone());

    cache.set("k", "v", SetOptions::default()).await;
    assert_eq!(cache.sync_to_persistent().await, 0);

    store.set_failing(false);
    assert_eq!(cache.sync_to_persistent().await, 1);
    assert!(store.inner().contains("k"));
    assert_eq!(cache.sync_to_persistent().await, 0);
}
