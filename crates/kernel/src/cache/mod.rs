//! Two-tier cache with Moka (L1) and a pluggable persistent store (L2).
//!
//! Supports tag-based and pattern-based invalidation. Without an L2 store the
//! layer runs L1-only; correctness is unaffected, only cross-process reuse.

mod redis_store;
mod store;

pub use redis_store::RedisStore;
pub use store::{MemoryStore, PersistentStore};

use std::collections::HashSet;
use std::io::{Read, Write};
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use moka::Expiry;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{NavError, NavResult};
use crate::metrics::Metrics;

/// Marker byte for gzip-compressed L2 payloads.
const MARKER_GZIP: u8 = b'z';

/// Marker byte for plain JSON L2 payloads.
const MARKER_JSON: u8 = b'j';

/// Per-entry bookkeeping overhead added to the payload size.
const ENTRY_OVERHEAD_BYTES: u64 = 64;

/// A cached value with its lifecycle metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub tags: Vec<String>,
    /// Estimated memory footprint in bytes.
    pub size: u64,
    ttl: Duration,
}

impl CacheEntry {
    fn new(value: String, ttl: Duration, tags: Vec<String>) -> Self {
        let created_at = Utc::now();
        let size = value.len() as u64
            + tags.iter().map(|t| t.len() as u64).sum::<u64>()
            + ENTRY_OVERHEAD_BYTES;
        Self {
            value,
            created_at,
            expires_at: expiry_from(created_at, ttl),
            tags,
            size,
            ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Options for [`CacheLayer::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Entry TTL. `None` uses the tier defaults.
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            tags: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_ratio: f64,
    /// Live L1 entries.
    pub entry_count: u64,
    /// Estimated L1 payload bytes.
    pub total_bytes: u64,
    pub avg_access_time_ms: f64,
    /// Hits served from L2 (subset of `hit_count`).
    pub l2_hits: u64,
    pub backend_errors: u64,
    /// L1 entries dropped under capacity pressure.
    pub evictions: u64,
}

/// Serialized form of an entry in L2.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    value: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    tags: Vec<String>,
}

/// Per-entry expiry for L1, bounded by the builder's `time_to_live`.
struct EntryExpiry;

impl Expiry<String, Arc<CacheEntry>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Tag index for L1 entries.
#[derive(Default)]
struct TagIndex {
    by_tag: DashMap<String, HashSet<String>>,
    by_key: DashMap<String, Vec<String>>,
}

impl TagIndex {
    fn register(&self, key: &str, tags: &[String]) {
        self.forget(key);
        if tags.is_empty() {
            return;
        }
        for tag in tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.by_key.insert(key.to_string(), tags.to_vec());
    }

    fn forget(&self, key: &str) {
        let Some((_, tags)) = self.by_key.remove(key) else {
            return;
        };
        for tag in tags {
            if let Some(mut keys) = self.by_tag.get_mut(&tag) {
                keys.remove(key);
            }
            self.by_tag.remove_if(&tag, |_, keys| keys.is_empty());
        }
    }

    fn take(&self, tag: &str) -> HashSet<String> {
        let keys = self
            .by_tag
            .remove(tag)
            .map(|(_, keys)| keys)
            .unwrap_or_default();
        for key in &keys {
            self.forget(key);
        }
        keys
    }

    fn clear(&self) {
        self.by_tag.clear();
        self.by_key.clear();
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    l2_hits: AtomicU64,
    backend_errors: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    total_bytes: AtomicU64,
    access_nanos: AtomicU64,
    accesses: AtomicU64,
}

/// Two-tier cache layer.
///
/// L1 (Moka): in-process, bounded by entry count, bytes, and age, LRU.
/// L2 ([`PersistentStore`]): optional, shared across instances, longer TTL.
#[derive(Clone)]
pub struct CacheLayer {
    inner: Arc<CacheLayerInner>,
}

struct CacheLayerInner {
    /// L1 in-process cache.
    local: Cache<String, Arc<CacheEntry>>,

    /// L2 backend.
    store: Option<Arc<dyn PersistentStore>>,

    config: CacheConfig,
    tags: Arc<TagIndex>,
    counters: Arc<Counters>,

    /// Keys written to L1 but not yet synced to L2 (write-behind mode).
    dirty: DashSet<String>,

    metrics: OnceLock<Arc<Metrics>>,
}

impl CacheLayer {
    /// Create an L1-only cache layer.
    pub fn new(config: CacheConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a cache layer backed by a persistent L2 store.
    pub fn with_store(config: CacheConfig, store: Arc<dyn PersistentStore>) -> Self {
        Self::build(config, Some(store))
    }

    /// Attach a metrics registry. Only the first registry attached is used.
    pub fn with_metrics(self, metrics: Arc<Metrics>) -> Self {
        let _ = self.inner.metrics.set(metrics);
        self
    }

    fn build(config: CacheConfig, store: Option<Arc<dyn PersistentStore>>) -> Self {
        let tags = Arc::new(TagIndex::default());
        let counters = Arc::new(Counters::default());

        // Every entry weighs at least max_bytes / max_entries, so the byte
        // capacity also caps the entry count.
        let max_entries = config.l1_max_entries.max(1);
        let max_bytes = config.l1_max_bytes.max(max_entries);
        let floor = u32::try_from(max_bytes / max_entries).unwrap_or(u32::MAX);

        let listener_tags = Arc::clone(&tags);
        let listener_counters = Arc::clone(&counters);

        let local = Cache::builder()
            .eviction_policy(EvictionPolicy::lru())
            .max_capacity(max_bytes)
            .weigher(move |_key: &String, entry: &Arc<CacheEntry>| -> u32 {
                u32::try_from(entry.size).unwrap_or(u32::MAX).max(floor)
            })
            .time_to_live(config.l1_max_age)
            .expire_after(EntryExpiry)
            .eviction_listener(move |key: Arc<String>, entry: Arc<CacheEntry>, cause| {
                listener_counters
                    .total_bytes
                    .fetch_sub(entry.size, Ordering::Relaxed);
                if cause == RemovalCause::Replaced {
                    return;
                }
                if cause == RemovalCause::Size {
                    listener_counters.evictions.fetch_add(1, Ordering::Relaxed);
                } else if cause == RemovalCause::Expired {
                    listener_counters.expirations.fetch_add(1, Ordering::Relaxed);
                }
                listener_tags.forget(&key);
            })
            .build();

        Self {
            inner: Arc::new(CacheLayerInner {
                local,
                store,
                config,
                tags,
                counters,
                dirty: DashSet::new(),
                metrics: OnceLock::new(),
            }),
        }
    }

    /// Whether an L2 store is configured.
    pub fn has_persistent_tier(&self) -> bool {
        self.inner.store.is_some()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Get a value from cache.
    ///
    /// Checks L1 first, then L2. On L2 hit, populates L1. L2 errors and
    /// timeouts are logged and count as a miss.
    pub async fn get(&self, key: &str) -> Option<String> {
        let started = Instant::now();
        let result = self.lookup(key, true).await;

        let counters = &self.inner.counters;
        let nanos = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        counters.access_nanos.fetch_add(nanos, Ordering::Relaxed);
        counters.accesses.fetch_add(1, Ordering::Relaxed);

        if result.is_none() {
            counters.misses.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = self.inner.metrics.get() {
                metrics.record_cache_miss();
            }
            debug!(key = %key, "cache miss");
        }
        result
    }

    /// Read through both tiers without touching hit or miss statistics.
    ///
    /// Used to re-check a key the caller already counted a miss for.
    pub(crate) async fn peek(&self, key: &str) -> Option<String> {
        self.lookup(key, false).await
    }

    async fn lookup(&self, key: &str, record: bool) -> Option<String> {
        let now = Utc::now();

        if let Some(entry) = self.inner.local.get(key).await
            && !entry.is_expired(now)
        {
            debug!(key = %key, "cache L1 hit");
            if record {
                self.record_hit("l1");
            }
            return Some(entry.value.clone());
        }

        let store = self.inner.store.as_ref()?;
        let bytes = match tokio::time::timeout(self.inner.config.l2_timeout, store.get(key)).await
        {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                self.record_backend_error();
                warn!(error = %e, key = %key, store = store.name(), "L2 read failed");
                return None;
            }
            Err(_) => {
                self.record_backend_error();
                warn!(key = %key, store = store.name(), "L2 read timed out");
                return None;
            }
        };

        let stored = match decode_entry(&bytes) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, key = %key, "discarding unreadable L2 entry");
                return None;
            }
        };
        if stored.expires_at <= now {
            return None;
        }

        debug!(key = %key, "cache L2 hit, populating L1");
        let ttl = (stored.expires_at - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(self.inner.config.l1_max_age);
        let value = stored.value.clone();
        self.insert_local(key, CacheEntry::new(stored.value, ttl, stored.tags))
            .await;
        if record {
            self.inner.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
            self.record_hit("l2");
        }
        Some(value)
    }

    /// Set a value in cache with TTL and tags.
    ///
    /// Writes L1, then L2 (immediately, or on the next sync in write-behind
    /// mode). L2 failures are logged, never returned.
    pub async fn set(&self, key: &str, value: impl Into<String>, options: SetOptions) {
        let config = &self.inner.config;
        let l1_ttl = options
            .ttl
            .map_or(config.l1_max_age, |ttl| ttl.min(config.l1_max_age));
        let l2_ttl = options.ttl.unwrap_or(config.l2_ttl);

        let entry = CacheEntry::new(value.into(), l1_ttl, options.tags);
        let stored = StoredEntry {
            value: entry.value.clone(),
            created_at: entry.created_at,
            expires_at: expiry_from(entry.created_at, l2_ttl),
            tags: entry.tags.clone(),
        };
        let tags = entry.tags.clone();
        self.insert_local(key, entry).await;
        debug!(key = %key, tags = ?tags, ttl = ?l1_ttl, "cache set");

        if self.inner.store.is_none() {
            return;
        }
        if self.write_behind() {
            self.inner.dirty.insert(key.to_string());
            return;
        }
        self.write_persistent(key, &stored, l2_ttl).await;
    }

    /// Deserialize a cached JSON value. Undecodable entries are misses.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        decode_json(key, &raw)
    }

    /// [`peek`](Self::peek) and deserialize.
    pub(crate) async fn peek_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.peek(key).await?;
        decode_json(key, &raw)
    }

    /// Serialize a value as JSON and cache it.
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> NavResult<()> {
        let json = serde_json::to_string(value)?;
        self.set(key, json, options).await;
        Ok(())
    }

    /// Invalidate a single cache key. Returns whether any tier held it.
    pub async fn delete(&self, key: &str) -> bool {
        self.inner.dirty.remove(key);
        let mut existed = self.inner.local.remove(key).await.is_some();
        self.inner.tags.forget(key);

        if let Some(store) = &self.inner.store {
            match tokio::time::timeout(self.inner.config.l2_timeout, store.delete(key)).await {
                Ok(Ok(deleted)) => existed |= deleted,
                Ok(Err(e)) => {
                    self.record_backend_error();
                    warn!(error = %e, key = %key, "failed to delete cache key from L2");
                }
                Err(_) => {
                    self.record_backend_error();
                    warn!(key = %key, "L2 delete timed out");
                }
            }
        }

        debug!(key = %key, existed, "cache invalidated");
        existed
    }

    /// Invalidate all cache keys associated with a tag.
    ///
    /// L1 is always cleared; an L2 failure is reported as
    /// [`NavError::CacheBackendUnavailable`] so callers can retry.
    pub async fn invalidate_by_tag(&self, tag: &str) -> NavResult<usize> {
        let mut removed: HashSet<String> = HashSet::new();
        for key in self.inner.tags.take(tag) {
            self.inner.dirty.remove(&key);
            if self.inner.local.remove(&key).await.is_some() {
                removed.insert(key);
            }
        }

        if let Some(store) = &self.inner.store {
            let keys = self
                .persistent_op("tag invalidation", store.invalidate_tag(tag))
                .await?;
            removed.extend(keys);
        }

        self.record_invalidation("tag", removed.len());
        debug!(tag = %tag, count = removed.len(), "tag invalidated");
        Ok(removed.len())
    }

    /// Invalidate every key matching `pattern`, in both tiers.
    pub async fn invalidate_by_pattern(&self, pattern: &Regex) -> NavResult<usize> {
        let matching: Vec<String> = self
            .inner
            .local
            .iter()
            .filter(|(key, _)| pattern.is_match(key))
            .map(|(key, _)| key.as_ref().clone())
            .collect();

        let mut removed: HashSet<String> = HashSet::new();
        for key in matching {
            self.inner.dirty.remove(&key);
            self.inner.tags.forget(&key);
            if self.inner.local.remove(&key).await.is_some() {
                removed.insert(key);
            }
        }

        if let Some(store) = &self.inner.store {
            let keys = self
                .persistent_op("pattern invalidation", store.delete_matching(pattern))
                .await?;
            removed.extend(keys);
        }

        self.record_invalidation("pattern", removed.len());
        debug!(pattern = %pattern, count = removed.len(), "pattern invalidated");
        Ok(removed.len())
    }

    /// Drop everything from both tiers.
    pub async fn clear(&self) -> NavResult<()> {
        self.inner.dirty.clear();
        self.inner.local.invalidate_all();
        self.inner.local.run_pending_tasks().await;
        self.inner.tags.clear();

        if let Some(store) = &self.inner.store {
            self.persistent_op("clear", store.clear()).await?;
        }

        info!("cache cleared");
        Ok(())
    }

    /// Evict expired L1 entries now. Returns how many were dropped.
    pub async fn purge_expired(&self) -> u64 {
        let before = self.inner.counters.expirations.load(Ordering::Relaxed);
        self.inner.local.run_pending_tasks().await;
        let purged = self
            .inner
            .counters
            .expirations
            .load(Ordering::Relaxed)
            .saturating_sub(before);
        if purged > 0 {
            debug!(purged, "expired cache entries purged");
        }
        purged
    }

    /// Push L1 entries written since the last sync to L2.
    ///
    /// Only meaningful in write-behind mode; returns the number of entries
    /// written. Entries that fail stay dirty for the next round.
    pub async fn sync_to_persistent(&self) -> usize {
        let Some(store) = &self.inner.store else {
            return 0;
        };

        let keys: Vec<String> = self.inner.dirty.iter().map(|k| k.key().clone()).collect();
        let now = Utc::now();
        let mut synced = 0;

        for key in keys {
            self.inner.dirty.remove(&key);
            let Some(entry) = self.inner.local.get(&key).await else {
                continue;
            };
            if entry.is_expired(now) {
                continue;
            }
            let l2_ttl = self.inner.config.l2_ttl.max(entry.remaining(now));
            let stored = StoredEntry {
                value: entry.value.clone(),
                created_at: entry.created_at,
                expires_at: expiry_from(now, l2_ttl),
                tags: entry.tags.clone(),
            };
            if self.write_persistent(&key, &stored, l2_ttl).await {
                synced += 1;
            } else {
                self.inner.dirty.insert(key);
            }
        }

        if synced > 0 {
            debug!(store = store.name(), synced, "L1 entries synced to L2");
        }
        synced
    }

    /// Spawn the periodic write-behind loop. A final sync runs on shutdown.
    pub fn spawn_sync_task(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.purge_expired().await;
                        cache.sync_to_persistent().await;
                    }
                    _ = shutdown.cancelled() => {
                        cache.sync_to_persistent().await;
                        debug!("cache sync task stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Snapshot hit/miss counters and L1 size.
    pub async fn get_statistics(&self) -> CacheStatistics {
        self.inner.local.run_pending_tasks().await;

        let c = &self.inner.counters;
        let hit_count = c.hits.load(Ordering::Relaxed);
        let miss_count = c.misses.load(Ordering::Relaxed);
        let lookups = hit_count + miss_count;
        let accesses = c.accesses.load(Ordering::Relaxed);

        CacheStatistics {
            hit_count,
            miss_count,
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                hit_count as f64 / lookups as f64
            },
            entry_count: self.inner.local.entry_count(),
            total_bytes: c.total_bytes.load(Ordering::Relaxed),
            avg_access_time_ms: if accesses == 0 {
                0.0
            } else {
                c.access_nanos.load(Ordering::Relaxed) as f64 / accesses as f64 / 1_000_000.0
            },
            l2_hits: c.l2_hits.load(Ordering::Relaxed),
            backend_errors: c.backend_errors.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
        }
    }

    fn write_behind(&self) -> bool {
        !self.inner.config.l2_sync_interval.is_zero()
    }

    async fn insert_local(&self, key: &str, entry: CacheEntry) {
        self.inner.tags.register(key, &entry.tags);
        self.inner
            .counters
            .total_bytes
            .fetch_add(entry.size, Ordering::Relaxed);
        self.inner
            .local
            .insert(key.to_string(), Arc::new(entry))
            .await;
    }

    /// Write one entry to L2. Returns `false` on failure.
    async fn write_persistent(&self, key: &str, stored: &StoredEntry, ttl: Duration) -> bool {
        let Some(store) = &self.inner.store else {
            return false;
        };

        let bytes = match encode_entry(stored, self.inner.config.l2_compression) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, key = %key, "failed to encode cache entry for L2");
                return false;
            }
        };

        match tokio::time::timeout(
            self.inner.config.l2_timeout,
            store.set(key, &bytes, ttl, &stored.tags),
        )
        .await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                self.record_backend_error();
                warn!(error = %e, key = %key, store = store.name(), "L2 write failed");
                false
            }
            Err(_) => {
                self.record_backend_error();
                warn!(key = %key, store = store.name(), "L2 write timed out");
                false
            }
        }
    }

    /// Run an L2 maintenance call under the timeout, mapping failures.
    async fn persistent_op<T>(
        &self,
        op: &str,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> NavResult<T> {
        match tokio::time::timeout(self.inner.config.l2_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.record_backend_error();
                warn!(error = %e, op, "L2 operation failed");
                Err(NavError::CacheBackendUnavailable(format!("{op}: {e}")))
            }
            Err(_) => {
                self.record_backend_error();
                warn!(op, "L2 operation timed out");
                Err(NavError::CacheBackendUnavailable(format!("{op}: timed out")))
            }
        }
    }

    fn record_hit(&self, tier: &str) {
        self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = self.inner.metrics.get() {
            metrics.record_cache_hit(tier);
        }
    }

    fn record_backend_error(&self) {
        self.inner
            .counters
            .backend_errors
            .fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = self.inner.metrics.get() {
            metrics.record_backend_error();
        }
    }

    fn record_invalidation(&self, reason: &str, count: usize) {
        if let Some(metrics) = self.inner.metrics.get() {
            metrics.record_invalidation(reason, count as u64);
        }
    }
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("l1_entries", &self.inner.local.entry_count())
            .field(
                "l2",
                &self.inner.store.as_ref().map(|store| store.name()),
            )
            .finish()
    }
}

fn expiry_from(start: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| start.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn decode_json<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, key = %key, "failed to decode cached value");
            None
        }
    }
}

fn encode_entry(stored: &StoredEntry, compress: bool) -> anyhow::Result<Vec<u8>> {
    let json = serde_json::to_vec(stored)?;
    if !compress {
        let mut out = Vec::with_capacity(json.len() + 1);
        out.push(MARKER_JSON);
        out.extend_from_slice(&json);
        return Ok(out);
    }

    let mut encoder = GzEncoder::new(vec![MARKER_GZIP], Compression::fast());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

fn decode_entry(bytes: &[u8]) -> anyhow::Result<StoredEntry> {
    match bytes.split_first() {
        Some((&MARKER_JSON, rest)) => Ok(serde_json::from_slice(rest)?),
        Some((&MARKER_GZIP, rest)) => {
            let mut json = Vec::new();
            GzDecoder::new(rest).read_to_end(&mut json)?;
            Ok(serde_json::from_slice(&json)?)
        }
        Some((marker, _)) => anyhow::bail!("unknown L2 payload marker {marker:#x}"),
        None => anyhow::bail!("empty L2 payload"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config() -> CacheConfig {
        CacheConfig {
            l2_timeout: Duration::from_millis(200),
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn l1_set_get_delete() {
        let cache = CacheLayer::new(config());
        assert!(!cache.has_persistent_tier());

        cache.set("k", "v", SetOptions::default()).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert!(cache.delete("k").await);
        assert!(!cache.delete("k").await);
        assert_eq!(cache.get("k").await, None);

        let stats = cache.get_statistics().await;
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert!((stats.hit_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn l2_hit_promotes_into_l1() {
        let store = Arc::new(MemoryStore::new());
        let writer = CacheLayer::with_store(config(), store.clone());
        writer.set("shared", "payload", SetOptions::default()).await;
        assert!(store.contains("shared"));

        // A second process sees only L2.
        let reader = CacheLayer::with_store(config(), store.clone());
        assert_eq!(reader.get("shared").await.as_deref(), Some("payload"));
        assert_eq!(reader.get("shared").await.as_deref(), Some("payload"));

        let stats = reader.get_statistics().await;
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.l2_hits, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn peek_leaves_statistics_alone() {
        let store = Arc::new(MemoryStore::new());
        let writer = CacheLayer::with_store(config(), store.clone());
        writer.set_json("shared", &vec![1], SetOptions::default()).await.unwrap();

        let reader = CacheLayer::with_store(config(), store.clone());
        assert!(reader.get("absent").await.is_none());
        assert_eq!(reader.peek_json::<Vec<i32>>("shared").await, Some(vec![1]));
        assert!(reader.peek("absent").await.is_none());
        // Promoted by the peek, so this is an L1 hit.
        assert_eq!(reader.peek("shared").await.as_deref(), Some("[1]"));

        let stats = reader.get_statistics().await;
        assert_eq!(stats.hit_count, 0);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.l2_hits, 0);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn compressed_entries_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let cfg = CacheConfig {
            l2_compression: true,
            ..config()
        };
        let writer = CacheLayer::with_store(cfg.clone(), store.clone());
        let payload = "x".repeat(4096);
        writer.set("big", payload.clone(), SetOptions::default()).await;

        let raw = store.get("big").await.unwrap().unwrap();
        assert_eq!(raw[0], MARKER_GZIP);
        assert!(raw.len() < payload.len());

        let reader = CacheLayer::with_store(cfg, store);
        assert_eq!(reader.get("big").await, Some(payload));
    }

    #[tokio::test]
    async fn tag_invalidation_covers_both_tiers() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheLayer::with_store(config(), store.clone());
        let u1 = SetOptions::default().with_tags(["navigation", "user:u1"]);
        let u2 = SetOptions::default().with_tags(["navigation", "user:u2"]);
        cache.set("a:u1", "1", u1.clone()).await;
        cache.set("b:u1", "2", u1).await;
        cache.set("a:u2", "3", u2).await;

        assert_eq!(cache.invalidate_by_tag("user:u1").await.unwrap(), 2);
        assert_eq!(cache.get("a:u1").await, None);
        assert!(!store.contains("b:u1"));
        assert_eq!(cache.get("a:u2").await.as_deref(), Some("3"));

        assert_eq!(cache.invalidate_by_tag("user:u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pattern_invalidation() {
        let cache = CacheLayer::new(config());
        cache.set("nav:main:u1", "1", SetOptions::default()).await;
        cache.set("nav:main:u2", "2", SetOptions::default()).await;
        cache.set("nav:side:u1", "3", SetOptions::default()).await;

        let pattern = Regex::new(r"^nav:[^:]+:u1$").unwrap();
        assert_eq!(cache.invalidate_by_pattern(&pattern).await.unwrap(), 2);
        assert_eq!(cache.get("nav:main:u2").await.as_deref(), Some("2"));
        assert_eq!(cache.get("nav:side:u1").await, None);
    }

    #[tokio::test]
    async fn per_entry_ttl_expires() {
        let cache = CacheLayer::new(config());
        cache
            .set("short", "v", SetOptions::ttl(Duration::from_millis(20)))
            .await;
        assert!(cache.get("short").await.is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("short").await, None);
        cache.purge_expired().await;
        assert_eq!(cache.get_statistics().await.entry_count, 0);
    }

    #[tokio::test]
    async fn capacity_evicts_entries() {
        let cfg = CacheConfig {
            l1_max_entries: 4,
            l1_max_bytes: 4 * 1024,
            ..config()
        };
        let cache = CacheLayer::new(cfg);
        for i in 0..32 {
            cache.set(&format!("k{i}"), "v", SetOptions::default()).await;
        }

        let stats = cache.get_statistics().await;
        assert!(stats.entry_count <= 4, "entry_count = {}", stats.entry_count);
        assert!(stats.evictions > 0);
    }

    #[tokio::test]
    async fn write_behind_defers_until_sync() {
        let store = Arc::new(MemoryStore::new());
        let cfg = CacheConfig {
            l2_sync_interval: Duration::from_secs(60),
            ..config()
        };
        let cache = CacheLayer::with_store(cfg, store.clone());
        cache.set("k", "v", SetOptions::default()).await;
        assert!(!store.contains("k"));

        assert_eq!(cache.sync_to_persistent().await, 1);
        assert!(store.contains("k"));
        assert_eq!(cache.sync_to_persistent().await, 0);
    }

    #[tokio::test]
    async fn json_helpers() {
        let cache = CacheLayer::new(config());
        cache
            .set_json("list", &vec![1, 2, 3], SetOptions::default())
            .await
            .unwrap();
        assert_eq!(cache.get_json::<Vec<i32>>("list").await, Some(vec![1, 2, 3]));
        assert_eq!(cache.get_json::<Vec<String>>("list").await, None);
    }

    #[tokio::test]
    async fn clear_empties_everything() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheLayer::with_store(config(), store.clone());
        cache.set("a", "1", SetOptions::default()).await;
        cache.set("b", "2", SetOptions::default()).await;

        cache.clear().await.unwrap();
        assert!(store.is_empty());
        assert_eq!(cache.get_statistics().await.entry_count, 0);
        assert_eq!(cache.get("a").await, None);
    }

    #[test]
    fn decode_rejects_unknown_markers() {
        assert!(decode_entry(b"").is_err());
        assert!(decode_entry(b"?{}").is_err());
    }
}
