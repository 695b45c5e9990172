//! Tier-2 storage backends.
//!
//! The cache layer talks to persistent storage only through
//! [`PersistentStore`]; a process without one runs tier-1 only.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;

/// Longest expiry a [`MemoryStore`] tracks; larger TTLs are clamped.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Key/value backend for the slower, larger cache tier.
///
/// Implementations keep their own tag index so tag invalidation reaches
/// entries written by other processes.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Fetch raw bytes for a key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store bytes with a TTL and register the key under each tag.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration, tags: &[String]) -> Result<()>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key registered under `tag`, returning the deleted keys.
    async fn invalidate_tag(&self, tag: &str) -> Result<Vec<String>>;

    /// Delete every key matching `pattern`, returning the deleted keys.
    async fn delete_matching(&self, pattern: &Regex) -> Result<Vec<String>>;

    /// Delete everything this store owns.
    async fn clear(&self) -> Result<()>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
    tags: Vec<String>,
}

/// In-process [`PersistentStore`] for development and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, StoredValue>,
    tags: DashMap<String, HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.values.iter().filter(|v| v.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values
            .get(key)
            .is_some_and(|v| v.expires_at > Instant::now())
    }

    /// Number of tags with at least one registered key.
    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    /// Remove a key and its tag memberships.
    fn remove(&self, key: &str) -> bool {
        match self.values.remove(key) {
            Some((_, old)) => {
                self.unindex(key, &old.tags);
                true
            }
            None => false,
        }
    }

    fn unindex(&self, key: &str, tags: &[String]) {
        for tag in tags {
            self.tags.remove_if_mut(tag, |_, keys| {
                keys.remove(key);
                keys.is_empty()
            });
        }
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(value) = self.values.get(key).map(|v| v.clone()) else {
            return Ok(None);
        };
        if value.expires_at <= Instant::now() {
            if let Some((_, expired)) = self
                .values
                .remove_if(key, |_, current| current.expires_at <= Instant::now())
            {
                self.unindex(key, &expired.tags);
            }
            return Ok(None);
        }
        Ok(Some(value.bytes))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration, tags: &[String]) -> Result<()> {
        let previous = self.values.insert(
            key.to_string(),
            StoredValue {
                bytes: value.to_vec(),
                expires_at: Instant::now() + ttl.min(MAX_TTL),
                tags: tags.to_vec(),
            },
        );
        if let Some(previous) = previous {
            let stale: Vec<String> = previous
                .tags
                .into_iter()
                .filter(|t| !tags.contains(t))
                .collect();
            self.unindex(key, &stale);
        }
        for tag in tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.remove(key))
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<Vec<String>> {
        let Some((_, keys)) = self.tags.remove(tag) else {
            return Ok(Vec::new());
        };
        Ok(keys.into_iter().filter(|k| self.remove(k)).collect())
    }

    async fn delete_matching(&self, pattern: &Regex) -> Result<Vec<String>> {
        let matching: Vec<String> = self
            .values
            .iter()
            .filter(|e| pattern.is_match(e.key()))
            .map(|e| e.key().clone())
            .collect();
        for key in &matching {
            self.remove(key);
        }
        Ok(matching)
    }

    async fn clear(&self) -> Result<()> {
        self.values.clear();
        self.tags.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let store = MemoryStore::new();
        store
            .set("k", b"v", Duration::from_secs(60), &[])
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_values_are_misses() {
        let store = MemoryStore::new();
        store.set("k", b"v", Duration::ZERO, &[]).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn tag_index_follows_key_lifetime() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        let tags = |t: &[&str]| t.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        store.set("a", b"1", ttl, &tags(&["menu:main", "user:u1"])).await.unwrap();
        assert_eq!(store.tag_count(), 2);

        // Rewriting drops tags the new value no longer carries.
        store.set("a", b"2", ttl, &tags(&["menu:main"])).await.unwrap();
        assert_eq!(store.tag_count(), 1);
        assert!(store.invalidate_tag("user:u1").await.unwrap().is_empty());
        assert!(store.contains("a"));

        assert!(store.delete("a").await.unwrap());
        assert_eq!(store.tag_count(), 0);

        store.set("b", b"3", Duration::ZERO, &tags(&["user:u2"])).await.unwrap();
        assert_eq!(store.get("b").await.unwrap(), None);
        assert_eq!(store.tag_count(), 0);

        store.set("c", b"4", ttl, &tags(&["user:u3", "tenant:acme"])).await.unwrap();
        assert_eq!(store.invalidate_tag("user:u3").await.unwrap(), vec!["c"]);
        assert_eq!(store.tag_count(), 0);

        store.set("d", b"5", ttl, &tags(&["user:u4"])).await.unwrap();
        store.delete_matching(&Regex::new("^d$").unwrap()).await.unwrap();
        assert_eq!(store.tag_count(), 0);
    }

    #[tokio::test]
    async fn huge_ttls_are_clamped() {
        let store = MemoryStore::new();
        store.set("k", b"v", Duration::MAX, &[]).await.unwrap();
        assert!(store.contains("k"));
    }

    #[tokio::test]
    async fn tag_and_pattern_invalidation() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        let user_tag = vec!["user:u1".to_string()];
        store.set("nav:a:u1", b"1", ttl, &user_tag).await.unwrap();
        store.set("nav:b:u1", b"2", ttl, &user_tag).await.unwrap();
        store.set("nav:a:u2", b"3", ttl, &[]).await.unwrap();

        let mut removed = store.invalidate_tag("user:u1").await.unwrap();
        removed.sort();
        assert_eq!(removed, vec!["nav:a:u1", "nav:b:u1"]);

        let pattern = Regex::new(r"^nav:a:").unwrap();
        assert_eq!(store.delete_matching(&pattern).await.unwrap(), vec!["nav:a:u2"]);
        assert!(store.is_empty());
    }
}
