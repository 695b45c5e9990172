//! Redis-backed tier-2 store.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::Client as RedisClient;
use regex::Regex;
use tracing::debug;

use super::store::PersistentStore;

/// Default key namespace.
const DEFAULT_PREFIX: &str = "navscope:";

/// Keys fetched per SCAN round trip.
const SCAN_COUNT: usize = 100;

/// [`PersistentStore`] on Redis.
///
/// Values live under `{prefix}{key}`; tag membership is tracked in Redis sets
/// under `{prefix}tag:{tag}`.
#[derive(Clone)]
pub struct RedisStore {
    redis: RedisClient,
    prefix: String,
}

impl RedisStore {
    pub fn new(redis: RedisClient) -> Self {
        Self::with_prefix(redis, DEFAULT_PREFIX)
    }

    pub fn with_prefix(redis: RedisClient, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
        }
    }

    /// Open a client from a connection URL.
    pub fn open(url: &str) -> Result<Self> {
        let client = RedisClient::open(url).context("invalid Redis URL")?;
        Ok(Self::new(client))
    }

    /// Verify the server is reachable.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("Redis PING failed")?;
        Ok(())
    }

    fn value_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}tag:{tag}", self.prefix)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.redis
            .get_multiplexed_async_connection()
            .await
            .context("failed to get Redis connection")
    }

    /// All value keys (without prefix) in this namespace.
    async fn scan_value_keys(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> Result<Vec<String>> {
        let pattern = format!("{}*", self.prefix);
        let tag_prefix = self.tag_key("");
        let mut cursor = 0u64;
        let mut keys = Vec::new();

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(conn)
                .await
                .context("SCAN failed")?;

            keys.extend(
                batch
                    .into_iter()
                    .filter(|k| !k.starts_with(&tag_prefix))
                    .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string)),
            );

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl PersistentStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn
            .get(self.value_key(key))
            .await
            .context("failed to read cache value")?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration, tags: &[String]) -> Result<()> {
        let mut conn = self.connection().await?;
        let ttl_secs = ttl.as_secs().max(1);

        conn.set_ex::<_, _, ()>(self.value_key(key), value, ttl_secs)
            .await
            .context("failed to write cache value")?;

        for tag in tags {
            conn.sadd::<_, _, ()>(self.tag_key(tag), key)
                .await
                .with_context(|| format!("failed to register key with tag {tag}"))?;
        }

        debug!(key = %key, tags = ?tags, ttl = ttl_secs, "tier-2 set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let deleted: u64 = conn
            .del(self.value_key(key))
            .await
            .context("failed to delete cache value")?;
        Ok(deleted > 0)
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let tag_key = self.tag_key(tag);

        let keys: Vec<String> = conn
            .smembers(&tag_key)
            .await
            .context("failed to read tag members")?;

        let script = redis::Script::new(INVALIDATE_TAG_SCRIPT);
        script
            .key(&tag_key)
            .arg(&self.prefix)
            .invoke_async::<()>(&mut conn)
            .await
            .context("failed to invalidate tag")?;

        debug!(tag = %tag, keys = keys.len(), "tier-2 tag invalidated");
        Ok(keys)
    }

    async fn delete_matching(&self, pattern: &Regex) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let matching: Vec<String> = self
            .scan_value_keys(&mut conn)
            .await?
            .into_iter()
            .filter(|k| pattern.is_match(k))
            .collect();

        if !matching.is_empty() {
            let full: Vec<String> = matching.iter().map(|k| self.value_key(k)).collect();
            conn.del::<_, ()>(&full)
                .await
                .context("failed to delete matching keys")?;
        }

        Ok(matching)
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", self.prefix);
        let mut cursor = 0u64;

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .context("SCAN failed during clear")?;

            if !batch.is_empty() {
                conn.del::<_, ()>(&batch)
                    .await
                    .context("failed to delete keys during clear")?;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Lua script for atomic tag invalidation.
///
/// Deletes every member of the tag set (prefixed with ARGV[1]), then the set.
const INVALIDATE_TAG_SCRIPT: &str = r#"
local keys = redis.call("SMEMBERS", KEYS[1])
for i, key in ipairs(keys) do
    redis.call("DEL", ARGV[1] .. key)
end
redis.call("DEL", KEYS[1])
return #keys
"#;
