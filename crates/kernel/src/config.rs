//! Configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Longest duration any setting accepts (ten years).
pub const MAX_DURATION: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Cache engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum L1 entries (default: 10,000).
    pub l1_max_entries: u64,

    /// Maximum aggregate L1 payload bytes (default: 64 MiB).
    pub l1_max_bytes: u64,

    /// Maximum L1 entry age (default: 15 minutes).
    pub l1_max_age: Duration,

    /// Default L2 TTL (default: 1 hour).
    pub l2_ttl: Duration,

    /// Per-call L2 timeout; a timeout counts as a miss (default: 50ms).
    pub l2_timeout: Duration,

    /// Gzip L2 payloads (default: false).
    pub l2_compression: bool,

    /// Zero writes L2 through on every set; otherwise L1 is synced to L2 on
    /// this interval (default: 0).
    pub l2_sync_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_entries: 10_000,
            l1_max_bytes: 64 * 1024 * 1024,
            l1_max_age: Duration::from_secs(900),
            l2_ttl: Duration::from_secs(3600),
            l2_timeout: Duration::from_millis(50),
            l2_compression: false,
            l2_sync_interval: Duration::ZERO,
        }
    }
}

/// Navigation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationConfig {
    /// Lifetime of a computed navigation result (default: 15 minutes).
    pub result_ttl: Duration,

    /// Full-cache sweep interval; zero disables the sweep (default: 0).
    pub sweep_interval: Duration,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            result_ttl: Duration::from_secs(900),
            sweep_interval: Duration::ZERO,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Redis connection URL. When None, caching is L1-only.
    pub redis_url: Option<String>,

    pub cache: CacheConfig,

    pub navigation: NavigationConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let redis_url = lookup("NAV_REDIS_URL").filter(|url| !url.trim().is_empty());

        let l1_max_entries = parse_or(&lookup, "NAV_L1_MAX_ENTRIES", defaults.cache.l1_max_entries)
            .context("NAV_L1_MAX_ENTRIES must be a valid u64")?;

        let l1_max_bytes = parse_or(&lookup, "NAV_L1_MAX_BYTES", defaults.cache.l1_max_bytes)
            .context("NAV_L1_MAX_BYTES must be a valid u64")?;

        let l1_max_age = secs_or(&lookup, "NAV_L1_MAX_AGE_SECS", defaults.cache.l1_max_age)
            .context("NAV_L1_MAX_AGE_SECS must be a number of seconds")?;

        let l2_ttl = secs_or(&lookup, "NAV_L2_TTL_SECS", defaults.cache.l2_ttl)
            .context("NAV_L2_TTL_SECS must be a number of seconds")?;

        let l2_timeout = millis_or(&lookup, "NAV_L2_TIMEOUT_MS", defaults.cache.l2_timeout)
        .context("NAV_L2_TIMEOUT_MS must be a number of milliseconds")?;

        let l2_compression = lookup("NAV_L2_COMPRESSION")
            .map(|v| parse_bool(&v))
            .transpose()
            .context("NAV_L2_COMPRESSION must be true or false")?
            .unwrap_or(defaults.cache.l2_compression);

        let l2_sync_interval = secs_or(
            &lookup,
            "NAV_L2_SYNC_INTERVAL_SECS",
            defaults.cache.l2_sync_interval,
        )
        .context("NAV_L2_SYNC_INTERVAL_SECS must be a number of seconds")?;

        let result_ttl = secs_or(&lookup, "NAV_RESULT_TTL_SECS", defaults.navigation.result_ttl)
            .context("NAV_RESULT_TTL_SECS must be a number of seconds")?;

        let sweep_interval = secs_or(
            &lookup,
            "NAV_SWEEP_INTERVAL_SECS",
            defaults.navigation.sweep_interval,
        )
        .context("NAV_SWEEP_INTERVAL_SECS must be a number of seconds")?;

        Ok(Self {
            redis_url,
            cache: CacheConfig {
                l1_max_entries,
                l1_max_bytes,
                l1_max_age,
                l2_ttl,
                l2_timeout,
                l2_compression,
                l2_sync_interval,
            },
            navigation: NavigationConfig {
                result_ttl,
                sweep_interval,
            },
        })
    }
}

fn parse_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<u64, std::num::ParseIntError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse(),
        None => Ok(default),
    }
}

fn secs_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    let secs = parse_or(lookup, key, default.as_secs())?;
    bounded(key, Duration::from_secs(secs))
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    let millis = parse_or(lookup, key, default)?;
    bounded(key, Duration::from_millis(millis))
}

fn bounded(key: &str, duration: Duration) -> Result<Duration> {
    if duration > MAX_DURATION {
        anyhow::bail!(
            "{key} exceeds the maximum of {} seconds",
            MAX_DURATION.as_secs()
        );
    }
    Ok(duration)
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("unrecognized boolean {other:?}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.redis_url.is_none());
        assert_eq!(config.navigation.result_ttl, Duration::from_secs(900));
        assert!(config.cache.l2_sync_interval.is_zero());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("NAV_REDIS_URL", "redis://cache:6379"),
            ("NAV_L1_MAX_ENTRIES", "500"),
            ("NAV_L2_TIMEOUT_MS", "25"),
            ("NAV_L2_COMPRESSION", "yes"),
            ("NAV_SWEEP_INTERVAL_SECS", "30"),
        ]))
        .unwrap();

        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.cache.l1_max_entries, 500);
        assert_eq!(config.cache.l2_timeout, Duration::from_millis(25));
        assert!(config.cache.l2_compression);
        assert_eq!(config.navigation.sweep_interval, Duration::from_secs(30));
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = Config::from_lookup(lookup(&[("NAV_L1_MAX_BYTES", "lots")])).unwrap_err();
        assert!(err.to_string().contains("NAV_L1_MAX_BYTES"));

        let err = Config::from_lookup(lookup(&[("NAV_L2_COMPRESSION", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("NAV_L2_COMPRESSION"));
    }

    #[test]
    fn oversized_durations_are_rejected() {
        for key in [
            "NAV_L1_MAX_AGE_SECS",
            "NAV_L2_TTL_SECS",
            "NAV_RESULT_TTL_SECS",
            "NAV_SWEEP_INTERVAL_SECS",
        ] {
            let err = Config::from_lookup(lookup(&[(key, "18446744073709551615")])).unwrap_err();
            assert!(format!("{err:#}").contains("exceeds the maximum"), "{key}: {err:#}");
            assert!(err.to_string().contains(key));
        }

        let err = Config::from_lookup(lookup(&[("NAV_L2_TIMEOUT_MS", "18446744073709551615")]))
            .unwrap_err();
        assert!(err.to_string().contains("NAV_L2_TIMEOUT_MS"));

        let ten_years = MAX_DURATION.as_secs().to_string();
        let config = Config::from_lookup(lookup(&[("NAV_L2_TTL_SECS", ten_years.as_str())])).unwrap();
        assert_eq!(config.cache.l2_ttl, MAX_DURATION);
    }

    #[test]
    fn blank_redis_url_means_no_l2() {
        let config = Config::from_lookup(lookup(&[("NAV_REDIS_URL", "  ")])).unwrap();
        assert!(config.redis_url.is_none());
    }
}
