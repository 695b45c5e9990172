//! Prometheus metrics collection.
//!
//! Navigation cache and invalidation metrics in Prometheus format.

use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// Cache tier labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TierLabels {
    pub tier: String,
}

/// Invalidation reason labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabels {
    pub reason: String,
}

/// Application metrics.
pub struct Metrics {
    registry: Registry,

    /// Cache hits by tier (`l1`, `l2`).
    pub cache_hits: Family<TierLabels, Counter>,

    /// Full cache misses (both tiers).
    pub cache_misses: Counter,

    /// Entries invalidated, by reason.
    pub cache_invalidations: Family<ReasonLabels, Counter>,

    /// Tier-2 failures and timeouts.
    pub cache_backend_errors: Counter,

    /// Domain events handed to the bus.
    pub events_published: Counter,

    /// Domain events the bus refused.
    pub event_publish_failures: Counter,

    /// Time spent filtering a menu for one request.
    pub filter_duration_seconds: Histogram,
}

impl Metrics {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let cache_hits = Family::<TierLabels, Counter>::default();
        registry.register(
            "navigation_cache_hits",
            "Navigation cache hits by tier",
            cache_hits.clone(),
        );

        let cache_misses = Counter::default();
        registry.register(
            "navigation_cache_misses",
            "Navigation cache misses",
            cache_misses.clone(),
        );

        let cache_invalidations = Family::<ReasonLabels, Counter>::default();
        registry.register(
            "navigation_cache_invalidations",
            "Navigation cache entries invalidated",
            cache_invalidations.clone(),
        );

        let cache_backend_errors = Counter::default();
        registry.register(
            "navigation_cache_backend_errors",
            "Tier-2 cache failures and timeouts",
            cache_backend_errors.clone(),
        );

        let events_published = Counter::default();
        registry.register(
            "navigation_events_published",
            "Navigation domain events published",
            events_published.clone(),
        );

        let event_publish_failures = Counter::default();
        registry.register(
            "navigation_event_publish_failures",
            "Navigation domain events that failed to publish",
            event_publish_failures.clone(),
        );

        let filter_duration_seconds = Histogram::new(exponential_buckets(0.00001, 2.0, 16));
        registry.register(
            "navigation_filter_duration_seconds",
            "Navigation filtering duration in seconds",
            filter_duration_seconds.clone(),
        );

        Self {
            registry,
            cache_hits,
            cache_misses,
            cache_invalidations,
            cache_backend_errors,
            events_published,
            event_publish_failures,
            filter_duration_seconds,
        }
    }

    /// Record a cache hit on the given tier.
    pub fn record_cache_hit(&self, tier: &str) {
        self.cache_hits
            .get_or_create(&TierLabels {
                tier: tier.to_string(),
            })
            .inc();
    }

    /// Record a full cache miss.
    pub fn record_cache_miss(&self) {
        self.cache_misses.inc();
    }

    /// Record invalidated entries.
    pub fn record_invalidation(&self, reason: &str, count: u64) {
        self.cache_invalidations
            .get_or_create(&ReasonLabels {
                reason: reason.to_string(),
            })
            .inc_by(count);
    }

    /// Record a tier-2 failure.
    pub fn record_backend_error(&self) {
        self.cache_backend_errors.inc();
    }

    /// Record a publish attempt.
    pub fn record_publish(&self, ok: bool) {
        if ok {
            self.events_published.inc();
        } else {
            self.event_publish_failures.inc();
        }
    }

    /// Record a filtering pass.
    pub fn record_filter(&self, duration_secs: f64) {
        self.filter_duration_seconds.observe(duration_secs);
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!(error = %e, "failed to encode metrics");
        }
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn encode_contains_recorded_series() {
        let metrics = Metrics::new();
        metrics.record_cache_hit("l1");
        metrics.record_cache_miss();
        metrics.record_invalidation("user", 3);
        metrics.record_filter(0.0002);

        let text = metrics.encode();
        assert!(text.contains("navigation_cache_hits_total{tier=\"l1\"} 1"));
        assert!(text.contains("navigation_cache_misses_total 1"));
        assert!(text.contains("navigation_cache_invalidations_total{reason=\"user\"} 3"));
        assert!(text.contains("navigation_filter_duration_seconds"));
    }
}
