//! Application state shared across callers.

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::{CacheLayer, PersistentStore, RedisStore};
use crate::config::Config;
use crate::events::{EventBus, InMemoryEventBus};
use crate::invalidator::CacheInvalidator;
use crate::metrics::Metrics;
use crate::navigation::{MenuRepository, NavigationService};

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    repository: Arc<MenuRepository>,
    cache: CacheLayer,
    bus: Arc<dyn EventBus>,
    metrics: Arc<Metrics>,
    navigation: Arc<NavigationService>,
    invalidator: Arc<CacheInvalidator>,

    /// Stops background tasks.
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    /// Create application state, connecting to Redis when configured.
    pub async fn new(config: &Config) -> Result<Self> {
        let store: Option<Arc<dyn PersistentStore>> = match config.redis_url.as_deref() {
            Some(url) => {
                let redis = RedisStore::open(url).context("failed to create Redis client")?;
                redis.ping().await.context("failed to connect to Redis")?;
                info!("Redis connection established");
                Some(Arc::new(redis))
            }
            None => {
                info!("no Redis configured, caching in process only");
                None
            }
        };

        let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
        Ok(Self::with_parts(config, store, bus))
    }

    /// Assemble state from an explicit store and bus.
    ///
    /// Spawns the write-behind and sweep loops when their intervals are
    /// non-zero, so it must then be called inside a Tokio runtime.
    pub fn with_parts(
        config: &Config,
        store: Option<Arc<dyn PersistentStore>>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let cache = match store {
            Some(store) => CacheLayer::with_store(config.cache.clone(), store),
            None => CacheLayer::new(config.cache.clone()),
        }
        .with_metrics(Arc::clone(&metrics));

        let repository = Arc::new(MenuRepository::new());

        let navigation = Arc::new(NavigationService::new(
            Arc::clone(&repository),
            cache.clone(),
            Arc::clone(&bus),
            Arc::clone(&metrics),
            config.navigation.clone(),
        ));

        let invalidator = Arc::new(
            CacheInvalidator::new(Arc::clone(&repository), cache.clone())
                .with_metrics(Arc::clone(&metrics)),
        );
        invalidator.register(&bus);

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        let sync_interval = config.cache.l2_sync_interval;
        if cache.has_persistent_tier() && !sync_interval.is_zero() {
            info!(interval = ?sync_interval, "starting cache write-behind sync");
            tasks.push(cache.spawn_sync_task(sync_interval, shutdown.child_token()));
        }

        let sweep_interval = config.navigation.sweep_interval;
        if !sweep_interval.is_zero() {
            info!(interval = ?sweep_interval, "starting navigation cache sweep");
            tasks.push(invalidator.spawn_sweep_task(sweep_interval, shutdown.child_token()));
        }

        Self {
            inner: Arc::new(AppStateInner {
                repository,
                cache,
                bus,
                metrics,
                navigation,
                invalidator,
                shutdown,
                tasks: Mutex::new(tasks),
            }),
        }
    }

    pub fn repository(&self) -> &Arc<MenuRepository> {
        &self.inner.repository
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.inner.cache
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.inner.bus
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    pub fn navigation(&self) -> &Arc<NavigationService> {
        &self.inner.navigation
    }

    pub fn invalidator(&self) -> &Arc<CacheInvalidator> {
        &self.inner.invalidator
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
        info!("background tasks stopped");
    }
}
