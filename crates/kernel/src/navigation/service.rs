//! Navigation service.
//!
//! Front door for callers: resolves menus from the repository, serves
//! filtered navigation through the shared cache, and publishes the events each
//! mutation queues on its menu once the mutation is complete.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::events::DomainEvent;
use super::fingerprint::{Fingerprint, tenant_key_segment};
use super::item::{ItemPatch, NavigationItem};
use super::menu::{FilterOptions, MenuConfigPatch, NAVIGATION_CACHE_TTL_SECS, NavigationMenu};
use super::repository::{MenuRepository, SharedMenu};
use crate::cache::{CacheLayer, CacheStatistics, SetOptions};
use crate::config::NavigationConfig;
use crate::error::NavResult;
use crate::events::{BusEvent, EventBus, EventMetadata};
use crate::metrics::Metrics;
use crate::models::UserContext;

/// Publisher name on menu events.
const PUBLISHER: &str = "navigation-service";

/// Orchestrates menus, the shared cache, and event publication.
pub struct NavigationService {
    repository: Arc<MenuRepository>,
    cache: CacheLayer,
    bus: Arc<dyn EventBus>,
    metrics: Arc<Metrics>,
    config: NavigationConfig,
    /// One lock per shared-cache key being computed.
    in_flight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl NavigationService {
    pub fn new(
        repository: Arc<MenuRepository>,
        cache: CacheLayer,
        bus: Arc<dyn EventBus>,
        metrics: Arc<Metrics>,
        config: NavigationConfig,
    ) -> Self {
        Self {
            repository,
            cache,
            bus,
            metrics,
            config,
            in_flight: DashMap::new(),
        }
    }

    pub fn repository(&self) -> &Arc<MenuRepository> {
        &self.repository
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    /// Register a menu, applying the configured result lifetime.
    pub fn create_menu(&self, menu: NavigationMenu) -> NavResult<SharedMenu> {
        let ttl = chrono::Duration::from_std(self.config.result_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(NAVIGATION_CACHE_TTL_SECS));
        self.repository.insert(menu.with_result_ttl(ttl))
    }

    /// Delete a menu and everything cached for it. Returns `false` for
    /// unknown ids.
    pub async fn delete_menu(&self, menu_id: &str) -> bool {
        if !self.repository.remove(menu_id) {
            return false;
        }
        if let Err(e) = self.cache.invalidate_by_tag(&format!("menu:{menu_id}")).await {
            warn!(menu = %menu_id, error = %e, "failed to drop shared cache for deleted menu");
        }
        true
    }

    /// Navigation visible to `ctx`, or `None` for an unknown menu.
    ///
    /// Concurrent misses for the same request compute once; the rest wait and
    /// read the shared cache.
    pub async fn get_navigation_for_user(
        &self,
        menu_id: &str,
        ctx: &UserContext,
        options: &FilterOptions,
    ) -> Option<Vec<NavigationItem>> {
        let menu = self.repository.get(menu_id)?;
        let fingerprint = Fingerprint::new(ctx, options);
        let version = menu.read().version();
        let key = fingerprint.cache_key(menu_id, version);

        if let Some(items) = self.cache.get_json::<Vec<NavigationItem>>(&key).await {
            return Some(items);
        }

        let lock = Arc::clone(self.in_flight.entry(key.clone()).or_default().value());
        let items = {
            let _guard = lock.lock().await;
            // This request already counted its miss.
            match self.cache.peek_json::<Vec<NavigationItem>>(&key).await {
                Some(items) => {
                    debug!(
                        menu = %menu_id,
                        user = %ctx.user_id,
                        "navigation computed by a concurrent request"
                    );
                    items
                }
                None => self.compute_and_store(menu_id, &menu, ctx, options, &fingerprint).await,
            }
        };

        // The map and this request hold the only references once nobody waits.
        self.in_flight.remove_if(&key, |_, current| {
            Arc::ptr_eq(current, &lock) && Arc::strong_count(current) <= 2
        });
        Some(items)
    }

    async fn compute_and_store(
        &self,
        menu_id: &str,
        menu: &SharedMenu,
        ctx: &UserContext,
        options: &FilterOptions,
        fingerprint: &Fingerprint,
    ) -> Vec<NavigationItem> {
        let started = Instant::now();
        let (items, version) = {
            let menu = menu.read();
            (menu.get_navigation_for_user(ctx, options), menu.version())
        };
        self.metrics.record_filter(started.elapsed().as_secs_f64());

        // Store under the version the result was computed against.
        let key = fingerprint.cache_key(menu_id, version);
        let options = SetOptions::ttl(self.config.result_ttl).with_tags(fingerprint.tags(menu_id));
        if let Err(e) = self.cache.set_json(&key, &items, options).await {
            warn!(menu = %menu_id, error = %e, "failed to cache navigation");
        }
        items
    }

    pub async fn add_item(&self, menu_id: &str, item: NavigationItem) -> NavResult<()> {
        self.mutate(menu_id, |menu| menu.add_item(item)).await
    }

    /// Remove an item and its subtree. `Ok(false)` if the item is unknown.
    pub async fn remove_item(&self, menu_id: &str, item_id: &str) -> NavResult<bool> {
        self.mutate(menu_id, |menu| Ok(menu.remove_item(item_id))).await
    }

    pub async fn update_item(
        &self,
        menu_id: &str,
        item_id: &str,
        patch: ItemPatch,
    ) -> NavResult<()> {
        self.mutate(menu_id, |menu| menu.update_item(item_id, patch))
            .await
    }

    pub async fn move_item(
        &self,
        menu_id: &str,
        item_id: &str,
        new_parent: Option<&str>,
    ) -> NavResult<()> {
        self.mutate(menu_id, |menu| menu.move_item(item_id, new_parent))
            .await
    }

    pub async fn update_config(&self, menu_id: &str, patch: MenuConfigPatch) -> NavResult<()> {
        self.mutate(menu_id, |menu| {
            menu.update_config(patch);
            Ok(())
        })
        .await
    }

    /// Drop everything cached for a menu, in the menu and the shared cache.
    pub async fn clear_cache(&self, menu_id: &str) -> NavResult<usize> {
        let removed = self.mutate(menu_id, |menu| Ok(menu.clear_cache())).await?;
        let shared = match self.cache.invalidate_by_tag(&format!("menu:{menu_id}")).await {
            Ok(count) => count,
            Err(e) => {
                warn!(menu = %menu_id, error = %e, "shared cache clear failed");
                0
            }
        };
        self.metrics
            .record_invalidation("menu", (removed + shared) as u64);
        Ok(removed + shared)
    }

    /// Drop one user's cached navigation for a menu, optionally only under
    /// one tenant.
    pub async fn invalidate_user_cache(
        &self,
        menu_id: &str,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> NavResult<usize> {
        let removed = self
            .mutate(menu_id, |menu| Ok(menu.invalidate_user_cache(user_id, tenant_id)))
            .await?;

        let mut prefix = format!(
            "^nav:{}:v[0-9]+:{}:",
            regex::escape(menu_id),
            regex::escape(user_id)
        );
        if let Some(tenant) = tenant_id {
            prefix.push_str(&regex::escape(&tenant_key_segment(Some(tenant))));
            prefix.push(':');
        }
        let shared = match regex::Regex::new(&prefix) {
            Ok(pattern) => match self.cache.invalidate_by_pattern(&pattern).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(
                        menu = %menu_id,
                        user = %user_id,
                        error = %e,
                        "shared cache invalidation failed"
                    );
                    0
                }
            },
            Err(e) => {
                warn!(menu = %menu_id, user = %user_id, error = %e, "invalid invalidation pattern");
                0
            }
        };

        self.metrics
            .record_invalidation("user", (removed + shared) as u64);
        Ok(removed + shared)
    }

    pub async fn get_statistics(&self) -> CacheStatistics {
        self.cache.get_statistics().await
    }

    /// Publish an event on behalf of a caller. Failures are logged.
    pub async fn publish(&self, event: BusEvent) {
        let event_type = event.event_type();
        let ok = match self.bus.publish(event, EventMetadata::new(PUBLISHER)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(event = %event_type, error = %e, "failed to publish event");
                false
            }
        };
        self.metrics.record_publish(ok);
    }

    /// Run a mutation under the menu's write lock, then publish its events.
    ///
    /// Publication happens after the lock is released; a failed publish never
    /// undoes the mutation.
    async fn mutate<T>(
        &self,
        menu_id: &str,
        op: impl FnOnce(&mut NavigationMenu) -> NavResult<T>,
    ) -> NavResult<T> {
        let menu = self.repository.require(menu_id)?;
        let (result, events) = {
            let mut menu = menu.write();
            let result = op(&mut menu);
            (result, menu.drain_domain_events())
        };

        self.publish_all(events).await;
        result
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) {
        for event in events {
            debug!(
                menu = %event.menu_id,
                event = %event.event_type(),
                version = event.menu_version,
                "publishing menu event"
            );
            self.publish(event.into()).await;
        }
    }
}

impl std::fmt::Debug for NavigationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigationService")
            .field("menus", &self.repository.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}
