//! Event-driven navigation cache invalidation.
//!
//! Identity changes drop one user's cached navigation across every menu;
//! structural menu changes drop everything cached for that menu. Invalidation
//! never fails the publisher: targets whose shared-cache invalidation fails
//! are queued and retried on the next event or sweep.

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::CacheLayer;
use crate::error::NavResult;
use crate::events::{BusEvent, EventBus, EventHandler, EventMetadata, identity_event_types};
use crate::metrics::Metrics;
use crate::navigation::fingerprint::tenant_key_segment;
use crate::navigation::{DomainEvent, MenuRepository, SharedMenu, event_types};

/// Publisher name on re-published menu events.
const PUBLISHER: &str = "cache-invalidator";

/// What to invalidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// One user's results, optionally only under one tenant.
    User {
        user_id: String,
        tenant_id: Option<String>,
    },
    /// Every result computed from one menu.
    Menu { menu_id: String },
}

impl Invalidation {
    fn reason(&self) -> &'static str {
        match self {
            Invalidation::User { .. } => "user",
            Invalidation::Menu { .. } => "menu",
        }
    }
}

/// Subscribes to identity and menu events and clears affected caches.
pub struct CacheInvalidator {
    repository: Arc<MenuRepository>,
    cache: CacheLayer,
    metrics: Option<Arc<Metrics>>,
    bus: Mutex<Option<Weak<dyn EventBus>>>,
    pending: Mutex<Vec<Invalidation>>,
}

impl CacheInvalidator {
    pub fn new(repository: Arc<MenuRepository>, cache: CacheLayer) -> Self {
        Self {
            repository,
            cache,
            metrics: None,
            bus: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Subscribe to every event kind this invalidator handles.
    ///
    /// The bus is held weakly and used to publish the cache events the menus
    /// record while being invalidated.
    pub fn register(self: &Arc<Self>, bus: &Arc<dyn EventBus>) {
        *self.bus.lock() = Some(Arc::downgrade(bus));

        let handler: Arc<dyn EventHandler> = Arc::clone(self) as Arc<dyn EventHandler>;
        for event_type in [
            identity_event_types::USER_PERMISSIONS_CHANGED,
            identity_event_types::TENANT_SWITCHED,
            identity_event_types::ROLE_CHANGED,
        ]
        .into_iter()
        .chain(event_types::STRUCTURAL)
        {
            bus.subscribe(event_type, Arc::clone(&handler));
        }
    }

    /// Targets waiting for a retry.
    pub fn pending(&self) -> Vec<Invalidation> {
        self.pending.lock().clone()
    }

    /// Map an event to the invalidation it calls for, if any.
    pub fn target_for(event: &BusEvent) -> Option<Invalidation> {
        match event {
            BusEvent::Identity(identity) => Some(Invalidation::User {
                user_id: identity.user_id().to_string(),
                tenant_id: identity.affected_tenant().map(str::to_string),
            }),
            BusEvent::Navigation(domain) if domain.event.is_structural() => {
                Some(Invalidation::Menu {
                    menu_id: domain.menu_id.clone(),
                })
            }
            BusEvent::Navigation(_) => None,
        }
    }

    /// Apply an invalidation now. Returns the number of entries removed.
    ///
    /// Menu-owned caches are always cleared. The error, if any, comes from the
    /// shared cache and leaves the target queued for retry.
    pub async fn invalidate(&self, target: Invalidation) -> NavResult<usize> {
        match self.apply(&target).await {
            Ok(removed) => Ok(removed),
            Err(e) => {
                self.defer(target);
                Err(e)
            }
        }
    }

    /// Retry every queued target. Returns how many succeeded.
    pub async fn retry_pending(&self) -> usize {
        let queued = std::mem::take(&mut *self.pending.lock());
        if queued.is_empty() {
            return 0;
        }

        let mut recovered = 0;
        for target in queued {
            match self.apply(&target).await {
                Ok(_) => recovered += 1,
                Err(e) => {
                    warn!(invalidation = ?target, error = %e, "invalidation retry failed");
                    self.defer(target);
                }
            }
        }

        if recovered > 0 {
            info!(recovered, "deferred invalidations applied");
        }
        recovered
    }

    /// Drop every cached navigation result in every menu and the shared cache.
    ///
    /// Fallback for lost events; also retries anything pending.
    pub async fn sweep(&self) -> NavResult<usize> {
        self.retry_pending().await;

        let mut removed = 0;
        let mut events = Vec::new();
        for menu in self.repository.all() {
            let (cleared, drained) = clear_menu(&menu);
            removed += cleared;
            events.extend(drained);
        }
        self.publish(events).await;

        removed += self.cache.invalidate_by_tag("navigation").await?;
        if let Some(metrics) = &self.metrics {
            metrics.record_invalidation("sweep", removed as u64);
        }
        info!(removed, "navigation cache sweep complete");
        Ok(removed)
    }

    /// Spawn the periodic sweep loop.
    pub fn spawn_sweep_task(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let invalidator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = invalidator.sweep().await {
                            warn!(error = %e, "navigation cache sweep failed");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        debug!("sweep task stopping");
                        break;
                    }
                }
            }
        })
    }

    async fn apply(&self, target: &Invalidation) -> NavResult<usize> {
        let mut removed = 0;
        let mut events = Vec::new();

        match target {
            Invalidation::User { user_id, tenant_id } => {
                for menu in self.repository.all() {
                    let (count, drained) = {
                        let mut menu = menu.write();
                        let count = menu.invalidate_user_cache(user_id, tenant_id.as_deref());
                        (count, menu.drain_domain_events())
                    };
                    removed += count;
                    events.extend(drained);
                }
                self.publish(events).await;

                let user_tag = format!("user:{user_id}");
                removed += match tenant_id.as_deref().map(|t| user_tenant_pattern(user_id, t)) {
                    Some(Ok(pattern)) => self.cache.invalidate_by_pattern(&pattern).await?,
                    Some(Err(e)) => {
                        warn!(user = %user_id, error = %e, "falling back to user-wide invalidation");
                        self.cache.invalidate_by_tag(&user_tag).await?
                    }
                    None => self.cache.invalidate_by_tag(&user_tag).await?,
                };
            }
            Invalidation::Menu { menu_id } => {
                if let Some(menu) = self.repository.get(menu_id) {
                    let (count, drained) = clear_menu(&menu);
                    removed += count;
                    events.extend(drained);
                }
                self.publish(events).await;

                removed += self
                    .cache
                    .invalidate_by_tag(&format!("menu:{menu_id}"))
                    .await?;
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_invalidation(target.reason(), removed as u64);
        }
        debug!(invalidation = ?target, removed, "navigation cache invalidated");
        Ok(removed)
    }

    fn defer(&self, target: Invalidation) {
        let mut pending = self.pending.lock();
        if !pending.contains(&target) {
            pending.push(target);
        }
    }

    async fn publish(&self, events: Vec<DomainEvent>) {
        if events.is_empty() {
            return;
        }
        let bus = self.bus.lock().as_ref().and_then(Weak::upgrade);
        let Some(bus) = bus else {
            debug!(count = events.len(), "no bus attached, dropping cache events");
            return;
        };

        for event in events {
            let event_type = event.event_type();
            let ok = bus
                .publish(event.into(), EventMetadata::new(PUBLISHER))
                .await
                .inspect_err(|e| warn!(event = %event_type, error = %e, "failed to publish cache event"))
                .is_ok();
            if let Some(metrics) = &self.metrics {
                metrics.record_publish(ok);
            }
        }
    }
}

#[async_trait]
impl EventHandler for CacheInvalidator {
    fn name(&self) -> &str {
        PUBLISHER
    }

    async fn handle(&self, event: &BusEvent, metadata: &EventMetadata) -> Result<()> {
        self.retry_pending().await;

        let Some(target) = Self::target_for(event) else {
            return Ok(());
        };
        if let Err(e) = self.invalidate(target).await {
            error!(
                event = %event.event_type(),
                message_id = %metadata.message_id,
                error = %e,
                "cache invalidation failed, queued for retry"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for CacheInvalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheInvalidator")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

fn clear_menu(menu: &SharedMenu) -> (usize, Vec<DomainEvent>) {
    let mut menu = menu.write();
    let removed = menu.clear_cache();
    (removed, menu.drain_domain_events())
}

/// Shared-cache keys for one user under one tenant, in any menu and version.
fn user_tenant_pattern(user_id: &str, tenant_id: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        "^nav:[^:]+:v[0-9]+:{}:{}:",
        regex::escape(user_id),
        regex::escape(&tenant_key_segment(Some(tenant_id)))
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::events::IdentityEvent;
    use crate::navigation::NavigationEvent;

    #[test]
    fn events_map_to_targets() {
        let identity: BusEvent = IdentityEvent::UserPermissionsChanged {
            user_id: "u1".into(),
            tenant_id: Some("acme".into()),
        }
        .into();
        assert_eq!(
            CacheInvalidator::target_for(&identity),
            Some(Invalidation::User {
                user_id: "u1".into(),
                tenant_id: Some("acme".into()),
            })
        );

        let structural: BusEvent =
            DomainEvent::new("main", 3, NavigationEvent::ItemUpdated { item_id: "a".into() }).into();
        assert_eq!(
            CacheInvalidator::target_for(&structural),
            Some(Invalidation::Menu {
                menu_id: "main".into()
            })
        );

        let informational: BusEvent =
            DomainEvent::new("main", 3, NavigationEvent::CacheCleared { removed: 0 }).into();
        assert_eq!(CacheInvalidator::target_for(&informational), None);
    }

    #[test]
    fn user_tenant_pattern_is_anchored_and_escaped() {
        let pattern = user_tenant_pattern("u.1", "acme").unwrap();
        assert!(pattern.is_match("nav:main:v4:u.1:@acme:abcdef"));
        assert!(!pattern.is_match("nav:main:v4:ux1:@acme:abcdef"));
        assert!(!pattern.is_match("nav:main:v4:u.1:@globex:abcdef"));

        let named_global = user_tenant_pattern("u1", "global").unwrap();
        assert!(named_global.is_match("nav:main:v4:u1:@global:abcdef"));
        assert!(!named_global.is_match("nav:main:v4:u1:global:abcdef"));
    }
}
