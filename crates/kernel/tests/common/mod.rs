#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! [`TestApp`] wires the real kernel (repository, cache layer, navigation
//! service and invalidator) around an in-process bus, optionally with a
//! tier-2 store double from `navscope-test-utils`.

#![allow(dead_code)]

use std::sync::Arc;

use navscope_kernel::cache::PersistentStore;
use navscope_kernel::config::Config;
use navscope_kernel::events::{EventBus, EventMetadata, IdentityEvent, InMemoryEventBus};
use navscope_kernel::models::UserContext;
use navscope_kernel::navigation::{
    FilterOptions, Fingerprint, NavigationItem, NavigationService, SharedMenu,
};
use navscope_kernel::state::AppState;

/// Test application wrapping a fully wired [`AppState`].
pub struct TestApp {
    pub state: AppState,
    pub bus: Arc<InMemoryEventBus>,
}

impl TestApp {
    /// L1-only application with the sample menu registered as `main`.
    pub fn new() -> Self {
        Self::build(Config::default(), None)
    }

    /// Application whose cache has a tier-2 store.
    pub fn with_store(store: Arc<dyn PersistentStore>) -> Self {
        Self::build(Config::default(), Some(store))
    }

    pub fn build(config: Config, store: Option<Arc<dyn PersistentStore>>) -> Self {
        let bus = Arc::new(InMemoryEventBus::new());
        let shared: Arc<dyn EventBus> = bus.clone();
        let state = AppState::with_parts(&config, store, shared);
        state
            .navigation()
            .create_menu(navscope_test_utils::sample_menu())
            .expect("register sample menu");
        Self { state, bus }
    }

    pub fn navigation(&self) -> &Arc<NavigationService> {
        self.state.navigation()
    }

    pub fn menu(&self) -> SharedMenu {
        self.state.repository().get("main").expect("main menu")
    }

    /// Render `main` for `ctx` with default options.
    pub async fn render(&self, ctx: &UserContext) -> Vec<NavigationItem> {
        self.navigation()
            .get_navigation_for_user("main", ctx, &FilterOptions::default())
            .await
            .expect("main menu exists")
    }

    /// Shared-cache key `ctx` renders under at the menu's current version.
    pub fn cache_key(&self, ctx: &UserContext) -> String {
        let version = self.menu().read().version();
        Fingerprint::new(ctx, &FilterOptions::default()).cache_key("main", version)
    }

    /// Whether the shared cache holds a result for `ctx` at the current
    /// version. Counts as a cache lookup.
    pub async fn is_cached(&self, ctx: &UserContext) -> bool {
        self.state.cache().get(&self.cache_key(ctx)).await.is_some()
    }

    /// Publish an identity event as the identity system would.
    pub async fn publish_identity(&self, event: IdentityEvent) {
        self.bus
            .publish(event.into(), EventMetadata::new("identity"))
            .await
            .expect("in-memory publish");
    }
}
