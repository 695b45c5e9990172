//! Navscope test utilities.
//!
//! Helpers for integration testing: item, menu and user fixtures, plus cache
//! store and event bus doubles for failure-path testing.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use navscope_kernel::cache::{MemoryStore, PersistentStore};
use navscope_kernel::events::{BusEvent, EventBus, EventHandler, EventMetadata};
use navscope_kernel::models::{Permission, Role, UserContext};
use navscope_kernel::navigation::{
    ItemType, MenuConfig, NavigationItem, NavigationItemValue, NavigationMenu, Scope,
};
use parking_lot::Mutex;
use regex::Regex;

/// Parse a permission, panicking on invalid input.
pub fn perm(value: &str) -> Permission {
    Permission::new(value).expect("valid permission")
}

/// Parse several permissions.
pub fn perms(values: &[&str]) -> Vec<Permission> {
    values.iter().copied().map(perm).collect()
}

/// Create a user with the given permissions.
pub fn test_user(user_id: &str, permissions: &[&str]) -> UserContext {
    UserContext::new(user_id).with_permissions(perms(permissions))
}

/// A user with no permissions, role, or tenant.
pub fn anonymous_user() -> UserContext {
    UserContext::new("anonymous")
}

/// A `super_admin`.
pub fn admin_user() -> UserContext {
    UserContext::new("admin").with_role(Role::SuperAdmin)
}

/// A tenant administrator for `tenant`.
pub fn tenant_admin(user_id: &str, tenant: &str) -> UserContext {
    UserContext::new(user_id)
        .with_role(Role::TenantAdmin)
        .with_tenant(tenant)
}

/// Create a navigable item.
pub fn test_item(id: &str, label: &str) -> TestItem {
    TestItem::new(id, label, ItemType::Item).with_path(&format!("/{id}"))
}

/// Create a group.
pub fn test_group(id: &str, label: &str) -> TestItem {
    TestItem::new(id, label, ItemType::Group)
}

/// Create a divider.
pub fn test_divider(id: &str) -> TestItem {
    TestItem::new(id, "", ItemType::Divider)
}

/// A navigation item builder for creating test fixtures.
#[derive(Debug, Clone)]
pub struct TestItem {
    value: NavigationItemValue,
    children: Vec<TestItem>,
}

impl TestItem {
    pub fn new(id: &str, label: &str, item_type: ItemType) -> Self {
        Self {
            value: NavigationItemValue::new(id, label, item_type),
            children: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.value.path = path.to_string();
        self
    }

    /// Require any of these permissions.
    pub fn with_permissions(mut self, permissions: &[&str]) -> Self {
        self.value.permissions = perms(permissions);
        self
    }

    /// Require all declared permissions.
    pub fn require_all(mut self) -> Self {
        self.value.require_all = true;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.value.scope = scope;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.value.order = order;
        self
    }

    pub fn with_parent(mut self, parent_id: &str) -> Self {
        self.value.parent_id = Some(parent_id.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.value.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.value.disabled = true;
        self
    }

    pub fn with_child(mut self, child: TestItem) -> Self {
        self.children.push(child);
        self
    }

    /// Build the item, attaching children through `add_child`.
    pub fn build(self) -> NavigationItem {
        let mut item = NavigationItem::new(self.value);
        for child in self.children {
            item.add_child(child.build()).expect("valid test tree");
        }
        item
    }
}

/// Create a menu builder.
pub fn test_menu(id: &str) -> TestMenu {
    TestMenu {
        id: id.to_string(),
        config: MenuConfig::new(id),
        items: Vec::new(),
    }
}

/// A menu builder for creating test fixtures.
#[derive(Debug, Clone)]
pub struct TestMenu {
    id: String,
    config: MenuConfig,
    items: Vec<TestItem>,
}

impl TestMenu {
    pub fn for_tenant(mut self, tenant: &str) -> Self {
        self.config.scope = Scope::Tenant;
        self.config.tenant_id = Some(tenant.to_string());
        self
    }

    pub fn as_default(mut self) -> Self {
        self.config.is_default = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.config.is_active = false;
        self
    }

    pub fn with_item(mut self, item: TestItem) -> Self {
        self.items.push(item);
        self
    }

    /// Build the menu with its event queue drained.
    pub fn build(self) -> NavigationMenu {
        let mut menu = NavigationMenu::with_id(self.id, self.config);
        for item in self.items {
            menu.add_item(item.build()).expect("valid test menu");
        }
        menu.drain_domain_events();
        menu
    }
}

/// The standard fixture menu `main`.
///
/// ```text
/// dashboard                      (public)
/// admin [group, admin.access]
///   users                        (users.read)
///   audit                        (audit.read + users.read, require all)
/// billing [group]
///   invoices                     (billing.read)
/// tenant-settings                (tenant scope)
/// platform                       (system scope)
/// beta                           (hidden)
/// legacy                         (disabled)
/// ```
pub fn sample_menu() -> NavigationMenu {
    sample_menu_builder().build()
}

/// Builder for [`sample_menu`], for further customization.
pub fn sample_menu_builder() -> TestMenu {
    test_menu("main")
        .as_default()
        .with_item(test_item("dashboard", "Dashboard").with_order(1))
        .with_item(
            test_group("admin", "Administration")
                .with_order(2)
                .with_permissions(&["admin.access"])
                .with_child(test_item("users", "Users").with_permissions(&["users.read"]))
                .with_child(
                    test_item("audit", "Audit log")
                        .with_order(1)
                        .with_permissions(&["audit.read", "users.read"])
                        .require_all(),
                ),
        )
        .with_item(
            test_group("billing", "Billing")
                .with_order(3)
                .with_child(test_item("invoices", "Invoices").with_permissions(&["billing.read"])),
        )
        .with_item(
            test_item("tenant-settings", "Tenant settings")
                .with_order(4)
                .with_scope(Scope::Tenant),
        )
        .with_item(
            test_item("platform", "Platform")
                .with_order(5)
                .with_scope(Scope::System),
        )
        .with_item(test_item("beta", "Beta").with_order(6).hidden())
        .with_item(test_item("legacy", "Legacy").with_order(7).disabled())
}

/// Ids of a forest in depth-first order.
pub fn flatten_ids(items: &[NavigationItem]) -> Vec<String> {
    let mut ids = Vec::new();
    let mut stack: Vec<&NavigationItem> = items.iter().rev().collect();
    while let Some(item) = stack.pop() {
        ids.push(item.id().to_string());
        stack.extend(item.children().iter().rev());
    }
    ids
}

/// Tier-2 store whose calls fail while `failing` is set.
///
/// Delegates to an inner [`MemoryStore`] otherwise.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyStore {
    pub fn failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration, tags: &[String]) -> Result<()> {
        self.check()?;
        self.inner.set(key, value, ttl, tags).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<Vec<String>> {
        self.check()?;
        self.inner.invalidate_tag(tag).await
    }

    async fn delete_matching(&self, pattern: &Regex) -> Result<Vec<String>> {
        self.check()?;
        self.inner.delete_matching(pattern).await
    }

    async fn clear(&self) -> Result<()> {
        self.check()?;
        self.inner.clear().await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// Tier-2 store that answers reads after a fixed delay.
#[derive(Debug)]
pub struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl PersistentStore for SlowStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration, tags: &[String]) -> Result<()> {
        self.inner.set(key, value, ttl, tags).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<Vec<String>> {
        self.inner.invalidate_tag(tag).await
    }

    async fn delete_matching(&self, pattern: &Regex) -> Result<Vec<String>> {
        self.inner.delete_matching(pattern).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

/// Event handler that records what it sees.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<BusEvent>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.events.lock().clone()
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(BusEvent::event_type).collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn name(&self) -> &str {
        "recording"
    }

    async fn handle(&self, event: &BusEvent, _metadata: &EventMetadata) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Event bus that refuses every publish.
#[derive(Debug, Default)]
pub struct RejectingBus {
    attempts: AtomicUsize,
}

impl RejectingBus {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventBus for RejectingBus {
    async fn publish(&self, _event: BusEvent, _metadata: EventMetadata) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("bus closed")
    }

    fn subscribe(&self, _event_type: &str, _handler: Arc<dyn EventHandler>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use navscope_kernel::navigation::FilterOptions;

    #[test]
    fn sample_menu_shape() {
        let menu = sample_menu();
        assert_eq!(menu.len(), 10);
        assert_eq!(menu.pending_event_count(), 0);
        assert_eq!(menu.item("users").unwrap().parent_id.as_deref(), Some("admin"));
    }

    #[test]
    fn flatten_is_depth_first() {
        let menu = sample_menu();
        let items = menu.compute_navigation(&admin_user(), &FilterOptions::default());
        assert_eq!(
            flatten_ids(&items),
            vec![
                "dashboard",
                "admin",
                "users",
                "audit",
                "billing",
                "invoices",
                "tenant-settings",
                "platform",
            ]
        );
    }

    #[test]
    fn test_user_builder() {
        let user = test_user("u1", &["a.read", "b.read"]);
        assert_eq!(user.permissions.len(), 2);
        assert!(user.has_permission(&perm("a.read")));
        assert!(tenant_admin("t1", "acme").tenant().is_some());
    }
}
