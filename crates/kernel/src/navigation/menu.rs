//! Navigation menu aggregate.
//!
//! The menu owns every item reachable from its roots in a flat arena
//! (`id -> node`), with parent/child links stored as ids. Every structural or
//! configuration change bumps `version`; cached results remember the version
//! they were computed against and are ignored once it moves on.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use super::events::{DomainEvent, NavigationEvent};
use super::fingerprint::Fingerprint;
use super::item::{ItemPatch, NavigationItem, NavigationItemValue, Scope};
use crate::error::{NavError, NavResult};
use crate::models::UserContext;

/// Lifetime of a cached navigation result (15 minutes).
pub const NAVIGATION_CACHE_TTL_SECS: i64 = 15 * 60;

/// Default maximum tree depth returned to callers.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Filtering options for [`NavigationMenu::get_navigation_for_user`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    #[serde(default)]
    pub include_disabled: bool,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            include_disabled: false,
            include_hidden: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Menu configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuConfig {
    pub name: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, JsonValue>,
}

impl MenuConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: Scope::Global,
            tenant_id: None,
            user_id: None,
            is_default: false,
            is_active: true,
            metadata: BTreeMap::new(),
        }
    }
}

/// Partial configuration update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MenuConfigPatch {
    pub name: Option<String>,
    pub scope: Option<Scope>,
    pub tenant_id: Option<Option<String>>,
    pub user_id: Option<Option<String>>,
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
    pub metadata: Option<BTreeMap<String, JsonValue>>,
}

/// Arena node.
#[derive(Debug, Clone)]
struct Node {
    value: NavigationItemValue,
    children: Vec<String>,
}

/// Cached filtering result for one fingerprint.
#[derive(Debug, Clone)]
struct CachedNavigation {
    fingerprint: Fingerprint,
    items: Vec<NavigationItem>,
    computed_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    version: u64,
}

/// Navigation menu aggregate root.
#[derive(Debug)]
pub struct NavigationMenu {
    id: String,
    config: MenuConfig,
    roots: Vec<String>,
    index: HashMap<String, Node>,
    version: u64,
    result_ttl: Duration,
    cache: Mutex<HashMap<String, CachedNavigation>>,
    pending_events: Vec<DomainEvent>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl NavigationMenu {
    /// Create an empty menu with a generated id.
    pub fn new(config: MenuConfig) -> Self {
        Self::with_id(Uuid::now_v7().to_string(), config)
    }

    pub fn with_id(id: impl Into<String>, config: MenuConfig) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            config,
            roots: Vec::new(),
            index: HashMap::new(),
            version: 1,
            result_ttl: Duration::seconds(NAVIGATION_CACHE_TTL_SECS),
            cache: Mutex::new(HashMap::new()),
            pending_events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Override the cached-result lifetime.
    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &MenuConfig {
        &self.config
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_active(&self) -> bool {
        self.config.is_active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Number of indexed items (the whole forest).
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.index.contains_key(item_id)
    }

    /// Snapshot of a single item, without children.
    pub fn item(&self, item_id: &str) -> Option<&NavigationItemValue> {
        self.index.get(item_id).map(|n| &n.value)
    }

    /// Materialized copy of an item and its subtree.
    pub fn find_item(&self, item_id: &str) -> Option<NavigationItem> {
        self.index.get(item_id).map(|_| self.materialize(item_id))
    }

    /// Materialized copy of the whole forest, in order.
    pub fn roots(&self) -> Vec<NavigationItem> {
        self.roots.iter().map(|id| self.materialize(id)).collect()
    }

    /// Ids of an item's direct children, in order.
    pub fn child_ids(&self, item_id: &str) -> Option<&[String]> {
        self.index.get(item_id).map(|n| n.children.as_slice())
    }

    /// Path from the outermost ancestor down to `item_id`.
    ///
    /// Empty when the item is unknown.
    pub fn breadcrumbs(&self, item_id: &str) -> Vec<NavigationItemValue> {
        let mut trail = Vec::new();
        let mut cursor = self.index.get(item_id);
        while let Some(node) = cursor {
            trail.push(node.value.clone());
            cursor = node
                .value
                .parent_id
                .as_deref()
                .and_then(|p| self.index.get(p));
        }
        trail.reverse();
        trail
    }

    /// Add an item (and any pre-attached children) to the menu.
    ///
    /// Items with a `parent_id` are attached under that parent, which must
    /// already be indexed; otherwise they become roots. Nothing is modified
    /// if validation fails.
    pub fn add_item(&mut self, item: NavigationItem) -> NavResult<()> {
        self.validate_new_subtree(&item)?;

        let parent_id = item.parent_id().map(str::to_string);
        if let Some(parent_id) = parent_id.as_deref() {
            let parent = self
                .index
                .get(parent_id)
                .ok_or_else(|| NavError::UnknownItem(parent_id.to_string()))?;
            if !parent.value.item_type.can_have_children() {
                return Err(NavError::InvalidNodeType {
                    id: parent_id.to_string(),
                    item_type: parent.value.item_type.as_str().to_string(),
                });
            }
        }

        let before = self.index.len();
        let item_id = self.insert_subtree(item, parent_id.clone());
        let indexed = self.index.len() - before;
        self.attach(&item_id, parent_id.as_deref());

        self.touch();
        self.record(NavigationEvent::ItemAdded {
            item_id,
            parent_id,
            indexed,
        });
        Ok(())
    }

    /// Remove an item and its entire subtree.
    ///
    /// Returns `false` for unknown ids.
    pub fn remove_item(&mut self, item_id: &str) -> bool {
        let Some(node) = self.index.get(item_id) else {
            return false;
        };
        let parent_id = node.value.parent_id.clone();
        self.detach(item_id, parent_id.as_deref());

        let mut removed_ids = Vec::new();
        let mut stack = vec![item_id.to_string()];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.index.remove(&id) {
                stack.extend(node.children);
                removed_ids.push(id);
            }
        }

        self.touch();
        self.record(NavigationEvent::ItemRemoved {
            item_id: item_id.to_string(),
            removed_ids,
        });
        true
    }

    /// Merge a patch into an existing item.
    pub fn update_item(&mut self, item_id: &str, patch: ItemPatch) -> NavResult<()> {
        let node = self
            .index
            .get_mut(item_id)
            .ok_or_else(|| NavError::UnknownItem(item_id.to_string()))?;

        if let Some(item_type) = patch.item_type
            && !item_type.can_have_children()
            && !node.children.is_empty()
        {
            return Err(NavError::InvalidNodeType {
                id: item_id.to_string(),
                item_type: item_type.as_str().to_string(),
            });
        }

        let reorder = patch.order.is_some_and(|o| o != node.value.order);
        node.value.apply(patch);
        let parent_id = node.value.parent_id.clone();

        if reorder {
            self.resort_siblings(parent_id.as_deref());
        }

        self.touch();
        self.record(NavigationEvent::ItemUpdated {
            item_id: item_id.to_string(),
        });
        Ok(())
    }

    /// Re-parent an item (`None` moves it to the root collection).
    pub fn move_item(&mut self, item_id: &str, new_parent: Option<&str>) -> NavResult<()> {
        let node = self
            .index
            .get(item_id)
            .ok_or_else(|| NavError::UnknownItem(item_id.to_string()))?;
        let from_parent = node.value.parent_id.clone();

        if from_parent.as_deref() == new_parent {
            return Ok(());
        }

        if let Some(target) = new_parent {
            let parent = self
                .index
                .get(target)
                .ok_or_else(|| NavError::UnknownItem(target.to_string()))?;
            if !parent.value.item_type.can_have_children() {
                return Err(NavError::InvalidNodeType {
                    id: target.to_string(),
                    item_type: parent.value.item_type.as_str().to_string(),
                });
            }
            if self.is_self_or_descendant(target, item_id) {
                return Err(NavError::ParentConflict {
                    child: item_id.to_string(),
                    current_parent: from_parent.clone().unwrap_or_default(),
                    requested_parent: target.to_string(),
                });
            }
        }

        self.detach(item_id, from_parent.as_deref());
        if let Some(node) = self.index.get_mut(item_id) {
            node.value.parent_id = new_parent.map(str::to_string);
            node.value.updated_at = Utc::now();
        }
        self.attach(item_id, new_parent);

        self.touch();
        self.record(NavigationEvent::ItemMoved {
            item_id: item_id.to_string(),
            from_parent,
            to_parent: new_parent.map(str::to_string),
        });
        Ok(())
    }

    /// Merge configuration changes.
    pub fn update_config(&mut self, patch: MenuConfigPatch) {
        let MenuConfigPatch {
            name,
            scope,
            tenant_id,
            user_id,
            is_default,
            is_active,
            metadata,
        } = patch;

        if let Some(name) = name {
            self.config.name = name;
        }
        if let Some(scope) = scope {
            self.config.scope = scope;
        }
        if let Some(tenant_id) = tenant_id {
            self.config.tenant_id = tenant_id;
        }
        if let Some(user_id) = user_id {
            self.config.user_id = user_id;
        }
        if let Some(is_default) = is_default {
            self.config.is_default = is_default;
        }
        if let Some(is_active) = is_active {
            self.config.is_active = is_active;
        }
        if let Some(metadata) = metadata {
            self.config.metadata.extend(metadata);
        }

        self.touch();
        self.record(NavigationEvent::MenuUpdated);
    }

    pub fn activate(&mut self) {
        self.update_config(MenuConfigPatch {
            is_active: Some(true),
            ..Default::default()
        });
    }

    /// Exclude the menu from default selection. It stays directly queryable.
    pub fn deactivate(&mut self) {
        self.update_config(MenuConfigPatch {
            is_active: Some(false),
            ..Default::default()
        });
    }

    /// Items visible to `ctx`, as an owned forest.
    ///
    /// Only the result cache is touched; the tree itself is never modified.
    pub fn get_navigation_for_user(
        &self,
        ctx: &UserContext,
        options: &FilterOptions,
    ) -> Vec<NavigationItem> {
        self.get_navigation_for_user_at(ctx, options, Utc::now())
    }

    /// [`get_navigation_for_user`](Self::get_navigation_for_user) against an
    /// explicit clock.
    pub fn get_navigation_for_user_at(
        &self,
        ctx: &UserContext,
        options: &FilterOptions,
        now: DateTime<Utc>,
    ) -> Vec<NavigationItem> {
        let fingerprint = Fingerprint::new(ctx, options);

        if let Some(items) = self.cached(&fingerprint, now) {
            debug!(menu = %self.id, user = %ctx.user_id, "navigation cache hit");
            return items;
        }

        let items = self.filter_level(&self.roots, ctx, options, 1);

        debug!(
            menu = %self.id,
            user = %ctx.user_id,
            roots = items.len(),
            version = self.version,
            "navigation computed"
        );

        let key = fingerprint.as_str().to_string();
        self.cache.lock().insert(
            key,
            CachedNavigation {
                fingerprint,
                items: items.clone(),
                computed_at: now,
                expires_at: now + self.result_ttl,
                version: self.version,
            },
        );
        items
    }

    /// Compute without consulting or filling the result cache.
    pub fn compute_navigation(&self, ctx: &UserContext, options: &FilterOptions) -> Vec<NavigationItem> {
        self.filter_level(&self.roots, ctx, options, 1)
    }

    /// Drop cached results for a user (optionally only for one tenant).
    pub fn invalidate_user_cache(&mut self, user_id: &str, tenant_id: Option<&str>) -> usize {
        let removed = {
            let mut cache = self.cache.lock();
            let before = cache.len();
            cache.retain(|_, entry| !entry.fingerprint.matches(user_id, tenant_id));
            before - cache.len()
        };

        debug!(menu = %self.id, user = %user_id, removed, "user navigation cache invalidated");
        self.record(NavigationEvent::CacheInvalidated {
            user_id: user_id.to_string(),
            tenant_id: tenant_id.map(str::to_string),
            removed,
        });
        removed
    }

    /// Drop every cached result.
    pub fn clear_cache(&mut self) -> usize {
        let removed = {
            let mut cache = self.cache.lock();
            let removed = cache.len();
            cache.clear();
            removed
        };
        self.record(NavigationEvent::CacheCleared { removed });
        removed
    }

    /// Drop expired or stale cached results. Emits no event.
    pub fn prune_cache(&self, now: DateTime<Utc>) -> usize {
        let mut cache = self.cache.lock();
        let before = cache.len();
        cache.retain(|_, entry| entry.expires_at > now && entry.version == self.version);
        before - cache.len()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// When the cached result for `ctx` was computed, if it is still valid.
    pub fn cached_at(&self, ctx: &UserContext, options: &FilterOptions) -> Option<DateTime<Utc>> {
        let fingerprint = Fingerprint::new(ctx, options);
        let now = Utc::now();
        self.cache
            .lock()
            .get(fingerprint.as_str())
            .filter(|e| e.expires_at > now && e.version == self.version)
            .map(|e| e.computed_at)
    }

    /// Take the queued domain events.
    ///
    /// The caller owns delivery from here on and must publish before
    /// discarding them.
    pub fn drain_domain_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.pending_events)
    }

    pub fn pending_event_count(&self) -> usize {
        self.pending_events.len()
    }

    fn cached(&self, fingerprint: &Fingerprint, now: DateTime<Utc>) -> Option<Vec<NavigationItem>> {
        let cache = self.cache.lock();
        let entry = cache.get(fingerprint.as_str())?;
        (entry.expires_at > now && entry.version == self.version).then(|| entry.items.clone())
    }

    fn filter_level(
        &self,
        ids: &[String],
        ctx: &UserContext,
        options: &FilterOptions,
        depth: usize,
    ) -> Vec<NavigationItem> {
        if depth > options.max_depth {
            return Vec::new();
        }

        let mut kept = Vec::new();
        for id in ids {
            let Some(node) = self.index.get(id) else {
                continue;
            };
            let value = &node.value;

            if !value.visible && !options.include_hidden {
                continue;
            }
            if value.disabled && !options.include_disabled {
                continue;
            }
            if !value.is_authorized(ctx) {
                continue;
            }

            if node.children.is_empty() {
                kept.push(NavigationItem::new(value.clone()));
                continue;
            }

            let children = self.filter_level(&node.children, ctx, options, depth + 1);
            if !children.is_empty() {
                kept.push(NavigationItem::from_parts(value.clone(), children));
            }
        }
        kept
    }

    fn materialize(&self, item_id: &str) -> NavigationItem {
        match self.index.get(item_id) {
            Some(node) => NavigationItem::from_parts(
                node.value.clone(),
                node.children.iter().map(|c| self.materialize(c)).collect(),
            ),
            None => NavigationItem::new(NavigationItemValue::new(
                item_id,
                "",
                Default::default(),
            )),
        }
    }

    fn validate_new_subtree(&self, item: &NavigationItem) -> NavResult<()> {
        let mut seen = HashSet::new();
        let mut stack = vec![item];
        while let Some(current) = stack.pop() {
            let id = current.id();
            if self.index.contains_key(id) || !seen.insert(id) {
                return Err(NavError::DuplicateItem(id.to_string()));
            }
            if current.has_children() && !current.value().item_type.can_have_children() {
                return Err(NavError::InvalidNodeType {
                    id: id.to_string(),
                    item_type: current.value().item_type.as_str().to_string(),
                });
            }
            stack.extend(current.children());
        }
        Ok(())
    }

    fn insert_subtree(&mut self, item: NavigationItem, parent_id: Option<String>) -> String {
        let (mut value, children) = item.into_parts();
        value.parent_id = parent_id;
        let id = value.id.clone();

        let child_ids: Vec<String> = children
            .into_iter()
            .map(|child| self.insert_subtree(child, Some(id.clone())))
            .collect();

        self.index.insert(
            id.clone(),
            Node {
                value,
                children: child_ids,
            },
        );
        let mut ids = self.take_children(Some(&id));
        self.sort_ids(&mut ids);
        self.put_children(Some(&id), ids);
        id
    }

    fn attach(&mut self, item_id: &str, parent_id: Option<&str>) {
        let mut ids = self.take_children(parent_id);
        ids.push(item_id.to_string());
        self.sort_ids(&mut ids);
        self.put_children(parent_id, ids);
    }

    fn detach(&mut self, item_id: &str, parent_id: Option<&str>) {
        let mut ids = self.take_children(parent_id);
        ids.retain(|id| id != item_id);
        self.put_children(parent_id, ids);
    }

    fn resort_siblings(&mut self, parent_id: Option<&str>) {
        let mut ids = self.take_children(parent_id);
        self.sort_ids(&mut ids);
        self.put_children(parent_id, ids);
    }

    fn take_children(&mut self, parent_id: Option<&str>) -> Vec<String> {
        match parent_id {
            None => std::mem::take(&mut self.roots),
            Some(p) => self
                .index
                .get_mut(p)
                .map(|n| std::mem::take(&mut n.children))
                .unwrap_or_default(),
        }
    }

    fn put_children(&mut self, parent_id: Option<&str>, ids: Vec<String>) {
        match parent_id {
            None => self.roots = ids,
            Some(p) => {
                if let Some(node) = self.index.get_mut(p) {
                    node.children = ids;
                }
            }
        }
    }

    /// Stable sort by `order`.
    fn sort_ids(&self, ids: &mut [String]) {
        ids.sort_by_key(|id| self.index.get(id).map_or(0, |n| n.value.order));
    }

    fn is_self_or_descendant(&self, candidate: &str, ancestor: &str) -> bool {
        let mut cursor = Some(candidate);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.index.get(id).and_then(|n| n.value.parent_id.as_deref());
        }
        false
    }

    /// Bump the version and drop results computed against the old one.
    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
        self.cache.get_mut().clear();
    }

    fn record(&mut self, event: NavigationEvent) {
        self.pending_events
            .push(DomainEvent::new(self.id.clone(), self.version, event));
    }
}
