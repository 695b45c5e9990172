//! Navigation items.
//!
//! A [`NavigationItemValue`] is the immutable-by-convention snapshot of one
//! node; a [`NavigationItem`] wraps a snapshot together with its ordered,
//! owned children. Parents are referenced only by id.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{NavError, NavResult};
use crate::models::{Permission, Role, UserContext};

/// Kind of navigation node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    #[default]
    Item,
    Group,
    Divider,
    Header,
    Action,
}

impl ItemType {
    /// Only `item` and `group` nodes may own children.
    pub fn can_have_children(&self) -> bool {
        matches!(self, ItemType::Item | ItemType::Group)
    }

    /// Dividers and headers carry no path.
    pub fn is_navigable(&self) -> bool {
        !matches!(self, ItemType::Divider | ItemType::Header)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Item => "item",
            ItemType::Group => "group",
            ItemType::Divider => "divider",
            ItemType::Header => "header",
            ItemType::Action => "action",
        }
    }
}

/// Organizational level at which an item is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Global,
    Tenant,
    System,
    User,
}

/// Optional badge rendered next to a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub text: String,
    #[serde(default)]
    pub variant: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Snapshot of a single navigation node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationItemValue {
    pub id: String,

    /// Destination path; empty for dividers and headers.
    #[serde(default)]
    pub path: String,

    pub label: String,

    #[serde(rename = "type", default)]
    pub item_type: ItemType,

    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default)]
    pub permissions: Vec<Permission>,

    /// AND (`true`) vs OR (`false`) over `permissions`.
    #[serde(default)]
    pub require_all: bool,

    #[serde(default)]
    pub scope: Scope,

    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub external: bool,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default = "default_true")]
    pub visible: bool,

    #[serde(default)]
    pub badge: Option<Badge>,

    #[serde(default)]
    pub parent_id: Option<String>,

    /// Sort key among siblings (ascending).
    #[serde(default)]
    pub order: i32,

    #[serde(default)]
    pub metadata: BTreeMap<String, JsonValue>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl NavigationItemValue {
    /// Create a visible, enabled, global-scope node.
    pub fn new(id: impl Into<String>, label: impl Into<String>, item_type: ItemType) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            path: String::new(),
            label: label.into(),
            item_type,
            icon: None,
            permissions: Vec::new(),
            require_all: false,
            scope: Scope::Global,
            target: None,
            external: false,
            disabled: false,
            visible: true,
            badge: None,
            parent_id: None,
            order: 0,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Full access check for a caller.
    ///
    /// Hidden and disabled nodes are refused before the system-admin bypass is
    /// considered, so the bypass never reveals them.
    pub fn has_permission(&self, ctx: &UserContext) -> bool {
        self.has_permission_for(
            &ctx.permissions,
            ctx.role,
            ctx.is_system_admin(),
            ctx.tenant(),
        )
    }

    /// Same as [`has_permission`](Self::has_permission) with the identity
    /// given as separate parts.
    pub fn has_permission_for(
        &self,
        user_permissions: &BTreeSet<Permission>,
        user_role: Option<Role>,
        is_system_admin: bool,
        tenant_id: Option<&str>,
    ) -> bool {
        if !self.visible || self.disabled {
            return false;
        }
        self.is_authorized_for(user_permissions, user_role, is_system_admin, tenant_id)
    }

    /// Scope and permission rules only, ignoring `visible`/`disabled`.
    ///
    /// Used by the filtering walk, which applies visibility according to the
    /// caller's filtering options first.
    pub fn is_authorized(&self, ctx: &UserContext) -> bool {
        self.is_authorized_for(
            &ctx.permissions,
            ctx.role,
            ctx.is_system_admin(),
            ctx.tenant(),
        )
    }

    fn is_authorized_for(
        &self,
        user_permissions: &BTreeSet<Permission>,
        user_role: Option<Role>,
        is_system_admin: bool,
        tenant_id: Option<&str>,
    ) -> bool {
        if is_system_admin {
            return true;
        }
        if !self.scope_allows(user_role, tenant_id) {
            return false;
        }
        if self.permissions.is_empty() {
            return true;
        }
        if self.require_all {
            self.permissions.iter().all(|p| user_permissions.contains(p))
        } else {
            self.permissions.iter().any(|p| user_permissions.contains(p))
        }
    }

    fn scope_allows(&self, user_role: Option<Role>, tenant_id: Option<&str>) -> bool {
        match self.scope {
            Scope::Global | Scope::User => true,
            Scope::System => user_role == Some(Role::SuperAdmin),
            Scope::Tenant => {
                tenant_id.is_some_and(|t| !t.is_empty())
                    && user_role.is_some_and(|r| r.administers_tenant())
            }
        }
    }

    /// Merge a patch and refresh `updated_at`.
    ///
    /// `id`, `created_at` and `parent_id` are not patchable.
    pub fn apply(&mut self, patch: ItemPatch) {
        let ItemPatch {
            path,
            label,
            item_type,
            icon,
            permissions,
            require_all,
            scope,
            target,
            external,
            disabled,
            visible,
            badge,
            order,
            metadata,
        } = patch;

        if let Some(path) = path {
            self.path = path;
        }
        if let Some(label) = label {
            self.label = label;
        }
        if let Some(item_type) = item_type {
            self.item_type = item_type;
        }
        if let Some(icon) = icon {
            self.icon = icon;
        }
        if let Some(permissions) = permissions {
            self.permissions = permissions;
        }
        if let Some(require_all) = require_all {
            self.require_all = require_all;
        }
        if let Some(scope) = scope {
            self.scope = scope;
        }
        if let Some(target) = target {
            self.target = target;
        }
        if let Some(external) = external {
            self.external = external;
        }
        if let Some(disabled) = disabled {
            self.disabled = disabled;
        }
        if let Some(visible) = visible {
            self.visible = visible;
        }
        if let Some(badge) = badge {
            self.badge = badge;
        }
        if let Some(order) = order {
            self.order = order;
        }
        if let Some(metadata) = metadata {
            self.metadata.extend(metadata);
        }
        self.updated_at = Utc::now();
    }

    // Builder helpers.

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions = permissions.into_iter().collect();
        self
    }

    pub fn require_all(mut self, require_all: bool) -> Self {
        self.require_all = require_all;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_badge(mut self, badge: Badge) -> Self {
        self.badge = Some(badge);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn external(mut self, target: impl Into<String>) -> Self {
        self.external = true;
        self.target = Some(target.into());
        self
    }
}

/// Partial update for a navigation item.
///
/// Double options (`Option<Option<T>>`) distinguish "leave unchanged" from
/// "clear".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemPatch {
    pub path: Option<String>,
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub item_type: Option<ItemType>,
    pub icon: Option<Option<String>>,
    pub permissions: Option<Vec<Permission>>,
    pub require_all: Option<bool>,
    pub scope: Option<Scope>,
    pub target: Option<Option<String>>,
    pub external: Option<bool>,
    pub disabled: Option<bool>,
    pub visible: Option<bool>,
    pub badge: Option<Option<Badge>>,
    pub order: Option<i32>,
    pub metadata: Option<BTreeMap<String, JsonValue>>,
}

/// A node together with its owned, ordered children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationItem {
    #[serde(flatten)]
    value: NavigationItemValue,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<NavigationItem>,
}

impl NavigationItem {
    pub fn new(value: NavigationItemValue) -> Self {
        Self {
            value,
            children: Vec::new(),
        }
    }

    pub(crate) fn from_parts(value: NavigationItemValue, children: Vec<NavigationItem>) -> Self {
        Self { value, children }
    }

    pub fn into_parts(self) -> (NavigationItemValue, Vec<NavigationItem>) {
        (self.value, self.children)
    }

    pub fn id(&self) -> &str {
        &self.value.id
    }

    pub fn value(&self) -> &NavigationItemValue {
        &self.value
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.value.parent_id.as_deref()
    }

    pub fn children(&self) -> &[NavigationItem] {
        &self.children
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Attach a child and keep children ordered by `order`.
    ///
    /// The sort is stable, so equal `order` values keep insertion order.
    pub fn add_child(&mut self, mut child: NavigationItem) -> NavResult<()> {
        if !self.value.item_type.can_have_children() {
            return Err(NavError::InvalidNodeType {
                id: self.value.id.clone(),
                item_type: self.value.item_type.as_str().to_string(),
            });
        }
        if let Some(current) = child.parent_id()
            && current != self.id()
        {
            return Err(NavError::ParentConflict {
                child: child.id().to_string(),
                current_parent: current.to_string(),
                requested_parent: self.id().to_string(),
            });
        }

        child.value.parent_id = Some(self.value.id.clone());
        self.children.push(child);
        self.sort_children();
        Ok(())
    }

    /// Detach a direct child, clearing its parent link.
    pub fn take_child(&mut self, child_id: &str) -> Option<NavigationItem> {
        let index = self.children.iter().position(|c| c.id() == child_id)?;
        let mut child = self.children.remove(index);
        child.value.parent_id = None;
        Some(child)
    }

    /// Returns whether a direct child with that id was found and detached.
    pub fn remove_child(&mut self, child_id: &str) -> bool {
        self.take_child(child_id).is_some()
    }

    pub fn has_permission(&self, ctx: &UserContext) -> bool {
        self.value.has_permission(ctx)
    }

    pub fn has_permission_for(
        &self,
        user_permissions: &BTreeSet<Permission>,
        user_role: Option<Role>,
        is_system_admin: bool,
        tenant_id: Option<&str>,
    ) -> bool {
        self.value
            .has_permission_for(user_permissions, user_role, is_system_admin, tenant_id)
    }

    /// Merge a patch into this node.
    ///
    /// Turning a node that owns children into a leaf-only type is refused.
    pub fn update(&mut self, patch: ItemPatch) -> NavResult<()> {
        if let Some(item_type) = patch.item_type
            && !item_type.can_have_children()
            && self.has_children()
        {
            return Err(NavError::InvalidNodeType {
                id: self.value.id.clone(),
                item_type: item_type.as_str().to_string(),
            });
        }
        self.value.apply(patch);
        Ok(())
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(NavigationItem::subtree_len).sum::<usize>()
    }

    /// Depth-first search of this subtree.
    pub fn find(&self, id: &str) -> Option<&NavigationItem> {
        if self.id() == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    fn sort_children(&mut self) {
        self.children.sort_by_key(|c| c.value.order);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn perm(p: &str) -> Permission {
        Permission::new(p).unwrap()
    }

    fn item(id: &str) -> NavigationItemValue {
        NavigationItemValue::new(id, id, ItemType::Item).with_path(id)
    }

    #[test]
    fn add_child_sorts_by_order_stably() {
        let mut parent = NavigationItem::new(NavigationItemValue::new("g", "G", ItemType::Group));
        parent
            .add_child(NavigationItem::new(item("/b").with_order(2)))
            .unwrap();
        parent
            .add_child(NavigationItem::new(item("/a").with_order(1)))
            .unwrap();
        parent
            .add_child(NavigationItem::new(item("/c").with_order(2)))
            .unwrap();

        let ids: Vec<_> = parent.children().iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["/a", "/b", "/c"]);
        assert!(parent.children().iter().all(|c| c.parent_id() == Some("g")));
    }

    #[test]
    fn leaf_types_refuse_children() {
        for item_type in [ItemType::Divider, ItemType::Header, ItemType::Action] {
            let mut leaf = NavigationItem::new(NavigationItemValue::new("x", "X", item_type));
            let err = leaf.add_child(NavigationItem::new(item("/y"))).unwrap_err();
            assert!(matches!(err, NavError::InvalidNodeType { .. }));
        }
    }

    #[test]
    fn reparenting_requires_detach() {
        let mut a = NavigationItem::new(item("/a"));
        let mut b = NavigationItem::new(item("/b"));
        a.add_child(NavigationItem::new(item("/c"))).unwrap();

        let child = a.children()[0].clone();
        let err = b.add_child(child).unwrap_err();
        assert!(matches!(err, NavError::ParentConflict { .. }));

        let detached = a.take_child("/c").unwrap();
        assert_eq!(detached.parent_id(), None);
        b.add_child(detached).unwrap();
        assert_eq!(b.children()[0].parent_id(), Some("/b"));
    }

    #[test]
    fn remove_child_reports_presence() {
        let mut a = NavigationItem::new(item("/a"));
        a.add_child(NavigationItem::new(item("/a/x"))).unwrap();
        assert!(a.remove_child("/a/x"));
        assert!(!a.remove_child("/a/x"));
        assert!(!a.has_children());
    }

    #[test]
    fn and_or_permission_semantics() {
        let any = item("/r").with_permissions([perm("a"), perm("b")]);
        let all = any.clone().require_all(true);

        let only_a = UserContext::new("u").with_permission(perm("a"));
        let both = only_a.clone().with_permission(perm("b"));
        let none = UserContext::new("u");

        assert!(any.has_permission(&only_a));
        assert!(any.has_permission(&both));
        assert!(!any.has_permission(&none));

        assert!(!all.has_permission(&only_a));
        assert!(all.has_permission(&both));
    }

    #[test]
    fn scope_rules() {
        let tenant = item("/billing").with_scope(Scope::Tenant);
        let system = item("/ops").with_scope(Scope::System);
        let user = item("/me").with_scope(Scope::User);

        let viewer = UserContext::new("u").with_role(Role::Viewer);
        let tenant_admin_no_tenant = UserContext::new("u").with_role(Role::TenantAdmin);
        let tenant_admin = tenant_admin_no_tenant.clone().with_tenant("t1");
        let viewer_in_tenant = viewer.clone().with_tenant("t1");

        assert!(!tenant.has_permission(&viewer));
        assert!(!tenant.has_permission(&viewer_in_tenant));
        assert!(!tenant.has_permission(&tenant_admin_no_tenant));
        assert!(tenant.has_permission(&tenant_admin));

        assert!(!system.has_permission(&tenant_admin));
        assert!(user.has_permission(&viewer));
    }

    #[test]
    fn system_admin_bypass_respects_visibility() {
        let locked = item("/x")
            .with_scope(Scope::System)
            .with_permissions([perm("nobody")])
            .require_all(true);
        let admin = UserContext::new("root").with_system_admin(true);

        assert!(locked.has_permission(&admin));
        assert!(!locked.clone().hidden().has_permission(&admin));
        assert!(!locked.clone().disabled().has_permission(&admin));
        assert!(locked.hidden().is_authorized(&admin));
    }

    #[test]
    fn update_keeps_identity_and_refreshes_timestamp() {
        let mut node = NavigationItem::new(item("/a"));
        let created = node.value().created_at;
        let before = node.value().updated_at;

        node.update(ItemPatch {
            label: Some("Alpha".into()),
            order: Some(5),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(node.id(), "/a");
        assert_eq!(node.value().label, "Alpha");
        assert_eq!(node.value().order, 5);
        assert_eq!(node.value().created_at, created);
        assert!(node.value().updated_at >= before);
    }

    #[test]
    fn update_refuses_leaf_type_with_children() {
        let mut node = NavigationItem::new(item("/a"));
        node.add_child(NavigationItem::new(item("/a/b"))).unwrap();
        let err = node
            .update(ItemPatch {
                item_type: Some(ItemType::Divider),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, NavError::InvalidNodeType { .. }));
    }

    #[test]
    fn serde_uses_type_field_and_defaults() {
        let value: NavigationItemValue =
            serde_json::from_str(r#"{"id":"h","label":"Tools","type":"header"}"#).unwrap();
        assert_eq!(value.item_type, ItemType::Header);
        assert!(value.visible);
        assert_eq!(value.scope, Scope::Global);
        assert!(!value.item_type.is_navigable());
    }
}
