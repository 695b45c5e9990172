//! Identity of the user a navigation tree is rendered for.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::role::{Permission, Role};

/// Caller identity as seen by the navigation layer.
///
/// Permissions are held in a `BTreeSet` so iteration order is stable, which
/// the request fingerprint relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,

    #[serde(default)]
    pub permissions: BTreeSet<Permission>,

    #[serde(default)]
    pub role: Option<Role>,

    /// Active tenant. Empty strings are normalized to `None`.
    #[serde(default)]
    pub tenant_id: Option<String>,

    /// Explicit system-admin flag for callers that are not `super_admin`.
    #[serde(default)]
    pub system_admin: bool,
}

impl UserContext {
    /// Create a context with no role, tenant, or permissions.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            permissions: BTreeSet::new(),
            role: None,
            tenant_id: None,
            system_admin: false,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        let tenant_id = tenant_id.into();
        self.tenant_id = (!tenant_id.is_empty()).then_some(tenant_id);
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions.extend(permissions);
        self
    }

    pub fn with_system_admin(mut self, system_admin: bool) -> Self {
        self.system_admin = system_admin;
        self
    }

    /// `super_admin` always counts as a system admin.
    pub fn is_system_admin(&self) -> bool {
        self.system_admin || self.role == Some(Role::SuperAdmin)
    }

    /// Active tenant, treating an empty id as no tenant.
    pub fn tenant(&self) -> Option<&str> {
        self.tenant_id.as_deref().filter(|t| !t.is_empty())
    }

    pub fn has_permission(&self, permission: &Permission) -> bool {
        self.permissions.contains(permission)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn super_admin_implies_system_admin() {
        let ctx = UserContext::new("u1").with_role(Role::SuperAdmin);
        assert!(ctx.is_system_admin());

        let ctx = UserContext::new("u1").with_role(Role::Manager);
        assert!(!ctx.is_system_admin());
        assert!(ctx.with_system_admin(true).is_system_admin());
    }

    #[test]
    fn empty_tenant_is_no_tenant() {
        let ctx = UserContext::new("u1").with_tenant("");
        assert_eq!(ctx.tenant(), None);

        let ctx = UserContext::new("u1").with_tenant("t1");
        assert_eq!(ctx.tenant(), Some("t1"));
    }

    #[test]
    fn deserializes_with_defaults() {
        let ctx: UserContext =
            serde_json::from_str(r#"{"user_id":"u1","permissions":["a:read"]}"#).unwrap();
        assert_eq!(ctx.user_id, "u1");
        assert!(ctx.has_permission(&Permission::new("a:read").unwrap()));
        assert_eq!(ctx.role, None);
    }
}
