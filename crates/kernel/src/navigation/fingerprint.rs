//! Request fingerprints used as navigation cache keys.

use serde_json::json;
use sha2::{Digest, Sha256};

use super::menu::FilterOptions;
use crate::models::UserContext;

/// Displayed tenant, and key segment, for callers with no active tenant.
pub const GLOBAL_TENANT: &str = "global";

/// Marks a real tenant in the key so no tenant name can pose as [`GLOBAL_TENANT`].
const TENANT_MARKER: char = '@';

/// Role component used when the caller has no role.
pub const NO_ROLE: &str = "none";

/// Deterministic description of a navigation request.
///
/// The canonical form is a JSON object with sorted keys and a sorted
/// permission list, so two contexts holding the same identity always produce
/// the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    canonical: String,
    user_id: String,
    tenant_id: Option<String>,
    role: String,
}

impl Fingerprint {
    pub fn new(ctx: &UserContext, options: &FilterOptions) -> Self {
        let tenant_id = ctx.tenant().map(str::to_string);
        let role = ctx.role.map_or(NO_ROLE, |r| r.as_str()).to_string();
        // BTreeSet iteration is already sorted.
        let permissions: Vec<&str> = ctx.permissions.iter().map(|p| p.as_str()).collect();

        let mut parts = json!({
            "user": ctx.user_id,
            "tenant": tenant_id,
            "role": role,
            "permissions": permissions,
        });
        if ctx.system_admin {
            parts["system_admin"] = json!(true);
        }
        if *options != FilterOptions::default() {
            parts["options"] = json!({
                "include_disabled": options.include_disabled,
                "include_hidden": options.include_hidden,
                "max_depth": options.max_depth,
            });
        }

        Self {
            canonical: parts.to_string(),
            user_id: ctx.user_id.clone(),
            tenant_id,
            role,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Tenant for display (`global` when the caller had no tenant).
    pub fn tenant(&self) -> &str {
        self.tenant_id.as_deref().unwrap_or(GLOBAL_TENANT)
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// Hex SHA-256 of the canonical form.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.canonical.as_bytes()))
    }

    /// Whether this fingerprint belongs to `user_id` (and `tenant_id`, when given).
    pub fn matches(&self, user_id: &str, tenant_id: Option<&str>) -> bool {
        self.user_id == user_id
            && tenant_id.is_none_or(|t| self.tenant_id.as_deref() == Some(t))
    }

    /// Shared-cache key for this request against a specific menu version.
    ///
    /// The readable prefix keeps pattern invalidation by user/tenant possible;
    /// the digest keeps keys bounded regardless of permission count.
    pub fn cache_key(&self, menu_id: &str, version: u64) -> String {
        format!(
            "nav:{menu_id}:v{version}:{}:{}:{}",
            self.user_id,
            tenant_key_segment(self.tenant_id()),
            self.digest()
        )
    }

    /// Tags attached to shared-cache entries for this request.
    pub fn tags(&self, menu_id: &str) -> Vec<String> {
        let mut tags = vec![
            "navigation".to_string(),
            format!("menu:{menu_id}"),
            format!("user:{}", self.user_id),
        ];
        if let Some(tenant) = &self.tenant_id {
            tags.push(format!("tenant:{tenant}"));
        }
        tags
    }
}

/// Tenant segment of a shared-cache key.
///
/// Real tenants carry a marker, so a tenant literally named `global` keys
/// apart from callers with no tenant.
pub fn tenant_key_segment(tenant_id: Option<&str>) -> String {
    match tenant_id {
        Some(tenant) => format!("{TENANT_MARKER}{tenant}"),
        None => GLOBAL_TENANT.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{Permission, Role};

    fn perm(p: &str) -> Permission {
        Permission::new(p).unwrap()
    }

    #[test]
    fn permission_order_does_not_matter() {
        let a = UserContext::new("u1").with_permissions([perm("b"), perm("a")]);
        let b = UserContext::new("u1").with_permissions([perm("a"), perm("b")]);
        let opts = FilterOptions::default();
        assert_eq!(Fingerprint::new(&a, &opts), Fingerprint::new(&b, &opts));
    }

    #[test]
    fn defaults_for_missing_tenant_and_role() {
        let fp = Fingerprint::new(&UserContext::new("u1"), &FilterOptions::default());
        assert_eq!(fp.tenant(), GLOBAL_TENANT);
        assert_eq!(fp.tenant_id(), None);
        assert_eq!(fp.role(), NO_ROLE);
        assert!(fp.as_str().contains("\"user\":\"u1\""));
        assert!(fp.as_str().contains("\"tenant\":null"));
    }

    #[test]
    fn tenant_named_global_is_not_the_missing_tenant() {
        let opts = FilterOptions::default();
        let none = Fingerprint::new(&UserContext::new("u1"), &opts);
        let named = Fingerprint::new(&UserContext::new("u1").with_tenant(GLOBAL_TENANT), &opts);

        assert_ne!(none, named);
        assert_eq!(named.tenant(), GLOBAL_TENANT);
        assert_ne!(none.cache_key("main", 1), named.cache_key("main", 1));
        assert!(named.cache_key("main", 1).starts_with("nav:main:v1:u1:@global:"));
        assert!(!none.matches("u1", Some(GLOBAL_TENANT)));
        assert!(named.matches("u1", Some(GLOBAL_TENANT)));
        assert!(!none.tags("main").iter().any(|t| t.starts_with("tenant:")));
    }

    #[test]
    fn identity_changes_change_the_fingerprint() {
        let opts = FilterOptions::default();
        let base = UserContext::new("u1").with_role(Role::Viewer).with_tenant("t1");
        let fp = Fingerprint::new(&base, &opts);

        let other_role = base.clone().with_role(Role::Manager);
        let other_tenant = base.clone().with_tenant("t2");
        let more_perms = base.clone().with_permission(perm("x"));

        assert_ne!(fp, Fingerprint::new(&other_role, &opts));
        assert_ne!(fp, Fingerprint::new(&other_tenant, &opts));
        assert_ne!(fp, Fingerprint::new(&more_perms, &opts));
    }

    #[test]
    fn non_default_options_are_part_of_the_fingerprint() {
        let ctx = UserContext::new("u1");
        let hidden = FilterOptions {
            include_hidden: true,
            ..Default::default()
        };
        assert_ne!(
            Fingerprint::new(&ctx, &FilterOptions::default()),
            Fingerprint::new(&ctx, &hidden)
        );
    }

    #[test]
    fn matches_user_and_optional_tenant() {
        let fp = Fingerprint::new(
            &UserContext::new("u1").with_tenant("t1"),
            &FilterOptions::default(),
        );
        assert!(fp.matches("u1", None));
        assert!(fp.matches("u1", Some("t1")));
        assert!(!fp.matches("u1", Some("t2")));
        assert!(!fp.matches("u2", None));
    }

    #[test]
    fn cache_key_embeds_version_and_user() {
        let fp = Fingerprint::new(&UserContext::new("u1"), &FilterOptions::default());
        let key = fp.cache_key("main", 7);
        assert!(key.starts_with("nav:main:v7:u1:global:"));
        assert_eq!(key.len(), "nav:main:v7:u1:global:".len() + 64);
        assert!(fp.tags("main").contains(&"user:u1".to_string()));

        let scoped = Fingerprint::new(
            &UserContext::new("u1").with_tenant("acme"),
            &FilterOptions::default(),
        );
        assert!(scoped.cache_key("main", 7).starts_with("nav:main:v7:u1:@acme:"));
        assert!(scoped.tags("main").contains(&"tenant:acme".to_string()));
    }
}
