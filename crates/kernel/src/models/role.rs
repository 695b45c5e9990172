//! Role and permission values supplied by the identity provider.
//!
//! Both are validated once when they cross into the navigation layer; the
//! rest of the crate works with the typed values only.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{NavError, NavResult};

/// Well-known role names.
pub mod well_known {
    pub const SUPER_ADMIN: &str = "super_admin";
    pub const TENANT_ADMIN: &str = "tenant_admin";
    pub const MANAGER: &str = "manager";
    pub const VIEWER: &str = "viewer";
}

/// Role assigned to a user by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    TenantAdmin,
    Manager,
    Viewer,
}

impl Role {
    /// Canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => well_known::SUPER_ADMIN,
            Role::TenantAdmin => well_known::TENANT_ADMIN,
            Role::Manager => well_known::MANAGER,
            Role::Viewer => well_known::VIEWER,
        }
    }

    /// Whether the role may see tenant-scoped navigation.
    pub fn administers_tenant(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::TenantAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = NavError;

    fn from_str(s: &str) -> NavResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            well_known::SUPER_ADMIN => Ok(Role::SuperAdmin),
            well_known::TENANT_ADMIN => Ok(Role::TenantAdmin),
            well_known::MANAGER => Ok(Role::Manager),
            well_known::VIEWER => Ok(Role::Viewer),
            _ => Err(NavError::InvalidRole(s.to_string())),
        }
    }
}

/// Opaque permission tag (e.g. `billing:read`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission(String);

impl Permission {
    /// Validate and wrap a permission tag.
    ///
    /// Tags must be non-empty and free of whitespace.
    pub fn new(value: impl Into<String>) -> NavResult<Self> {
        let value = value.into();
        if value.is_empty() || value.chars().any(char::is_whitespace) {
            return Err(NavError::InvalidPermission(value));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Permission {
    type Err = NavError;

    fn from_str(s: &str) -> NavResult<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Permission {
    type Error = NavError;

    fn try_from(value: String) -> NavResult<Self> {
        Self::new(value)
    }
}

impl From<Permission> for String {
    fn from(permission: Permission) -> Self {
        permission.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_wire_names() {
        assert_eq!("super_admin".parse::<Role>().unwrap(), Role::SuperAdmin);
        assert_eq!(" Tenant_Admin ".parse::<Role>().unwrap(), Role::TenantAdmin);
        assert_eq!("viewer".parse::<Role>().unwrap(), Role::Viewer);
        assert!(matches!(
            "owner".parse::<Role>(),
            Err(NavError::InvalidRole(r)) if r == "owner"
        ));
    }

    #[test]
    fn role_serde_uses_snake_case() {
        let json = serde_json::to_string(&Role::TenantAdmin).unwrap();
        assert_eq!(json, "\"tenant_admin\"");
        let role: Role = serde_json::from_str("\"manager\"").unwrap();
        assert_eq!(role, Role::Manager);
    }

    #[test]
    fn only_admins_administer_tenants() {
        assert!(Role::SuperAdmin.administers_tenant());
        assert!(Role::TenantAdmin.administers_tenant());
        assert!(!Role::Manager.administers_tenant());
        assert!(!Role::Viewer.administers_tenant());
    }

    #[test]
    fn permission_rejects_blank_and_whitespace() {
        assert!(Permission::new("billing:read").is_ok());
        assert!(Permission::new("").is_err());
        assert!(Permission::new("billing read").is_err());
        assert!(serde_json::from_str::<Permission>("\"\"").is_err());
    }
}
