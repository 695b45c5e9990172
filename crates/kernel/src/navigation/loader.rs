//! Menu definitions loaded from YAML or JSON.
//!
//! Items may be nested through `children` or listed flat with `parent_id`
//! pointing at an item defined earlier in the file.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::item::NavigationItem;
use super::menu::{MenuConfig, NavigationMenu};
use crate::error::{NavError, NavResult};

/// A menu as written by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuDefinition {
    pub id: String,

    #[serde(flatten)]
    pub config: MenuConfig,

    #[serde(default)]
    pub items: Vec<NavigationItem>,
}

impl MenuDefinition {
    pub fn from_yaml(source: &str) -> NavResult<Self> {
        serde_yml::from_str(source).map_err(|e| {
            warn!(error = %e, "failed to parse YAML menu definition");
            NavError::InvalidDefinition(e.to_string())
        })
    }

    pub fn from_json(source: &str) -> NavResult<Self> {
        serde_json::from_str(source).map_err(|e| {
            warn!(error = %e, "failed to parse JSON menu definition");
            NavError::InvalidDefinition(e.to_string())
        })
    }

    /// Read a definition file. `.json` files are parsed as JSON, anything
    /// else as YAML.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read menu definition {}", path.display()))?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let definition = if is_json {
            Self::from_json(&source)
        } else {
            Self::from_yaml(&source)
        };
        definition.with_context(|| format!("invalid menu definition {}", path.display()))
    }

    /// Total items, including nested children.
    pub fn item_count(&self) -> usize {
        self.items.iter().map(NavigationItem::subtree_len).sum()
    }

    /// Build the menu. Structural errors from the tree are returned as-is.
    ///
    /// The returned menu has no pending events; loading is not a change.
    pub fn into_menu(self) -> NavResult<NavigationMenu> {
        if self.id.trim().is_empty() {
            return Err(NavError::InvalidDefinition("menu id is empty".into()));
        }
        if self.config.name.trim().is_empty() {
            return Err(NavError::InvalidDefinition(format!(
                "menu {} has no name",
                self.id
            )));
        }

        let mut menu = NavigationMenu::with_id(self.id, self.config);
        for item in self.items {
            let id = item.id().to_string();
            if id.trim().is_empty() {
                return Err(NavError::InvalidDefinition("item id is empty".into()));
            }
            if let Some(parent) = item.parent_id()
                && !menu.contains(parent)
            {
                return Err(NavError::InvalidDefinition(format!(
                    "item {id} references unknown parent {parent}"
                )));
            }
            menu.add_item(item)?;
        }
        menu.drain_domain_events();

        debug!(menu = %menu.id(), items = menu.len(), "menu definition loaded");
        Ok(menu)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::navigation::item::{ItemType, Scope};

    const YAML: &str = r#"
id: main
name: Main navigation
is_default: true
items:
  - id: dashboard
    label: Dashboard
    path: /dashboard
    order: 1
  - id: admin
    label: Administration
    type: group
    order: 2
    permissions: [admin.access]
    children:
      - id: users
        label: Users
        path: /admin/users
        permissions: [users.read]
      - id: sep
        label: ""
        type: divider
  - id: tenant-settings
    label: Tenant settings
    path: /settings
    scope: tenant
    parent_id: admin
"#;

    #[test]
    fn nested_and_flat_items_load() {
        let definition = MenuDefinition::from_yaml(YAML).unwrap();
        assert_eq!(definition.item_count(), 5);

        let menu = definition.into_menu().unwrap();
        assert_eq!(menu.id(), "main");
        assert!(menu.config().is_default);
        assert!(menu.config().is_active);
        assert_eq!(menu.len(), 5);
        assert_eq!(menu.pending_event_count(), 0);

        assert_eq!(menu.item("users").unwrap().parent_id.as_deref(), Some("admin"));
        assert_eq!(menu.item("tenant-settings").unwrap().scope, Scope::Tenant);
        assert_eq!(menu.item("sep").unwrap().item_type, ItemType::Divider);
        assert_eq!(menu.child_ids("admin").unwrap().len(), 3);
    }

    #[test]
    fn json_definitions_load() {
        let json = r#"{
            "id": "side",
            "name": "Sidebar",
            "items": [{ "id": "home", "label": "Home", "path": "/" }]
        }"#;
        let menu = MenuDefinition::from_json(json).unwrap().into_menu().unwrap();
        assert_eq!(menu.len(), 1);
    }

    #[test]
    fn leaf_with_children_is_rejected() {
        let yaml = r#"
id: bad
name: Bad
items:
  - id: sep
    label: ""
    type: divider
    children:
      - id: child
        label: Child
"#;
        let err = MenuDefinition::from_yaml(yaml)
            .unwrap()
            .into_menu()
            .unwrap_err();
        assert!(matches!(err, NavError::InvalidNodeType { id, .. } if id == "sep"));
    }

    #[test]
    fn unknown_parent_and_malformed_input_are_rejected() {
        let yaml = r#"
id: bad
name: Bad
items:
  - id: orphan
    label: Orphan
    parent_id: missing
"#;
        let err = MenuDefinition::from_yaml(yaml)
            .unwrap()
            .into_menu()
            .unwrap_err();
        assert!(matches!(err, NavError::InvalidDefinition(_)));

        assert!(matches!(
            MenuDefinition::from_yaml("id: [unclosed"),
            Err(NavError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let yaml = r#"
id: dup
name: Dup
items:
  - id: a
    label: A
  - id: a
    label: Again
"#;
        let err = MenuDefinition::from_yaml(yaml)
            .unwrap()
            .into_menu()
            .unwrap_err();
        assert!(matches!(err, NavError::DuplicateItem(id) if id == "a"));
    }
}
