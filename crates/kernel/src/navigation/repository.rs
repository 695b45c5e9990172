//! In-process menu repository.
//!
//! Owns every [`NavigationMenu`] behind its own lock so readers of different
//! menus never contend. Deleting a menu is the repository's job, not the
//! aggregate's.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::item::Scope;
use super::menu::NavigationMenu;
use crate::error::{NavError, NavResult};

/// A menu shared between the service, the invalidator, and callers.
pub type SharedMenu = Arc<RwLock<NavigationMenu>>;

/// Registry of menus keyed by id.
#[derive(Debug, Default)]
pub struct MenuRepository {
    menus: DashMap<String, SharedMenu>,
}

impl MenuRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a menu. Fails if the id is taken.
    pub fn insert(&self, menu: NavigationMenu) -> NavResult<SharedMenu> {
        let id = menu.id().to_string();
        let shared = Arc::new(RwLock::new(menu));
        match self.menus.entry(id.clone()) {
            Entry::Occupied(_) => Err(NavError::DuplicateMenu(id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&shared));
                info!(menu = %id, "menu registered");
                Ok(shared)
            }
        }
    }

    pub fn get(&self, menu_id: &str) -> Option<SharedMenu> {
        self.menus.get(menu_id).map(|m| Arc::clone(m.value()))
    }

    /// Look up a menu a write path expects to exist.
    pub fn require(&self, menu_id: &str) -> NavResult<SharedMenu> {
        self.get(menu_id)
            .ok_or_else(|| NavError::UnknownMenu(menu_id.to_string()))
    }

    /// Delete a menu. Returns `false` for unknown ids.
    pub fn remove(&self, menu_id: &str) -> bool {
        let removed = self.menus.remove(menu_id).is_some();
        if removed {
            info!(menu = %menu_id, "menu removed");
        }
        removed
    }

    pub fn ids(&self) -> Vec<String> {
        self.menus.iter().map(|m| m.key().clone()).collect()
    }

    /// Snapshot of every registered menu.
    pub fn all(&self) -> Vec<SharedMenu> {
        self.menus.iter().map(|m| Arc::clone(m.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.menus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.menus.is_empty()
    }

    /// Pick the default menu for a tenant.
    ///
    /// Only active menus flagged `is_default` are considered. A menu bound to
    /// the tenant wins over a global one.
    pub fn find_default(&self, tenant_id: Option<&str>) -> Option<SharedMenu> {
        let mut global = None;

        for entry in self.menus.iter() {
            let menu = entry.value().read();
            let config = menu.config();
            if !config.is_active || !config.is_default {
                continue;
            }
            match (config.tenant_id.as_deref(), tenant_id) {
                (Some(owner), Some(tenant)) if owner == tenant => {
                    debug!(menu = %menu.id(), tenant = %tenant, "tenant default menu selected");
                    return Some(Arc::clone(entry.value()));
                }
                (None, _) if config.scope == Scope::Global && global.is_none() => {
                    global = Some(Arc::clone(entry.value()));
                }
                _ => {}
            }
        }

        global
    }
}
