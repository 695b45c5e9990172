//! Domain events raised by [`NavigationMenu`](super::NavigationMenu).
//!
//! Events are queued on the aggregate while a mutation runs and drained by the
//! caller afterwards, so subscribers only ever observe fully applied changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type names as they appear on the bus.
pub mod event_types {
    pub const ITEM_ADDED: &str = "NavigationItemAdded";
    pub const ITEM_REMOVED: &str = "NavigationItemRemoved";
    pub const ITEM_UPDATED: &str = "NavigationItemUpdated";
    pub const ITEM_MOVED: &str = "NavigationItemMoved";
    pub const MENU_UPDATED: &str = "NavigationMenuUpdated";
    pub const CACHE_INVALIDATED: &str = "NavigationCacheInvalidated";
    pub const CACHE_CLEARED: &str = "NavigationCacheCleared";

    /// Events describing a change to the menu's tree or configuration.
    pub const STRUCTURAL: [&str; 5] = [
        ITEM_ADDED,
        ITEM_REMOVED,
        ITEM_UPDATED,
        ITEM_MOVED,
        MENU_UPDATED,
    ];
}

/// What happened to a menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NavigationEvent {
    ItemAdded {
        item_id: String,
        parent_id: Option<String>,
        /// Number of nodes indexed, including pre-attached children.
        indexed: usize,
    },
    ItemRemoved {
        item_id: String,
        removed_ids: Vec<String>,
    },
    ItemUpdated {
        item_id: String,
    },
    ItemMoved {
        item_id: String,
        from_parent: Option<String>,
        to_parent: Option<String>,
    },
    MenuUpdated,
    CacheInvalidated {
        user_id: String,
        tenant_id: Option<String>,
        removed: usize,
    },
    CacheCleared {
        removed: usize,
    },
}

impl NavigationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            NavigationEvent::ItemAdded { .. } => event_types::ITEM_ADDED,
            NavigationEvent::ItemRemoved { .. } => event_types::ITEM_REMOVED,
            NavigationEvent::ItemUpdated { .. } => event_types::ITEM_UPDATED,
            NavigationEvent::ItemMoved { .. } => event_types::ITEM_MOVED,
            NavigationEvent::MenuUpdated => event_types::MENU_UPDATED,
            NavigationEvent::CacheInvalidated { .. } => event_types::CACHE_INVALIDATED,
            NavigationEvent::CacheCleared { .. } => event_types::CACHE_CLEARED,
        }
    }

    /// Whether every user's computed navigation is affected.
    pub fn is_structural(&self) -> bool {
        event_types::STRUCTURAL.contains(&self.event_type())
    }
}

/// Envelope around a [`NavigationEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: Uuid,
    pub menu_id: String,
    /// Menu version after the change was applied.
    pub menu_version: u64,
    pub occurred_at: DateTime<Utc>,
    pub event: NavigationEvent,
}

impl DomainEvent {
    pub fn new(menu_id: impl Into<String>, menu_version: u64, event: NavigationEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            menu_id: menu_id.into(),
            menu_version,
            occurred_at: Utc::now(),
            event,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }
}
