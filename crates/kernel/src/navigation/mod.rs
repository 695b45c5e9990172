//! Permission-scoped navigation.
//!
//! Menus own trees of items, filter them per user, and queue domain events
//! describing every change.

pub mod events;
pub mod fingerprint;
pub mod item;
pub mod loader;
pub mod menu;
pub mod repository;
pub mod service;

pub use events::{DomainEvent, NavigationEvent, event_types};
pub use fingerprint::Fingerprint;
pub use item::{Badge, ItemPatch, ItemType, NavigationItem, NavigationItemValue, Scope};
pub use loader::MenuDefinition;
pub use menu::{FilterOptions, MenuConfig, MenuConfigPatch, NavigationMenu};
pub use repository::{MenuRepository, SharedMenu};
pub use service::NavigationService;
