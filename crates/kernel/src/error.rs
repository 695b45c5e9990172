//! Navigation error types.

use thiserror::Error;

/// Errors raised by navigation write paths and the cache engine.
///
/// Read paths report missing menus or items as `Option`/`bool` results; only
/// operations that assume the target exists return `UnknownMenu`/`UnknownItem`.
#[derive(Debug, Error)]
pub enum NavError {
    #[error("item {id} of type {item_type} cannot hold children")]
    InvalidNodeType { id: String, item_type: String },

    #[error("item {child} already belongs to {current_parent}, cannot attach to {requested_parent}")]
    ParentConflict {
        child: String,
        current_parent: String,
        requested_parent: String,
    },

    #[error("duplicate navigation item: {0}")]
    DuplicateItem(String),

    #[error("duplicate menu: {0}")]
    DuplicateMenu(String),

    #[error("unknown menu: {0}")]
    UnknownMenu(String),

    #[error("unknown navigation item: {0}")]
    UnknownItem(String),

    #[error("cache backend unavailable: {0}")]
    CacheBackendUnavailable(String),

    #[error("invalid menu definition: {0}")]
    InvalidDefinition(String),

    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("invalid permission: {0:?}")]
    InvalidPermission(String),

    #[error("serialization error")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using NavError.
pub type NavResult<T> = Result<T, NavError>;
