//! Event bus abstraction.
//!
//! Publishers hand [`BusEvent`]s to an [`EventBus`]; subscribers register an
//! [`EventHandler`] per event type. Delivery is at-least-once, so handlers
//! must be idempotent.

mod in_memory;

pub use in_memory::InMemoryEventBus;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Role;
use crate::navigation::DomainEvent;

/// Subscribe to every event type.
pub const ALL_EVENTS: &str = "*";

/// Identity event type names as they appear on the bus.
pub mod identity_event_types {
    pub const USER_PERMISSIONS_CHANGED: &str = "UserPermissionsChanged";
    pub const TENANT_SWITCHED: &str = "TenantSwitched";
    pub const ROLE_CHANGED: &str = "RoleChanged";
}

/// A change to who a user is, raised by the identity system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentityEvent {
    UserPermissionsChanged {
        user_id: String,
        tenant_id: Option<String>,
    },
    TenantSwitched {
        user_id: String,
        from_tenant: Option<String>,
        to_tenant: Option<String>,
    },
    RoleChanged {
        user_id: String,
        tenant_id: Option<String>,
        role: Option<Role>,
    },
}

impl IdentityEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            IdentityEvent::UserPermissionsChanged { .. } => {
                identity_event_types::USER_PERMISSIONS_CHANGED
            }
            IdentityEvent::TenantSwitched { .. } => identity_event_types::TENANT_SWITCHED,
            IdentityEvent::RoleChanged { .. } => identity_event_types::ROLE_CHANGED,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            IdentityEvent::UserPermissionsChanged { user_id, .. }
            | IdentityEvent::TenantSwitched { user_id, .. }
            | IdentityEvent::RoleChanged { user_id, .. } => user_id,
        }
    }

    /// Tenant whose cached results are affected; `None` means every tenant.
    ///
    /// A tenant switch touches results cached under both the old and the new
    /// tenant, so it widens to the whole user.
    pub fn affected_tenant(&self) -> Option<&str> {
        match self {
            IdentityEvent::UserPermissionsChanged { tenant_id, .. }
            | IdentityEvent::RoleChanged { tenant_id, .. } => tenant_id.as_deref(),
            IdentityEvent::TenantSwitched { .. } => None,
        }
    }
}

/// Anything carried by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "event", rename_all = "snake_case")]
pub enum BusEvent {
    Navigation(DomainEvent),
    Identity(IdentityEvent),
}

impl BusEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            BusEvent::Navigation(event) => event.event_type(),
            BusEvent::Identity(event) => event.event_type(),
        }
    }
}

impl From<DomainEvent> for BusEvent {
    fn from(event: DomainEvent) -> Self {
        BusEvent::Navigation(event)
    }
}

impl From<IdentityEvent> for BusEvent {
    fn from(event: IdentityEvent) -> Self {
        BusEvent::Identity(event)
    }
}

/// Delivery metadata attached by the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub message_id: Uuid,
    pub correlation_id: Option<Uuid>,
    /// Component that published the event.
    pub publisher: String,
    pub published_at: DateTime<Utc>,
}

impl EventMetadata {
    pub fn new(publisher: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::now_v7(),
            correlation_id: None,
            publisher: publisher.into(),
            published_at: Utc::now(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// A subscriber.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &str;

    async fn handle(&self, event: &BusEvent, metadata: &EventMetadata) -> Result<()>;
}

/// Publish/subscribe transport.
///
/// `publish` errors mean the bus could not accept the event. Handler failures
/// are the bus's problem to log; they are never returned to the publisher.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: BusEvent, metadata: EventMetadata) -> Result<()>;

    /// Register `handler` for `event_type`, or for everything with [`ALL_EVENTS`].
    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>);
}
