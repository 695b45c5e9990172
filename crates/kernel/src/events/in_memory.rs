//! In-process event bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, error};

use super::{ALL_EVENTS, BusEvent, EventBus, EventHandler, EventMetadata};

/// Synchronous fan-out bus.
///
/// Handlers run in registration order on the publisher's task. A failing
/// handler is logged and skipped so the rest still see the event.
#[derive(Default)]
pub struct InMemoryEventBus {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    published: AtomicU64,
    handler_failures: AtomicU64,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers that would receive `event_type`, including wildcard ones.
    pub fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        let handlers = self.handlers.read();
        let specific = handlers.get(event_type).into_iter().flatten();
        let wildcard = handlers.get(ALL_EVENTS).into_iter().flatten();
        specific.chain(wildcard).cloned().collect()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn handler_failure_count(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: BusEvent, metadata: EventMetadata) -> Result<()> {
        let event_type = event.event_type();
        let handlers = self.handlers_for(event_type);
        self.published.fetch_add(1, Ordering::Relaxed);

        if handlers.is_empty() {
            debug!(event = %event_type, "no handlers registered for event");
            return Ok(());
        }

        for handler in handlers {
            if let Err(e) = handler.handle(&event, &metadata).await {
                self.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    handler = %handler.name(),
                    event = %event_type,
                    message_id = %metadata.message_id,
                    error = %e,
                    "event handler failed"
                );
            }
        }

        Ok(())
    }

    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        debug!(event = %event_type, handler = %handler.name(), "handler subscribed");
        self.handlers
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }
}

impl std::fmt::Debug for InMemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("InMemoryEventBus")
            .field("event_types", &handlers.keys().collect::<Vec<_>>())
            .field("published", &self.published_count())
            .finish()
    }
}
