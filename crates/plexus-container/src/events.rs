//! Per-container table of event-delivery callbacks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use plexus_codec::Value;
use plexus_core::ClientUuid;

/// Callback that delivers one event to one connected client.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Default)]
struct Table {
    handlers: HashMap<ClientUuid, EventHandler>,
    /// Set once the owning container terminates; no handler is accepted after.
    closed: bool,
}

/// Push side of a container's client table.
///
/// Only the owning container registers and removes entries; everyone else
/// can only deliver. Delivery is at-most-once: an event for a client with no
/// registered handler is dropped.
#[derive(Clone, Default)]
pub struct EventEmitter {
    table: Arc<RwLock<Table>>,
}

impl EventEmitter {
    /// Returns `false` once the emitter is closed.
    pub(crate) fn register(&self, client_id: ClientUuid, handler: EventHandler) -> bool {
        let mut table = self.table.write();
        if table.closed {
            return false;
        }
        let _ = table.handlers.insert(client_id, handler);
        true
    }

    pub(crate) fn remove(&self, client_id: &ClientUuid) -> bool {
        self.table.write().handlers.remove(client_id).is_some()
    }

    /// Drop every handler and refuse new ones.
    pub(crate) fn close(&self) {
        let mut table = self.table.write();
        table.closed = true;
        table.handlers.clear();
    }

    /// Deliver `event` to one client. Returns `false` if it is not connected.
    pub fn send_to(&self, client_id: &ClientUuid, event: Value) -> bool {
        let handler = self.table.read().handlers.get(client_id).cloned();
        match handler {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }

    /// Deliver `event` to every connected client. Returns how many received it.
    pub fn broadcast(&self, event: &Value) -> usize {
        let handlers: Vec<EventHandler> = self.table.read().handlers.values().cloned().collect();
        for handler in &handlers {
            handler(event.clone());
        }
        handlers.len()
    }

    pub fn is_connected(&self, client_id: &ClientUuid) -> bool {
        self.table.read().handlers.contains_key(client_id)
    }

    pub fn client_count(&self) -> usize {
        self.table.read().handlers.len()
    }
}
