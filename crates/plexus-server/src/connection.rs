//! WebSocket client connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use plexus_codec::{encode, Response, WireMode};
use plexus_core::{ClientUuid, ConnectionId, ConnectionInfo};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::error;

/// One frame queued for the socket writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
}

/// Represents a connected WebSocket client.
pub struct ClientConnection {
    /// Unique physical connection ID.
    pub id: ConnectionId,
    /// Logical session carried by this connection.
    pub client_id: ClientUuid,
    /// Identity resolved from the bearer token.
    pub info: ConnectionInfo,
    /// Wire mode fixed at upgrade time.
    pub mode: WireMode,
    tx: mpsc::Sender<Outbound>,
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat check.
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    pub fn new(
        client_id: ClientUuid,
        info: ConnectionInfo,
        mode: WireMode,
        tx: mpsc::Sender<Outbound>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            client_id,
            info,
            mode,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a frame. Returns `false` and counts a drop when the queue is
    /// full or the writer is gone.
    pub fn send(&self, frame: Outbound) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Encode `response` in this connection's wire mode and queue it.
    pub fn send_response(&self, response: &Response) -> bool {
        match encode_frame(response, self.mode) {
            Some(frame) => self.send(frame),
            None => false,
        }
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag for heartbeat.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Encode a response as a frame of the given mode.
pub fn encode_frame(response: &Response, mode: WireMode) -> Option<Outbound> {
    let bytes = match encode(response, mode) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to encode response");
            return None;
        }
    };
    match mode {
        WireMode::Binary => Some(Outbound::Binary(bytes)),
        WireMode::Text => match String::from_utf8(bytes) {
            Ok(text) => Some(Outbound::Text(text)),
            Err(e) => {
                error!(error = %e, "text encoding produced invalid utf-8");
                None
            }
        },
    }
}

/// Live connections, keyed by connection id.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, connection: Arc<ClientConnection>) {
        let _ = self.connections.insert(connection.id.clone(), connection);
    }

    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.remove(id).map(|(_, c)| c)
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Connections currently serving `client_id`.
    pub fn for_client(&self, client_id: &ClientUuid) -> Vec<Arc<ClientConnection>> {
        self.connections
            .iter()
            .filter(|c| &c.client_id == client_id)
            .map(|c| Arc::clone(c.value()))
            .collect()
    }

    pub fn total_dropped(&self) -> u64 {
        self.connections.iter().map(|c| c.drop_count()).sum()
    }
}
