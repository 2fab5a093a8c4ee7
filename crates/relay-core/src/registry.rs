//! Process-local registries: live connections and negotiated symmetric keys.
//!
//! Both are process-scoped only — the shared store never holds a socket
//! handle or key material, so a member on another instance is reached
//! purely through the pub/sub fabric.

use dashmap::DashMap;
use tokio::sync::mpsc;

/// Bound applied to each connection's outbound channel.
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// A frame queued for delivery to one connection's dedicated writer task.
///
/// Carries its own framing: JSON control/status frames go out as text,
/// encrypted signal ciphertext goes out as binary, so the writer task
/// never has to guess or lossily re-encode raw bytes as UTF-8.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// A JSON frame, sent as a WebSocket text frame.
    Text(Vec<u8>),
    /// Opaque ciphertext, sent as a WebSocket binary frame.
    Binary(Vec<u8>),
}

impl OutboundFrame {
    /// The frame's raw bytes, regardless of which framing it carries.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            OutboundFrame::Text(bytes) | OutboundFrame::Binary(bytes) => bytes,
        }
    }
}

/// A frame queued for delivery to one connection's dedicated writer task.
pub type OutboundSender = mpsc::Sender<OutboundFrame>;

/// `clientId -> outbound sender`, guarded by a sharded concurrent map.
///
/// A socket's sender must be inserted before its id is written into a
/// room's `:members` set, and removed before the id is deleted from it,
/// so any member id the broadcaster observes resolves to either a live
/// local sender or (on another instance) a pub/sub recipient.
#[derive(Default)]
pub struct ConnectionRegistry {
    senders: DashMap<String, OutboundSender>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client_id`'s outbound sender.
    pub fn insert(&self, client_id: impl Into<String>, sender: OutboundSender) {
        self.senders.insert(client_id.into(), sender);
    }

    /// Look up a client's outbound sender.
    pub fn get(&self, client_id: &str) -> Option<OutboundSender> {
        self.senders.get(client_id).map(|entry| entry.value().clone())
    }

    /// Remove a client's outbound sender, dropping it and ending its writer task.
    pub fn remove(&self, client_id: &str) {
        self.senders.remove(client_id);
    }

    /// Number of live connections on this process.
    pub fn len(&self) -> usize {
        self.senders.len()
    }
}

/// `roomKey -> (clientId -> 32-byte symmetric key)`, guarded by a sharded
/// concurrent map. Lifetime is strictly local to this process.
#[derive(Default)]
pub struct KeyRegistry {
    rooms: DashMap<String, DashMap<String, [u8; 32]>>,
}

impl KeyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `client_id`'s symmetric key for `room_key`.
    pub fn set(&self, room_key: &str, client_id: &str, key: [u8; 32]) {
        self.rooms
            .entry(room_key.to_string())
            .or_default()
            .insert(client_id.to_string(), key);
    }

    /// Fetch `client_id`'s symmetric key for `room_key`, if present.
    pub fn get(&self, room_key: &str, client_id: &str) -> Option<[u8; 32]> {
        self.rooms.get(room_key)?.get(client_id).map(|entry| *entry.value())
    }

    /// Remove `client_id` from `room_key`; drops the room entry entirely
    /// once its last client is removed.
    pub fn remove_client(&self, room_key: &str, client_id: &str) {
        let Some(clients) = self.rooms.get(room_key) else {
            return;
        };
        clients.remove(client_id);
        let now_empty = clients.is_empty();
        drop(clients);
        if now_empty {
            self.rooms.remove(room_key);
        }
    }

    /// Snapshot of client ids currently holding a key for `room_key`.
    pub fn clients_in_room(&self, room_key: &str) -> Vec<String> {
        match self.rooms.get(room_key) {
            Some(clients) => clients.iter().map(|entry| entry.key().clone()).collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_registry_insert_get_remove() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(1);
        registry.insert("alice", tx);
        assert!(registry.get("alice").is_some());
        assert_eq!(registry.len(), 1);
        registry.remove("alice");
        assert!(registry.get("alice").is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn key_registry_drops_room_when_empty() {
        let registry = KeyRegistry::new();
        registry.set("room:foo", "alice", [1u8; 32]);
        registry.set("room:foo", "bob", [2u8; 32]);
        assert_eq!(registry.clients_in_room("room:foo").len(), 2);

        registry.remove_client("room:foo", "alice");
        assert_eq!(registry.clients_in_room("room:foo"), vec!["bob".to_string()]);

        registry.remove_client("room:foo", "bob");
        assert!(registry.clients_in_room("room:foo").is_empty());
        assert!(registry.get("room:foo", "bob").is_none());
    }
}
