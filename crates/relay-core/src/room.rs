//! Room lifecycle and membership state machine.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::envelope::build_pubsub_envelope;
use crate::error::{CoreError, Result};
use crate::registry::{ConnectionRegistry, KeyRegistry, OutboundFrame};
use crate::store::Store;
use crate::wire::SignalType;

/// Suffixes appended to `room:<keyPhrase>` in the shared store (§3).
const SUFFIX_ID: &str = ":id";
const SUFFIX_OWNER: &str = ":owner";
const SUFFIX_LIMIT: &str = ":limit";
const SUFFIX_MEMBERS: &str = ":members";
const SUFFIX_PENDING: &str = ":pending_signals";
const SUFFIX_CALL_END_IDS: &str = ":call_end_ids";

const ALL_SUFFIXES: [&str; 6] = [
    SUFFIX_ID,
    SUFFIX_OWNER,
    SUFFIX_LIMIT,
    SUFFIX_MEMBERS,
    SUFFIX_PENDING,
    SUFFIX_CALL_END_IDS,
];

/// Outcome of a successful [`RoomCoordinator::join`].
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Opaque, non-unique display id for the room (§9 Open Question #2).
    pub room_id: String,
    /// Whether this client created the room.
    pub is_initiator: bool,
}

/// Coordinates room membership, fan-out, and the pending-signal queue
/// across one process. Talks to the shared store for cross-instance
/// state and to the process-local registries for local delivery.
pub struct RoomCoordinator {
    store: Arc<Store>,
    connections: Arc<ConnectionRegistry>,
    keys: Arc<KeyRegistry>,
    room_prefix: String,
    room_ttl: Duration,
    default_limit: u32,
}

impl RoomCoordinator {
    /// Build a coordinator over the given store and registries.
    pub fn new(
        store: Arc<Store>,
        connections: Arc<ConnectionRegistry>,
        keys: Arc<KeyRegistry>,
        room_prefix: impl Into<String>,
        room_ttl: Duration,
        default_limit: u32,
    ) -> Self {
        Self {
            store,
            connections,
            keys,
            room_prefix: room_prefix.into(),
            room_ttl,
            default_limit,
        }
    }

    /// The room-scoped key prefix for a client-chosen `keyPhrase`.
    pub fn room_key(&self, key_phrase: &str) -> String {
        format!("{}:{}", self.room_prefix, key_phrase)
    }

    fn suffixed(room_key: &str, suffix: &str) -> String {
        format!("{room_key}{suffix}")
    }

    /// Resolve or create the room named by `key_phrase`, enforcing
    /// capacity on join (§9 Open Question #5).
    pub async fn join(
        &self,
        room_key: &str,
        client_id: &str,
        requested_limit: Option<u32>,
    ) -> Result<JoinOutcome> {
        let id_key = Self::suffixed(room_key, SUFFIX_ID);
        let existing = self.store.get(&id_key).await?;

        let (room_id, is_initiator) = match existing {
            None => {
                let room_id = format!("room-{}", unix_seconds() % 10_000);
                let limit = requested_limit.unwrap_or(self.default_limit);
                self.store.set(&id_key, room_id.as_bytes(), self.room_ttl).await?;
                self.store
                    .set(&Self::suffixed(room_key, SUFFIX_OWNER), client_id.as_bytes(), self.room_ttl)
                    .await?;
                self.store
                    .set(
                        &Self::suffixed(room_key, SUFFIX_LIMIT),
                        limit.to_string().as_bytes(),
                        self.room_ttl,
                    )
                    .await?;
                (room_id, true)
            }
            Some(bytes) => {
                let room_id = String::from_utf8_lossy(&bytes).into_owned();
                let limit = self.limit(room_key).await?;
                let member_count = self.member_count(room_key).await?;
                if member_count >= limit {
                    return Err(CoreError::BadInput("room full".into()));
                }
                (room_id, false)
            }
        };

        let members_key = Self::suffixed(room_key, SUFFIX_MEMBERS);
        self.store.sadd(&members_key, client_id).await?;
        self.store.expire(&members_key, self.room_ttl).await?;

        Ok(JoinOutcome { room_id, is_initiator })
    }

    /// Current `:limit`, falling back to the configured default if unset
    /// or unparseable.
    pub async fn limit(&self, room_key: &str) -> Result<u32> {
        match self.store.get(&Self::suffixed(room_key, SUFFIX_LIMIT)).await? {
            Some(bytes) => Ok(String::from_utf8_lossy(&bytes).parse().unwrap_or(self.default_limit)),
            None => Ok(self.default_limit),
        }
    }

    /// Overwrite `:limit`, refreshing its TTL.
    pub async fn set_limit(&self, room_key: &str, limit: u32) -> Result<()> {
        self.store
            .set(&Self::suffixed(room_key, SUFFIX_LIMIT), limit.to_string().as_bytes(), self.room_ttl)
            .await
    }

    /// The client id of the room's owner (first joiner), if the room exists.
    pub async fn owner(&self, room_key: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .get(&Self::suffixed(room_key, SUFFIX_OWNER))
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Current member count, via `SMEMBERS` (spec explicitly avoids
    /// tracking membership as a raw list — see `SUFFIX_MEMBERS`).
    pub async fn member_count(&self, room_key: &str) -> Result<u32> {
        Ok(self
            .store
            .smembers(&Self::suffixed(room_key, SUFFIX_MEMBERS))
            .await?
            .len() as u32)
    }

    /// Broadcast `frame` to every local member of `room_key` except
    /// `sender_id`. Returns the count of successful local deliveries.
    pub async fn broadcast(&self, room_key: &str, sender_id: &str, frame: &OutboundFrame) -> Result<usize> {
        let members = self.store.smembers(&Self::suffixed(room_key, SUFFIX_MEMBERS)).await?;
        let mut sent = 0usize;
        for member in members {
            if member == sender_id {
                continue;
            }
            if let Some(tx) = self.connections.get(&member) {
                match tx.try_send(frame.clone()) {
                    Ok(()) => sent += 1,
                    Err(err) => warn!(client_id = %member, error = %err, "dropping broadcast frame"),
                }
            }
        }
        Ok(sent)
    }

    /// Deliver `frame` to a single local client, if connected.
    pub async fn send_to(&self, client_id: &str, frame: &OutboundFrame) -> Result<bool> {
        match self.connections.get(client_id) {
            Some(tx) => match tx.try_send(frame.clone()) {
                Ok(()) => Ok(true),
                Err(err) => {
                    warn!(client_id = %client_id, error = %err, "dropping direct frame");
                    Ok(false)
                }
            },
            None => Ok(false),
        }
    }

    /// Delivers `frame` to every local member except `sender_id`, and
    /// unconditionally publishes it so other instances can deliver to
    /// their own local members (§4.G). Every instance subscribes to the
    /// same channel, including the one that just broadcast locally, so
    /// the subscriber skips re-delivery whenever it recognizes the
    /// sender as one of its own local connections.
    pub async fn fanout(
        &self,
        pubsub_channel: &str,
        room_key: &str,
        sender_id: &str,
        kind: SignalType,
        frame: OutboundFrame,
    ) -> Result<usize> {
        let sent = self.broadcast(room_key, sender_id, &frame).await?;
        let envelope = build_pubsub_envelope(room_key, sender_id, kind, frame.as_bytes());
        let payload = serde_json::to_vec(&envelope).map_err(|e| CoreError::BadInput(e.to_string()))?;
        self.store.publish(pubsub_channel, &payload).await?;
        Ok(sent)
    }

    /// Append a raw signal payload to the pending queue (late-join replay).
    pub async fn pending_push(&self, room_key: &str, payload: &[u8]) -> Result<()> {
        let key = Self::suffixed(room_key, SUFFIX_PENDING);
        self.store.rpush(&key, payload).await?;
        self.store.expire(&key, self.room_ttl).await
    }

    /// Drain and delete the pending queue, in FIFO order.
    pub async fn pending_drain(&self, room_key: &str) -> Result<Vec<Vec<u8>>> {
        let key = Self::suffixed(room_key, SUFFIX_PENDING);
        let items = self.store.lrange(&key, 0, -1).await?;
        if !items.is_empty() {
            self.store.del(&key).await?;
        }
        Ok(items)
    }

    /// Test-and-add a `callId` into `:call_end_ids`. Returns `true` if it
    /// was already present (this `call_end` is a duplicate and must be
    /// dropped), `false` the first time it's seen.
    pub async fn call_end_seen(&self, room_key: &str, call_id: &str) -> Result<bool> {
        let key = Self::suffixed(room_key, SUFFIX_CALL_END_IDS);
        if self.store.sismember(&key, call_id).await? {
            return Ok(true);
        }
        self.store.sadd(&key, call_id).await?;
        self.store.expire(&key, self.room_ttl).await?;
        Ok(false)
    }

    /// Remove `client_id` from the room. If it was the last member,
    /// deletes every room-scoped key (lazy GC) and returns `true`.
    pub async fn leave(&self, room_key: &str, client_id: &str) -> Result<bool> {
        self.store.srem(&Self::suffixed(room_key, SUFFIX_MEMBERS), client_id).await?;
        self.connections.remove(client_id);
        self.keys.remove_client(room_key, client_id);

        if self.member_count(room_key).await? == 0 {
            for suffix in ALL_SUFFIXES {
                self.store.del(&Self::suffixed(room_key, suffix)).await?;
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
