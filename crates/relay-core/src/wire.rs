//! Wire message types.
//!
//! The signal message is modeled as a closed tagged sum over `type`
//! rather than an open map with optional fields: an unrecognized tag
//! fails to deserialize and is rejected at parse time, not silently
//! accepted and ignored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The closed set of signal message discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Offer,
    Answer,
    Candidate,
    Phrase,
    Status,
    Warning,
    Msg,
    UpdateLimit,
    Signal,
    CallInitiate,
    CallAccept,
    CallEnd,
}

impl SignalType {
    /// True for the types that carry end-to-end encrypted payloads
    /// (§4.H): `offer`, `answer`, `candidate`, `msg`, `signal`.
    pub fn is_encrypted_envelope(self) -> bool {
        matches!(
            self,
            SignalType::Offer | SignalType::Answer | SignalType::Candidate | SignalType::Msg | SignalType::Signal
        )
    }
}

/// Call kind carried by call-control frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Audio,
    Video,
}

/// A signal message. Fields outside the commonly-dispatched set (`sdp`,
/// `ice`, `callType`, opaque application payloads, ...) round-trip
/// through `extra` unexamined, since the relay forwards them verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMessage {
    #[serde(rename = "type")]
    pub kind: SignalType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "roomID")]
    pub room_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "callId")]
    pub call_id: Option<Uuid>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SignalMessage {
    /// Set `from`, overwriting any client-supplied value — the relay is
    /// the sole authority on who a frame came from.
    pub fn with_from(mut self, name: impl Into<String>) -> Self {
        self.from = Some(name.into());
        self
    }
}

/// First frame of every connection.
#[derive(Debug, Clone, Deserialize)]
pub struct InitMessage {
    #[serde(rename = "keyPhrase")]
    pub key_phrase: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub limit: Option<u32>,

    /// Base64 of an RSA-OAEP-wrapped 32-byte key, if the client generated its own.
    #[serde(default, rename = "aesKey")]
    pub aes_key: Option<String>,

    /// PEM-encoded SPKI RSA public key, if the client wants the server to
    /// generate the room key and wrap it back.
    #[serde(default, rename = "clientPubKey")]
    pub client_pub_key: Option<String>,
}

/// Server-originated reply and status frames. These sit outside the
/// `SignalType` closed set (§3 distinguishes the Signal message from the
/// init-reply/error/status vocabulary in §6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingFrame {
    Info {
        msg: &'static str,
        #[serde(rename = "roomId")]
        room_id: String,
        initiator: bool,
        #[serde(skip_serializing_if = "Option::is_none", rename = "aesKey")]
        aes_key: Option<String>,
    },
    Error {
        msg: String,
    },
    Status {
        msg: String,
        #[serde(rename = "roomId")]
        room_id: String,
    },
    Warning {
        msg: String,
    },
}

/// Envelope published on the shared pub/sub channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub room: String,
    pub data: PubSubData,
}

/// Payload carried inside a [`PubSubEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubData {
    pub sender: String,
    #[serde(rename = "type")]
    pub kind: SignalType,
    /// Base64-encoded ciphertext; plaintext never crosses the pub/sub channel.
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_signal_type() {
        let raw = r#"{"type":"not_a_real_type"}"#;
        assert!(serde_json::from_str::<SignalMessage>(raw).is_err());
    }

    #[test]
    fn preserves_opaque_fields() {
        let raw = r#"{"type":"msg","text":"hi"}"#;
        let parsed: SignalMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.extra.get("text").unwrap(), "hi");
        let back = serde_json::to_value(&parsed).unwrap();
        assert_eq!(back["text"], "hi");
        assert_eq!(back["type"], "msg");
    }

    #[test]
    fn init_message_requires_only_key_phrase() {
        let raw = r#"{"keyPhrase":"foo"}"#;
        let parsed: InitMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.key_phrase, "foo");
        assert!(parsed.aes_key.is_none());
        assert!(parsed.client_pub_key.is_none());
    }
}
