//! Crypto-envelope policy (§4.H): which frames get encrypted, with which
//! key, and how pub/sub frames are packed and unpacked.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{CoreError, Result};
use crate::wire::{PubSubData, PubSubEnvelope, SignalMessage, SignalType};

/// Encrypt a signal frame under the room's canonical symmetric key.
pub fn encrypt_signal(msg: &SignalMessage, key: &[u8; 32]) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(msg).map_err(|e| CoreError::BadInput(e.to_string()))?;
    Ok(relay_crypto::aes_ctr::encrypt(&json, key))
}

/// Decrypt a ciphertext frame under a recipient's symmetric key.
pub fn decrypt_signal(ciphertext: &[u8], key: &[u8; 32]) -> Result<SignalMessage> {
    let plaintext = relay_crypto::aes_ctr::decrypt(ciphertext, key)?;
    serde_json::from_slice(&plaintext).map_err(|e| CoreError::BadInput(e.to_string()))
}

/// Build the pub/sub envelope published alongside a local broadcast.
pub fn build_pubsub_envelope(room_key: &str, sender: &str, kind: SignalType, ciphertext: &[u8]) -> PubSubEnvelope {
    PubSubEnvelope {
        kind: "signal".to_string(),
        room: room_key.to_string(),
        data: PubSubData {
            sender: sender.to_string(),
            kind,
            msg: STANDARD.encode(ciphertext),
        },
    }
}

/// Parse and base64-decode an inbound pub/sub frame's ciphertext.
pub fn decode_pubsub_envelope(raw: &[u8]) -> Result<(PubSubEnvelope, Vec<u8>)> {
    let envelope: PubSubEnvelope = serde_json::from_slice(raw).map_err(|e| CoreError::BadInput(e.to_string()))?;
    let ciphertext = STANDARD
        .decode(&envelope.data.msg)
        .map_err(|e| CoreError::BadInput(e.to_string()))?;
    Ok((envelope, ciphertext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn sample(kind: SignalType) -> SignalMessage {
        SignalMessage {
            kind,
            msg: None,
            from: Some("alice".into()),
            room_id: None,
            limit: None,
            call_id: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = [7u8; 32];
        let msg = sample(SignalType::Msg);
        let ciphertext = encrypt_signal(&msg, &key).unwrap();
        let decrypted = decrypt_signal(&ciphertext, &key).unwrap();
        assert_eq!(decrypted.from, msg.from);
        assert_eq!(decrypted.kind, SignalType::Msg);
    }

    #[test]
    fn pubsub_envelope_roundtrips_ciphertext() {
        let key = [3u8; 32];
        let msg = sample(SignalType::Signal);
        let ciphertext = encrypt_signal(&msg, &key).unwrap();
        let envelope = build_pubsub_envelope("room:foo", "alice", SignalType::Signal, &ciphertext);
        let raw = serde_json::to_vec(&envelope).unwrap();

        let (decoded, decoded_ciphertext) = decode_pubsub_envelope(&raw).unwrap();
        assert_eq!(decoded.room, "room:foo");
        assert_eq!(decoded.data.sender, "alice");
        let decrypted = decrypt_signal(&decoded_ciphertext, &key).unwrap();
        assert_eq!(decrypted.from, msg.from);
    }
}
