//! RSA-OAEP key wrap/unwrap used to exchange the room's symmetric key.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

/// Minimum accepted RSA modulus size, in bits.
pub const MIN_KEY_BITS: usize = 2048;

/// Public-key serialization formats accepted by `/pubkey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    /// PEM-encoded SubjectPublicKeyInfo.
    Pem,
    /// DER-encoded SubjectPublicKeyInfo, base64-encoded.
    SpkiBase64,
}

impl KeyFormat {
    /// Parse a format name from the wire (`"pem"` or `"spki-base64"`).
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "pem" => Ok(KeyFormat::Pem),
            "spki-base64" => Ok(KeyFormat::SpkiBase64),
            other => Err(CryptoError::Unsupported(format!(
                "unsupported public key format: {other}"
            ))),
        }
    }
}

/// The process-wide RSA keypair used to bootstrap each room's symmetric key.
pub struct RsaKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl RsaKeyPair {
    /// Generate a fresh keypair. Fails if `bits` is below [`MIN_KEY_BITS`]
    /// or the system RNG cannot be used.
    pub fn generate(bits: usize) -> Result<Self> {
        if bits < MIN_KEY_BITS {
            return Err(CryptoError::KeyGeneration(format!(
                "requested key size {bits} below minimum {MIN_KEY_BITS}"
            )));
        }
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// This process's public key, for handing to `/pubkey` or embedding in
    /// an init reply.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Serialize the public key in the requested format.
    pub fn serialize_public_key(&self, format: KeyFormat) -> Result<String> {
        match format {
            KeyFormat::Pem => self
                .public
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| CryptoError::Unsupported(e.to_string())),
            KeyFormat::SpkiBase64 => {
                let der = self
                    .public
                    .to_public_key_der()
                    .map_err(|e| CryptoError::Unsupported(e.to_string()))?;
                Ok(STANDARD.encode(der.as_bytes()))
            }
        }
    }

    /// RSA-OAEP-SHA256 decrypt using this process's private key.
    pub fn unwrap(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.private
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map(Zeroizing::new)
            .map_err(|e| CryptoError::Decryption(e.to_string()))
    }
}

/// RSA-OAEP-SHA256 encrypt `bytes` under an arbitrary public key (a joining
/// client's, typically).
pub fn wrap(pub_key: &RsaPublicKey, bytes: &[u8]) -> Result<Vec<u8>> {
    pub_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), bytes)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Parse a PEM-encoded SubjectPublicKeyInfo RSA public key, as sent by a
/// client in the `clientPubKey` init field.
pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unwrap_roundtrip() {
        let pair = RsaKeyPair::generate(2048).unwrap();
        let secret = b"0123456789abcdef0123456789abcdef";
        let wrapped = wrap(pair.public_key(), secret).unwrap();
        let unwrapped = pair.unwrap(&wrapped).unwrap();
        assert_eq!(unwrapped.as_slice(), secret);
    }

    #[test]
    fn rejects_undersized_key() {
        assert!(RsaKeyPair::generate(1024).is_err());
    }

    #[test]
    fn pem_roundtrips_through_parse() {
        let pair = RsaKeyPair::generate(2048).unwrap();
        let pem = pair.serialize_public_key(KeyFormat::Pem).unwrap();
        let parsed = parse_public_key_pem(&pem).unwrap();
        assert_eq!(parsed, *pair.public_key());
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(KeyFormat::parse("der").is_err());
    }
}
