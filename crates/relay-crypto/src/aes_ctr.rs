//! AES-256-CTR symmetric encryption
//!
//! Confidentiality only: CTR mode carries no authentication tag. A fresh
//! 16-byte IV is generated per call and prepended to the ciphertext.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Symmetric key length in bytes.
pub const KEY_LEN: usize = 32;
/// IV length in bytes, prepended to every ciphertext.
pub const IV_LEN: usize = 16;

/// Generate 32 bytes of cryptographic randomness for use as a room key.
pub fn generate_key() -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut key);
    Zeroizing::new(key)
}

/// Encrypt `plaintext` under `key`, returning `iv || ciphertext`.
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_LEN]) -> Vec<u8> {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let mut buf = plaintext.to_vec();
    let mut cipher = Aes256Ctr::new(key.into(), &iv.into());
    cipher.apply_keystream(&mut buf);

    let mut out = Vec::with_capacity(IV_LEN + buf.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&buf);
    out
}

/// Decrypt `ciphertext` (as produced by [`encrypt`]) under `key`.
///
/// Fails with [`CryptoError::Decryption`] if `ciphertext` is shorter than
/// one IV.
pub fn decrypt(ciphertext: &[u8], key: &[u8; KEY_LEN]) -> Result<Vec<u8>> {
    if ciphertext.len() < IV_LEN {
        return Err(CryptoError::Decryption(format!(
            "ciphertext of {} bytes shorter than {IV_LEN}-byte IV",
            ciphertext.len()
        )));
    }
    let (iv, body) = ciphertext.split_at(IV_LEN);
    let mut buf = body.to_vec();
    let mut cipher = Aes256Ctr::new(key.into(), iv.into());
    cipher.apply_keystream(&mut buf);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = generate_key();
        let plaintext = b"hello relay";
        let ciphertext = encrypt(plaintext, &key);
        let decrypted = decrypt(&ciphertext, &key).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn short_ciphertext_fails() {
        let key = generate_key();
        assert!(decrypt(&[0u8; 4], &key).is_err());
    }

    #[test]
    fn distinct_ivs_per_call() {
        let key = generate_key();
        let a = encrypt(b"same message", &key);
        let b = encrypt(b"same message", &key);
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_does_not_roundtrip() {
        let key_a = generate_key();
        let key_b = generate_key();
        let ciphertext = encrypt(b"secret", &key_a);
        let decrypted = decrypt(&ciphertext, &key_b).unwrap();
        assert_ne!(decrypted, b"secret");
    }
}
