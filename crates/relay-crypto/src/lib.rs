//! # Relay Cryptography Library
//!
//! Hybrid RSA/AES envelope used by the signaling relay: an RSA-2048
//! keypair established once per process, OAEP-SHA256 wrap/unwrap of a
//! single room-wide AES-256 key, and CTR-mode encryption of signal
//! payloads under that key.
//!
//! ## Features
//!
//! - **Hybrid envelope**: RSA-OAEP to exchange a symmetric key, AES-CTR to encrypt payloads.
//! - **Memory safety**: key material is zeroized on drop.
//! - **No authenticity**: CTR mode is confidentiality-only by design; callers needing
//!   integrity must layer it on themselves.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod aes_ctr;
pub mod error;
pub mod mem;
pub mod rsa;

pub use error::{CryptoError, Result};
pub use rsa::{KeyFormat, RsaKeyPair};

/// Library version constant
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the cryptography library (prevent core dumps).
///
/// Should be called once at process startup, before the RSA keypair
/// is generated.
pub fn init() -> Result<()> {
    mem::wipe::prevent_core_dumps()
}
