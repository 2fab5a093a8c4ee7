//! Error types surfaced by the room coordinator and its collaborators.

use thiserror::Error;

/// Errors raised by the shared store, registries, and room coordinator.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed frame, unknown signal type, non-positive capacity, room at capacity.
    #[error("bad input: {0}")]
    BadInput(String),

    /// Shared-store timeout or connection error.
    #[error("shared store unavailable: {0}")]
    StoreUnavailable(String),

    /// RSA wrap/unwrap or AES encrypt/decrypt failure.
    #[error("crypto failure: {0}")]
    CryptoFailure(String),

    /// A non-owner attempted an owner-only operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// An outbound channel send failed (receiver dropped).
    #[error("transport error: {0}")]
    TransportError(String),
}

impl From<relay_crypto::CryptoError> for CoreError {
    fn from(e: relay_crypto::CryptoError) -> Self {
        CoreError::CryptoFailure(e.to_string())
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(e: redis::RedisError) -> Self {
        CoreError::StoreUnavailable(e.to_string())
    }
}

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;
