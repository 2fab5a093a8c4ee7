//! Memory safety utilities for cryptographic operations
//!
//! This module provides protection against memory dumps. Key material
//! itself is zeroized via the `zeroize` crate at its point of use.

pub mod wipe;

pub use wipe::prevent_core_dumps;
