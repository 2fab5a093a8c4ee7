//! Room lifecycle, process-local registries, and the crypto-envelope
//! policy that ties them to the shared store and the `relay-crypto`
//! primitives.

pub mod envelope;
pub mod error;
pub mod registry;
pub mod room;
pub mod store;
pub mod wire;

pub use error::{CoreError, Result};
pub use registry::{ConnectionRegistry, KeyRegistry, OutboundFrame};
pub use room::{JoinOutcome, RoomCoordinator};
pub use store::Store;
pub use wire::{CallType, InitMessage, OutgoingFrame, PubSubData, PubSubEnvelope, SignalMessage, SignalType};
