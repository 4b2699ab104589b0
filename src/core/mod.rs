//! Core types for the PPTP control engine.
//!
//! Contains protocol constants, error types and the link-layer traits.

pub mod constants;
pub mod error;
pub mod traits;

pub use error::{DecodeError, EngineError, PptpError};
pub use traits::{CallPolicy, DenyAll, IncomingCallOffer, LinkOwner, OutgoingCallOffer};
