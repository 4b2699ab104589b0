//! Error types for the PPTP control engine.

use thiserror::Error;

/// Errors that can occur when decoding a control message.
///
/// Every variant is fatal to the control connection that produced the bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Header does not carry the control-message tag.
    #[error("invalid message type tag {0}")]
    BadTag(u16),

    /// Header magic cookie is wrong.
    #[error("invalid magic cookie {0:#010x}")]
    BadMagic(u32),

    /// Control message type outside 1..=15.
    #[error("invalid control message type {0}")]
    UnknownType(u16),

    /// Declared length disagrees with the length of the declared type.
    #[error("invalid length {actual} for type {msg_type}, expected {expected}")]
    LengthMismatch {
        /// Control message type from the header.
        msg_type: u16,
        /// Header size plus the table length of the type.
        expected: usize,
        /// Length field from the header.
        actual: usize,
    },

    /// Buffer ended before the declared message did.
    #[error("truncated message: need {expected} bytes, have {actual}")]
    Truncated {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },
}

/// Errors returned synchronously by the engine API.
///
/// Protocol failures never surface here; they are resolved into connection or
/// call teardown and reported to the link owner.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Every global call id is in use.
    #[error("no free call id")]
    NoCallId,

    /// The call handle is stale or was never issued.
    #[error("unknown call")]
    UnknownCall,

    /// The connection handle is stale or was never issued.
    #[error("unknown control connection")]
    UnknownConnection,

    /// The operation is not valid in the call's current state.
    #[error("{operation} not allowed in call state {state}")]
    InvalidCallState {
        /// Operation attempted.
        operation: &'static str,
        /// Current call state name.
        state: &'static str,
    },
}

/// Top-level errors.
#[derive(Debug, Error)]
pub enum PptpError {
    /// Wire decode error.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Engine error.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Listener error.
    #[cfg(feature = "runtime")]
    #[error("listener error: {0}")]
    Listener(#[from] crate::listener::ListenerError),

    /// Control service error.
    #[cfg(feature = "runtime")]
    #[error("service error: {0}")]
    Service(#[from] crate::runtime::ServiceError),
}
