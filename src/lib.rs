//! # pptp-ctrl
//!
//! Control-channel engine for the **P**oint-**t**o-**P**oint **T**unneling
//! **P**rotocol (RFC 2637).
//!
//! The crate negotiates PPTP control connections and the calls they carry
//! over TCP. It does not carry user data: the link layer that owns each call
//! plugs in through [`LinkOwner`] and decides on peer-proposed calls through
//! [`CallPolicy`].
//!
//! - **Sans-IO**: the [`Engine`] never touches sockets or clocks; it is driven
//!   with explicit instants and answers with [`Output`] actions
//! - **Strict**: every message is checked against the state of the connection
//!   or call it names; protocol violations tear the connection down
//! - **Async driver**: [`runtime::ControlService`] runs the engine on tokio
//!
//! ## Feature Flags
//!
//! - `runtime` (default): listener manager and the tokio control service
//!
//! ## Modules
//!
//! - [`core`]: protocol constants, error types and the link-layer traits
//! - [`wire`]: control message codec
//! - [`engine`]: connection registry, call state machines and timers
//! - [`listener`]: shared TCP listeners (requires `runtime` feature)
//! - [`runtime`]: tokio driver (requires `runtime` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::Instant;
//! use pptp_ctrl::prelude::*;
//!
//! struct Owner;
//!
//! impl LinkOwner for Owner {
//!     fn on_result(&mut self, error: Option<&str>, _frame_type: u32) {
//!         if let Some(reason) = error {
//!             eprintln!("call failed: {reason}");
//!         }
//!     }
//!
//!     fn on_cancel(&mut self) {}
//! }
//!
//! let mut engine = Engine::new(EngineConfig::default(), DenyAll);
//! let request = CallRequest::outgoing("192.0.2.1".parse().unwrap()).called_number("5551234");
//! let call = engine
//!     .originate_call(request, Box::new(Owner), Instant::now())
//!     .unwrap();
//!
//! // The call waits for its control connection.
//! assert_eq!(engine.call_state(call), Some(ChannelState::WaitCtrl));
//! while let Some(output) = engine.poll_output() {
//!     match output {
//!         Output::Connect { peer, .. } => assert_eq!(peer.port(), 1723),
//!         Output::Send { .. } | Output::Close { .. } => {}
//!     }
//! }
//! engine.reap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Wire codec and engine (always included, no async dependency)
pub mod engine;
pub mod wire;

// Listener manager (feature-gated)
#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub mod listener;

// Tokio driver (feature-gated)
#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub mod runtime;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    // Engine API
    pub use crate::engine::{
        CallHandle, CallParams, CallRequest, ChannelState, ConnId, ConnectionStatus, ControlState,
        Engine, EngineConfig, EngineConfigBuilder, Output, SessionInfo,
    };

    // Wire types
    pub use crate::wire::{Message, MessageType};

    // Driver types (when enabled)
    #[cfg(feature = "runtime")]
    pub use crate::listener::{ListenerConfig, ListenerError, ListenerHandle};
    #[cfg(feature = "runtime")]
    pub use crate::runtime::{ControlHandle, ControlService, ServiceError};
}

// Re-export commonly used items at crate root
pub use crate::core::{CallPolicy, DecodeError, DenyAll, EngineError, LinkOwner, PptpError};
pub use crate::engine::{CallHandle, CallRequest, ConnId, Engine, EngineConfig, Output};

#[cfg(feature = "runtime")]
pub use crate::runtime::{ControlHandle, ControlService};
