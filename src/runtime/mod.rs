//! Tokio driver for the engine.
//!
//! [`ControlService`] runs the sans-IO [`Engine`](crate::engine::Engine) on a
//! single task: it opens and accepts TCP control connections, feeds socket
//! bytes and timer expiries to the engine, and writes what the engine sends.
//! The link layer talks to it through a cloneable [`ControlHandle`].

mod connection;
mod service;

pub use service::{ControlHandle, ControlService, ServiceError};
