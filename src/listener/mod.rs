//! Listener manager.
//!
//! Keeps one listening socket per address and port, shared by reference
//! count, and forwards accepted connections to the control service. Binding
//! retries on address-in-use and address-not-available with exponential
//! backoff on a task of its own, so the owner of the manager never waits.

mod config;
mod manager;

pub use config::ListenerConfig;
pub use manager::{
    AcquireReply, Accepted, BindOutcome, ListenerError, ListenerHandle, ListenerManager,
};
