//! Sans-IO PPTP control engine.
//!
//! The engine owns every control connection and call, the global call-id
//! pool and all protocol timers. It performs no I/O: the driver reports
//! socket events and the time, and executes the [`Output`]s the engine
//! queues. See [`runtime`](crate::runtime) for the tokio driver.
//!
//! - [`Engine`]: registry, link-layer API and timer handling
//! - [`EngineConfig`]: advertised identity, timeouts and limits
//! - [`Output`]: connect, send and close actions for the driver

mod arena;
mod call_id;
mod channel;
mod config;
mod control;
mod dispatch;
mod output;
mod pending;
mod registry;
mod table;
mod timers;

#[cfg(test)]
mod tests;

pub use channel::{CallParams, ChannelState};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use control::ControlState;
pub use output::{CallHandle, CallRequest, ConnId, ConnectionStatus, Output, SessionInfo};
pub use registry::Engine;
