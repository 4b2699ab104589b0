//! Engine configuration.

use std::time::Duration;

use crate::core::constants::{
    FIRMWARE_REVISION, IDLE_TIMEOUT, MAX_CALLS_PER_CONNECTION, PPTP_PORT, PROCESSING_DELAY,
    RECV_WINDOW, UNUSED_CONNECTION_TIMEOUT,
};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// TCP port used when a call request leaves the peer port at 0.
    pub port: u16,

    /// Host name advertised in Start-Control-Connection messages.
    pub host_name: String,

    /// Vendor string advertised in Start-Control-Connection messages.
    pub vendor: String,

    /// Firmware revision advertised in Start-Control-Connection messages.
    pub firmware_revision: u16,

    /// Peer silence after which an Echo-Request is sent.
    pub idle_timeout: Duration,

    /// Grace period before a connection without calls is closed.
    pub unused_timeout: Duration,

    /// Calls per control connection before a new one is opened.
    pub max_calls_per_connection: usize,

    /// Packet receive window advertised for our calls.
    pub recv_window: u16,

    /// Packet processing delay advertised for our calls.
    pub processing_delay: u16,

    /// Start the call-id scan at a random id.
    pub randomize_call_ids: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: PPTP_PORT,
            host_name: String::new(),
            vendor: String::from(env!("CARGO_PKG_NAME")),
            firmware_revision: FIRMWARE_REVISION,
            idle_timeout: IDLE_TIMEOUT,
            unused_timeout: UNUSED_CONNECTION_TIMEOUT,
            max_calls_per_connection: MAX_CALLS_PER_CONNECTION,
            recv_window: RECV_WINDOW,
            processing_delay: PROCESSING_DELAY,
            randomize_call_ids: false,
        }
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Create a builder with default values.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// Set the default peer port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the advertised host name.
    pub fn host_name(mut self, name: impl Into<String>) -> Self {
        self.config.host_name = name.into();
        self
    }

    /// Set the advertised vendor string.
    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.config.vendor = vendor.into();
        self
    }

    /// Set the advertised firmware revision.
    pub fn firmware_revision(mut self, revision: u16) -> Self {
        self.config.firmware_revision = revision;
        self
    }

    /// Set the keepalive idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the unused-connection grace period.
    pub fn unused_timeout(mut self, timeout: Duration) -> Self {
        self.config.unused_timeout = timeout;
        self
    }

    /// Set the per-connection call limit.
    pub fn max_calls_per_connection(mut self, max: usize) -> Self {
        self.config.max_calls_per_connection = max.max(1);
        self
    }

    /// Set the advertised receive window.
    pub fn recv_window(mut self, window: u16) -> Self {
        self.config.recv_window = window;
        self
    }

    /// Set the advertised processing delay.
    pub fn processing_delay(mut self, delay: u16) -> Self {
        self.config.processing_delay = delay;
        self
    }

    /// Enable or disable a random first call id.
    pub fn randomize_call_ids(mut self, enabled: bool) -> Self {
        self.config.randomize_call_ids = enabled;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
