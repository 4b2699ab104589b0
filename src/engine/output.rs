//! Handles, requests and effects exchanged with the engine's driver.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use super::arena::Index;
use super::channel::CallParams;
use super::control::ControlState;
use crate::core::constants::{BEARCAP_DIGITAL, FRAMECAP_ANY, INTERNAL_CALLING_NUMBER};

/// Handle to a control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub(crate) Index);

impl ConnId {
    /// Connection number used in logs.
    pub fn slot(&self) -> u32 {
        self.0.slot()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pptp{}", self.0.slot())
    }
}

/// Handle to a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallHandle {
    pub(crate) conn: Index,
    pub(crate) chan: Index,
}

impl CallHandle {
    /// Connection carrying the call.
    pub fn connection(&self) -> ConnId {
        ConnId(self.conn)
    }
}

impl fmt::Display for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pptp{}-{}", self.conn.slot(), self.chan.slot())
    }
}

/// Effect the driver must carry out on behalf of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Open a TCP connection to `peer`, bound to `local` when given.
    Connect {
        /// Connection the socket belongs to.
        conn: ConnId,
        /// Local address to bind.
        local: Option<IpAddr>,
        /// Peer address.
        peer: SocketAddr,
    },
    /// Write bytes to the connection's socket.
    Send {
        /// Target connection.
        conn: ConnId,
        /// Encoded control message.
        bytes: Vec<u8>,
    },
    /// Close the connection's socket.
    Close {
        /// Target connection.
        conn: ConnId,
    },
}

/// A locally proposed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// Offer an incoming call rather than ask the peer to place one.
    pub incoming: bool,
    /// Local address to use, if any.
    pub local_addr: Option<IpAddr>,
    /// Peer address.
    pub peer_addr: IpAddr,
    /// Peer port; 0 selects the configured default.
    pub peer_port: u16,
    /// Call parameters.
    pub params: CallParams,
}

impl CallRequest {
    /// Ask the peer to place an outgoing call.
    pub fn outgoing(peer_addr: IpAddr) -> Self {
        Self {
            incoming: false,
            local_addr: None,
            peer_addr,
            peer_port: 0,
            params: CallParams {
                bearer_type: BEARCAP_DIGITAL,
                framing_type: FRAMECAP_ANY,
                calling_number: INTERNAL_CALLING_NUMBER.to_string(),
                ..CallParams::default()
            },
        }
    }

    /// Offer the peer an incoming call.
    pub fn incoming(peer_addr: IpAddr) -> Self {
        Self {
            incoming: true,
            ..Self::outgoing(peer_addr)
        }
    }

    /// Set the local address.
    pub fn local_addr(mut self, addr: IpAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Set the peer port.
    pub fn peer_port(mut self, port: u16) -> Self {
        self.peer_port = port;
        self
    }

    /// Set bearer and framing types.
    pub fn bearer(mut self, bearer_type: u32, framing_type: u32) -> Self {
        self.params.bearer_type = bearer_type;
        self.params.framing_type = framing_type;
        self
    }

    /// Set the acceptable speed range.
    pub fn speed(mut self, min_bps: u32, max_bps: u32) -> Self {
        self.params.min_bps = min_bps;
        self.params.max_bps = max_bps;
        self
    }

    /// Set the calling number.
    pub fn calling_number(mut self, number: impl Into<String>) -> Self {
        self.params.calling_number = number.into();
        self
    }

    /// Set the called number.
    pub fn called_number(mut self, number: impl Into<String>) -> Self {
        self.params.called_number = number.into();
        self
    }

    /// Set the sub-address.
    pub fn sub_address(mut self, sub_address: impl Into<String>) -> Self {
        self.params.sub_address = sub_address.into();
        self
    }
}

/// Addressing of a live call, as needed by the data plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    /// Our address on the control connection.
    pub local_addr: IpAddr,
    /// Peer address on the control connection.
    pub peer_addr: IpAddr,
    /// Our call id.
    pub local_call_id: u16,
    /// Peer's call id.
    pub peer_call_id: u16,
    /// Peer's packet receive window.
    pub peer_window: u16,
    /// Peer's packet processing delay.
    pub peer_ppd: u16,
}

/// One line of the status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Connection.
    pub id: ConnId,
    /// Local socket address.
    pub local_addr: SocketAddr,
    /// Peer socket address.
    pub peer_addr: SocketAddr,
    /// Connection state.
    pub state: ControlState,
    /// Calls that are not dying.
    pub active_calls: usize,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {} <=> {}  {}  {} calls",
            self.id, self.local_addr, self.peer_addr, self.state, self.active_calls
        )
    }
}
