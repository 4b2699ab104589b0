//! Per-peer control connection state.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use super::arena::{Arena, Index};
use super::channel::Channel;
use super::pending::PendingReplies;
use super::timers::TimerId;
use crate::wire::FrameDecoder;

/// Control connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlState {
    /// TCP not yet up, or up and waiting for the peer's start request.
    Idle,
    /// We sent Start-Control-Connection-Request.
    WaitControlReply,
    /// We sent Stop-Control-Connection-Request.
    WaitStopReply,
    /// Connection is up and can carry calls.
    Established,
    /// Connection is being torn down; freed on the next reap.
    Dying,
}

impl ControlState {
    /// Upper-case name used in logs and status lines.
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::WaitControlReply => "WAIT_CTL_REPLY",
            Self::WaitStopReply => "WAIT_STOP_REPLY",
            Self::Established => "ESTABLISHED",
            Self::Dying => "DYING",
        }
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One TCP control connection and the calls it carries.
#[derive(Debug)]
pub(crate) struct ControlConnection {
    pub id: Index,
    pub state: ControlState,
    /// We opened the TCP connection.
    pub originated: bool,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    pub decoder: FrameDecoder,
    pub channels: Arena<Channel>,
    pub pending: PendingReplies,
    pub idle_timer: Option<TimerId>,
    pub unused_timer: Option<TimerId>,
    pub echo_id: u32,
    /// Calls that are not dying.
    pub active_calls: usize,
    pub self_name: String,
    pub peer_name: String,
}

impl ControlConnection {
    pub fn new(id: Index, originated: bool, local: Option<IpAddr>, peer_addr: SocketAddr) -> Self {
        let local_ip = local.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        Self {
            id,
            state: ControlState::Idle,
            originated,
            local_addr: SocketAddr::new(local_ip, 0),
            peer_addr,
            decoder: FrameDecoder::new(),
            channels: Arena::new(),
            pending: PendingReplies::new(),
            idle_timer: None,
            unused_timer: None,
            echo_id: 0,
            active_calls: 0,
            self_name: String::new(),
            peer_name: String::new(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.state != ControlState::Dying
    }

    /// Whether an outbound call to `peer` may ride on this connection.
    pub fn reusable_for(
        &self,
        local: Option<IpAddr>,
        peer: SocketAddr,
        max_calls: usize,
    ) -> bool {
        self.is_live()
            && self.active_calls < max_calls
            && self.peer_addr.ip() == peer.ip()
            && (self.peer_addr.port() == peer.port() || !self.originated)
            && local.is_none_or(|ip| ip.is_unspecified() || ip == self.local_addr.ip())
    }
}
