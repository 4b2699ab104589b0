//! Per-call state.

use std::fmt;

use super::arena::Index;
use crate::core::traits::LinkOwner;

/// Call state.
///
/// A call that is no longer in its connection's table is implicitly free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// We sent an Incoming-Call-Request and await the reply.
    WaitInReply,
    /// We sent an Outgoing-Call-Request and await the reply.
    WaitOutReply,
    /// Incoming call accepted; waiting for it to connect.
    WaitConnect,
    /// We sent a Call-Clear-Request and await the disconnect notice.
    WaitDisconnect,
    /// Peer asked us to dial; waiting for the link owner's outcome.
    WaitAnswer,
    /// Call is up.
    Established,
    /// Call proposed before its control connection was established.
    WaitCtrl,
    /// Call is being torn down; freed on the next reap.
    Dying,
}

impl ChannelState {
    /// Upper-case name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::WaitInReply => "WAIT_IN_REPLY",
            Self::WaitOutReply => "WAIT_OUT_REPLY",
            Self::WaitConnect => "WAIT_CONNECT",
            Self::WaitDisconnect => "WAIT_DISCONNECT",
            Self::WaitAnswer => "WAIT_ANSWER",
            Self::Established => "ESTABLISHED",
            Self::WaitCtrl => "WAIT_CTRL",
            Self::Dying => "DYING",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Call parameters supplied by the proposer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallParams {
    /// Bearer type.
    pub bearer_type: u32,
    /// Framing type.
    pub framing_type: u32,
    /// Minimum acceptable speed.
    pub min_bps: u32,
    /// Maximum acceptable speed.
    pub max_bps: u32,
    /// Number of the calling party.
    pub calling_number: String,
    /// Number being called.
    pub called_number: String,
    /// Sub-address.
    pub sub_address: String,
}

/// One logical call on a control connection.
pub(crate) struct Channel {
    pub id: Index,
    pub state: ChannelState,
    /// We proposed the call.
    pub originated: bool,
    /// The call is an incoming call (peer-facing classification).
    pub incoming: bool,
    pub call_id: u16,
    pub peer_call_id: u16,
    pub serial_number: u16,
    pub peer_window: u16,
    pub peer_ppd: u16,
    pub params: CallParams,
    pub owner: Option<Box<dyn LinkOwner>>,
}

impl Channel {
    pub fn new(
        id: Index,
        state: ChannelState,
        originated: bool,
        incoming: bool,
        call_id: u16,
        params: CallParams,
    ) -> Self {
        Self {
            id,
            state,
            originated,
            incoming,
            call_id,
            peer_call_id: 0,
            serial_number: call_id,
            peer_window: 0,
            peer_ppd: 0,
            params,
            owner: None,
        }
    }

    /// Whether this side is the network server for the call.
    pub fn is_pns(&self) -> bool {
        self.originated != self.incoming
    }

    /// Call id assigned by the network server.
    pub fn pns_call_id(&self) -> u16 {
        if self.is_pns() { self.call_id } else { self.peer_call_id }
    }

    /// Call id assigned by the access concentrator.
    pub fn pac_call_id(&self) -> u16 {
        if self.is_pns() { self.peer_call_id } else { self.call_id }
    }

    pub fn is_live(&self) -> bool {
        self.state != ChannelState::Dying
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("slot", &self.id.slot())
            .field("state", &self.state)
            .field("originated", &self.originated)
            .field("incoming", &self.incoming)
            .field("call_id", &self.call_id)
            .field("peer_call_id", &self.peer_call_id)
            .field("has_owner", &self.owner.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::arena::Arena;

    fn channel(originated: bool, incoming: bool) -> Channel {
        let mut arena = Arena::new();
        let id = arena.insert(());
        let mut ch = Channel::new(id, ChannelState::WaitCtrl, originated, incoming, 7, CallParams::default());
        ch.peer_call_id = 9;
        ch
    }

    #[test]
    fn test_role_rule() {
        // Our outgoing-call request: we are the network server.
        assert!(channel(true, false).is_pns());
        // Our incoming-call request: we are the access concentrator.
        assert!(!channel(true, true).is_pns());
        // Peer asks us to dial out.
        assert!(!channel(false, false).is_pns());
        // Peer offers an incoming call.
        assert!(channel(false, true).is_pns());
    }

    #[test]
    fn test_role_call_ids() {
        let pns = channel(true, false);
        assert_eq!((pns.pns_call_id(), pns.pac_call_id()), (7, 9));
        let pac = channel(false, false);
        assert_eq!((pac.pns_call_id(), pac.pac_call_id()), (9, 7));
    }

    #[test]
    fn test_serial_defaults_to_call_id() {
        assert_eq!(channel(true, false).serial_number, 7);
        assert_eq!(ChannelState::WaitAnswer.to_string(), "WAIT_ANSWER");
    }
}
