//! Link-layer adapter traits.
//!
//! The engine negotiates calls but never decides whether to accept one and
//! never carries user data. Both concerns belong to the link layer, which
//! plugs in through these traits.

use std::net::IpAddr;

use crate::engine::CallHandle;

/// Per-call notifications from the engine to the link that owns the call.
///
/// Callbacks run synchronously on the engine's thread. They must not block;
/// to act on the engine in response, queue a command for the next event.
pub trait LinkOwner: Send {
    /// Final or intermediate outcome of a call.
    ///
    /// `None` means the call came up and `frame_type` carries the negotiated
    /// framing. `Some(reason)` means the call failed or was torn down; the
    /// engine reports a failure at most once per call.
    fn on_result(&mut self, error: Option<&str>, frame_type: u32);

    /// The peer reported that an incoming call it accepted is connected.
    fn on_connected(&mut self, speed: u32) {
        let _ = speed;
    }

    /// The peer sent new link framing parameters.
    fn on_set_link_info(&mut self, send_accm: u32, recv_accm: u32) {
        let _ = (send_accm, recv_accm);
    }

    /// A dial the peer asked for must be abandoned before it resolved.
    fn on_cancel(&mut self);
}

/// Details of a call the peer offers us to accept (Incoming-Call-Request).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCallOffer {
    /// Handle of the call the engine allocated for this offer.
    pub handle: CallHandle,
    /// Our address on the control connection.
    pub local_addr: IpAddr,
    /// Peer address on the control connection.
    pub peer_addr: IpAddr,
    /// Peer TCP port.
    pub peer_port: u16,
    /// Bearer type.
    pub bearer_type: u32,
    /// Number of the calling party.
    pub calling_number: String,
    /// Number that was dialed.
    pub called_number: String,
    /// Sub-address.
    pub sub_address: String,
}

/// Details of a call the peer asks us to place (Outgoing-Call-Request).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingCallOffer {
    /// Handle of the call the engine allocated for this request.
    pub handle: CallHandle,
    /// Our address on the control connection.
    pub local_addr: IpAddr,
    /// Peer address on the control connection.
    pub peer_addr: IpAddr,
    /// Peer TCP port.
    pub peer_port: u16,
    /// Bearer type.
    pub bearer_type: u32,
    /// Framing type.
    pub framing_type: u32,
    /// Minimum acceptable speed.
    pub min_bps: u32,
    /// Maximum acceptable speed.
    pub max_bps: u32,
    /// Number to dial.
    pub called_number: String,
    /// Sub-address.
    pub sub_address: String,
}

/// Policy consulted when the peer proposes a call.
///
/// Returning `None` denies the call; the engine replies with an
/// administrative refusal. The default methods deny everything.
pub trait CallPolicy: Send {
    /// Peer offers an incoming call.
    fn accept_incoming(&mut self, offer: &IncomingCallOffer) -> Option<Box<dyn LinkOwner>> {
        let _ = offer;
        None
    }

    /// Peer asks us to place an outgoing call.
    ///
    /// An accepted call sits in `WaitAnswer` until the owner reports the dial
    /// outcome through [`Engine::answer_call`](crate::engine::Engine::answer_call).
    fn accept_outgoing(&mut self, offer: &OutgoingCallOffer) -> Option<Box<dyn LinkOwner>> {
        let _ = offer;
        None
    }
}

/// Policy that refuses every peer-proposed call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl CallPolicy for DenyAll {}
