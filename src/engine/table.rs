//! Per-message-type rules.
//!
//! For each of the 15 types: the states it may arrive in, which call-id field
//! names its channel and how that id is compared, and what reply a request
//! of this type waits for.

use std::time::Duration;

use super::channel::{Channel, ChannelState};
use super::control::ControlState;
use crate::core::constants::{
    DEFAULT_REPLY_TIMEOUT, IN_CALL_CONNECTED_TIMEOUT, OUT_CALL_REPLY_TIMEOUT, STOP_REPLY_TIMEOUT,
};
use crate::wire::{CallIdField, MessageType};

/// States in which an inbound message is acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admits {
    /// Connection-scoped message, checked against the connection state.
    Control(&'static [ControlState]),
    /// Call-scoped message, checked against the resolved channel's state.
    Channel(&'static [ChannelState]),
}

/// How a received call id is compared against a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdMatch {
    /// Our own call id.
    Mine,
    /// The peer's call id.
    Peer,
    /// The network server's call id.
    Pns,
    /// The access concentrator's call id.
    Pac,
}

impl IdMatch {
    /// Whether `id` identifies `channel` under this strategy.
    pub(crate) fn matches(self, channel: &Channel, id: u16) -> bool {
        let candidate = match self {
            Self::Mine => channel.call_id,
            Self::Peer => channel.peer_call_id,
            Self::Pns => channel.pns_call_id(),
            Self::Pac => channel.pac_call_id(),
        };
        candidate == id
    }
}

/// What a request waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyPolicy {
    /// Reply type that satisfies the request.
    pub expect: MessageType,
    /// A timeout kills the whole connection rather than the call.
    pub fatal: bool,
    /// Time allowed for the reply.
    pub timeout: Duration,
}

/// Rule for one message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    /// Acceptable states on receipt.
    pub admits: Admits,
    /// Field and strategy that resolve the channel on receipt.
    pub inbound: Option<(CallIdField, IdMatch)>,
    /// Reply awaited after sending.
    pub reply: Option<ReplyPolicy>,
}

const fn reply(expect: MessageType, fatal: bool, timeout: Duration) -> Option<ReplyPolicy> {
    Some(ReplyPolicy {
        expect,
        fatal,
        timeout,
    })
}

/// Rule for `msg_type`.
pub fn rule(msg_type: MessageType) -> Rule {
    use ChannelState as Ch;
    use ControlState as Ctl;
    use MessageType as T;

    match msg_type {
        T::StartControlConnectionRequest => Rule {
            admits: Admits::Control(&[Ctl::Idle]),
            inbound: None,
            reply: reply(T::StartControlConnectionReply, true, DEFAULT_REPLY_TIMEOUT),
        },
        T::StartControlConnectionReply => Rule {
            admits: Admits::Control(&[Ctl::WaitControlReply]),
            inbound: None,
            reply: None,
        },
        T::StopControlConnectionRequest => Rule {
            admits: Admits::Control(&[Ctl::WaitControlReply, Ctl::WaitStopReply, Ctl::Established]),
            inbound: None,
            reply: reply(T::StopControlConnectionReply, true, STOP_REPLY_TIMEOUT),
        },
        T::StopControlConnectionReply => Rule {
            admits: Admits::Control(&[Ctl::WaitStopReply]),
            inbound: None,
            reply: None,
        },
        T::EchoRequest => Rule {
            admits: Admits::Control(&[Ctl::Established]),
            inbound: None,
            reply: reply(T::EchoReply, true, DEFAULT_REPLY_TIMEOUT),
        },
        T::EchoReply => Rule {
            admits: Admits::Control(&[Ctl::Established]),
            inbound: None,
            reply: None,
        },
        T::OutCallRequest => Rule {
            admits: Admits::Control(&[Ctl::Established]),
            inbound: None,
            reply: reply(T::OutCallReply, true, OUT_CALL_REPLY_TIMEOUT),
        },
        T::OutCallReply => Rule {
            admits: Admits::Channel(&[Ch::WaitOutReply]),
            inbound: Some((CallIdField::PeerCallId, IdMatch::Mine)),
            reply: None,
        },
        T::InCallRequest => Rule {
            admits: Admits::Control(&[Ctl::Established]),
            inbound: None,
            reply: reply(T::InCallReply, false, DEFAULT_REPLY_TIMEOUT),
        },
        T::InCallReply => Rule {
            admits: Admits::Channel(&[Ch::WaitInReply]),
            inbound: Some((CallIdField::PeerCallId, IdMatch::Mine)),
            reply: reply(T::InCallConnected, false, IN_CALL_CONNECTED_TIMEOUT),
        },
        T::InCallConnected => Rule {
            admits: Admits::Channel(&[Ch::WaitConnect]),
            inbound: Some((CallIdField::PeerCallId, IdMatch::Mine)),
            reply: None,
        },
        T::CallClearRequest => Rule {
            admits: Admits::Channel(&[
                Ch::WaitInReply,
                Ch::WaitAnswer,
                Ch::WaitConnect,
                Ch::Established,
            ]),
            inbound: Some((CallIdField::CallId, IdMatch::Pns)),
            reply: reply(T::CallDiscNotify, true, DEFAULT_REPLY_TIMEOUT),
        },
        T::CallDiscNotify => Rule {
            admits: Admits::Channel(&[
                Ch::WaitOutReply,
                Ch::WaitConnect,
                Ch::WaitDisconnect,
                Ch::Established,
            ]),
            inbound: Some((CallIdField::CallId, IdMatch::Pac)),
            reply: None,
        },
        T::WanErrorNotify => Rule {
            admits: Admits::Channel(&[Ch::Established]),
            inbound: Some((CallIdField::CallId, IdMatch::Pns)),
            reply: None,
        },
        T::SetLinkInfo => Rule {
            admits: Admits::Channel(&[Ch::Established]),
            inbound: Some((CallIdField::CallId, IdMatch::Pac)),
            reply: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replies_have_no_reply() {
        for t in MessageType::ALL {
            if t.is_reply() && t != MessageType::InCallReply {
                assert!(rule(t).reply.is_none(), "{t}");
            }
        }
    }

    #[test]
    fn test_channel_rules_resolve_a_channel() {
        for t in MessageType::ALL {
            let r = rule(t);
            match r.admits {
                Admits::Channel(_) => assert!(r.inbound.is_some(), "{t}"),
                Admits::Control(_) => assert!(r.inbound.is_none(), "{t}"),
            }
        }
    }

    #[test]
    fn test_timeouts() {
        let oc = rule(MessageType::OutCallRequest).reply.unwrap();
        assert_eq!(oc.expect, MessageType::OutCallReply);
        assert!(oc.fatal);
        assert_eq!(oc.timeout, Duration::from_secs(90));

        let ic = rule(MessageType::InCallRequest).reply.unwrap();
        assert!(!ic.fatal);

        let stop = rule(MessageType::StopControlConnectionRequest).reply.unwrap();
        assert_eq!(stop.timeout, Duration::from_secs(3));
    }
}
