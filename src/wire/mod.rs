//! Wire codec for PPTP control messages.
//!
//! - [`header`]: fixed message header and its validation
//! - [`message`]: the 15 payload types and the [`Message`] enum
//! - [`layout`]: field tables driving lengths, reserved checks and dumps
//! - [`decoder`]: reassembly of frames from a byte stream

pub mod decoder;
pub mod header;
pub mod layout;
pub mod message;

pub use decoder::{FrameDecoder, RawFrame};
pub use header::Header;
pub use message::{
    CallClearRequest, CallDiscNotify, CallIdField, EchoReply, EchoRequest, InCallConnected,
    InCallReply, InCallRequest, Message, MessageType, OutCallReply, OutCallRequest, SetLinkInfo,
    StartControlConnectionReply, StartControlConnectionRequest, StopControlConnectionReply,
    StopControlConnectionRequest, WanErrorNotify,
};
