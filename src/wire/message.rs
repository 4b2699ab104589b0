//! Control message types and payload codecs.
//!
//! Every payload is a fixed-layout record (see [`layout`](super::layout)).
//! Integers are big-endian; text fields are NUL-padded fixed blocks. Reserved
//! fields are not represented in the structs: they encode as zero and are
//! checked separately on the raw bytes.

use super::header::Header;
use super::layout;
use crate::core::constants::{HEADER_SIZE, HOSTNAME_LEN, PHONE_LEN, STATS_LEN, SUBADDR_LEN, VENDOR_LEN};
use crate::core::error::DecodeError;

/// Control message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum MessageType {
    /// Start-Control-Connection-Request.
    StartControlConnectionRequest = 1,
    /// Start-Control-Connection-Reply.
    StartControlConnectionReply = 2,
    /// Stop-Control-Connection-Request.
    StopControlConnectionRequest = 3,
    /// Stop-Control-Connection-Reply.
    StopControlConnectionReply = 4,
    /// Echo-Request.
    EchoRequest = 5,
    /// Echo-Reply.
    EchoReply = 6,
    /// Outgoing-Call-Request.
    OutCallRequest = 7,
    /// Outgoing-Call-Reply.
    OutCallReply = 8,
    /// Incoming-Call-Request.
    InCallRequest = 9,
    /// Incoming-Call-Reply.
    InCallReply = 10,
    /// Incoming-Call-Connected.
    InCallConnected = 11,
    /// Call-Clear-Request.
    CallClearRequest = 12,
    /// Call-Disconnect-Notify.
    CallDiscNotify = 13,
    /// WAN-Error-Notify.
    WanErrorNotify = 14,
    /// Set-Link-Info.
    SetLinkInfo = 15,
}

impl MessageType {
    /// All message types in code order.
    pub const ALL: [MessageType; 15] = [
        Self::StartControlConnectionRequest,
        Self::StartControlConnectionReply,
        Self::StopControlConnectionRequest,
        Self::StopControlConnectionReply,
        Self::EchoRequest,
        Self::EchoReply,
        Self::OutCallRequest,
        Self::OutCallReply,
        Self::InCallRequest,
        Self::InCallReply,
        Self::InCallConnected,
        Self::CallClearRequest,
        Self::CallDiscNotify,
        Self::WanErrorNotify,
        Self::SetLinkInfo,
    ];

    /// Convert from a raw type code.
    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.get(usize::from(value).checked_sub(1)?).copied()
    }

    /// Short name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::StartControlConnectionRequest => "StartCtrlConnRequest",
            Self::StartControlConnectionReply => "StartCtrlConnReply",
            Self::StopControlConnectionRequest => "StopCtrlConnRequest",
            Self::StopControlConnectionReply => "StopCtrlConnReply",
            Self::EchoRequest => "EchoRequest",
            Self::EchoReply => "EchoReply",
            Self::OutCallRequest => "OutCallRequest",
            Self::OutCallReply => "OutCallReply",
            Self::InCallRequest => "InCallRequest",
            Self::InCallReply => "InCallReply",
            Self::InCallConnected => "InCallConn",
            Self::CallClearRequest => "CallClearRequest",
            Self::CallDiscNotify => "CallDiscNotify",
            Self::WanErrorNotify => "WanErrorNotify",
            Self::SetLinkInfo => "SetLinkInfo",
        }
    }

    /// Whether this type only ever answers an earlier request.
    pub fn is_reply(self) -> bool {
        matches!(
            self,
            Self::StartControlConnectionReply
                | Self::StopControlConnectionReply
                | Self::EchoReply
                | Self::OutCallReply
                | Self::InCallReply
                | Self::InCallConnected
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// FIELD CODEC
// =============================================================================

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new(msg_type: MessageType) -> Self {
        let mut buf = Vec::with_capacity(HEADER_SIZE + layout::payload_len(msg_type));
        buf.extend_from_slice(&Header::for_type(msg_type).encode());
        Self { buf }
    }

    fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    fn u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    fn zero(&mut self, len: usize) -> &mut Self {
        self.buf.resize(self.buf.len() + len, 0);
        self
    }

    /// Copy `text` into a NUL-padded block, truncated on a char boundary.
    fn text(&mut self, text: &str, len: usize) -> &mut Self {
        let mut end = text.len().min(len);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.extend_from_slice(&text.as_bytes()[..end]);
        self.zero(len - end)
    }

    fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

struct Reader<'a> {
    data: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    fn new(msg_type: MessageType, data: &'a [u8]) -> Result<Self, DecodeError> {
        let expected = layout::payload_len(msg_type);
        if data.len() < expected {
            return Err(DecodeError::Truncated {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, off: 0 })
    }

    fn take(&mut self, len: usize) -> &'a [u8] {
        let slice = &self.data[self.off..self.off + len];
        self.off += len;
        slice
    }

    fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    fn u16(&mut self) -> u16 {
        let b = self.take(2);
        u16::from_be_bytes([b[0], b[1]])
    }

    fn u32(&mut self) -> u32 {
        let b = self.take(4);
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    fn skip(&mut self, len: usize) {
        self.off += len;
    }

    fn text(&mut self, len: usize) -> String {
        let block = self.take(len);
        let end = block.iter().position(|&b| b == 0).unwrap_or(block.len());
        String::from_utf8_lossy(&block[..end]).into_owned()
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// Start-Control-Connection-Request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartControlConnectionRequest {
    /// Protocol version.
    pub protocol_version: u16,
    /// Framing capabilities.
    pub framing_capabilities: u32,
    /// Bearer capabilities.
    pub bearer_capabilities: u32,
    /// Maximum channels.
    pub max_channels: u16,
    /// Firmware revision.
    pub firmware_revision: u16,
    /// Host name.
    pub host_name: String,
    /// Vendor string.
    pub vendor: String,
}

/// Start-Control-Connection-Reply payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartControlConnectionReply {
    /// Protocol version.
    pub protocol_version: u16,
    /// Result code.
    pub result: u8,
    /// General error code.
    pub error: u8,
    /// Framing capabilities.
    pub framing_capabilities: u32,
    /// Bearer capabilities.
    pub bearer_capabilities: u32,
    /// Maximum channels.
    pub max_channels: u16,
    /// Firmware revision.
    pub firmware_revision: u16,
    /// Host name.
    pub host_name: String,
    /// Vendor string.
    pub vendor: String,
}

/// Stop-Control-Connection-Request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopControlConnectionRequest {
    /// Reason code.
    pub reason: u8,
}

/// Stop-Control-Connection-Reply payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopControlConnectionReply {
    /// Result code.
    pub result: u8,
    /// General error code.
    pub error: u8,
}

/// Echo-Request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EchoRequest {
    /// Identifier echoed back by the reply.
    pub id: u32,
}

/// Echo-Reply payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EchoReply {
    /// Identifier from the request.
    pub id: u32,
    /// Result code.
    pub result: u8,
    /// General error code.
    pub error: u8,
}

/// Outgoing-Call-Request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutCallRequest {
    /// Sender's call id.
    pub call_id: u16,
    /// Call serial number.
    pub serial_number: u16,
    /// Minimum acceptable speed.
    pub min_bps: u32,
    /// Maximum acceptable speed.
    pub max_bps: u32,
    /// Bearer type.
    pub bearer_type: u32,
    /// Framing type.
    pub framing_type: u32,
    /// Packet receive window.
    pub recv_window: u16,
    /// Packet processing delay.
    pub processing_delay: u16,
    /// Length of the phone number.
    pub phone_number_len: u16,
    /// Number to dial.
    pub phone_number: String,
    /// Sub-address.
    pub sub_address: String,
}

/// Outgoing-Call-Reply payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutCallReply {
    /// Sender's call id.
    pub call_id: u16,
    /// Call id from the request.
    pub peer_call_id: u16,
    /// Result code.
    pub result: u8,
    /// General error code.
    pub error: u8,
    /// Cause code.
    pub cause: u16,
    /// Connect speed.
    pub connect_speed: u32,
    /// Packet receive window.
    pub recv_window: u16,
    /// Packet processing delay.
    pub processing_delay: u16,
    /// Physical channel id.
    pub physical_channel: u32,
}

/// Incoming-Call-Request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InCallRequest {
    /// Sender's call id.
    pub call_id: u16,
    /// Call serial number.
    pub serial_number: u16,
    /// Bearer type.
    pub bearer_type: u32,
    /// Physical channel id.
    pub physical_channel: u32,
    /// Length of the dialed number.
    pub dialed_len: u16,
    /// Length of the dialing number.
    pub dialing_len: u16,
    /// Number that was dialed.
    pub dialed_number: String,
    /// Number of the calling party.
    pub dialing_number: String,
    /// Sub-address.
    pub sub_address: String,
}

/// Incoming-Call-Reply payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InCallReply {
    /// Sender's call id.
    pub call_id: u16,
    /// Call id from the request.
    pub peer_call_id: u16,
    /// Result code.
    pub result: u8,
    /// General error code.
    pub error: u8,
    /// Packet receive window.
    pub recv_window: u16,
    /// Packet processing delay.
    pub processing_delay: u16,
}

/// Incoming-Call-Connected payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InCallConnected {
    /// Receiver's call id.
    pub peer_call_id: u16,
    /// Connect speed.
    pub connect_speed: u32,
    /// Packet receive window.
    pub recv_window: u16,
    /// Packet processing delay.
    pub processing_delay: u16,
    /// Framing type.
    pub framing_type: u32,
}

/// Call-Clear-Request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallClearRequest {
    /// Call id assigned by the network server.
    pub call_id: u16,
}

/// Call-Disconnect-Notify payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallDiscNotify {
    /// Call id assigned by the access concentrator.
    pub call_id: u16,
    /// Result code.
    pub result: u8,
    /// General error code.
    pub error: u8,
    /// Cause code.
    pub cause: u16,
    /// Free-form call statistics.
    pub stats: String,
}

/// WAN-Error-Notify payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WanErrorNotify {
    /// Call id assigned by the network server.
    pub call_id: u16,
    /// CRC errors.
    pub crc_errors: u32,
    /// Framing errors.
    pub framing_errors: u32,
    /// Hardware overruns.
    pub hardware_overruns: u32,
    /// Buffer overruns.
    pub buffer_overruns: u32,
    /// Time-out errors.
    pub timeout_errors: u32,
    /// Alignment errors.
    pub alignment_errors: u32,
}

/// Set-Link-Info payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetLinkInfo {
    /// Call id assigned by the access concentrator.
    pub call_id: u16,
    /// Send ACCM.
    pub send_accm: u32,
    /// Receive ACCM.
    pub recv_accm: u32,
}

// =============================================================================
// MESSAGE
// =============================================================================

/// Which call-id field of a message identifies its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallIdField {
    /// The `cid` field.
    CallId,
    /// The `peerCid` field.
    PeerCallId,
}

/// A decoded control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Start-Control-Connection-Request.
    StartControlConnectionRequest(StartControlConnectionRequest),
    /// Start-Control-Connection-Reply.
    StartControlConnectionReply(StartControlConnectionReply),
    /// Stop-Control-Connection-Request.
    StopControlConnectionRequest(StopControlConnectionRequest),
    /// Stop-Control-Connection-Reply.
    StopControlConnectionReply(StopControlConnectionReply),
    /// Echo-Request.
    EchoRequest(EchoRequest),
    /// Echo-Reply.
    EchoReply(EchoReply),
    /// Outgoing-Call-Request.
    OutCallRequest(OutCallRequest),
    /// Outgoing-Call-Reply.
    OutCallReply(OutCallReply),
    /// Incoming-Call-Request.
    InCallRequest(InCallRequest),
    /// Incoming-Call-Reply.
    InCallReply(InCallReply),
    /// Incoming-Call-Connected.
    InCallConnected(InCallConnected),
    /// Call-Clear-Request.
    CallClearRequest(CallClearRequest),
    /// Call-Disconnect-Notify.
    CallDiscNotify(CallDiscNotify),
    /// WAN-Error-Notify.
    WanErrorNotify(WanErrorNotify),
    /// Set-Link-Info.
    SetLinkInfo(SetLinkInfo),
}

impl Message {
    /// Type code of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::StartControlConnectionRequest(_) => MessageType::StartControlConnectionRequest,
            Self::StartControlConnectionReply(_) => MessageType::StartControlConnectionReply,
            Self::StopControlConnectionRequest(_) => MessageType::StopControlConnectionRequest,
            Self::StopControlConnectionReply(_) => MessageType::StopControlConnectionReply,
            Self::EchoRequest(_) => MessageType::EchoRequest,
            Self::EchoReply(_) => MessageType::EchoReply,
            Self::OutCallRequest(_) => MessageType::OutCallRequest,
            Self::OutCallReply(_) => MessageType::OutCallReply,
            Self::InCallRequest(_) => MessageType::InCallRequest,
            Self::InCallReply(_) => MessageType::InCallReply,
            Self::InCallConnected(_) => MessageType::InCallConnected,
            Self::CallClearRequest(_) => MessageType::CallClearRequest,
            Self::CallDiscNotify(_) => MessageType::CallDiscNotify,
            Self::WanErrorNotify(_) => MessageType::WanErrorNotify,
            Self::SetLinkInfo(_) => MessageType::SetLinkInfo,
        }
    }

    /// Value of a call-id field, if this message carries it.
    pub fn call_id_field(&self, field: CallIdField) -> Option<u16> {
        match (self, field) {
            (Self::OutCallRequest(m), CallIdField::CallId) => Some(m.call_id),
            (Self::OutCallReply(m), CallIdField::CallId) => Some(m.call_id),
            (Self::OutCallReply(m), CallIdField::PeerCallId) => Some(m.peer_call_id),
            (Self::InCallRequest(m), CallIdField::CallId) => Some(m.call_id),
            (Self::InCallReply(m), CallIdField::CallId) => Some(m.call_id),
            (Self::InCallReply(m), CallIdField::PeerCallId) => Some(m.peer_call_id),
            (Self::InCallConnected(m), CallIdField::PeerCallId) => Some(m.peer_call_id),
            (Self::CallClearRequest(m), CallIdField::CallId) => Some(m.call_id),
            (Self::CallDiscNotify(m), CallIdField::CallId) => Some(m.call_id),
            (Self::WanErrorNotify(m), CallIdField::CallId) => Some(m.call_id),
            (Self::SetLinkInfo(m), CallIdField::CallId) => Some(m.call_id),
            _ => None,
        }
    }

    /// Encode header and payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new(self.message_type());
        match self {
            Self::StartControlConnectionRequest(m) => w
                .u16(m.protocol_version)
                .zero(2)
                .u32(m.framing_capabilities)
                .u32(m.bearer_capabilities)
                .u16(m.max_channels)
                .u16(m.firmware_revision)
                .text(&m.host_name, HOSTNAME_LEN)
                .text(&m.vendor, VENDOR_LEN),
            Self::StartControlConnectionReply(m) => w
                .u16(m.protocol_version)
                .u8(m.result)
                .u8(m.error)
                .u32(m.framing_capabilities)
                .u32(m.bearer_capabilities)
                .u16(m.max_channels)
                .u16(m.firmware_revision)
                .text(&m.host_name, HOSTNAME_LEN)
                .text(&m.vendor, VENDOR_LEN),
            Self::StopControlConnectionRequest(m) => w.u8(m.reason).zero(3),
            Self::StopControlConnectionReply(m) => w.u8(m.result).u8(m.error).zero(2),
            Self::EchoRequest(m) => w.u32(m.id),
            Self::EchoReply(m) => w.u32(m.id).u8(m.result).u8(m.error).zero(2),
            Self::OutCallRequest(m) => w
                .u16(m.call_id)
                .u16(m.serial_number)
                .u32(m.min_bps)
                .u32(m.max_bps)
                .u32(m.bearer_type)
                .u32(m.framing_type)
                .u16(m.recv_window)
                .u16(m.processing_delay)
                .u16(m.phone_number_len)
                .zero(2)
                .text(&m.phone_number, PHONE_LEN)
                .text(&m.sub_address, SUBADDR_LEN),
            Self::OutCallReply(m) => w
                .u16(m.call_id)
                .u16(m.peer_call_id)
                .u8(m.result)
                .u8(m.error)
                .u16(m.cause)
                .u32(m.connect_speed)
                .u16(m.recv_window)
                .u16(m.processing_delay)
                .u32(m.physical_channel),
            Self::InCallRequest(m) => w
                .u16(m.call_id)
                .u16(m.serial_number)
                .u32(m.bearer_type)
                .u32(m.physical_channel)
                .u16(m.dialed_len)
                .u16(m.dialing_len)
                .text(&m.dialed_number, PHONE_LEN)
                .text(&m.dialing_number, PHONE_LEN)
                .text(&m.sub_address, SUBADDR_LEN),
            Self::InCallReply(m) => w
                .u16(m.call_id)
                .u16(m.peer_call_id)
                .u8(m.result)
                .u8(m.error)
                .u16(m.recv_window)
                .u16(m.processing_delay)
                .zero(2),
            Self::InCallConnected(m) => w
                .u16(m.peer_call_id)
                .zero(2)
                .u32(m.connect_speed)
                .u16(m.recv_window)
                .u16(m.processing_delay)
                .u32(m.framing_type),
            Self::CallClearRequest(m) => w.u16(m.call_id).zero(2),
            Self::CallDiscNotify(m) => w
                .u16(m.call_id)
                .u8(m.result)
                .u8(m.error)
                .u16(m.cause)
                .zero(2)
                .text(&m.stats, STATS_LEN),
            Self::WanErrorNotify(m) => w
                .u16(m.call_id)
                .zero(2)
                .u32(m.crc_errors)
                .u32(m.framing_errors)
                .u32(m.hardware_overruns)
                .u32(m.buffer_overruns)
                .u32(m.timeout_errors)
                .u32(m.alignment_errors),
            Self::SetLinkInfo(m) => w
                .u16(m.call_id)
                .zero(2)
                .u32(m.send_accm)
                .u32(m.recv_accm),
        };
        w.finish()
    }

    /// Decode a complete message, header included.
    ///
    /// Trailing bytes past the declared length are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let header = Header::decode(data)?;
        let msg_type = header.validate()?;
        let end = usize::from(header.length);
        if data.len() < end {
            return Err(DecodeError::Truncated {
                expected: end,
                actual: data.len(),
            });
        }
        Self::decode_payload(msg_type, &data[HEADER_SIZE..end])
    }

    /// Decode a payload of a known type.
    pub fn decode_payload(msg_type: MessageType, payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(msg_type, payload)?;
        let msg = match msg_type {
            MessageType::StartControlConnectionRequest => {
                let protocol_version = r.u16();
                r.skip(2);
                Self::StartControlConnectionRequest(StartControlConnectionRequest {
                    protocol_version,
                    framing_capabilities: r.u32(),
                    bearer_capabilities: r.u32(),
                    max_channels: r.u16(),
                    firmware_revision: r.u16(),
                    host_name: r.text(HOSTNAME_LEN),
                    vendor: r.text(VENDOR_LEN),
                })
            }
            MessageType::StartControlConnectionReply => {
                Self::StartControlConnectionReply(StartControlConnectionReply {
                    protocol_version: r.u16(),
                    result: r.u8(),
                    error: r.u8(),
                    framing_capabilities: r.u32(),
                    bearer_capabilities: r.u32(),
                    max_channels: r.u16(),
                    firmware_revision: r.u16(),
                    host_name: r.text(HOSTNAME_LEN),
                    vendor: r.text(VENDOR_LEN),
                })
            }
            MessageType::StopControlConnectionRequest => {
                Self::StopControlConnectionRequest(StopControlConnectionRequest { reason: r.u8() })
            }
            MessageType::StopControlConnectionReply => {
                Self::StopControlConnectionReply(StopControlConnectionReply {
                    result: r.u8(),
                    error: r.u8(),
                })
            }
            MessageType::EchoRequest => Self::EchoRequest(EchoRequest { id: r.u32() }),
            MessageType::EchoReply => Self::EchoReply(EchoReply {
                id: r.u32(),
                result: r.u8(),
                error: r.u8(),
            }),
            MessageType::OutCallRequest => {
                let call_id = r.u16();
                let serial_number = r.u16();
                let min_bps = r.u32();
                let max_bps = r.u32();
                let bearer_type = r.u32();
                let framing_type = r.u32();
                let recv_window = r.u16();
                let processing_delay = r.u16();
                let phone_number_len = r.u16();
                r.skip(2);
                Self::OutCallRequest(OutCallRequest {
                    call_id,
                    serial_number,
                    min_bps,
                    max_bps,
                    bearer_type,
                    framing_type,
                    recv_window,
                    processing_delay,
                    phone_number_len,
                    phone_number: r.text(PHONE_LEN),
                    sub_address: r.text(SUBADDR_LEN),
                })
            }
            MessageType::OutCallReply => Self::OutCallReply(OutCallReply {
                call_id: r.u16(),
                peer_call_id: r.u16(),
                result: r.u8(),
                error: r.u8(),
                cause: r.u16(),
                connect_speed: r.u32(),
                recv_window: r.u16(),
                processing_delay: r.u16(),
                physical_channel: r.u32(),
            }),
            MessageType::InCallRequest => Self::InCallRequest(InCallRequest {
                call_id: r.u16(),
                serial_number: r.u16(),
                bearer_type: r.u32(),
                physical_channel: r.u32(),
                dialed_len: r.u16(),
                dialing_len: r.u16(),
                dialed_number: r.text(PHONE_LEN),
                dialing_number: r.text(PHONE_LEN),
                sub_address: r.text(SUBADDR_LEN),
            }),
            MessageType::InCallReply => Self::InCallReply(InCallReply {
                call_id: r.u16(),
                peer_call_id: r.u16(),
                result: r.u8(),
                error: r.u8(),
                recv_window: r.u16(),
                processing_delay: r.u16(),
            }),
            MessageType::InCallConnected => {
                let peer_call_id = r.u16();
                r.skip(2);
                Self::InCallConnected(InCallConnected {
                    peer_call_id,
                    connect_speed: r.u32(),
                    recv_window: r.u16(),
                    processing_delay: r.u16(),
                    framing_type: r.u32(),
                })
            }
            MessageType::CallClearRequest => {
                Self::CallClearRequest(CallClearRequest { call_id: r.u16() })
            }
            MessageType::CallDiscNotify => {
                let call_id = r.u16();
                let result = r.u8();
                let error = r.u8();
                let cause = r.u16();
                r.skip(2);
                Self::CallDiscNotify(CallDiscNotify {
                    call_id,
                    result,
                    error,
                    cause,
                    stats: r.text(STATS_LEN),
                })
            }
            MessageType::WanErrorNotify => {
                let call_id = r.u16();
                r.skip(2);
                Self::WanErrorNotify(WanErrorNotify {
                    call_id,
                    crc_errors: r.u32(),
                    framing_errors: r.u32(),
                    hardware_overruns: r.u32(),
                    buffer_overruns: r.u32(),
                    timeout_errors: r.u32(),
                    alignment_errors: r.u32(),
                })
            }
            MessageType::SetLinkInfo => {
                let call_id = r.u16();
                r.skip(2);
                Self::SetLinkInfo(SetLinkInfo {
                    call_id,
                    send_accm: r.u32(),
                    recv_accm: r.u32(),
                })
            }
        };
        Ok(msg)
    }
}
