//! Field layout table for control messages.
//!
//! Each message type has a fixed list of named fields. The table is the
//! single source of message lengths and drives the reserved-field check and
//! the diagnostic dump. Fields whose name starts with `resv` are reserved and
//! must be zero on the wire.

use std::fmt::Write as _;

use super::message::MessageType;
use crate::core::constants::{HEADER_SIZE, HOSTNAME_LEN, PHONE_LEN, STATS_LEN, SUBADDR_LEN, VENDOR_LEN};

/// One field of a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Field name as shown in dumps.
    pub name: &'static str,
    /// Width in bytes: 1, 2 or 4 for integers, anything else is a text block.
    pub len: usize,
}

impl Field {
    const fn new(name: &'static str, len: usize) -> Self {
        Self { name, len }
    }

    /// Whether this field is reserved.
    pub fn is_reserved(&self) -> bool {
        self.name.starts_with(RESERVED_PREFIX)
    }
}

/// Prefix shared by all reserved field names.
pub const RESERVED_PREFIX: &str = "resv";

/// Layout of the message header.
pub const HEADER: &[Field] = &[
    Field::new("len", 2),
    Field::new("msgType", 2),
    Field::new("magic", 4),
    Field::new("type", 2),
    Field::new("resv0", 2),
];

const START_CTRL_CONN_REQUEST: &[Field] = &[
    Field::new("vers", 2),
    Field::new("resv0", 2),
    Field::new("frameCap", 4),
    Field::new("bearCap", 4),
    Field::new("maxChan", 2),
    Field::new("firm", 2),
    Field::new("host", HOSTNAME_LEN),
    Field::new("vend", VENDOR_LEN),
];

const START_CTRL_CONN_REPLY: &[Field] = &[
    Field::new("vers", 2),
    Field::new("result", 1),
    Field::new("err", 1),
    Field::new("frameCap", 4),
    Field::new("bearCap", 4),
    Field::new("maxChan", 2),
    Field::new("firm", 2),
    Field::new("host", HOSTNAME_LEN),
    Field::new("vend", VENDOR_LEN),
];

const STOP_CTRL_CONN_REQUEST: &[Field] = &[
    Field::new("reason", 1),
    Field::new("resv0", 1),
    Field::new("resv1", 2),
];

const STOP_CTRL_CONN_REPLY: &[Field] = &[
    Field::new("result", 1),
    Field::new("err", 1),
    Field::new("resv0", 2),
];

const ECHO_REQUEST: &[Field] = &[Field::new("id", 4)];

const ECHO_REPLY: &[Field] = &[
    Field::new("id", 4),
    Field::new("result", 1),
    Field::new("err", 1),
    Field::new("ignore", 2),
];

const OUT_CALL_REQUEST: &[Field] = &[
    Field::new("cid", 2),
    Field::new("serno", 2),
    Field::new("minBPS", 4),
    Field::new("maxBPS", 4),
    Field::new("bearType", 4),
    Field::new("frameType", 4),
    Field::new("recvWin", 2),
    Field::new("ppd", 2),
    Field::new("numLen", 2),
    Field::new("resv0", 2),
    Field::new("phone", PHONE_LEN),
    Field::new("subaddr", SUBADDR_LEN),
];

const OUT_CALL_REPLY: &[Field] = &[
    Field::new("cid", 2),
    Field::new("peerCid", 2),
    Field::new("result", 1),
    Field::new("err", 1),
    Field::new("cause", 2),
    Field::new("speed", 4),
    Field::new("recvWin", 2),
    Field::new("ppd", 2),
    Field::new("channel", 4),
];

const IN_CALL_REQUEST: &[Field] = &[
    Field::new("cid", 2),
    Field::new("serno", 2),
    Field::new("bearType", 4),
    Field::new("channel", 4),
    Field::new("dialedLen", 2),
    Field::new("dialingLen", 2),
    Field::new("dialed", PHONE_LEN),
    Field::new("dialing", PHONE_LEN),
    Field::new("subaddr", SUBADDR_LEN),
];

const IN_CALL_REPLY: &[Field] = &[
    Field::new("cid", 2),
    Field::new("peerCid", 2),
    Field::new("result", 1),
    Field::new("err", 1),
    Field::new("recvWin", 2),
    Field::new("ppd", 2),
    Field::new("resv0", 2),
];

const IN_CALL_CONNECTED: &[Field] = &[
    Field::new("peerCid", 2),
    Field::new("resv0", 2),
    Field::new("speed", 4),
    Field::new("recvWin", 2),
    Field::new("ppd", 2),
    Field::new("frameType", 4),
];

const CALL_CLEAR_REQUEST: &[Field] = &[Field::new("cid", 2), Field::new("resv0", 2)];

const CALL_DISC_NOTIFY: &[Field] = &[
    Field::new("cid", 2),
    Field::new("result", 1),
    Field::new("err", 1),
    Field::new("cause", 2),
    Field::new("resv0", 2),
    Field::new("stats", STATS_LEN),
];

const WAN_ERROR_NOTIFY: &[Field] = &[
    Field::new("cid", 2),
    Field::new("resv0", 2),
    Field::new("crc", 4),
    Field::new("frame", 4),
    Field::new("hdw", 4),
    Field::new("ovfl", 4),
    Field::new("timeout", 4),
    Field::new("align", 4),
];

const SET_LINK_INFO: &[Field] = &[
    Field::new("cid", 2),
    Field::new("resv0", 2),
    Field::new("sendAccm", 4),
    Field::new("recvAccm", 4),
];

/// Field layout of a message type.
pub fn fields(msg_type: MessageType) -> &'static [Field] {
    match msg_type {
        MessageType::StartControlConnectionRequest => START_CTRL_CONN_REQUEST,
        MessageType::StartControlConnectionReply => START_CTRL_CONN_REPLY,
        MessageType::StopControlConnectionRequest => STOP_CTRL_CONN_REQUEST,
        MessageType::StopControlConnectionReply => STOP_CTRL_CONN_REPLY,
        MessageType::EchoRequest => ECHO_REQUEST,
        MessageType::EchoReply => ECHO_REPLY,
        MessageType::OutCallRequest => OUT_CALL_REQUEST,
        MessageType::OutCallReply => OUT_CALL_REPLY,
        MessageType::InCallRequest => IN_CALL_REQUEST,
        MessageType::InCallReply => IN_CALL_REPLY,
        MessageType::InCallConnected => IN_CALL_CONNECTED,
        MessageType::CallClearRequest => CALL_CLEAR_REQUEST,
        MessageType::CallDiscNotify => CALL_DISC_NOTIFY,
        MessageType::WanErrorNotify => WAN_ERROR_NOTIFY,
        MessageType::SetLinkInfo => SET_LINK_INFO,
    }
}

/// Payload length (without header) of a message type.
pub fn payload_len(msg_type: MessageType) -> usize {
    fields(msg_type).iter().map(|f| f.len).sum()
}

/// Names of reserved fields that are not zero in `payload`.
///
/// `payload` must be exactly as long as the layout.
pub fn reserved_violations(layout: &'static [Field], payload: &[u8]) -> Vec<&'static str> {
    let mut bad = Vec::new();
    let mut off = 0;
    for field in layout {
        let end = off + field.len;
        if field.is_reserved() && payload.get(off..end).is_some_and(|b| b.iter().any(|&x| x != 0)) {
            bad.push(field.name);
        }
        off = end;
    }
    bad
}

const DUMP_LINE_WIDTH: usize = 65;
const DUMP_MAX_DECIMAL: u32 = 100;

/// Render a raw payload (or header) as `name=value` lines for diagnostics.
///
/// Reserved fields are skipped, integers up to 100 print in decimal and larger
/// ones in hex, text blocks print quoted up to the first NUL.
pub fn dump(layout: &'static [Field], payload: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut off = 0;
    for field in layout {
        let end = off + field.len;
        let Some(data) = payload.get(off..end) else {
            break;
        };
        off = end;
        if field.is_reserved() {
            continue;
        }

        let mut item = format!(" {}=", field.name);
        match field.len {
            1 => {
                let _ = write!(item, "{}", data[0]);
            }
            2 | 4 => {
                let value = data.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
                if value <= DUMP_MAX_DECIMAL {
                    let _ = write!(item, "{value}");
                } else {
                    let _ = write!(item, "{value:#x}");
                }
            }
            _ => {
                let text = data.split(|&b| b == 0).next().unwrap_or_default();
                let _ = write!(item, "\"{}\"", String::from_utf8_lossy(text));
            }
        }

        if !line.is_empty() && line.len() + item.len() > DUMP_LINE_WIDTH {
            lines.push(std::mem::take(&mut line));
        }
        line.push_str(&item);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}
