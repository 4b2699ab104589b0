//! Stream reassembly of control messages.
//!
//! TCP delivers the control stream in arbitrary chunks. [`FrameDecoder`]
//! buffers them and yields one raw frame at a time. The header is validated
//! as soon as it is complete, so a bogus length can never make the decoder
//! wait for (or buffer) more than the largest legal message.

use super::header::Header;
use super::layout;
use super::message::{Message, MessageType};
use crate::core::constants::{HEADER_SIZE, MAX_MESSAGE_SIZE};
use crate::core::error::DecodeError;

/// A complete, header-validated frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Parsed header.
    pub header: Header,
    /// Validated message type.
    pub msg_type: MessageType,
    /// Payload bytes, exactly as long as the type's layout.
    pub payload: Vec<u8>,
}

impl RawFrame {
    /// Names of reserved fields that are non-zero, header included.
    pub fn reserved_violations(&self) -> Vec<&'static str> {
        let mut bad = Vec::new();
        if self.header.reserved != 0 {
            bad.push("hdr.resv0");
        }
        bad.extend(layout::reserved_violations(
            layout::fields(self.msg_type),
            &self.payload,
        ));
        bad
    }

    /// Decode the payload into a typed message.
    pub fn message(&self) -> Result<Message, DecodeError> {
        Message::decode_payload(self.msg_type, &self.payload)
    }

    /// Diagnostic dump of the payload.
    pub fn dump(&self) -> Vec<String> {
        layout::dump(layout::fields(self.msg_type), &self.payload)
    }
}

/// Incremental frame decoder for one control connection.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    header: Option<(Header, MessageType)>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(MAX_MESSAGE_SIZE),
            header: None,
        }
    }

    /// Append bytes read from the stream.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, `Ok(None)` if more bytes are needed.
    ///
    /// An error poisons the stream; the caller must drop the connection.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>, DecodeError> {
        let (header, msg_type) = match self.header {
            Some(parsed) => parsed,
            None => {
                if self.buf.len() < HEADER_SIZE {
                    return Ok(None);
                }
                let header = Header::decode(&self.buf)?;
                let msg_type = header.validate()?;
                self.header = Some((header, msg_type));
                (header, msg_type)
            }
        };

        let total = usize::from(header.length);
        if self.buf.len() < total {
            return Ok(None);
        }

        let payload = self.buf[HEADER_SIZE..total].to_vec();
        self.buf.drain(..total);
        self.header = None;
        Ok(Some(RawFrame {
            header,
            msg_type,
            payload,
        }))
    }
}
