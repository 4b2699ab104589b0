//! Control message header.

use super::layout;
use super::message::MessageType;
use crate::core::constants::{CONTROL_MESSAGE, HEADER_SIZE, MAGIC_COOKIE};
use crate::core::error::DecodeError;

/// Fixed header preceding every control message.
///
/// Wire format (network byte order):
/// ```text
/// +0   Length (2 bytes, header included)
/// +2   PPTP Message Type (2 bytes, always 1)
/// +4   Magic Cookie (4 bytes)
/// +8   Control Message Type (2 bytes)
/// +10  Reserved (2 bytes)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total message length including the header.
    pub length: u16,
    /// PPTP message type tag.
    pub tag: u16,
    /// Magic cookie.
    pub magic: u32,
    /// Raw control message type.
    pub msg_type: u16,
    /// Reserved; should be zero.
    pub reserved: u16,
}

impl Header {
    /// Header for an outbound message of the given type.
    pub fn for_type(msg_type: MessageType) -> Self {
        Self {
            length: (HEADER_SIZE + layout::payload_len(msg_type)) as u16,
            tag: CONTROL_MESSAGE,
            magic: MAGIC_COOKIE,
            msg_type: msg_type as u16,
            reserved: 0,
        }
    }

    /// Encode to wire format.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.length.to_be_bytes());
        buf[2..4].copy_from_slice(&self.tag.to_be_bytes());
        buf[4..8].copy_from_slice(&self.magic.to_be_bytes());
        buf[8..10].copy_from_slice(&self.msg_type.to_be_bytes());
        buf[10..12].copy_from_slice(&self.reserved.to_be_bytes());
        buf
    }

    /// Parse the raw header without validating it.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < HEADER_SIZE {
            return Err(DecodeError::Truncated {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            length: u16::from_be_bytes([data[0], data[1]]),
            tag: u16::from_be_bytes([data[2], data[3]]),
            magic: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            msg_type: u16::from_be_bytes([data[8], data[9]]),
            reserved: u16::from_be_bytes([data[10], data[11]]),
        })
    }

    /// Validate tag, magic, type and declared length.
    ///
    /// A non-zero reserved word is not an error; callers log it.
    pub fn validate(&self) -> Result<MessageType, DecodeError> {
        if self.tag != CONTROL_MESSAGE {
            return Err(DecodeError::BadTag(self.tag));
        }
        if self.magic != MAGIC_COOKIE {
            return Err(DecodeError::BadMagic(self.magic));
        }
        let msg_type =
            MessageType::from_u16(self.msg_type).ok_or(DecodeError::UnknownType(self.msg_type))?;
        let expected = HEADER_SIZE + layout::payload_len(msg_type);
        if usize::from(self.length) != expected {
            return Err(DecodeError::LengthMismatch {
                msg_type: self.msg_type,
                expected,
                actual: usize::from(self.length),
            });
        }
        Ok(msg_type)
    }

    /// Payload length implied by the length field.
    pub fn payload_len(&self) -> usize {
        usize::from(self.length).saturating_sub(HEADER_SIZE)
    }
}
