//! Session-layer messages
//!
//! Every framed payload starts with a 3-byte header: the session id
//! (`u16`, little endian) and a message type. A session id is assembled in
//! two halves during the handshake: the low byte is the host's nonce, the
//! high byte the device's.

use crate::error::{Error, Result};

/// Size of [`SessionHeader`] on the wire
pub const HEADER_LEN: usize = 3;

/// Session id used by log messages sent outside any session
pub const UNSESSIONED_ID: u16 = 0;

/// Kind of a session-layer message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Handshake request or reply
    StartSession = 0x00,
    /// Free-form log text from the device
    Log = 0x01,
    /// Device confirms the session after the handshake
    SessionEstablished = 0x02,
    /// Payload for the RPC layer
    NormalTraffic = 0x10,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::StartSession),
            0x01 => Ok(Self::Log),
            0x02 => Ok(Self::SessionEstablished),
            0x10 => Ok(Self::NormalTraffic),
            other => Err(Error::Protocol(format!("unknown message type {:#04x}", other))),
        }
    }
}

/// Header carried by every message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHeader {
    /// Session the message belongs to
    pub session_id: u16,
    /// Kind of message
    pub message_type: MessageType,
}

impl SessionHeader {
    /// Wire representation
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let id = self.session_id.to_le_bytes();
        [id[0], id[1], self.message_type as u8]
    }
}

/// A decoded session-layer message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message header
    pub header: SessionHeader,
    /// Bytes following the header
    pub body: Vec<u8>,
}

impl Message {
    /// Build a message
    pub fn new(session_id: u16, message_type: MessageType, body: impl Into<Vec<u8>>) -> Self {
        Self {
            header: SessionHeader {
                session_id,
                message_type,
            },
            body: body.into(),
        }
    }

    /// Serialize header and body into one payload
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse a payload produced by [`Message::encode`]
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < HEADER_LEN {
            return Err(Error::Protocol(format!(
                "message of {} bytes is shorter than its header",
                payload.len()
            )));
        }
        Ok(Self {
            header: SessionHeader {
                session_id: u16::from_le_bytes([payload[0], payload[1]]),
                message_type: MessageType::try_from(payload[2])?,
            },
            body: payload[HEADER_LEN..].to_vec(),
        })
    }

    /// Whether this is a log message that may arrive outside a session
    pub fn is_unsessioned_log(&self) -> bool {
        self.header.session_id == UNSESSIONED_ID && self.header.message_type == MessageType::Log
    }
}

/// Advance a handshake nonce; never yields zero
pub fn next_nonce(nonce: u8) -> u8 {
    let next = nonce.rotate_left(5).wrapping_add(1);
    if next == 0 {
        1
    } else {
        next
    }
}

/// Host half of a session id
pub fn host_nonce(session_id: u16) -> u8 {
    (session_id & 0xff) as u8
}

/// Device half of a session id
pub fn device_nonce(session_id: u16) -> u8 {
    (session_id >> 8) as u8
}

/// Combine both halves into a session id
pub fn session_id(host: u8, device: u8) -> u16 {
    u16::from(host) | (u16::from(device) << 8)
}

/// Whether `id` is a fresh host request: host half set, device half empty
pub fn is_start_request(id: u16) -> bool {
    host_nonce(id) != 0 && device_nonce(id) == 0
}
