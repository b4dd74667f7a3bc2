//! Packet framing over a raw byte stream
//!
//! A packet on the wire looks like:
//!
//! ```text
//! [ESCAPE_NOP] ESCAPE_START PACKET_START | len:u32le | payload | crc:u16le
//! ```
//!
//! Everything after the start marker is escaped: a literal `0xFF` is sent as
//! `0xFF 0xFF`, and `0xFF 0xFE` is a no-op the receiver drops. The CRC covers
//! the unescaped length and payload. The receiver resynchronizes on the next
//! start marker after garbage, a bad CRC or a truncated packet.

use crate::error::{Error, Result};

/// Escape prefix byte
pub const ESCAPE_START: u8 = 0xFF;
/// Escaped no-op, used to flush a receiver's escape state
pub const ESCAPE_NOP: u8 = 0xFE;
/// Escaped packet start marker
pub const PACKET_START: u8 = 0xFD;

/// Initial value for [`crc16`]
pub const CRC16_INIT: u16 = 0xFFFF;

/// Largest payload the unframer accepts by default
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

/// CRC-16/CCITT-FALSE, continuing from `crc`
pub fn crc16(data: &[u8], mut crc: u16) -> u16 {
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn push_escaped(out: &mut Vec<u8>, data: &[u8]) {
    for &b in data {
        out.push(b);
        if b == ESCAPE_START {
            out.push(ESCAPE_START);
        }
    }
}

/// Encodes payloads into packets
#[derive(Debug, Clone)]
pub struct Framer {
    reset: bool,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    /// New framer; its first packet is preceded by a no-op escape
    pub fn new() -> Self {
        Self { reset: true }
    }

    /// Prefix the next packet with a no-op escape again
    ///
    /// Call after the link may have been left mid-packet.
    pub fn reset(&mut self) {
        self.reset = true;
    }

    /// Encode one packet
    pub fn frame(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let len = u32::try_from(payload.len())
            .map_err(|_| {
                Error::Protocol(format!("payload of {} bytes is too large", payload.len()))
            })?
            .to_le_bytes();

        let mut out = Vec::with_capacity(payload.len() + 12);
        if self.reset {
            out.push(ESCAPE_START);
            out.push(ESCAPE_NOP);
        }
        out.push(ESCAPE_START);
        out.push(PACKET_START);

        let crc = crc16(payload, crc16(&len, CRC16_INIT));
        push_escaped(&mut out, &len);
        push_escaped(&mut out, payload);
        push_escaped(&mut out, &crc.to_le_bytes());

        self.reset = false;
        Ok(out)
    }
}

/// Something the unframer recognized in the input stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnframeEvent {
    /// A complete packet with a valid CRC
    Packet(Vec<u8>),
    /// A complete packet whose CRC did not match
    BadCrc {
        /// CRC computed over the received bytes
        computed: u16,
        /// CRC carried by the packet
        received: u16,
    },
    /// A partial packet was abandoned
    Dropped(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FindStart,
    Length,
    Payload(usize),
    Crc(usize),
}

/// Streaming packet decoder
///
/// Feed it arbitrary chunks of the byte stream; complete packets come out as
/// they are finished.
#[derive(Debug, Clone)]
pub struct Unframer {
    state: State,
    escape: bool,
    buf: Vec<u8>,
    max_payload: usize,
}

impl Default for Unframer {
    fn default() -> Self {
        Self::new()
    }
}

impl Unframer {
    /// Decoder accepting payloads up to [`DEFAULT_MAX_PAYLOAD`]
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Decoder with a custom payload limit
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            state: State::FindStart,
            escape: false,
            buf: Vec::new(),
            max_payload,
        }
    }

    /// Whether the decoder is in the middle of a packet
    pub fn in_packet(&self) -> bool {
        self.state != State::FindStart
    }

    /// Consume `data`, returning events in stream order
    pub fn feed(&mut self, data: &[u8]) -> Vec<UnframeEvent> {
        let mut events = Vec::new();
        for &b in data {
            if self.escape {
                self.escape = false;
                match b {
                    ESCAPE_START => self.push_literal(b, &mut events),
                    ESCAPE_NOP => {}
                    PACKET_START => {
                        if self.in_packet() {
                            events.push(UnframeEvent::Dropped("packet restarted"));
                        }
                        self.buf.clear();
                        self.state = State::Length;
                    }
                    _ => {
                        if self.in_packet() {
                            events.push(UnframeEvent::Dropped("invalid escape"));
                            self.state = State::FindStart;
                        }
                    }
                }
            } else if b == ESCAPE_START {
                self.escape = true;
            } else {
                self.push_literal(b, &mut events);
            }
        }
        events
    }

    fn push_literal(&mut self, b: u8, events: &mut Vec<UnframeEvent>) {
        if self.state == State::FindStart {
            return;
        }
        self.buf.push(b);

        match self.state {
            State::Length if self.buf.len() == 4 => {
                let len = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                    as usize;
                if len > self.max_payload {
                    events.push(UnframeEvent::Dropped("payload too large"));
                    self.state = State::FindStart;
                } else if len == 0 {
                    self.state = State::Crc(0);
                } else {
                    self.state = State::Payload(len);
                }
            }
            State::Payload(len) if self.buf.len() == 4 + len => {
                self.state = State::Crc(len);
            }
            State::Crc(len) if self.buf.len() == 4 + len + 2 => {
                let body = &self.buf[..4 + len];
                let computed = crc16(body, CRC16_INIT);
                let received = u16::from_le_bytes([self.buf[4 + len], self.buf[5 + len]]);
                if computed == received {
                    events.push(UnframeEvent::Packet(self.buf[4..4 + len].to_vec()));
                } else {
                    events.push(UnframeEvent::BadCrc { computed, received });
                }
                self.state = State::FindStart;
            }
            _ => {}
        }
    }
}
