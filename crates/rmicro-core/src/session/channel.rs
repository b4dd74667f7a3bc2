//! Channel handle handed to the RPC layer

use std::time::Duration;

use super::clock::Clock;
use super::link::FramedLink;
use super::protocol::{Message, MessageType};
use crate::error::Result;
use crate::transport::{IoOutcome, Transport};

/// Convert a microsecond timeout to a transport timeout
pub fn micros_to_timeout(timeout_us: Option<u64>) -> Option<Duration> {
    timeout_us.map(Duration::from_micros)
}

/// Access to an established session
///
/// The raw `read`/`write` calls pass bytes straight through to the transport
/// and report a timeout as an empty read or zero bytes written. The message
/// calls frame their payload as `NormalTraffic` on the session id.
pub struct ChannelHandle<'a> {
    transport: &'a mut dyn Transport,
    link: &'a mut FramedLink,
    clock: &'a dyn Clock,
    session_id: u16,
}

impl<'a> ChannelHandle<'a> {
    pub(crate) fn new(
        transport: &'a mut dyn Transport,
        link: &'a mut FramedLink,
        clock: &'a dyn Clock,
        session_id: u16,
    ) -> Self {
        Self {
            transport,
            link,
            clock,
            session_id,
        }
    }

    /// Negotiated session id
    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    /// Read up to `max_bytes`; empty on timeout
    pub fn read(&mut self, max_bytes: usize, timeout_us: Option<u64>) -> Result<Vec<u8>> {
        Ok(self
            .transport
            .read(max_bytes, micros_to_timeout(timeout_us))?
            .delivered()
            .unwrap_or_default())
    }

    /// Write a prefix of `data`; zero on timeout
    pub fn write(&mut self, data: &[u8], timeout_us: Option<u64>) -> Result<usize> {
        Ok(self
            .transport
            .write(data, micros_to_timeout(timeout_us))?
            .delivered()
            .unwrap_or(0))
    }

    /// Send one framed message on this session
    pub fn send_message(&mut self, body: &[u8], timeout: Duration) -> Result<IoOutcome<()>> {
        let msg = Message::new(self.session_id, MessageType::NormalTraffic, body.to_vec());
        let deadline = self.clock.now().saturating_add(timeout);
        self.link.send(&mut *self.transport, &msg, deadline, self.clock)
    }

    /// Receive the next message addressed to this session
    ///
    /// Messages for other sessions are dropped.
    pub fn receive_message(&mut self, timeout: Duration) -> Result<IoOutcome<Vec<u8>>> {
        let deadline = self.clock.now().saturating_add(timeout);
        loop {
            match self.link.receive(&mut *self.transport, deadline, self.clock)? {
                IoOutcome::TimedOut => return Ok(IoOutcome::TimedOut),
                IoOutcome::Delivered(msg)
                    if msg.header.session_id == self.session_id
                        && msg.header.message_type == MessageType::NormalTraffic =>
                {
                    return Ok(IoOutcome::Delivered(msg.body));
                }
                IoOutcome::Delivered(msg) => {
                    log::debug!("Dropping message for another session: {:?}", msg.header);
                }
            }
        }
    }
}
