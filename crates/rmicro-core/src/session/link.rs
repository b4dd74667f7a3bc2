//! Framed message exchange over a transport

use std::collections::VecDeque;
use std::time::Duration;

use super::clock::Clock;
use super::framing::{Framer, UnframeEvent, Unframer};
use super::protocol::Message;
use crate::error::Result;
use crate::transport::{IoOutcome, Transport};

/// Log target for messages logged by the device itself
pub const DEVICE_LOG_TARGET: &str = "rmicro::device";

const READ_CHUNK: usize = 256;

/// Framing state for one side of a link
///
/// The link does not own the transport; each call borrows it. Log messages
/// sent by the device outside a session are forwarded to the `log` facade and
/// never returned to the caller.
#[derive(Debug, Default)]
pub struct FramedLink {
    framer: Framer,
    unframer: Unframer,
    inbox: VecDeque<Message>,
}

impl FramedLink {
    /// Fresh link state
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop buffered input and make the next packet start clean
    pub fn reset(&mut self) {
        self.framer.reset();
        self.unframer = Unframer::new();
        self.inbox.clear();
    }

    /// Write `msg` completely before `deadline`
    ///
    /// Returns [`IoOutcome::TimedOut`] if the deadline passes first or the
    /// transport accepts zero bytes.
    pub fn send<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        msg: &Message,
        deadline: Duration,
        clock: &dyn Clock,
    ) -> Result<IoOutcome<()>> {
        let wire = self.framer.frame(&msg.encode())?;
        let mut offset = 0;
        while offset < wire.len() {
            let remaining = deadline.saturating_sub(clock.now());
            if remaining.is_zero() {
                self.framer.reset();
                return Ok(IoOutcome::TimedOut);
            }
            match transport.write(&wire[offset..], Some(remaining))? {
                IoOutcome::Delivered(0) | IoOutcome::TimedOut => {
                    // The receiver may hold a partial packet; start the next one clean
                    self.framer.reset();
                    return Ok(IoOutcome::TimedOut);
                }
                IoOutcome::Delivered(n) => offset += n,
            }
        }
        Ok(IoOutcome::Delivered(()))
    }

    /// Wait for the next message until `deadline`
    pub fn receive<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        deadline: Duration,
        clock: &dyn Clock,
    ) -> Result<IoOutcome<Message>> {
        loop {
            if let Some(msg) = self.inbox.pop_front() {
                return Ok(IoOutcome::Delivered(msg));
            }
            let remaining = deadline.saturating_sub(clock.now());
            if remaining.is_zero() {
                return Ok(IoOutcome::TimedOut);
            }
            match transport.read(READ_CHUNK, Some(remaining))? {
                IoOutcome::TimedOut => return Ok(IoOutcome::TimedOut),
                IoOutcome::Delivered(bytes) => self.ingest(&bytes),
            }
        }
    }

    /// Wait for the next message for at most `timeout`
    pub fn receive_within<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        timeout: Duration,
        clock: &dyn Clock,
    ) -> Result<IoOutcome<Message>> {
        let deadline = clock.now().saturating_add(timeout);
        self.receive(transport, deadline, clock)
    }

    fn ingest(&mut self, bytes: &[u8]) {
        for event in self.unframer.feed(bytes) {
            match event {
                UnframeEvent::Packet(payload) => match Message::decode(&payload) {
                    Ok(msg) if msg.is_unsessioned_log() => {
                        log::info!(
                            target: DEVICE_LOG_TARGET,
                            "{}",
                            String::from_utf8_lossy(&msg.body).trim_end()
                        );
                    }
                    Ok(msg) => self.inbox.push_back(msg),
                    Err(e) => log::debug!("Discarding packet: {}", e),
                },
                UnframeEvent::BadCrc { computed, received } => {
                    log::debug!(
                        "Discarding packet with bad CRC (computed {:#06x}, received {:#06x})",
                        computed,
                        received
                    );
                }
                UnframeEvent::Dropped(reason) => {
                    log::debug!("Discarding partial packet: {}", reason)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::clock::ManualClock;
    use crate::session::protocol::{MessageType, UNSESSIONED_ID};
    use crate::transport::TransportTimeouts;

    /// Feeds canned bytes and records writes; time passes only on timeouts
    struct Canned {
        clock: ManualClock,
        incoming: VecDeque<Vec<u8>>,
        written: Vec<u8>,
        write_limit: usize,
    }

    impl Transport for Canned {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }

        fn read(&mut self, _max: usize, timeout: Option<Duration>) -> Result<IoOutcome<Vec<u8>>> {
            match self.incoming.pop_front() {
                Some(chunk) => Ok(IoOutcome::Delivered(chunk)),
                None => {
                    self.clock.advance(timeout.unwrap_or_default());
                    Ok(IoOutcome::TimedOut)
                }
            }
        }

        fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<IoOutcome<usize>> {
            if self.write_limit == 0 {
                self.clock.advance(timeout.unwrap_or_default());
                return Ok(IoOutcome::TimedOut);
            }
            let n = data.len().min(self.write_limit);
            self.written.extend_from_slice(&data[..n]);
            Ok(IoOutcome::Delivered(n))
        }

        fn timeouts(&self) -> TransportTimeouts {
            TransportTimeouts::default()
        }
    }

    fn canned(write_limit: usize) -> Canned {
        Canned {
            clock: ManualClock::new(),
            incoming: VecDeque::new(),
            written: Vec::new(),
            write_limit,
        }
    }

    #[test]
    fn test_send_in_small_writes() {
        let mut t = canned(3);
        let clock = t.clock.clone();
        let mut link = FramedLink::new();
        let msg = Message::new(7, MessageType::NormalTraffic, b"payload".to_vec());
        let out = link.send(&mut t, &msg, Duration::from_secs(1), &clock).unwrap();
        assert_eq!(out, IoOutcome::Delivered(()));

        let mut rx = Unframer::new();
        let events = rx.feed(&t.written);
        assert_eq!(events, vec![UnframeEvent::Packet(msg.encode())]);
    }

    #[test]
    fn test_send_times_out() {
        let mut t = canned(0);
        let clock = t.clock.clone();
        let mut link = FramedLink::new();
        let msg = Message::new(7, MessageType::StartSession, Vec::new());
        let out = link.send(&mut t, &msg, Duration::from_secs(2), &clock).unwrap();
        assert!(out.is_timed_out());
        assert_eq!(clock.now(), Duration::from_secs(2));
    }

    #[test]
    fn test_receive_skips_device_logs() {
        let mut t = canned(64);
        let clock = t.clock.clone();
        let mut framer = Framer::new();
        let log_msg = Message::new(UNSESSIONED_ID, MessageType::Log, b"booting\n".to_vec());
        let reply = Message::new(0x0102, MessageType::StartSession, Vec::new());
        let mut stream = framer.frame(&log_msg.encode()).unwrap();
        stream.extend(framer.frame(&reply.encode()).unwrap());
        // Split mid-packet to exercise buffering across reads
        let (a, b) = stream.split_at(stream.len() / 2);
        t.incoming.push_back(a.to_vec());
        t.incoming.push_back(b.to_vec());

        let mut link = FramedLink::new();
        let got = link
            .receive_within(&mut t, Duration::from_secs(1), &clock)
            .unwrap();
        assert_eq!(got, IoOutcome::Delivered(reply));
        assert!(link
            .receive_within(&mut t, Duration::from_secs(1), &clock)
            .unwrap()
            .is_timed_out());
        assert_eq!(clock.now(), Duration::from_secs(1));
    }
}
