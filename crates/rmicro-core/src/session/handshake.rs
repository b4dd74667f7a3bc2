//! Host side of the session handshake
//!
//! The host sends `StartSession` with its nonce as the session id and waits
//! for the device to answer with the same low byte and its own nonce in the
//! high byte. Attempts are repeated until the overall start timeout runs out;
//! a timed-out or zero-length write and a read that returns nothing both just
//! end the current attempt. Once a reply is accepted, the device must confirm
//! with `SessionEstablished` within the established timeout.

use std::time::Duration;

use super::clock::Clock;
use super::link::FramedLink;
use super::protocol::{device_nonce, host_nonce, next_nonce, Message, MessageType};
use crate::error::{EstablishFailure, Result};
use crate::transport::{IoOutcome, Transport, TransportTimeouts};

/// Why a handshake gave up, and after how long
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeFailure {
    /// Phase that gave up
    pub failure: EstablishFailure,
    /// Time from the first attempt to giving up
    pub elapsed: Duration,
}

/// Outcome of [`Handshake::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Session established with this id
    Established {
        /// Negotiated session id
        session_id: u16,
        /// Number of start-session attempts made
        attempts: u32,
    },
    /// The handshake gave up
    Failed(HandshakeFailure),
}

/// One handshake run
pub struct Handshake<'a> {
    timeouts: TransportTimeouts,
    clock: &'a dyn Clock,
    nonce: u8,
}

impl<'a> Handshake<'a> {
    /// Prepare a handshake; `seed` is advanced before every attempt
    pub fn new(timeouts: TransportTimeouts, clock: &'a dyn Clock, seed: u8) -> Self {
        Self {
            timeouts,
            clock,
            nonce: seed,
        }
    }

    /// Run the handshake over `transport`
    ///
    /// Hard transport errors are returned as `Err`; timeouts only ever lead to
    /// another attempt or to [`HandshakeOutcome::Failed`].
    pub fn run<T: Transport + ?Sized>(
        &mut self,
        link: &mut FramedLink,
        transport: &mut T,
    ) -> Result<HandshakeOutcome> {
        let started = self.clock.now();
        let start_deadline = started.saturating_add(self.timeouts.session_start_timeout);
        let mut attempts = 0u32;
        // A zero retry bound would never give an attempt any time
        let retry_timeout = if self.timeouts.session_start_retry_timeout.is_zero() {
            self.timeouts.session_start_timeout
        } else {
            self.timeouts.session_start_retry_timeout
        };

        let session_id = loop {
            if self.clock.now() >= start_deadline {
                log::debug!("Handshake: no reply after {} attempt(s)", attempts);
                return Ok(HandshakeOutcome::Failed(HandshakeFailure {
                    failure: EstablishFailure::NoResponse,
                    elapsed: self.clock.now() - started,
                }));
            }

            attempts += 1;
            self.nonce = next_nonce(self.nonce);
            let attempt_deadline = self
                .clock
                .now()
                .saturating_add(retry_timeout)
                .min(start_deadline);
            log::debug!(
                "Handshake: attempt {} with nonce {:#04x}",
                attempts,
                self.nonce
            );

            if let Some(id) = self.attempt(link, transport, attempt_deadline)? {
                break id;
            }
        };

        log::debug!(
            "Handshake: device replied with session id {:#06x}, awaiting confirmation",
            session_id
        );

        let confirm_deadline = self
            .clock
            .now()
            .saturating_add(self.timeouts.session_established_timeout);
        loop {
            match link.receive(transport, confirm_deadline, self.clock)? {
                IoOutcome::TimedOut => {
                    return Ok(HandshakeOutcome::Failed(HandshakeFailure {
                        failure: EstablishFailure::NotConfirmed,
                        elapsed: self.clock.now() - started,
                    }));
                }
                IoOutcome::Delivered(msg)
                    if msg.header.message_type == MessageType::SessionEstablished
                        && msg.header.session_id == session_id =>
                {
                    return Ok(HandshakeOutcome::Established {
                        session_id,
                        attempts,
                    });
                }
                IoOutcome::Delivered(msg) => {
                    log::trace!("Handshake: ignoring {:?} while awaiting confirmation", msg.header);
                }
            }
        }
    }

    /// One request/reply round; `None` means try again
    fn attempt<T: Transport + ?Sized>(
        &self,
        link: &mut FramedLink,
        transport: &mut T,
        deadline: Duration,
    ) -> Result<Option<u16>> {
        let request = Message::new(u16::from(self.nonce), MessageType::StartSession, Vec::new());
        if link.send(transport, &request, deadline, self.clock)?.is_timed_out() {
            log::debug!("Handshake: start-session request not sent");
            return Ok(None);
        }

        loop {
            match link.receive(transport, deadline, self.clock)? {
                IoOutcome::TimedOut => return Ok(None),
                IoOutcome::Delivered(msg) => {
                    let id = msg.header.session_id;
                    if msg.header.message_type == MessageType::StartSession
                        && host_nonce(id) == self.nonce
                        && device_nonce(id) != 0
                    {
                        return Ok(Some(id));
                    }
                    log::trace!("Handshake: ignoring {:?}", msg.header);
                }
            }
        }
    }
}
