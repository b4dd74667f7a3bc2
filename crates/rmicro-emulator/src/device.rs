//! Device half of the session protocol, in memory

use std::collections::VecDeque;

use rmicro_core::error::{Error, Result};
use rmicro_core::session::framing::{Framer, UnframeEvent, Unframer};
use rmicro_core::session::protocol::{
    is_start_request, next_nonce, session_id, Message, MessageType, UNSESSIONED_ID,
};

/// Configuration for the emulated device
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Seed for the device half of session ids
    pub nonce_seed: u8,
    /// Answer start-session requests at all
    pub reply_to_start: bool,
    /// Follow the start-session reply with `SessionEstablished`
    pub confirm: bool,
    /// Log line queued on every reset, the way a device prints at boot
    pub banner: Option<String>,
    /// Produces the reply to each normal-traffic body (`None` for no reply)
    pub on_traffic: fn(&[u8]) -> Option<Vec<u8>>,
}

fn echo(body: &[u8]) -> Option<Vec<u8>> {
    Some(body.to_vec())
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            nonce_seed: 0x5A,
            reply_to_start: true,
            confirm: true,
            banner: None,
            on_traffic: echo,
        }
    }
}

/// Where the emulated device is in the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// No session
    Reset,
    /// Replied to a start request but not confirmed
    StartSessionSent(u16),
    /// Session confirmed
    Established(u16),
}

/// In-memory device speaking the framed session protocol
///
/// Bytes written by the host go into [`EmulatedDevice::receive`]; bytes the
/// device sends back are drained with [`EmulatedDevice::take`].
#[derive(Debug)]
pub struct EmulatedDevice {
    config: EmulatorConfig,
    state: DeviceState,
    nonce: u8,
    framer: Framer,
    unframer: Unframer,
    outgoing: VecDeque<u8>,
    traffic: Vec<Vec<u8>>,
}

impl EmulatedDevice {
    fn blank(config: EmulatorConfig) -> Self {
        Self {
            nonce: config.nonce_seed,
            config,
            state: DeviceState::Reset,
            framer: Framer::new(),
            unframer: Unframer::new(),
            outgoing: VecDeque::new(),
            traffic: Vec::new(),
        }
    }

    /// Create a device with the given configuration, freshly reset
    pub fn new(config: EmulatorConfig) -> Result<Self> {
        let mut device = Self::blank(config);
        device.reset()?;
        Ok(device)
    }

    /// Create a device that answers and confirms every handshake and echoes
    /// traffic
    pub fn new_default() -> Self {
        Self::blank(EmulatorConfig::default())
    }

    /// Forget the session and any buffered bytes, then queue the banner
    pub fn reset(&mut self) -> Result<()> {
        self.state = DeviceState::Reset;
        self.framer.reset();
        self.unframer = Unframer::new();
        self.outgoing.clear();
        if let Some(banner) = self.config.banner.clone() {
            self.log(&banner)?;
        }
        Ok(())
    }

    /// Current handshake state
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Id of the confirmed session, if any
    pub fn session_id(&self) -> Option<u16> {
        match self.state {
            DeviceState::Established(id) => Some(id),
            _ => None,
        }
    }

    /// Normal-traffic bodies received on the established session
    pub fn traffic(&self) -> &[Vec<u8>] {
        &self.traffic
    }

    /// Bytes waiting for the host
    pub fn pending(&self) -> usize {
        self.outgoing.len()
    }

    /// Drain up to `max` bytes destined for the host
    pub fn take(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.outgoing.len());
        self.outgoing.drain(..n).collect()
    }

    /// Queue a log line outside any session
    pub fn log(&mut self, text: &str) -> Result<()> {
        self.queue(&Message::new(UNSESSIONED_ID, MessageType::Log, text.as_bytes()))
    }

    /// Send device-initiated traffic on the established session
    pub fn send_traffic(&mut self, body: &[u8]) -> Result<()> {
        let id = self
            .session_id()
            .ok_or_else(|| Error::Protocol("emulated device has no session".into()))?;
        self.queue(&Message::new(id, MessageType::NormalTraffic, body))
    }

    /// Feed bytes written by the host
    pub fn receive(&mut self, bytes: &[u8]) -> Result<()> {
        for event in self.unframer.feed(bytes) {
            match event {
                UnframeEvent::Packet(payload) => match Message::decode(&payload) {
                    Ok(msg) => self.handle(msg)?,
                    Err(e) => log::debug!("Emulator: discarding packet: {}", e),
                },
                UnframeEvent::BadCrc { .. } => {
                    log::debug!("Emulator: discarding packet with bad CRC")
                }
                UnframeEvent::Dropped(reason) => {
                    log::debug!("Emulator: dropped partial packet: {}", reason)
                }
            }
        }
        Ok(())
    }

    fn handle(&mut self, msg: Message) -> Result<()> {
        let id = msg.header.session_id;
        match msg.header.message_type {
            MessageType::StartSession if is_start_request(id) => {
                if !self.config.reply_to_start {
                    log::trace!("Emulator: ignoring start request {:#06x}", id);
                    return Ok(());
                }
                self.nonce = next_nonce(self.nonce);
                let full = session_id(id as u8, self.nonce);
                self.traffic.clear();
                self.queue(&Message::new(full, MessageType::StartSession, Vec::new()))?;
                if self.config.confirm {
                    self.queue(&Message::new(full, MessageType::SessionEstablished, Vec::new()))?;
                    self.state = DeviceState::Established(full);
                } else {
                    self.state = DeviceState::StartSessionSent(full);
                }
                log::debug!("Emulator: {:?}", self.state);
            }
            MessageType::NormalTraffic if self.session_id() == Some(id) => {
                let reply = (self.config.on_traffic)(&msg.body);
                self.traffic.push(msg.body);
                if let Some(reply) = reply {
                    self.queue(&Message::new(id, MessageType::NormalTraffic, reply))?;
                }
            }
            other => log::trace!("Emulator: ignoring {:?} on session {:#06x}", other, id),
        }
        Ok(())
    }

    fn queue(&mut self, msg: &Message) -> Result<()> {
        let wire = self.framer.frame(&msg.encode())?;
        self.outgoing.extend(wire);
        Ok(())
    }
}

impl Default for EmulatedDevice {
    fn default() -> Self {
        Self::new_default()
    }
}
