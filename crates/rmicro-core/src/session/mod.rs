//! Device sessions
//!
//! A [`Session`] turns a transport into an established channel to the device.
//! It optionally flashes a binary first, opens the transport, runs the
//! handshake, and hands out a [`ChannelHandle`]. The transport is closed
//! exactly once, on every exit path.
//!
//! ```ignore
//! let config = SessionConfig::new("stm32").transport_factory(factory);
//! let mut session = Session::new(config, registry::global())?;
//! let mut channel = session.enter()?;
//! channel.send_message(b"ping", Duration::from_secs(1))?;
//! drop(channel);
//! session.exit()?;
//! ```

mod channel;
mod clock;
pub mod framing;
mod handshake;
mod link;
mod platform;
pub mod protocol;
pub mod registry;

pub use channel::{micros_to_timeout, ChannelHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use handshake::{Handshake, HandshakeFailure, HandshakeOutcome};
pub use link::{FramedLink, DEVICE_LOG_TARGET};
pub use platform::HostPlatform;
pub use registry::{SessionLease, SessionRegistry};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::transport::{
    BoxedTransport, BoxedTransportFactory, Transport, TransportGuard, TransportLogger,
    TransportTimeouts,
};

/// Name of the module every device runtime exposes
pub const SYSTEM_LIBRARY: &str = "runtime.SystemLib";

/// A built binary ready to be flashed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicroBinary {
    path: PathBuf,
}

impl MicroBinary {
    /// Binary at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the binary
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Loads a binary onto a device and yields a way to reach it
pub trait Flasher: Send {
    /// Flash `binary`, returning a factory for the transport to the device
    fn flash(&mut self, binary: &MicroBinary) -> Result<BoxedTransportFactory>;
}

/// Lifecycle of a [`Session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Configured, nothing touched yet
    Init,
    /// Flasher is running
    Flashing,
    /// Transport is being acquired
    TransportOpen,
    /// Handshake is in progress
    Handshaking,
    /// Handshake succeeded
    Established,
    /// A channel handle has been handed out
    Active,
    /// Transport is being released
    Closing,
    /// Transport released
    Closed,
    /// Flashing, transport acquisition or handshake failed
    Failed,
}

impl SessionState {
    /// Short lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Flashing => "flashing",
            Self::TransportOpen => "transport-open",
            Self::Handshaking => "handshaking",
            Self::Established => "established",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    fn is_connected(self) -> bool {
        matches!(self, Self::Established | Self::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle the RPC layer resolves remote functions against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteModuleRef {
    /// Session the module lives in
    pub session_name: String,
    /// Negotiated session id
    pub session_id: u16,
    /// Module name on the device
    pub name: String,
}

/// Everything a session needs before it starts
///
/// Exactly one of a binary plus flasher, or a transport factory, must be
/// given.
pub struct SessionConfig {
    name: String,
    binary: Option<MicroBinary>,
    flasher: Option<Box<dyn Flasher>>,
    transport_factory: Option<BoxedTransportFactory>,
    timeouts: Option<TransportTimeouts>,
    clock: Arc<dyn Clock>,
    platform: HostPlatform,
    nonce_seed: Option<u8>,
}

impl SessionConfig {
    /// Configuration for a session called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binary: None,
            flasher: None,
            transport_factory: None,
            timeouts: None,
            clock: Arc::new(SystemClock::new()),
            platform: HostPlatform::detect(),
            nonce_seed: None,
        }
    }

    /// Binary to flash before connecting
    pub fn binary(mut self, binary: MicroBinary) -> Self {
        self.binary = Some(binary);
        self
    }

    /// Flasher that loads the binary
    pub fn flasher(mut self, flasher: impl Flasher + 'static) -> Self {
        self.flasher = Some(Box::new(flasher));
        self
    }

    /// Connect through an already-flashed device's transport
    pub fn transport_factory(mut self, factory: BoxedTransportFactory) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Override the transport's own timeouts
    pub fn timeouts(mut self, timeouts: TransportTimeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Time source for handshake deadlines
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Host the session is checked against
    pub fn platform(mut self, platform: HostPlatform) -> Self {
        self.platform = platform;
        self
    }

    /// Starting point for the handshake nonce
    pub fn nonce_seed(mut self, seed: u8) -> Self {
        self.nonce_seed = Some(seed);
        self
    }

    /// Session name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn into_source(self) -> Result<(SessionSettings, TransportSource)> {
        let source = match (self.binary, self.flasher, self.transport_factory) {
            (Some(binary), Some(flasher), None) => TransportSource::Flash { binary, flasher },
            (None, None, Some(factory)) => TransportSource::Factory(factory),
            (_, _, Some(_)) => {
                return Err(Error::Config(
                    "give either a binary and flasher or a transport factory, not both".into(),
                ))
            }
            (Some(_), None, None) => {
                return Err(Error::Config("binary given without a flasher".into()))
            }
            (None, Some(_), None) => {
                return Err(Error::Config("flasher given without a binary".into()))
            }
            (None, None, None) => {
                return Err(Error::Config(
                    "a binary and flasher or a transport factory is required".into(),
                ))
            }
        };
        let settings = SessionSettings {
            name: self.name,
            timeouts: self.timeouts,
            clock: self.clock,
            nonce_seed: self.nonce_seed.unwrap_or_else(random_seed),
        };
        Ok((settings, source))
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("name", &self.name)
            .field("binary", &self.binary)
            .field("flasher", &self.flasher.is_some())
            .field("transport_factory", &self.transport_factory.is_some())
            .field("timeouts", &self.timeouts)
            .field("platform", &self.platform)
            .finish()
    }
}

fn random_seed() -> u8 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.subsec_nanos() >> 8) as u8)
        .unwrap_or(1)
}

enum TransportSource {
    Flash {
        binary: MicroBinary,
        flasher: Box<dyn Flasher>,
    },
    Factory(BoxedTransportFactory),
}

struct SessionSettings {
    name: String,
    timeouts: Option<TransportTimeouts>,
    clock: Arc<dyn Clock>,
    nonce_seed: u8,
}

type SessionTransport = TransportGuard<TransportLogger<BoxedTransport>>;

/// An exclusive, established channel to a device
pub struct Session {
    settings: SessionSettings,
    state: SessionState,
    source: Option<TransportSource>,
    lease: Option<SessionLease>,
    transport: Option<SessionTransport>,
    link: FramedLink,
    timeouts: Option<TransportTimeouts>,
    session_id: Option<u16>,
}

impl Session {
    /// Create a session and claim `registry`
    ///
    /// Fails before touching any device resource if the host is unsupported,
    /// the configuration is inconsistent, or another session is active.
    pub fn new(config: SessionConfig, registry: &SessionRegistry) -> Result<Self> {
        config.platform.check()?;
        let (settings, source) = config.into_source()?;
        let lease = registry.acquire(&settings.name)?;
        Ok(Self {
            settings,
            state: SessionState::Init,
            source: Some(source),
            lease: Some(lease),
            transport: None,
            link: FramedLink::new(),
            timeouts: None,
            session_id: None,
        })
    }

    /// Session name
    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated session id, once established
    pub fn session_id(&self) -> Option<u16> {
        self.session_id
    }

    /// Timeouts in effect, once the transport is open
    pub fn timeouts(&self) -> Option<TransportTimeouts> {
        self.timeouts
    }

    /// Flash (if configured), open the transport and establish the session
    pub fn enter(&mut self) -> Result<ChannelHandle<'_>> {
        if self.state != SessionState::Init {
            return Err(Error::InvalidState {
                expected: SessionState::Init.as_str(),
                found: self.state.as_str(),
            });
        }

        let mut factory = match self.source.take() {
            Some(TransportSource::Flash {
                binary,
                mut flasher,
            }) => {
                self.state = SessionState::Flashing;
                log::info!(
                    "{}: flashing {}",
                    self.settings.name,
                    binary.path().display()
                );
                match flasher.flash(&binary) {
                    Ok(factory) => factory,
                    Err(e) => {
                        self.fail(None);
                        return Err(e);
                    }
                }
            }
            Some(TransportSource::Factory(factory)) => factory,
            None => {
                return Err(Error::InvalidState {
                    expected: SessionState::Init.as_str(),
                    found: self.state.as_str(),
                })
            }
        };

        self.state = SessionState::TransportOpen;
        log::debug!("{}: opening {}", self.settings.name, factory.describe());
        let opened = factory.create().and_then(|transport| {
            TransportGuard::open(TransportLogger::new(self.settings.name.clone(), transport))
        });
        let mut transport = match opened {
            Ok(t) => t,
            Err(e) => {
                self.fail(None);
                return Err(e);
            }
        };

        let timeouts = self.settings.timeouts.unwrap_or_else(|| transport.timeouts());
        self.timeouts = Some(timeouts);
        self.state = SessionState::Handshaking;

        let outcome = Handshake::new(timeouts, &*self.settings.clock, self.settings.nonce_seed)
            .run(&mut self.link, &mut *transport);
        match outcome {
            Ok(HandshakeOutcome::Established {
                session_id,
                attempts,
            }) => {
                log::info!(
                    "{}: session {:#06x} established after {} attempt(s)",
                    self.settings.name,
                    session_id,
                    attempts
                );
                self.session_id = Some(session_id);
                self.transport = Some(transport);
                self.state = SessionState::Established;
                self.channel()
            }
            Ok(HandshakeOutcome::Failed(failure)) => {
                self.fail(Some(transport));
                Err(Error::SessionEstablish {
                    session: self.settings.name.clone(),
                    failure: failure.failure,
                    elapsed_ms: failure.elapsed.as_millis(),
                })
            }
            Err(e) => {
                self.fail(Some(transport));
                Err(e)
            }
        }
    }

    /// Channel to an established session
    pub fn channel(&mut self) -> Result<ChannelHandle<'_>> {
        let (Some(transport), Some(session_id)) = (self.transport.as_mut(), self.session_id) else {
            return Err(Error::InvalidState {
                expected: SessionState::Established.as_str(),
                found: self.state.as_str(),
            });
        };
        if !self.state.is_connected() {
            return Err(Error::InvalidState {
                expected: SessionState::Established.as_str(),
                found: self.state.as_str(),
            });
        }
        self.state = SessionState::Active;
        Ok(ChannelHandle::new(
            &mut **transport,
            &mut self.link,
            &*self.settings.clock,
            session_id,
        ))
    }

    /// Reference to the device's system library
    pub fn system_library(&self) -> Result<RemoteModuleRef> {
        match self.session_id {
            Some(session_id) if self.state.is_connected() => Ok(RemoteModuleRef {
                session_name: self.settings.name.clone(),
                session_id,
                name: SYSTEM_LIBRARY.to_string(),
            }),
            _ => Err(Error::InvalidState {
                expected: SessionState::Established.as_str(),
                found: self.state.as_str(),
            }),
        }
    }

    /// Close the transport and release the registry
    ///
    /// Calling this again, or after a failed `enter`, does nothing.
    pub fn exit(&mut self) -> Result<()> {
        if matches!(self.state, SessionState::Closed | SessionState::Failed) {
            return Ok(());
        }
        self.state = SessionState::Closing;
        let result = match self.transport.take() {
            Some(mut transport) => transport.close(),
            None => Ok(()),
        };
        if let Some(mut lease) = self.lease.take() {
            lease.release();
        }
        self.state = SessionState::Closed;
        log::debug!("{}: session closed", self.settings.name);
        result
    }

    fn fail(&mut self, transport: Option<SessionTransport>) {
        if let Some(mut transport) = transport {
            if let Err(e) = transport.close() {
                log::warn!("{}: failed to close transport: {}", self.settings.name, e);
            }
        }
        if let Some(mut lease) = self.lease.take() {
            lease.release();
        }
        self.state = SessionState::Failed;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.exit() {
            log::warn!("{}: error while closing session: {}", self.settings.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::handshake::testing::FakeDevice;
    use super::*;
    use crate::error::EstablishFailure;
    use crate::transport::IoOutcome;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const LINUX64: HostPlatform = HostPlatform::new("linux", 64);

    fn timeouts(retry: u64, start: u64, established: u64) -> TransportTimeouts {
        TransportTimeouts {
            session_start_retry_timeout: Duration::from_secs(retry),
            session_start_timeout: Duration::from_secs(start),
            session_established_timeout: Duration::from_secs(established),
            has_flow_control: false,
        }
    }

    /// Hands out one prepared device
    fn factory_for(device: FakeDevice) -> BoxedTransportFactory {
        let mut device = Some(device);
        Box::new(move || -> Result<BoxedTransport> {
            device
                .take()
                .map(|d| Box::new(d) as BoxedTransport)
                .ok_or_else(|| Error::Transport("device already handed out".into()))
        })
    }

    fn config(name: &str, clock: &ManualClock, device: FakeDevice) -> SessionConfig {
        SessionConfig::new(name)
            .transport_factory(factory_for(device))
            .clock(Arc::new(clock.clone()))
            .platform(LINUX64)
            .nonce_seed(7)
    }

    #[test]
    fn test_establish_and_exchange() {
        let clock = ManualClock::new();
        let device = FakeDevice::new(clock.clone(), timeouts(1, 5, 5));
        let stats = device.stats.clone();
        let registry = SessionRegistry::new();

        let mut session = Session::new(config("echo", &clock, device), &registry).unwrap();
        assert_eq!(session.state(), SessionState::Init);
        assert_eq!(stats.opens(), 0);

        let mut channel = session.enter().unwrap();
        assert_eq!(
            channel.send_message(b"ping", Duration::from_secs(1)).unwrap(),
            IoOutcome::Delivered(())
        );
        assert_eq!(
            channel.receive_message(Duration::from_secs(1)).unwrap(),
            IoOutcome::Delivered(b"ping".to_vec())
        );
        assert_eq!(channel.read(16, Some(1_000)).unwrap(), Vec::<u8>::new());

        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.timeouts(), Some(timeouts(1, 5, 5)));
        let lib = session.system_library().unwrap();
        assert_eq!(lib.name, SYSTEM_LIBRARY);
        assert_eq!(lib.session_name, "echo");
        assert_eq!(Some(lib.session_id), session.session_id());

        session.exit().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(stats.opens(), 1);
        assert_eq!(stats.closes(), 1);
        assert!(!registry.is_active());
    }

    #[test]
    fn test_unbounded_timeouts_do_not_overflow() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(1));
        let t = TransportTimeouts {
            session_start_retry_timeout: Duration::MAX,
            session_start_timeout: Duration::MAX,
            session_established_timeout: Duration::MAX,
            has_flow_control: true,
        };
        let device = FakeDevice::new(clock.clone(), t);
        let registry = SessionRegistry::new();

        let mut session = Session::new(config("unbounded", &clock, device), &registry).unwrap();
        let mut channel = session.enter().unwrap();
        assert_eq!(
            channel.send_message(b"big", Duration::MAX).unwrap(),
            IoOutcome::Delivered(())
        );
        assert_eq!(
            channel.receive_message(Duration::MAX).unwrap(),
            IoOutcome::Delivered(b"big".to_vec())
        );
        assert_eq!(channel.read(16, Some(u64::MAX)).unwrap(), Vec::<u8>::new());
        session.exit().unwrap();
    }

    #[test]
    fn test_liveness_with_dropped_writes() {
        for dropped in [0u32, 1, 3] {
            let clock = ManualClock::new();
            let t = timeouts(2, 2 * u64::from(dropped + 1), 5);
            let mut device = FakeDevice::new(clock.clone(), t);
            device.drop_writes = dropped;
            let registry = SessionRegistry::new();
            let mut session = Session::new(config("flaky", &clock, device), &registry).unwrap();
            assert!(session.enter().is_ok(), "{} dropped writes", dropped);
            assert_eq!(session.state(), SessionState::Active);
        }
    }

    #[test]
    fn test_silent_device_fails_and_closes_once() {
        let clock = ManualClock::new();
        let mut device = FakeDevice::new(clock.clone(), timeouts(2, 5, 5));
        device.reply = false;
        let stats = device.stats.clone();
        let registry = SessionRegistry::new();

        let mut session = Session::new(config("silent", &clock, device), &registry).unwrap();
        let err = session.enter().err().unwrap();
        assert!(matches!(
            err,
            Error::SessionEstablish {
                failure: EstablishFailure::NoResponse,
                elapsed_ms: 5000,
                ..
            }
        ));
        assert_eq!(clock.now(), Duration::from_secs(5));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(stats.closes(), 1);
        assert!(!registry.is_active());

        session.exit().unwrap();
        session.exit().unwrap();
        drop(session);
        assert_eq!(stats.closes(), 1);
    }

    #[test]
    fn test_unconfirmed_session_is_distinguished() {
        let clock = ManualClock::new();
        let mut device = FakeDevice::new(clock.clone(), timeouts(2, 5, 3));
        device.confirm = false;
        let registry = SessionRegistry::new();
        let mut session = Session::new(config("mute", &clock, device), &registry).unwrap();
        assert!(matches!(
            session.enter().err().unwrap(),
            Error::SessionEstablish {
                failure: EstablishFailure::NotConfirmed,
                ..
            }
        ));
    }

    #[test]
    fn test_second_session_is_refused() {
        let clock = ManualClock::new();
        let registry = SessionRegistry::new();
        let first_device = FakeDevice::new(clock.clone(), timeouts(1, 5, 5));
        let first_stats = first_device.stats.clone();
        let mut first = Session::new(config("first", &clock, first_device), &registry).unwrap();
        first.enter().unwrap();

        let created = Arc::new(AtomicU32::new(0));
        let counter = created.clone();
        let second_config = SessionConfig::new("second")
            .transport_factory(Box::new(move || -> Result<BoxedTransport> {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Transport("unreachable".into()))
            }))
            .platform(LINUX64);
        let err = Session::new(second_config, &registry).err().unwrap();
        assert!(matches!(err, Error::SessionAlreadyActive { .. }));
        assert_eq!(created.load(Ordering::SeqCst), 0);

        assert_eq!(first.state(), SessionState::Active);
        assert_eq!(first_stats.closes(), 0);
        first.exit().unwrap();
        assert_eq!(first_stats.closes(), 1);
    }

    #[test]
    fn test_exit_twice_closes_once() {
        let clock = ManualClock::new();
        let device = FakeDevice::new(clock.clone(), timeouts(1, 5, 5));
        let stats = device.stats.clone();
        let registry = SessionRegistry::new();
        let mut session = Session::new(config("twice", &clock, device), &registry).unwrap();
        session.enter().unwrap();
        session.exit().unwrap();
        session.exit().unwrap();
        drop(session);
        assert_eq!(stats.closes(), 1);
    }

    #[test]
    fn test_drop_closes_active_session() {
        let clock = ManualClock::new();
        let device = FakeDevice::new(clock.clone(), timeouts(1, 5, 5));
        let stats = device.stats.clone();
        let registry = SessionRegistry::new();
        {
            let mut session = Session::new(config("scoped", &clock, device), &registry).unwrap();
            session.enter().unwrap();
        }
        assert_eq!(stats.closes(), 1);
        assert!(!registry.is_active());
    }

    #[test]
    fn test_enter_twice_is_invalid() {
        let clock = ManualClock::new();
        let device = FakeDevice::new(clock.clone(), timeouts(1, 5, 5));
        let registry = SessionRegistry::new();
        let mut session = Session::new(config("again", &clock, device), &registry).unwrap();
        session.enter().unwrap();
        assert!(matches!(session.enter(), Err(Error::InvalidState { .. })));
        assert!(session.channel().is_ok());
    }

    #[test]
    fn test_config_requires_exactly_one_source() {
        let registry = SessionRegistry::new();
        let none = SessionConfig::new("none").platform(LINUX64);
        assert!(matches!(Session::new(none, &registry), Err(Error::Config(_))));

        let clock = ManualClock::new();
        let both = config("both", &clock, FakeDevice::new(clock.clone(), timeouts(1, 5, 5)))
            .binary(MicroBinary::new("/tmp/micro.elf"))
            .flasher(FailingFlasher::default());
        assert!(matches!(Session::new(both, &registry), Err(Error::Config(_))));

        let half = SessionConfig::new("half")
            .binary(MicroBinary::new("/tmp/micro.elf"))
            .platform(LINUX64);
        assert!(matches!(Session::new(half, &registry), Err(Error::Config(_))));
        assert!(!registry.is_active());
    }

    #[test]
    fn test_unsupported_platform_checked_first() {
        let registry = SessionRegistry::new();
        let clock = ManualClock::new();
        let cfg = config("old", &clock, FakeDevice::new(clock.clone(), timeouts(1, 5, 5)))
            .platform(HostPlatform::new("linux", 32));
        assert!(matches!(
            Session::new(cfg, &registry),
            Err(Error::UnsupportedPlatform(_))
        ));
        assert!(!registry.is_active());
    }

    #[derive(Default)]
    struct FailingFlasher {
        calls: Arc<AtomicU32>,
    }

    impl Flasher for FailingFlasher {
        fn flash(&mut self, binary: &MicroBinary) -> Result<BoxedTransportFactory> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Flash(format!("no probe for {}", binary.path().display())))
        }
    }

    struct DeviceFlasher {
        device: Option<FakeDevice>,
    }

    impl Flasher for DeviceFlasher {
        fn flash(&mut self, _binary: &MicroBinary) -> Result<BoxedTransportFactory> {
            let device = self
                .device
                .take()
                .ok_or_else(|| Error::Flash("already flashed".into()))?;
            Ok(factory_for(device))
        }
    }

    #[test]
    fn test_flash_failure_touches_nothing() {
        let registry = SessionRegistry::new();
        let flasher = FailingFlasher::default();
        let calls = flasher.calls.clone();
        let cfg = SessionConfig::new("flash")
            .binary(MicroBinary::new("build/micro.elf"))
            .flasher(flasher)
            .platform(LINUX64);
        let mut session = Session::new(cfg, &registry).unwrap();
        assert!(matches!(session.enter(), Err(Error::Flash(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!registry.is_active());
        session.exit().unwrap();
    }

    #[test]
    fn test_flash_then_connect() {
        let clock = ManualClock::new();
        let device = FakeDevice::new(clock.clone(), timeouts(1, 5, 5));
        let stats = device.stats.clone();
        let registry = SessionRegistry::new();
        let cfg = SessionConfig::new("flashed")
            .binary(MicroBinary::new("build/micro.elf"))
            .flasher(DeviceFlasher {
                device: Some(device),
            })
            .clock(Arc::new(clock.clone()))
            .platform(LINUX64);
        let mut session = Session::new(cfg, &registry).unwrap();
        session.enter().unwrap();
        assert!(session.system_library().is_ok());
        drop(session);
        assert_eq!(stats.closes(), 1);
    }

    #[test]
    fn test_timeout_override_wins() {
        let clock = ManualClock::new();
        let mut device = FakeDevice::new(clock.clone(), timeouts(100, 100, 100));
        device.reply = false;
        let registry = SessionRegistry::new();
        let cfg = config("override", &clock, device).timeouts(timeouts(1, 3, 1));
        let mut session = Session::new(cfg, &registry).unwrap();
        assert!(session.enter().is_err());
        assert_eq!(clock.now(), Duration::from_secs(3));
    }

    #[test]
    fn test_raw_channel_write() {
        let clock = ManualClock::new();
        let device = FakeDevice::new(clock.clone(), timeouts(1, 5, 5));
        let registry = SessionRegistry::new();
        let mut session = Session::new(config("raw", &clock, device), &registry).unwrap();
        let mut channel = session.enter().unwrap();
        assert_eq!(channel.write(&[0u8; 4], Some(500)).unwrap(), 4);
    }
}
