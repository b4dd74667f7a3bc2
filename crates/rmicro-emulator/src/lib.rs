//! rmicro-emulator - Emulated device and pipe transports for testing
//!
//! This crate provides an in-memory device that speaks the device half of the
//! session protocol, transports that reach it (in process, or as a child
//! process over pipes, optionally under a debugger), and a flasher for
//! binaries built to run on the host. It's useful for testing and development
//! without real hardware.

pub mod debugger;
pub mod device;
pub mod flasher;
pub mod loopback;
pub mod subprocess;

pub use debugger::Debugger;
pub use device::{DeviceState, EmulatedDevice, EmulatorConfig};
pub use flasher::HostFlasher;
pub use loopback::{LoopbackFactory, LoopbackStats, LoopbackTransport, SharedDevice};
pub use subprocess::{SubprocessFactory, SubprocessTransport};

use std::sync::{Arc, Mutex};

/// Wrap `device` for sharing between transports and the caller
pub fn shared(device: EmulatedDevice) -> SharedDevice {
    Arc::new(Mutex::new(device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rmicro_core::error::{EstablishFailure, Error};
    use rmicro_core::session::protocol::{device_nonce, next_nonce};
    use rmicro_core::session::{ManualClock, Session, SessionConfig, SessionRegistry, SessionState};
    use rmicro_core::transport::TransportTimeouts;

    fn timeouts(retry: u64, start: u64, established: u64) -> TransportTimeouts {
        TransportTimeouts {
            session_start_retry_timeout: Duration::from_secs(retry),
            session_start_timeout: Duration::from_secs(start),
            session_established_timeout: Duration::from_secs(established),
            has_flow_control: true,
        }
    }

    fn config(factory: LoopbackFactory, clock: &ManualClock) -> SessionConfig {
        SessionConfig::new("emulated")
            .transport_factory(Box::new(factory.manual_clock(clock.clone())))
            .clock(Arc::new(clock.clone()))
    }

    #[test]
    fn test_session_over_loopback() {
        let registry = SessionRegistry::new();
        let clock = ManualClock::new();
        let factory = LoopbackFactory::new(shared(EmulatedDevice::new_default()));
        let device = factory.device();
        let stats = factory.stats();

        let mut session = Session::new(config(factory, &clock), &registry).unwrap();
        {
            let mut channel = session.enter().unwrap();
            let id = channel.session_id();
            assert_eq!(device.lock().unwrap().session_id(), Some(id));

            assert!(channel
                .send_message(b"ping", Duration::from_secs(1))
                .unwrap()
                .delivered()
                .is_some());
            let reply = channel
                .receive_message(Duration::from_secs(1))
                .unwrap()
                .delivered()
                .unwrap();
            assert_eq!(reply, b"ping");
        }
        assert_eq!(session.state(), SessionState::Active);
        session.exit().unwrap();
        assert_eq!(stats.opens(), 1);
        assert_eq!(stats.closes(), 1);
        assert!(!registry.is_active());
    }

    #[test]
    fn test_session_survives_dropped_writes() {
        let registry = SessionRegistry::new();
        let clock = ManualClock::new();
        let factory = LoopbackFactory::new(shared(EmulatedDevice::new_default()))
            .drop_first_writes(3)
            .with_timeouts(timeouts(1, 10, 5));
        let stats = factory.stats();

        let mut session = Session::new(config(factory, &clock), &registry).unwrap();
        let id = session.enter().unwrap().session_id();
        assert_eq!(device_nonce(id), next_nonce(0x5A));
        assert_eq!(stats.dropped_writes(), 3);
        assert_eq!(stats.writes(), 4);
    }

    #[test]
    fn test_silent_device_fails_with_no_response() {
        let registry = SessionRegistry::new();
        let clock = ManualClock::new();
        let device = EmulatedDevice::new(EmulatorConfig {
            reply_to_start: false,
            ..Default::default()
        })
        .unwrap();
        let factory = LoopbackFactory::new(shared(device)).with_timeouts(timeouts(2, 5, 5));
        let stats = factory.stats();

        let mut session = Session::new(config(factory, &clock), &registry).unwrap();
        match session.enter().err().unwrap() {
            Error::SessionEstablish {
                failure,
                elapsed_ms,
                ..
            } => {
                assert_eq!(failure, EstablishFailure::NoResponse);
                assert_eq!(elapsed_ms, 5000);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(stats.writes(), 3);
        assert_eq!(stats.closes(), 1);
        assert!(!registry.is_active());
    }

    #[test]
    fn test_unconfirmed_device_fails_with_not_confirmed() {
        let registry = SessionRegistry::new();
        let clock = ManualClock::new();
        let device = EmulatedDevice::new(EmulatorConfig {
            confirm: false,
            ..Default::default()
        })
        .unwrap();
        let factory = LoopbackFactory::new(shared(device)).with_timeouts(timeouts(2, 10, 3));

        let mut session = Session::new(config(factory, &clock), &registry).unwrap();
        assert!(matches!(
            session.enter(),
            Err(Error::SessionEstablish {
                failure: EstablishFailure::NotConfirmed,
                elapsed_ms: 3000,
                ..
            })
        ));
    }

    #[test]
    fn test_banner_does_not_disturb_handshake() {
        let registry = SessionRegistry::new();
        let clock = ManualClock::new();
        let device = EmulatedDevice::new(EmulatorConfig {
            banner: Some("emulated device ready".into()),
            ..Default::default()
        })
        .unwrap();
        let factory = LoopbackFactory::new(shared(device));
        let mut session = Session::new(config(factory, &clock), &registry).unwrap();
        session.enter().unwrap();
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn test_device_initiated_traffic() {
        let registry = SessionRegistry::new();
        let clock = ManualClock::new();
        let factory = LoopbackFactory::new(shared(EmulatedDevice::new_default()));
        let device = factory.device();

        let mut session = Session::new(config(factory, &clock), &registry).unwrap();
        let mut channel = session.enter().unwrap();
        device.lock().unwrap().send_traffic(b"interrupt").unwrap();
        let body = channel
            .receive_message(Duration::from_secs(1))
            .unwrap()
            .delivered()
            .unwrap();
        assert_eq!(body, b"interrupt");
    }
}
