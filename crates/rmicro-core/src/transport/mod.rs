//! Transport layer abstraction
//!
//! A transport is a duplex byte channel to the device: a serial line, a TCP
//! socket, pipes to an emulator process. Every read and write takes a timeout,
//! and running out of time is reported as [`IoOutcome::TimedOut`] rather than
//! as an error, so callers can decide whether a timeout is fatal.
//!
//! Transports are opened and closed explicitly; [`TransportGuard`] ties the
//! close to scope exit.

mod guard;
mod logger;

pub use guard::TransportGuard;
pub use logger::{hex_dump, TransportLogger, TRANSPORT_LOG_TARGET};

use std::time::Duration;

use crate::error::Result;

/// Outcome of a single timeout-bounded transport operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome<T> {
    /// The operation moved data
    Delivered(T),
    /// The timeout elapsed first
    TimedOut,
}

impl<T> IoOutcome<T> {
    /// The delivered value, if any
    pub fn delivered(self) -> Option<T> {
        match self {
            IoOutcome::Delivered(v) => Some(v),
            IoOutcome::TimedOut => None,
        }
    }

    /// Check for [`IoOutcome::TimedOut`]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, IoOutcome::TimedOut)
    }

    /// Map the delivered value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> IoOutcome<U> {
        match self {
            IoOutcome::Delivered(v) => IoOutcome::Delivered(f(v)),
            IoOutcome::TimedOut => IoOutcome::TimedOut,
        }
    }
}

/// Timeouts that govern session establishment over one transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportTimeouts {
    /// Bound on one start-session attempt (one write plus waiting for the reply)
    pub session_start_retry_timeout: Duration,
    /// Bound on the whole retry loop
    pub session_start_timeout: Duration,
    /// Bound on waiting for the device to confirm the session
    pub session_established_timeout: Duration,
    /// Whether the transport paces reads and writes itself
    pub has_flow_control: bool,
}

impl TransportTimeouts {
    /// Defaults for a transport with or without its own flow control
    ///
    /// Links without flow control (raw UART) lose bytes while the device boots,
    /// so attempts are short and retried. Links with flow control deliver or
    /// fail, so one long attempt is enough.
    pub fn for_flow_control(has_flow_control: bool) -> Self {
        if has_flow_control {
            Self {
                session_start_retry_timeout: Duration::from_secs(5),
                session_start_timeout: Duration::from_secs(10),
                session_established_timeout: Duration::from_secs(10),
                has_flow_control,
            }
        } else {
            Self {
                session_start_retry_timeout: Duration::from_secs(2),
                session_start_timeout: Duration::from_secs(5),
                session_established_timeout: Duration::from_secs(5),
                has_flow_control,
            }
        }
    }

    /// Timeouts from seconds, as used on the command line
    ///
    /// Negative and NaN values become zero; values too large for a
    /// [`Duration`] (including infinity) become [`Duration::MAX`].
    pub fn from_secs_f64(retry: f64, start: f64, established: f64, has_flow_control: bool) -> Self {
        Self {
            session_start_retry_timeout: secs_f64(retry),
            session_start_timeout: secs_f64(start),
            session_established_timeout: secs_f64(established),
            has_flow_control,
        }
    }
}

fn secs_f64(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self::for_flow_control(false)
    }
}

/// Duplex byte channel to a device
pub trait Transport {
    /// Acquire the underlying resource
    fn open(&mut self) -> Result<()>;

    /// Release the underlying resource
    fn close(&mut self) -> Result<()>;

    /// Read up to `max_bytes`
    ///
    /// `timeout` of `None` uses the transport's own default bound. A delivered
    /// read is never empty.
    fn read(&mut self, max_bytes: usize, timeout: Option<Duration>) -> Result<IoOutcome<Vec<u8>>>;

    /// Write a prefix of `data`, returning how many bytes were written
    fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<IoOutcome<usize>>;

    /// Session timeouts suited to this transport
    fn timeouts(&self) -> TransportTimeouts;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn read(&mut self, max_bytes: usize, timeout: Option<Duration>) -> Result<IoOutcome<Vec<u8>>> {
        (**self).read(max_bytes, timeout)
    }

    fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<IoOutcome<usize>> {
        (**self).write(data, timeout)
    }

    fn timeouts(&self) -> TransportTimeouts {
        (**self).timeouts()
    }
}

/// Type-erased transport
pub type BoxedTransport = Box<dyn Transport + Send>;

/// Produces a fresh, unopened transport
pub trait TransportFactory: Send {
    /// Create the transport
    fn create(&mut self) -> Result<BoxedTransport>;

    /// Human-readable description for logs
    fn describe(&self) -> String {
        "transport".into()
    }
}

impl<F> TransportFactory for F
where
    F: FnMut() -> Result<BoxedTransport> + Send,
{
    fn create(&mut self) -> Result<BoxedTransport> {
        self()
    }
}

/// Type-erased transport factory
pub type BoxedTransportFactory = Box<dyn TransportFactory>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_helpers() {
        assert_eq!(IoOutcome::Delivered(3).delivered(), Some(3));
        assert_eq!(IoOutcome::<u8>::TimedOut.delivered(), None);
        assert!(IoOutcome::<u8>::TimedOut.is_timed_out());
        assert_eq!(IoOutcome::Delivered(2).map(|n| n * 2), IoOutcome::Delivered(4));
    }

    #[test]
    fn test_flow_control_defaults() {
        let paced = TransportTimeouts::for_flow_control(true);
        let raw = TransportTimeouts::for_flow_control(false);
        assert!(paced.has_flow_control);
        assert!(!raw.has_flow_control);
        assert!(raw.session_start_retry_timeout < raw.session_start_timeout);
        assert_eq!(TransportTimeouts::default(), raw);
    }

    #[test]
    fn test_from_secs() {
        let t = TransportTimeouts::from_secs_f64(0.5, 2.0, -1.0, false);
        assert_eq!(t.session_start_retry_timeout, Duration::from_millis(500));
        assert_eq!(t.session_established_timeout, Duration::ZERO);
    }

    #[test]
    fn test_from_secs_out_of_range() {
        let t = TransportTimeouts::from_secs_f64(f64::NAN, f64::INFINITY, 1e30, true);
        assert_eq!(t.session_start_retry_timeout, Duration::ZERO);
        assert_eq!(t.session_start_timeout, Duration::MAX);
        assert_eq!(t.session_established_timeout, Duration::MAX);
    }
}
