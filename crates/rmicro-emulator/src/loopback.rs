//! In-process transport to an [`EmulatedDevice`]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use rmicro_core::error::{Error, Result};
use rmicro_core::session::ManualClock;
use rmicro_core::transport::{
    BoxedTransport, IoOutcome, Transport, TransportFactory, TransportTimeouts,
};

use crate::device::EmulatedDevice;

const POLL_INTERVAL: Duration = Duration::from_millis(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Call counters shared by every transport a [`LoopbackFactory`] creates
#[derive(Debug, Default)]
pub struct LoopbackStats {
    opens: AtomicU32,
    closes: AtomicU32,
    writes: AtomicU32,
    dropped_writes: AtomicU32,
}

impl LoopbackStats {
    /// Number of successful opens
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of closes
    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Number of write calls, dropped ones included
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of writes that delivered nothing
    pub fn dropped_writes(&self) -> u32 {
        self.dropped_writes.load(Ordering::SeqCst)
    }
}

/// Shared handle to an emulated device
pub type SharedDevice = Arc<Mutex<EmulatedDevice>>;

fn lock(device: &SharedDevice) -> Result<MutexGuard<'_, EmulatedDevice>> {
    device
        .lock()
        .map_err(|_| Error::Transport("emulated device lock poisoned".into()))
}

/// Transport whose far end is an [`EmulatedDevice`] in the same process
///
/// Reads wait for the device to have output, up to the timeout. With a
/// [`ManualClock`] attached, a read that would wait advances that clock by the
/// timeout instead of sleeping.
pub struct LoopbackTransport {
    device: SharedDevice,
    stats: Arc<LoopbackStats>,
    drop_writes: u32,
    clock: Option<ManualClock>,
    timeouts: TransportTimeouts,
    is_open: bool,
}

impl LoopbackTransport {
    /// Create a transport to `device`
    pub fn new(device: SharedDevice) -> Self {
        Self {
            device,
            stats: Arc::new(LoopbackStats::default()),
            drop_writes: 0,
            clock: None,
            timeouts: TransportTimeouts::for_flow_control(true),
            is_open: false,
        }
    }

    /// Make the first `n` writes deliver zero bytes
    pub fn drop_first_writes(mut self, n: u32) -> Self {
        self.drop_writes = n;
        self
    }

    /// Advance `clock` instead of sleeping
    pub fn manual_clock(mut self, clock: ManualClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Report `timeouts` instead of the flow-control defaults
    pub fn with_timeouts(mut self, timeouts: TransportTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    fn with_stats(mut self, stats: Arc<LoopbackStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Counters for this transport
    pub fn stats(&self) -> Arc<LoopbackStats> {
        Arc::clone(&self.stats)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_open {
            Ok(())
        } else {
            Err(Error::Transport("loopback transport is not open".into()))
        }
    }

    fn try_take(&self, max: usize) -> Result<Option<Vec<u8>>> {
        let mut device = lock(&self.device)?;
        if device.pending() == 0 {
            Ok(None)
        } else {
            Ok(Some(device.take(max)))
        }
    }
}

impl Transport for LoopbackTransport {
    fn open(&mut self) -> Result<()> {
        self.is_open = true;
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        log::debug!("Loopback: opened");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.is_open = false;
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        log::debug!("Loopback: closed");
        Ok(())
    }

    fn read(&mut self, max: usize, timeout: Option<Duration>) -> Result<IoOutcome<Vec<u8>>> {
        self.check_open()?;
        if let Some(bytes) = self.try_take(max)? {
            return Ok(IoOutcome::Delivered(bytes));
        }

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        if let Some(clock) = &self.clock {
            clock.advance(timeout);
            return Ok(IoOutcome::TimedOut);
        }

        // Too large to represent means wait until data arrives
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => POLL_INTERVAL,
            };
            if remaining.is_zero() {
                return Ok(IoOutcome::TimedOut);
            }
            thread::sleep(remaining.min(POLL_INTERVAL));
            if let Some(bytes) = self.try_take(max)? {
                return Ok(IoOutcome::Delivered(bytes));
            }
        }
    }

    fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<IoOutcome<usize>> {
        self.check_open()?;
        self.stats.writes.fetch_add(1, Ordering::SeqCst);
        if self.drop_writes > 0 {
            self.drop_writes -= 1;
            self.stats.dropped_writes.fetch_add(1, Ordering::SeqCst);
            if let Some(clock) = &self.clock {
                clock.advance(timeout.unwrap_or(DEFAULT_TIMEOUT));
            }
            log::trace!("Loopback: dropping write of {} bytes", data.len());
            return Ok(IoOutcome::Delivered(0));
        }
        lock(&self.device)?.receive(data)?;
        Ok(IoOutcome::Delivered(data.len()))
    }

    fn timeouts(&self) -> TransportTimeouts {
        self.timeouts
    }
}

/// Creates [`LoopbackTransport`]s to one shared device
///
/// Dropped writes are counted across all transports the factory creates, so a
/// reconnect does not reset the fault budget.
pub struct LoopbackFactory {
    device: SharedDevice,
    stats: Arc<LoopbackStats>,
    drop_writes: u32,
    clock: Option<ManualClock>,
    timeouts: Option<TransportTimeouts>,
}

impl LoopbackFactory {
    /// Factory for transports to `device`
    pub fn new(device: SharedDevice) -> Self {
        Self {
            device,
            stats: Arc::new(LoopbackStats::default()),
            drop_writes: 0,
            clock: None,
            timeouts: None,
        }
    }

    /// Drop the first `n` writes across all created transports
    pub fn drop_first_writes(mut self, n: u32) -> Self {
        self.drop_writes = n;
        self
    }

    /// Advance `clock` instead of sleeping
    pub fn manual_clock(mut self, clock: ManualClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Timeouts reported by created transports
    pub fn with_timeouts(mut self, timeouts: TransportTimeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Counters shared by all created transports
    pub fn stats(&self) -> Arc<LoopbackStats> {
        Arc::clone(&self.stats)
    }

    /// The device behind this factory
    pub fn device(&self) -> SharedDevice {
        Arc::clone(&self.device)
    }
}

impl TransportFactory for LoopbackFactory {
    fn create(&mut self) -> Result<BoxedTransport> {
        let drop_writes = self.drop_writes.saturating_sub(self.stats.dropped_writes());
        let mut transport = LoopbackTransport::new(Arc::clone(&self.device))
            .with_stats(Arc::clone(&self.stats))
            .drop_first_writes(drop_writes);
        if let Some(clock) = &self.clock {
            transport = transport.manual_clock(clock.clone());
        }
        if let Some(timeouts) = self.timeouts {
            transport = transport.with_timeouts(timeouts);
        }
        Ok(Box::new(transport))
    }

    fn describe(&self) -> String {
        "loopback emulator".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmicro_core::session::framing::{Framer, UnframeEvent, Unframer};
    use rmicro_core::session::protocol::{Message, MessageType};
    use rmicro_core::session::Clock;

    fn shared() -> SharedDevice {
        Arc::new(Mutex::new(EmulatedDevice::new_default()))
    }

    #[test]
    fn test_io_requires_open() {
        let mut transport = LoopbackTransport::new(shared());
        assert!(transport.read(16, Some(Duration::ZERO)).is_err());
        assert!(transport.write(b"x", None).is_err());
    }

    #[test]
    fn test_request_reaches_device() {
        let device = shared();
        let mut transport = LoopbackTransport::new(Arc::clone(&device));
        transport.open().unwrap();

        let wire = Framer::new()
            .frame(&Message::new(0x11, MessageType::StartSession, Vec::new()).encode())
            .unwrap();
        assert_eq!(
            transport.write(&wire, None).unwrap(),
            IoOutcome::Delivered(wire.len())
        );

        let bytes = transport
            .read(1024, Some(Duration::from_millis(10)))
            .unwrap()
            .delivered()
            .unwrap();
        let packets: Vec<_> = Unframer::new()
            .feed(&bytes)
            .into_iter()
            .filter(|e| matches!(e, UnframeEvent::Packet(_)))
            .collect();
        assert_eq!(packets.len(), 2);
        assert!(device.lock().unwrap().session_id().is_some());
    }

    #[test]
    fn test_read_times_out_on_manual_clock() {
        let clock = ManualClock::new();
        let mut transport = LoopbackTransport::new(shared()).manual_clock(clock.clone());
        transport.open().unwrap();
        let before = clock.now();
        assert!(transport
            .read(16, Some(Duration::from_secs(3)))
            .unwrap()
            .is_timed_out());
        assert_eq!(clock.now() - before, Duration::from_secs(3));
    }

    #[test]
    fn test_read_times_out_in_real_time() {
        let mut transport = LoopbackTransport::new(shared());
        transport.open().unwrap();
        let started = Instant::now();
        assert!(transport
            .read(16, Some(Duration::from_millis(20)))
            .unwrap()
            .is_timed_out());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_unbounded_read_waits_for_data() {
        let device = shared();
        let mut transport = LoopbackTransport::new(Arc::clone(&device));
        transport.open().unwrap();

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            device.lock().unwrap().log("late").unwrap();
        });
        assert!(!transport
            .read(1024, Some(Duration::MAX))
            .unwrap()
            .is_timed_out());
        writer.join().unwrap();
    }

    #[test]
    fn test_dropped_writes_shared_across_factory() {
        let mut factory = LoopbackFactory::new(shared()).drop_first_writes(3);
        let stats = factory.stats();

        let mut first = factory.create().unwrap();
        first.open().unwrap();
        assert_eq!(first.write(b"a", None).unwrap(), IoOutcome::Delivered(0));
        assert_eq!(first.write(b"b", None).unwrap(), IoOutcome::Delivered(0));
        first.close().unwrap();

        let mut second = factory.create().unwrap();
        second.open().unwrap();
        assert_eq!(second.write(b"c", None).unwrap(), IoOutcome::Delivered(0));
        assert_eq!(second.write(b"d", None).unwrap(), IoOutcome::Delivered(1));

        assert_eq!(stats.writes(), 4);
        assert_eq!(stats.dropped_writes(), 3);
        assert_eq!(stats.opens(), 2);
        assert_eq!(stats.closes(), 1);
    }
}
