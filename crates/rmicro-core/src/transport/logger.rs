//! Transport wrapper that logs all traffic

use std::fmt::Write as _;
use std::time::Duration;

use super::{IoOutcome, Transport, TransportTimeouts};
use crate::error::Result;

/// Log target used for transport traffic
pub const TRANSPORT_LOG_TARGET: &str = "rmicro::transport";

const BYTES_PER_ROW: usize = 16;

/// Format `data` as hex dump rows: offset, hex bytes, printable ASCII
pub fn hex_dump(data: &[u8]) -> Vec<String> {
    data.chunks(BYTES_PER_ROW)
        .enumerate()
        .map(|(row, chunk)| {
            let mut line = format!("{:04x}  ", row * BYTES_PER_ROW);
            for i in 0..BYTES_PER_ROW {
                match chunk.get(i) {
                    Some(b) => {
                        let _ = write!(line, "{:02x} ", b);
                    }
                    None => line.push_str("   "),
                }
                if i == BYTES_PER_ROW / 2 - 1 {
                    line.push(' ');
                }
            }
            line.push(' ');
            line.extend(chunk.iter().map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                }
            }));
            line
        })
        .collect()
}

fn describe_timeout(timeout: Option<Duration>) -> String {
    match timeout {
        Some(t) => format!("{:.3}s", t.as_secs_f64()),
        None => "default".into(),
    }
}

/// Wraps a transport and logs every operation and the bytes it moves
pub struct TransportLogger<T> {
    name: String,
    child: T,
    level: log::Level,
}

impl<T: Transport> TransportLogger<T> {
    /// Log `child` at debug level under `name`
    pub fn new(name: impl Into<String>, child: T) -> Self {
        Self::with_level(name, child, log::Level::Debug)
    }

    /// Log `child` at a specific level
    pub fn with_level(name: impl Into<String>, child: T, level: log::Level) -> Self {
        Self {
            name: name.into(),
            child,
            level,
        }
    }

    /// Name used as the log prefix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unwrap the inner transport
    pub fn into_inner(self) -> T {
        self.child
    }

    fn dump(&self, data: &[u8]) {
        if !log::log_enabled!(target: TRANSPORT_LOG_TARGET, self.level) {
            return;
        }
        for row in hex_dump(data) {
            log::log!(target: TRANSPORT_LOG_TARGET, self.level, "{}:   {}", self.name, row);
        }
    }
}

impl<T: Transport> Transport for TransportLogger<T> {
    fn open(&mut self) -> Result<()> {
        log::log!(target: TRANSPORT_LOG_TARGET, self.level, "{}: opening transport", self.name);
        self.child.open()
    }

    fn close(&mut self) -> Result<()> {
        log::log!(target: TRANSPORT_LOG_TARGET, self.level, "{}: closing transport", self.name);
        self.child.close()
    }

    fn read(&mut self, max_bytes: usize, timeout: Option<Duration>) -> Result<IoOutcome<Vec<u8>>> {
        let timeout_str = describe_timeout(timeout);
        match self.child.read(max_bytes, timeout) {
            Ok(IoOutcome::Delivered(data)) => {
                log::log!(
                    target: TRANSPORT_LOG_TARGET,
                    self.level,
                    "{}: read {:4} B -> [{:3} B] (timeout {})",
                    self.name,
                    max_bytes,
                    data.len(),
                    timeout_str
                );
                self.dump(&data);
                Ok(IoOutcome::Delivered(data))
            }
            Ok(IoOutcome::TimedOut) => {
                log::log!(
                    target: TRANSPORT_LOG_TARGET,
                    self.level,
                    "{}: read {:4} B -> [timed out] (timeout {})",
                    self.name,
                    max_bytes,
                    timeout_str
                );
                Ok(IoOutcome::TimedOut)
            }
            Err(e) => {
                log::log!(
                    target: TRANSPORT_LOG_TARGET,
                    self.level,
                    "{}: read {:4} B -> [err: {}] (timeout {})",
                    self.name,
                    max_bytes,
                    e,
                    timeout_str
                );
                Err(e)
            }
        }
    }

    fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<IoOutcome<usize>> {
        let timeout_str = describe_timeout(timeout);
        let result = self.child.write(data, timeout);
        let status = match &result {
            Ok(IoOutcome::Delivered(n)) => format!("{:3} B", n),
            Ok(IoOutcome::TimedOut) => "timed out".to_string(),
            Err(e) => format!("err: {}", e),
        };
        log::log!(
            target: TRANSPORT_LOG_TARGET,
            self.level,
            "{}: write {:4} B <- [{}] (timeout {})",
            self.name,
            data.len(),
            status,
            timeout_str
        );
        if let Ok(IoOutcome::Delivered(n)) = &result {
            self.dump(&data[..(*n).min(data.len())]);
        }
        result
    }

    fn timeouts(&self) -> TransportTimeouts {
        self.child.timeouts()
    }
}
