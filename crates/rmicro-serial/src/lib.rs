//! rmicro-serial - Serial port and TCP transports
//!
//! This crate implements the rmicro transport contract over a serial line
//! (a device's USB CDC port or a UART bridge) and over a TCP socket (a
//! device server or a networked UART).
//!
//! # Connection strings
//!
//! - `dev=/dev/ttyACM0` or `dev=/dev/ttyACM0:115200` - serial port by path
//! - `grep=STM32` or `grep=STM32:921600` - the single serial port whose
//!   name or USB description matches the pattern
//! - `ip=host:port` - TCP connection
//!
//! # Example
//!
//! ```no_run
//! use rmicro_core::transport::Transport;
//! use rmicro_serial::{PortSelector, SerialTransport};
//!
//! let mut transport = SerialTransport::new(PortSelector::Grep("0483:374B".into()), Some(115200));
//! transport.open()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod transport;

pub use error::{Result, SerialError};
pub use transport::serial::{grep_ports, PortSelector, SerialTransport, DEFAULT_BAUD};
pub use transport::tcp::TcpTransport;

use rmicro_core::transport::BoxedTransport;

/// Connection options for a serial or TCP transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialConnection {
    /// Serial port connection
    Serial {
        /// How to find the port
        selector: PortSelector,
        /// Baud rate (None for the default)
        baud: Option<u32>,
    },
    /// TCP socket connection
    Tcp {
        /// Hostname or IP address
        host: String,
        /// Port number
        port: u16,
    },
}

fn split_baud(value: &str) -> Result<(String, Option<u32>)> {
    match value.rsplit_once(':') {
        // Only a trailing run of digits is a baud rate; patterns may contain colons
        Some((target, baud_str))
            if !baud_str.is_empty() && baud_str.bytes().all(|b| b.is_ascii_digit()) =>
        {
            let baud = baud_str.parse().map_err(|_| {
                SerialError::InvalidParameter(format!("invalid baud rate: {}", baud_str))
            })?;
            Ok((target.to_string(), Some(baud)))
        }
        _ => Ok((value.to_string(), None)),
    }
}

impl SerialConnection {
    /// Parse a connection string
    ///
    /// Formats:
    /// - `dev=/dev/ttyACM0[:baud]` - serial by path
    /// - `grep=pattern[:baud]` - serial by pattern
    /// - `ip=host:port` - TCP connection
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(dev) = s.strip_prefix("dev=") {
            let (device, baud) = split_baud(dev)?;
            Ok(SerialConnection::Serial {
                selector: PortSelector::Path(device),
                baud,
            })
        } else if let Some(pattern) = s.strip_prefix("grep=") {
            let (pattern, baud) = split_baud(pattern)?;
            Ok(SerialConnection::Serial {
                selector: PortSelector::Grep(pattern),
                baud,
            })
        } else if let Some(ip) = s.strip_prefix("ip=") {
            let (host, port_str) = ip.rsplit_once(':').ok_or_else(|| {
                SerialError::InvalidParameter("missing port in ip= parameter".into())
            })?;
            let port = port_str.parse().map_err(|_| {
                SerialError::InvalidParameter(format!("invalid port: {}", port_str))
            })?;
            Ok(SerialConnection::Tcp {
                host: host.to_string(),
                port,
            })
        } else {
            Err(SerialError::InvalidParameter(format!(
                "invalid connection string: {}. Use dev=..., grep=... or ip=...",
                s
            )))
        }
    }

    /// Build the (unopened) transport for this connection
    pub fn into_transport(self) -> BoxedTransport {
        match self {
            SerialConnection::Serial { selector, baud } => {
                Box::new(SerialTransport::new(selector, baud))
            }
            SerialConnection::Tcp { host, port } => Box::new(TcpTransport::new(host, port)),
        }
    }
}

/// Parse `options` and build the matching unopened transport
pub fn serial_transport(options: &str) -> Result<BoxedTransport> {
    Ok(SerialConnection::parse(options)?.into_transport())
}
