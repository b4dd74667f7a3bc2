//! Serial and TCP implementations of the device transport
//!
//! Both report an elapsed read or write timeout as
//! [`IoOutcome::TimedOut`]; only genuine I/O failures become errors.

use std::io::ErrorKind;

fn is_timeout(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

pub mod serial {
    //! Serial port transport implementation

    use super::is_timeout;
    use crate::error::{Result, SerialError};
    use regex::RegexBuilder;
    use rmicro_core::transport::{IoOutcome, Transport, TransportTimeouts};
    use serialport::{
        ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, SerialPortType,
        StopBits,
    };
    use std::io::{Read, Write};
    use std::time::{Duration, Instant};

    /// Baud rate used when none is given
    pub const DEFAULT_BAUD: u32 = 115200;

    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Longest single wait handed to the port driver
    const MAX_PORT_TIMEOUT: Duration = Duration::from_secs(86_400);

    /// How the serial port is found
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum PortSelector {
        /// Explicit device path (`/dev/ttyACM0`, `COM3`)
        Path(String),
        /// Case-insensitive regex over port name and USB description
        Grep(String),
    }

    impl PortSelector {
        /// Resolve to a device path using the system's port list
        pub fn resolve(&self) -> Result<String> {
            match self {
                PortSelector::Path(path) => Ok(path.clone()),
                PortSelector::Grep(_) => self.resolve_among(&serialport::available_ports()?),
            }
        }

        /// Resolve against a given port list
        pub fn resolve_among(&self, ports: &[SerialPortInfo]) -> Result<String> {
            match self {
                PortSelector::Path(path) => Ok(path.clone()),
                PortSelector::Grep(pattern) => {
                    let mut found = grep_ports(pattern, ports)?;
                    match found.len() {
                        0 => Err(SerialError::PortNotFound(pattern.clone())),
                        1 => Ok(found.remove(0)),
                        _ => Err(SerialError::AmbiguousPort {
                            pattern: pattern.clone(),
                            found,
                        }),
                    }
                }
            }
        }
    }

    /// Text a grep pattern is matched against for one port
    pub fn port_description(info: &SerialPortInfo) -> String {
        match &info.port_type {
            SerialPortType::UsbPort(usb) => format!(
                "{} USB VID:PID={:04X}:{:04X} SER={} {} {}",
                info.port_name,
                usb.vid,
                usb.pid,
                usb.serial_number.as_deref().unwrap_or(""),
                usb.manufacturer.as_deref().unwrap_or(""),
                usb.product.as_deref().unwrap_or("")
            ),
            SerialPortType::PciPort => format!("{} PCI", info.port_name),
            SerialPortType::BluetoothPort => format!("{} Bluetooth", info.port_name),
            SerialPortType::Unknown => info.port_name.clone(),
        }
    }

    /// Names of every port whose description matches `pattern`
    pub fn grep_ports(pattern: &str, ports: &[SerialPortInfo]) -> Result<Vec<String>> {
        let re = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(ports
            .iter()
            .filter(|p| re.is_match(&port_description(p)))
            .map(|p| p.port_name.clone())
            .collect())
    }

    /// Serial port transport
    ///
    /// The port is opened exclusively and both buffers are discarded on
    /// open, so stale bytes from a previous session never reach the
    /// handshake.
    pub struct SerialTransport {
        selector: PortSelector,
        baud: u32,
        byte_at_a_time: bool,
        port: Option<Box<dyn SerialPort>>,
    }

    impl SerialTransport {
        /// Transport for the port `selector` resolves to
        pub fn new(selector: PortSelector, baud: Option<u32>) -> Self {
            Self {
                selector,
                baud: baud.unwrap_or(DEFAULT_BAUD),
                byte_at_a_time: false,
                port: None,
            }
        }

        /// Write one byte per call, for USB serial bridges that drop bursts
        pub fn byte_at_a_time(mut self, enable: bool) -> Self {
            self.byte_at_a_time = enable;
            self
        }

        /// Port selector
        pub fn selector(&self) -> &PortSelector {
            &self.selector
        }

        fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
            self.port.as_mut().ok_or(SerialError::NotOpen)
        }

        fn open_port(&mut self) -> Result<()> {
            let path = self.selector.resolve()?;
            let builder = serialport::new(&path, self.baud)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(DEFAULT_TIMEOUT);

            #[cfg(unix)]
            let port: Box<dyn SerialPort> = {
                let mut tty = builder.open_native()?;
                tty.set_exclusive(true)?;
                Box::new(tty)
            };
            #[cfg(not(unix))]
            let port: Box<dyn SerialPort> = builder.open()?;

            port.clear(ClearBuffer::All)?;
            log::info!("Opened serial port {} at {} baud", path, self.baud);
            self.port = Some(port);
            Ok(())
        }

        fn read_port(
            &mut self,
            max_bytes: usize,
            timeout: Option<Duration>,
        ) -> Result<IoOutcome<Vec<u8>>> {
            let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
            let port = self.port()?;
            if timeout.is_zero() || max_bytes == 0 {
                return Ok(IoOutcome::TimedOut);
            }
            port.set_timeout(timeout.min(MAX_PORT_TIMEOUT))?;

            let mut buf = vec![0u8; max_bytes];
            let mut filled = match port.read(&mut buf) {
                Ok(0) => return Ok(IoOutcome::TimedOut),
                Ok(n) => n,
                Err(e) if is_timeout(e.kind()) => return Ok(IoOutcome::TimedOut),
                Err(e) => return Err(e.into()),
            };

            // Pick up whatever else has already arrived without waiting again
            while filled < max_bytes {
                let pending = port.bytes_to_read()? as usize;
                if pending == 0 {
                    break;
                }
                let end = (filled + pending).min(max_bytes);
                match port.read(&mut buf[filled..end]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if is_timeout(e.kind()) => break,
                    Err(e) => return Err(e.into()),
                }
            }

            buf.truncate(filled);
            Ok(IoOutcome::Delivered(buf))
        }

        fn write_port(
            &mut self,
            data: &[u8],
            timeout: Option<Duration>,
        ) -> Result<IoOutcome<usize>> {
            let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
            let chunk = if self.byte_at_a_time { 1 } else { data.len().max(1) };
            let port = self.port()?;
            if data.is_empty() {
                return Ok(IoOutcome::Delivered(0));
            }
            if timeout.is_zero() {
                return Ok(IoOutcome::TimedOut);
            }
            port.set_timeout(timeout.min(MAX_PORT_TIMEOUT))?;

            // No deadline when the timeout is too large to represent
            let deadline = Instant::now().checked_add(timeout);
            let mut written = 0;
            while written < data.len() && deadline.map_or(true, |d| Instant::now() < d) {
                let end = (written + chunk).min(data.len());
                match port.write(&data[written..end]) {
                    Ok(0) => break,
                    Ok(n) => written += n,
                    Err(e) if is_timeout(e.kind()) => break,
                    Err(e) => return Err(e.into()),
                }
            }

            match port.flush() {
                Ok(()) => {}
                Err(e) if is_timeout(e.kind()) => {}
                Err(e) => return Err(e.into()),
            }

            if written == 0 {
                Ok(IoOutcome::TimedOut)
            } else {
                Ok(IoOutcome::Delivered(written))
            }
        }
    }

    impl Transport for SerialTransport {
        fn open(&mut self) -> rmicro_core::Result<()> {
            Ok(self.open_port()?)
        }

        fn close(&mut self) -> rmicro_core::Result<()> {
            if self.port.take().is_some() {
                log::debug!("Closed serial port {:?}", self.selector);
            }
            Ok(())
        }

        fn read(
            &mut self,
            max_bytes: usize,
            timeout: Option<Duration>,
        ) -> rmicro_core::Result<IoOutcome<Vec<u8>>> {
            Ok(self.read_port(max_bytes, timeout)?)
        }

        fn write(
            &mut self,
            data: &[u8],
            timeout: Option<Duration>,
        ) -> rmicro_core::Result<IoOutcome<usize>> {
            Ok(self.write_port(data, timeout)?)
        }

        fn timeouts(&self) -> TransportTimeouts {
            TransportTimeouts::for_flow_control(false)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn ports() -> Vec<SerialPortInfo> {
            vec![
                SerialPortInfo {
                    port_name: "/dev/ttyS0".into(),
                    port_type: SerialPortType::PciPort,
                },
                SerialPortInfo {
                    port_name: "/dev/ttyACM0".into(),
                    port_type: SerialPortType::Unknown,
                },
                SerialPortInfo {
                    port_name: "/dev/ttyACM1".into(),
                    port_type: SerialPortType::Unknown,
                },
            ]
        }

        #[test]
        fn test_grep_single_match() {
            let sel = PortSelector::Grep("pci".into());
            assert_eq!(sel.resolve_among(&ports()).unwrap(), "/dev/ttyS0");
        }

        #[test]
        fn test_grep_ambiguous() {
            let sel = PortSelector::Grep("ttyACM".into());
            match sel.resolve_among(&ports()) {
                Err(SerialError::AmbiguousPort { found, .. }) => assert_eq!(found.len(), 2),
                other => panic!("unexpected {:?}", other.map(|_| ())),
            }
        }

        #[test]
        fn test_grep_no_match_and_bad_pattern() {
            assert!(matches!(
                PortSelector::Grep("usbserial".into()).resolve_among(&ports()),
                Err(SerialError::PortNotFound(_))
            ));
            assert!(matches!(
                grep_ports("(", &ports()),
                Err(SerialError::InvalidPattern(_))
            ));
        }

        #[test]
        fn test_path_is_used_verbatim() {
            let sel = PortSelector::Path("/dev/ttyUSB7".into());
            assert_eq!(sel.resolve_among(&[]).unwrap(), "/dev/ttyUSB7");
        }

        #[test]
        fn test_io_before_open() {
            let mut t = SerialTransport::new(PortSelector::Path("/dev/null".into()), None);
            assert!(t.read(1, None).is_err());
            assert!(t.write(b"x", None).is_err());
            assert!(t.close().is_ok());
            assert!(!t.timeouts().has_flow_control);
        }
    }
}

pub mod tcp {
    //! TCP socket transport implementation

    use super::is_timeout;
    use crate::error::{Result, SerialError};
    use rmicro_core::transport::{IoOutcome, Transport, TransportTimeouts};
    use std::io::{Read, Write};
    use std::net::{Shutdown, TcpStream, ToSocketAddrs};
    use std::time::Duration;

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// TCP socket transport
    pub struct TcpTransport {
        host: String,
        port: u16,
        stream: Option<TcpStream>,
    }

    impl TcpTransport {
        /// Transport to `host:port`, connected on open
        pub fn new(host: impl Into<String>, port: u16) -> Self {
            Self {
                host: host.into(),
                port,
                stream: None,
            }
        }

        /// Endpoint as `host:port`
        pub fn endpoint(&self) -> String {
            format!("{}:{}", self.host, self.port)
        }

        fn stream(&mut self) -> Result<&mut TcpStream> {
            self.stream.as_mut().ok_or(SerialError::NotOpen)
        }

        fn connect(&mut self) -> Result<()> {
            let addr = self.endpoint();
            log::info!("Connecting to {}", addr);

            let mut last_err = None;
            for candidate in (self.host.as_str(), self.port).to_socket_addrs()? {
                match TcpStream::connect_timeout(&candidate, CONNECT_TIMEOUT) {
                    Ok(stream) => {
                        stream.set_nodelay(true).map_err(|e| {
                            SerialError::ConnectionFailed(format!(
                                "failed to set TCP_NODELAY: {}",
                                e
                            ))
                        })?;
                        log::info!("Connected to {}", addr);
                        self.stream = Some(stream);
                        return Ok(());
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            Err(SerialError::ConnectionFailed(match last_err {
                Some(e) => format!("{}: {}", addr, e),
                None => format!("{}: no addresses", addr),
            }))
        }

        fn read_stream(
            &mut self,
            max_bytes: usize,
            timeout: Option<Duration>,
        ) -> Result<IoOutcome<Vec<u8>>> {
            let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
            let stream = self.stream()?;
            if timeout.is_zero() || max_bytes == 0 {
                return Ok(IoOutcome::TimedOut);
            }
            stream.set_read_timeout(Some(timeout))?;
            let mut buf = vec![0u8; max_bytes];
            match stream.read(&mut buf) {
                Ok(0) => Err(SerialError::Disconnected),
                Ok(n) => {
                    buf.truncate(n);
                    Ok(IoOutcome::Delivered(buf))
                }
                Err(e) if is_timeout(e.kind()) => Ok(IoOutcome::TimedOut),
                Err(e) => Err(e.into()),
            }
        }

        fn write_stream(
            &mut self,
            data: &[u8],
            timeout: Option<Duration>,
        ) -> Result<IoOutcome<usize>> {
            let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
            let stream = self.stream()?;
            if data.is_empty() {
                return Ok(IoOutcome::Delivered(0));
            }
            if timeout.is_zero() {
                return Ok(IoOutcome::TimedOut);
            }
            stream.set_write_timeout(Some(timeout))?;
            match stream.write(data) {
                Ok(0) => Err(SerialError::Disconnected),
                Ok(n) => Ok(IoOutcome::Delivered(n)),
                Err(e) if is_timeout(e.kind()) => Ok(IoOutcome::TimedOut),
                Err(e) => Err(e.into()),
            }
        }
    }

    impl Transport for TcpTransport {
        fn open(&mut self) -> rmicro_core::Result<()> {
            Ok(self.connect()?)
        }

        fn close(&mut self) -> rmicro_core::Result<()> {
            if let Some(stream) = self.stream.take() {
                let _ = stream.shutdown(Shutdown::Both);
                log::debug!("Disconnected from {}", self.endpoint());
            }
            Ok(())
        }

        fn read(
            &mut self,
            max_bytes: usize,
            timeout: Option<Duration>,
        ) -> rmicro_core::Result<IoOutcome<Vec<u8>>> {
            Ok(self.read_stream(max_bytes, timeout)?)
        }

        fn write(
            &mut self,
            data: &[u8],
            timeout: Option<Duration>,
        ) -> rmicro_core::Result<IoOutcome<usize>> {
            Ok(self.write_stream(data, timeout)?)
        }

        fn timeouts(&self) -> TransportTimeouts {
            TransportTimeouts::for_flow_control(true)
        }
    }

}
