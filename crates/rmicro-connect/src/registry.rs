//! Transport registry
//!
//! This module handles opening transports by name and building sessions on
//! top of them. Which transports exist depends on the enabled features.

use std::collections::HashMap;
use std::str::FromStr;

use rmicro_core::error::{Error, Result};
#[allow(unused_imports)] // Used in feature-gated code
use rmicro_core::session::MicroBinary;
use rmicro_core::session::{Session, SessionConfig, SessionRegistry};
use rmicro_core::transport::{
    BoxedTransport, BoxedTransportFactory, Transport, TransportTimeouts,
};

const TIMEOUT_KEYS: [&str; 3] = ["retry", "start", "established"];

/// Parsed transport parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParams {
    /// Transport name as given
    pub name: String,
    /// Key-value parameters
    pub params: HashMap<String, String>,
}

impl TransportParams {
    /// Raw value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Parsed value of `key`; present but unparsable is an error
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(raw) => raw.parse().map(Some).map_err(|_| {
                Error::Config(format!("{}: invalid value for {}: '{}'", self.name, key, raw))
            }),
            None => Ok(None),
        }
    }

    /// Boolean flag `key`: `1/true/yes/on` or `0/false/no/off`
    pub fn flag(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key).map(str::to_ascii_lowercase).as_deref() {
            None => Ok(None),
            Some("1" | "true" | "yes" | "on") => Ok(Some(true)),
            Some("0" | "false" | "no" | "off") => Ok(Some(false)),
            Some(other) => Err(Error::Config(format!(
                "{}: invalid value for {}: '{}' (expected true or false)",
                self.name, key, other
            ))),
        }
    }

    fn seconds(&self, key: &str) -> Result<Option<f64>> {
        match self.parse::<f64>(key)? {
            Some(secs) if !secs.is_finite() || secs < 0.0 || secs > 86_400.0 => {
                Err(Error::Config(format!(
                    "{}: {} must be between 0 and 86400 seconds, got {}",
                    self.name, key, secs
                )))
            }
            other => Ok(other),
        }
    }

    /// Reject keys other than `known` and the timeout keys every transport takes
    pub fn ensure_known(&self, known: &[&str]) -> Result<()> {
        let mut unknown: Vec<&str> = self
            .params
            .keys()
            .map(String::as_str)
            .filter(|key| !known.contains(key) && !TIMEOUT_KEYS.contains(key))
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }
        unknown.sort_unstable();
        Err(Error::Config(format!(
            "{}: unknown parameter {} (expected one of: {})",
            self.name,
            unknown.join(", "),
            known
                .iter()
                .chain(TIMEOUT_KEYS.iter())
                .copied()
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Whether any of `retry=`, `start=` or `established=` is given
    pub fn has_timeouts(&self) -> bool {
        TIMEOUT_KEYS
            .iter()
            .any(|key| self.params.contains_key(*key))
    }

    /// Timeouts given as `retry=`, `start=` and `established=` seconds,
    /// starting from the transport's own defaults
    pub fn timeouts(&self, defaults: TransportTimeouts) -> Result<Option<TransportTimeouts>> {
        if !self.has_timeouts() {
            return Ok(None);
        }
        let retry = self.seconds("retry")?;
        let start = self.seconds("start")?;
        let established = self.seconds("established")?;
        Ok(Some(TransportTimeouts::from_secs_f64(
            retry.unwrap_or(defaults.session_start_retry_timeout.as_secs_f64()),
            start.unwrap_or(defaults.session_start_timeout.as_secs_f64()),
            established.unwrap_or(defaults.session_established_timeout.as_secs_f64()),
            defaults.has_flow_control,
        )))
    }
}

/// Parse a transport string into name and parameters
///
/// Format: "name" or "name:key1=value1,key2=value2"
///
/// # Example
/// ```
/// let params = rmicro_connect::parse_transport_params("serial:dev=/dev/ttyACM0").unwrap();
/// assert_eq!(params.name, "serial");
/// assert_eq!(params.get("dev"), Some("/dev/ttyACM0"));
/// ```
pub fn parse_transport_params(s: &str) -> Result<TransportParams> {
    let (name, opts_str) = s.split_once(':').unwrap_or((s, ""));
    if name.is_empty() {
        return Err(Error::Config(format!("missing transport name in '{}'", s)));
    }

    let mut params = HashMap::new();
    if !opts_str.is_empty() {
        for opt in opts_str.split(',') {
            if let Some((key, value)) = opt.split_once('=') {
                params.insert(key.to_string(), value.to_string());
            } else {
                return Err(Error::Config(format!(
                    "Invalid parameter format: '{}' (expected key=value)",
                    opt
                )));
            }
        }
    }

    Ok(TransportParams {
        name: name.to_string(),
        params,
    })
}

/// Build a factory for the transport named by `transport`
///
/// Nothing is opened yet; the factory is handed to a session, which creates
/// and opens the transport when it is entered.
///
/// # Arguments
/// * `transport` - Transport specification (e.g., "emulator" or "serial:dev=/dev/ttyACM0")
pub fn transport_factory(transport: &str) -> Result<BoxedTransportFactory> {
    let params = parse_transport_params(transport)?;

    match params.name.as_str() {
        #[cfg(feature = "serial")]
        "serial" | "uart" => serial_factory(&params),

        #[cfg(feature = "serial")]
        "tcp" => tcp_factory(&params),

        #[cfg(feature = "emulator")]
        "emulator" | "loopback" => emulator_factory(&params),

        #[cfg(feature = "emulator")]
        "subprocess" | "host" => subprocess_factory(&params),

        _ => Err(Error::Config(format!(
            "Unknown transport: {} (available: {})",
            params.name,
            transport_names_short()
        ))),
    }
}

/// Create and open the transport named by `transport`
pub fn open_transport(transport: &str) -> Result<BoxedTransport> {
    let mut factory = transport_factory(transport)?;
    log::info!("Opening {}...", factory.describe());
    let mut opened = factory.create()?;
    opened.open()?;
    Ok(opened)
}

/// Session configuration for a transport string
///
/// Timeout parameters in the string override the transport's defaults.
pub fn session_config(name: &str, transport: &str) -> Result<SessionConfig> {
    let params = parse_transport_params(transport)?;
    let mut factory = transport_factory(transport)?;
    let mut config = SessionConfig::new(name);
    if params.has_timeouts() {
        // Defaults come from the transport itself; creating one does not open it
        let defaults = factory.create()?.timeouts();
        if let Some(timeouts) = params.timeouts(defaults)? {
            config = config.timeouts(timeouts);
        }
    }
    Ok(config.transport_factory(factory))
}

/// Create a session over the transport named by `transport`
///
/// The session is registered but not entered.
///
/// # Example
/// ```ignore
/// let registry = SessionRegistry::new();
/// let mut session = open_session("dev", "emulator", &registry)?;
/// let channel = session.enter()?;
/// println!("session {:#06x}", channel.session_id());
/// ```
pub fn open_session(name: &str, transport: &str, registry: &SessionRegistry) -> Result<Session> {
    Session::new(session_config(name, transport)?, registry)
}

/// Create a session that flashes `binary` onto the host before connecting
///
/// With `debugger` (`gdb`, `lldb` or `native`) the binary runs under that
/// debugger, which keeps the terminal.
#[cfg(feature = "emulator")]
pub fn open_host_session(
    name: &str,
    binary: MicroBinary,
    args: &[String],
    debugger: Option<&str>,
    registry: &SessionRegistry,
) -> Result<Session> {
    let debugger = debugger
        .map(str::parse::<rmicro_emulator::Debugger>)
        .transpose()?;
    let config = SessionConfig::new(name)
        .binary(binary)
        .flasher(rmicro_emulator::HostFlasher::with_args(args).debugger(debugger));
    Session::new(config, registry)
}

#[cfg(feature = "serial")]
fn serial_factory(params: &TransportParams) -> Result<BoxedTransportFactory> {
    use rmicro_serial::SerialConnection;

    params.ensure_known(&["dev", "grep", "baud", "byte_at_a_time"])?;
    let (key, target) = match (params.get("dev"), params.get("grep")) {
        (Some(dev), None) => ("dev", dev),
        (None, Some(pattern)) => ("grep", pattern),
        _ => {
            return Err(Error::Config(
                "serial requires exactly one of dev= or grep=.\n\
                 Usage: serial:dev=/dev/ttyACM0[,baud=115200] or serial:grep=<pattern>"
                    .into(),
            ))
        }
    };
    let mut conn_str = format!("{}={}", key, target);
    if let Some(baud) = params.parse::<u32>("baud")? {
        conn_str = format!("{}:{}", conn_str, baud);
    }
    let byte_at_a_time = params.flag("byte_at_a_time")?.unwrap_or(false);

    let conn = SerialConnection::parse(&conn_str)
        .map_err(|e| Error::Config(format!("Invalid serial parameters: {}", e)))?;
    log::debug!("Serial transport: {:?}", conn);

    Ok(Box::new(move || -> Result<BoxedTransport> {
        match conn.clone() {
            SerialConnection::Serial { selector, baud } => Ok(Box::new(
                rmicro_serial::SerialTransport::new(selector, baud).byte_at_a_time(byte_at_a_time),
            )),
            tcp => Ok(tcp.into_transport()),
        }
    }))
}

#[cfg(feature = "serial")]
fn tcp_factory(params: &TransportParams) -> Result<BoxedTransportFactory> {
    use rmicro_serial::SerialConnection;

    params.ensure_known(&["ip"])?;
    let ip = params.get("ip").ok_or_else(|| {
        Error::Config("tcp requires connection parameters.\nUsage: tcp:ip=host:port".into())
    })?;
    let conn = SerialConnection::parse(&format!("ip={}", ip))
        .map_err(|e| Error::Config(format!("Invalid tcp parameters: {}", e)))?;

    Ok(Box::new(move || -> Result<BoxedTransport> {
        Ok(conn.clone().into_transport())
    }))
}

#[cfg(feature = "emulator")]
fn emulator_factory(params: &TransportParams) -> Result<BoxedTransportFactory> {
    use rmicro_emulator::{shared, EmulatedDevice, EmulatorConfig, LoopbackFactory};

    params.ensure_known(&["banner", "nonce", "silent", "confirm", "drop"])?;
    let mut config = EmulatorConfig {
        banner: params.get("banner").map(str::to_string),
        ..Default::default()
    };
    if let Some(nonce) = params.parse::<u8>("nonce")? {
        config.nonce_seed = nonce;
    }
    if let Some(silent) = params.flag("silent")? {
        config.reply_to_start = !silent;
    }
    if let Some(confirm) = params.flag("confirm")? {
        config.confirm = confirm;
    }
    let drop_writes = params.parse::<u32>("drop")?.unwrap_or(0);

    let device = EmulatedDevice::new(config)?;
    Ok(Box::new(
        LoopbackFactory::new(shared(device)).drop_first_writes(drop_writes),
    ))
}

#[cfg(feature = "emulator")]
fn subprocess_factory(params: &TransportParams) -> Result<BoxedTransportFactory> {
    use std::ffi::OsString;

    params.ensure_known(&["cmd", "args", "debug"])?;
    let cmd = params.get("cmd").ok_or_else(|| {
        Error::Config(
            "subprocess requires a command.\nUsage: subprocess:cmd=/path/to/device-binary".into(),
        )
    })?;
    let args: Vec<OsString> = params
        .get("args")
        .map(|a| a.split_whitespace().map(OsString::from).collect())
        .unwrap_or_default();
    let debugger = params
        .get("debug")
        .map(str::parse::<rmicro_emulator::Debugger>)
        .transpose()?;
    Ok(Box::new(
        rmicro_emulator::SubprocessFactory::new(cmd, args).debugger(debugger),
    ))
}

/// Information about a transport
#[derive(Debug, Clone)]
pub struct TransportInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Get information about all available transports (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_transports() -> Vec<TransportInfo> {
    let mut transports = Vec::new();

    #[cfg(feature = "serial")]
    transports.push(TransportInfo {
        name: "serial",
        aliases: &["uart"],
        description: "Serial port (dev=<port> or grep=<pattern>, baud=<rate>, byte_at_a_time=1)",
    });

    #[cfg(feature = "serial")]
    transports.push(TransportInfo {
        name: "tcp",
        aliases: &[],
        description: "TCP connection to a device server (ip=<host:port>)",
    });

    #[cfg(feature = "emulator")]
    transports.push(TransportInfo {
        name: "emulator",
        aliases: &["loopback"],
        description: "In-process emulated device (nonce=, silent=, confirm=, drop=, banner=)",
    });

    #[cfg(feature = "emulator")]
    transports.push(TransportInfo {
        name: "subprocess",
        aliases: &["host"],
        description: "Device binary on stdin/stdout (cmd=<path>, args=<space separated>, \
                      debug=gdb|lldb)",
    });

    transports
}

/// Generate a short list of transport names for CLI help
pub fn transport_names_short() -> String {
    let transports = available_transports();
    if transports.is_empty() {
        return "none (recompile with features)".to_string();
    }
    let names: Vec<&str> = transports.iter().map(|t| t.name).collect();
    names.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_only() {
        let params = parse_transport_params("emulator").unwrap();
        assert_eq!(params.name, "emulator");
        assert!(params.params.is_empty());
    }

    #[test]
    fn test_parse_with_params() {
        let params = parse_transport_params("serial:dev=/dev/ttyACM0,baud=921600").unwrap();
        assert_eq!(params.name, "serial");
        assert_eq!(params.get("dev"), Some("/dev/ttyACM0"));
        assert_eq!(params.parse::<u32>("baud").unwrap(), Some(921600));
        assert_eq!(params.parse::<u32>("missing").unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_bad_options() {
        assert!(parse_transport_params("serial:dev").is_err());
        assert!(parse_transport_params(":dev=x").is_err());
        let params = parse_transport_params("emulator:drop=many").unwrap();
        assert!(matches!(params.parse::<u32>("drop"), Err(Error::Config(_))));
    }

    #[test]
    fn test_flags() {
        let params = parse_transport_params("emulator:silent=yes,confirm=0,x=maybe").unwrap();
        assert_eq!(params.flag("silent").unwrap(), Some(true));
        assert_eq!(params.flag("confirm").unwrap(), Some(false));
        assert_eq!(params.flag("banner").unwrap(), None);
        assert!(params.flag("x").is_err());
    }

    #[test]
    fn test_timeout_overrides() {
        let defaults = TransportTimeouts::for_flow_control(false);
        let none = parse_transport_params("emulator").unwrap();
        assert_eq!(none.timeouts(defaults).unwrap(), None);

        let params = parse_transport_params("emulator:retry=0.5,start=3").unwrap();
        let timeouts = params.timeouts(defaults).unwrap().unwrap();
        assert_eq!(timeouts.session_start_retry_timeout.as_millis(), 500);
        assert_eq!(timeouts.session_start_timeout.as_secs(), 3);
        assert_eq!(
            timeouts.session_established_timeout,
            defaults.session_established_timeout
        );

        for bad in ["retry=-1", "start=nan", "established=inf", "retry=1e30"] {
            let params = parse_transport_params(&format!("emulator:{}", bad)).unwrap();
            assert!(params.timeouts(defaults).is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn test_unknown_transport() {
        let err = transport_factory("carrier-pigeon").err().unwrap();
        assert!(err.to_string().contains("Unknown transport: carrier-pigeon"));
    }

    #[cfg(feature = "emulator")]
    #[test]
    fn test_open_session_on_emulator() {
        let registry = SessionRegistry::new();
        let mut session = open_session("test", "emulator:nonce=7", &registry).unwrap();
        let id = session.enter().unwrap().session_id();
        assert_eq!(
            rmicro_core::session::protocol::device_nonce(id),
            rmicro_core::session::protocol::next_nonce(7)
        );
        session.exit().unwrap();
        assert!(!registry.is_active());
    }

    #[cfg(feature = "emulator")]
    #[test]
    fn test_emulator_timeout_override_applies() {
        let registry = SessionRegistry::new();
        let mut session = open_session(
            "quiet",
            "emulator:silent=1,retry=0.01,start=0.05",
            &registry,
        )
        .unwrap();
        assert!(matches!(
            session.enter(),
            Err(Error::SessionEstablish {
                failure: rmicro_core::EstablishFailure::NoResponse,
                ..
            })
        ));
        let timeouts = session.timeouts().unwrap();
        assert_eq!(timeouts.session_start_timeout.as_millis(), 50);
        assert!(timeouts.has_flow_control);
    }

    #[cfg(feature = "emulator")]
    #[test]
    fn test_open_transport_opens() {
        let mut transport = open_transport("loopback").unwrap();
        assert_eq!(
            transport.write(b"x", None).unwrap(),
            rmicro_core::IoOutcome::Delivered(1)
        );
        transport.close().unwrap();
    }

    #[cfg(feature = "emulator")]
    #[test]
    fn test_subprocess_requires_cmd() {
        assert!(matches!(
            transport_factory("subprocess"),
            Err(Error::Config(_))
        ));
        assert!(transport_factory("host:cmd=/bin/cat,args=-u").is_ok());
    }

    #[cfg(feature = "emulator")]
    #[test]
    fn test_subprocess_debugger() {
        let factory = transport_factory("subprocess:cmd=/tmp/dev,debug=gdb").unwrap();
        assert_eq!(factory.describe(), "subprocess /tmp/dev under gdb");
        assert!(matches!(
            transport_factory("subprocess:cmd=/tmp/dev,debug=valgrind"),
            Err(Error::Config(_))
        ));
    }

    #[cfg(feature = "emulator")]
    #[test]
    fn test_host_session_rejects_unknown_debugger() {
        let registry = SessionRegistry::new();
        let binary = MicroBinary::new("/bin/cat");
        assert!(matches!(
            open_host_session("dbg", binary, &[], Some("valgrind"), &registry),
            Err(Error::Config(_))
        ));
        assert!(!registry.is_active());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let params = parse_transport_params("emulator:silnt=1,retry=0.5").unwrap();
        let err = params.ensure_known(&["silent"]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("unknown parameter silnt"));
        assert!(params.ensure_known(&["silnt"]).is_ok());
    }

    #[cfg(feature = "emulator")]
    #[test]
    fn test_emulator_rejects_misspelled_keys() {
        assert!(matches!(
            transport_factory("emulator:silnt=1"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            transport_factory("subprocess:cmd=/bin/cat,arg=-u"),
            Err(Error::Config(_))
        ));
        assert!(transport_factory("emulator:silent=1,start=0.5").is_ok());
    }

    #[cfg(feature = "serial")]
    #[test]
    fn test_serial_requires_one_selector() {
        assert!(transport_factory("serial").is_err());
        assert!(transport_factory("serial:dev=/dev/ttyS0,grep=FTDI").is_err());
        assert!(transport_factory("serial:dev=/dev/ttyS0,baud=fast").is_err());
        assert!(transport_factory("uart:grep=CP210").is_ok());
        assert!(transport_factory("tcp").is_err());
        assert!(transport_factory("tcp:ip=localhost:7777").is_ok());
    }

    #[cfg(feature = "serial")]
    #[test]
    fn test_serial_rejects_misspelled_keys() {
        for spec in ["serial:dev=/dev/x,baudd=9600", "tcp:ip=localhost:7777,port=1"] {
            assert!(
                matches!(transport_factory(spec), Err(Error::Config(_))),
                "{} accepted",
                spec
            );
        }
        assert!(transport_factory("serial:dev=/dev/x,baud=9600,retry=1").is_ok());
    }

    #[test]
    fn test_available_transports_match_names() {
        let names = transport_names_short();
        for info in available_transports() {
            assert!(names.contains(info.name));
        }
    }
}
