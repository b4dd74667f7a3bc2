//! Open rmicro transports and sessions by name
//!
//! The CLI only talks to transports through this crate. A transport is named
//! by a string of the form `name[:key=value,...]`; which names are available
//! depends on the enabled features.
//!
//! # Transports
//!
//! | Name | Feature | Parameters |
//! |------|---------|------------|
//! | `serial` (`uart`) | `serial` | `dev=` or `grep=`, `baud=`, `byte_at_a_time=` |
//! | `tcp` | `serial` | `ip=host:port` |
//! | `emulator` (`loopback`) | `emulator` | `nonce=`, `silent=`, `confirm=`, `drop=`, `banner=` |
//! | `subprocess` (`host`) | `emulator` | `cmd=`, `args=`, `debug=gdb\|lldb` |
//!
//! Every transport also accepts `retry=`, `start=` and `established=` (seconds)
//! to override its session timeouts. Any other key is rejected.
//!
//! # Example
//!
//! ```ignore
//! use rmicro_connect::open_session;
//! use rmicro_core::session::registry;
//!
//! let mut session = open_session("dev", "serial:grep=STM32,baud=115200", registry::global())?;
//! let channel = session.enter()?;
//! ```

pub mod registry;

pub use registry::{
    available_transports, open_session, open_transport, parse_transport_params,
    session_config, transport_factory, transport_names_short, TransportInfo, TransportParams,
};

#[cfg(feature = "emulator")]
pub use registry::open_host_session;
