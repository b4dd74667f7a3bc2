//! rmicro-core - Core library for talking to micro-target devices
//!
//! This crate provides the host side of running small binaries on
//! resource-constrained devices: the device memory layout, a static check that
//! a generated library's workspace usage fits that layout, the transport
//! contract, and the session handshake that turns a byte stream into an
//! established channel.
//!
//! # Example
//!
//! ```ignore
//! use rmicro_core::{check_workspace, session::{registry, Session, SessionConfig}};
//!
//! let device = DeviceConfig::from_file("devices/stm32f746.ron")?;
//! check_workspace(&std::fs::read_to_string("lib0.c")?, &device.mem_layout)?;
//!
//! let config = SessionConfig::new("stm32").transport_factory(factory);
//! let mut session = Session::new(config, registry::global())?;
//! let channel = session.enter()?;
//! println!("session {:#06x}", channel.session_id());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod compile;
pub mod device;
pub mod error;
pub mod layout;
pub mod session;
pub mod transport;
pub mod workspace;

pub use device::{CommsMethod, DeviceConfig, DeviceDatabase};
pub use error::{EstablishFailure, Error, Result};
pub use layout::{LayoutError, MemoryLayout, SectionName};
pub use session::{Session, SessionConfig, SessionRegistry, SessionState};
pub use transport::{IoOutcome, Transport, TransportTimeouts};
pub use workspace::{check_workspace, compute_peak_usage, WorkspaceAnalyzer, WorkspaceUsage};
