//! CLI command implementations
//!
//! Commands only talk to devices through `rmicro-connect` and to the static
//! analysis through `rmicro-core`.

pub mod check;
pub mod connect;
pub mod device;
pub mod layout;
mod list;

pub use list::list_transports;
