//! Device memory layout support
//!
//! This module provides the [`MemoryLayout`] of a target device: the eight
//! fixed sections of its address space, each with a mandatory size and an
//! optional start address. Layouts can be:
//!
//! - Validated from a section-name mapping (device configurations)
//! - Loaded from TOML files
//!
//! ```ignore
//! let layout = MemoryLayout::from_toml_file("stm32f746.toml")?;
//! println!("workspace: {} bytes", layout.workspace_size());
//! ```

mod toml;
mod types;

pub use self::toml::{format_size, parse_size};
pub use types::*;
