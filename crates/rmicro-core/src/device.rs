//! Device configurations
//!
//! A device configuration names a target, its toolchain and its memory layout.
//! Configurations are written in RON and validated once at load time:
//!
//! ```ron
//! #![enable(implicit_some)]
//! (
//!     device_id: "arm.stm32f746xx",
//!     toolchain_prefix: "arm-none-eabi-",
//!     word_size_bits: 32,
//!     thumb_mode: true,
//!     use_device_timer: true,
//!     comms_method: OpenOcd(server_addr: "127.0.0.1", server_port: 6666),
//!     mem_layout: {
//!         "text": (start: 0x20000180, size: 20480),
//!         "workspace": (size: 132000),
//!         // ...
//!     },
//! )
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::layout::{MemoryLayout, SectionSpec};

/// How the host talks to the device
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum CommsMethod {
    /// The "device" is a process on the host
    Host,
    /// Through an OpenOCD server
    OpenOcd {
        /// OpenOCD server address
        server_addr: String,
        /// OpenOCD server port
        server_port: u16,
    },
    /// Directly over a serial line
    Serial,
}

/// Device configuration as written in a RON file (unvalidated)
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RawDeviceConfig {
    /// Device identifier (e.g. "arm.stm32f746xx")
    pub device_id: String,
    /// Cross-toolchain prefix (e.g. "arm-none-eabi-")
    #[serde(default)]
    pub toolchain_prefix: String,
    /// Native word size of the target
    pub word_size_bits: u32,
    /// Whether code is built in ARM thumb mode
    #[serde(default)]
    pub thumb_mode: bool,
    /// Whether the device timer is used for timing
    #[serde(default)]
    pub use_device_timer: bool,
    /// Communication method
    pub comms_method: CommsMethod,
    /// Section name to section entry
    pub mem_layout: BTreeMap<String, SectionSpec>,
}

/// A validated device configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Device identifier
    pub device_id: String,
    /// Cross-toolchain prefix
    pub toolchain_prefix: String,
    /// Native word size of the target
    pub word_size_bits: u32,
    /// Whether code is built in ARM thumb mode
    pub thumb_mode: bool,
    /// Whether the device timer is used for timing
    pub use_device_timer: bool,
    /// Communication method
    pub comms_method: CommsMethod,
    /// Validated memory layout
    pub mem_layout: MemoryLayout,
}

impl DeviceConfig {
    /// Validate a raw configuration
    pub fn validate(raw: RawDeviceConfig) -> Result<Self> {
        if raw.device_id.is_empty() {
            return Err(Error::Config("device_id must not be empty".into()));
        }
        if !matches!(raw.word_size_bits, 8 | 16 | 32 | 64) {
            return Err(Error::Config(format!(
                "{}: unsupported word size {} bits",
                raw.device_id, raw.word_size_bits
            )));
        }
        let mem_layout = MemoryLayout::validate(&raw.mem_layout)?;

        Ok(Self {
            device_id: raw.device_id,
            toolchain_prefix: raw.toolchain_prefix,
            word_size_bits: raw.word_size_bits,
            thumb_mode: raw.thumb_mode,
            use_device_timer: raw.use_device_timer,
            comms_method: raw.comms_method,
            mem_layout,
        })
    }

    /// Parse and validate a configuration from RON text
    pub fn from_ron_str(content: &str) -> Result<Self> {
        let raw: RawDeviceConfig = ron::from_str(content).map_err(|e| Error::Parse {
            path: "<string>".into(),
            message: e.to_string(),
        })?;
        Self::validate(raw)
    }

    /// Load and validate a configuration from a RON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let raw: RawDeviceConfig = ron::from_str(&content).map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::validate(raw)
    }

    /// Word size in bytes
    pub fn word_size_bytes(&self) -> u32 {
        self.word_size_bits / 8
    }
}

/// Collection of device configurations, keyed by device id
#[derive(Debug, Default)]
pub struct DeviceDatabase {
    devices: BTreeMap<String, DeviceConfig>,
}

impl DeviceDatabase {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a single RON file, replacing any device with the same id
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let config = DeviceConfig::from_file(path.as_ref())?;
        log::debug!(
            "Loaded device {} from {}",
            config.device_id,
            path.as_ref().display()
        );
        if let Some(old) = self.devices.insert(config.device_id.clone(), config) {
            log::warn!("Device {} defined more than once", old.device_id);
        }
        Ok(())
    }

    /// Load every `.ron` file in a directory, returning how many were loaded
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let mut paths: Vec<_> = fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "ron"))
            .collect();
        paths.sort();

        for path in &paths {
            self.load_file(path)?;
        }
        Ok(paths.len())
    }

    /// Find a device by id
    pub fn find(&self, device_id: &str) -> Option<&DeviceConfig> {
        self.devices.get(device_id)
    }

    /// Iterate over all devices, sorted by id
    pub fn iter(&self) -> impl Iterator<Item = &DeviceConfig> {
        self.devices.values()
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if the database is empty
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutError;

    const HOST_DEVICE: &str = r#"
#![enable(implicit_some)]
(
    device_id: "host",
    word_size_bits: 64,
    comms_method: Host,
    mem_layout: {
        "text": (size: 20480),
        "rodata": (size: 20480),
        "data": (size: 768),
        "bss": (size: 768),
        "args": (size: 4096),
        "heap": (size: 262144),
        "workspace": (size: 1000),
        "stack": (size: 32),
    },
)
"#;

    #[test]
    fn test_parse_host_device() {
        let device = DeviceConfig::from_ron_str(HOST_DEVICE).unwrap();
        assert_eq!(device.device_id, "host");
        assert_eq!(device.word_size_bytes(), 8);
        assert_eq!(device.comms_method, CommsMethod::Host);
        assert_eq!(device.mem_layout.workspace_size(), 1000);
        assert!(!device.thumb_mode);
    }

    #[test]
    fn test_openocd_device() {
        let text = HOST_DEVICE
            .replace("comms_method: Host", "comms_method: OpenOcd(server_addr: \"127.0.0.1\", server_port: 6666)")
            .replace("\"text\": (size: 20480)", "\"text\": (start: 0x20000180, size: 20480)");
        let device = DeviceConfig::from_ron_str(&text).unwrap();
        assert_eq!(
            device.comms_method,
            CommsMethod::OpenOcd {
                server_addr: "127.0.0.1".into(),
                server_port: 6666
            }
        );
        assert_eq!(
            device.mem_layout.section_start("text").unwrap(),
            Some(0x2000_0180)
        );
    }

    #[test]
    fn test_missing_section_fails_at_load() {
        let text = HOST_DEVICE.replace("\"stack\": (size: 32),", "");
        assert!(matches!(
            DeviceConfig::from_ron_str(&text),
            Err(Error::MemoryLayout(LayoutError::MissingSection(_)))
        ));
    }

    #[test]
    fn test_bad_word_size() {
        let text = HOST_DEVICE.replace("word_size_bits: 64", "word_size_bits: 12");
        assert!(matches!(
            DeviceConfig::from_ron_str(&text),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_database_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("host.ron"), HOST_DEVICE).unwrap();
        fs::write(
            dir.path().join("other.ron"),
            HOST_DEVICE.replace("device_id: \"host\"", "device_id: \"riscv.qemu\""),
        )
        .unwrap();
        fs::write(dir.path().join("README.txt"), "not a device").unwrap();

        let mut db = DeviceDatabase::new();
        assert_eq!(db.load_dir(dir.path()).unwrap(), 2);
        assert_eq!(db.len(), 2);
        assert!(db.find("riscv.qemu").is_some());
        assert!(db.find("msp430").is_none());
    }
}
