//! Device database loading and device commands

use std::path::{Path, PathBuf};

use rmicro_core::layout::format_size;
use rmicro_core::{CommsMethod, DeviceConfig, DeviceDatabase};

/// Load the device database from the specified path or default locations
pub fn load_device_database(
    path: Option<&Path>,
) -> Result<DeviceDatabase, Box<dyn std::error::Error>> {
    let mut db = DeviceDatabase::new();

    if let Some(path) = path {
        if path.is_dir() {
            db.load_dir(path)?;
        } else if path.is_file() {
            db.load_file(path)?;
        } else {
            return Err(format!("Device database path not found: {}", path.display()).into());
        }
    } else {
        let default_paths = [
            PathBuf::from("devices"),
            PathBuf::from("/usr/share/rmicro/devices"),
            PathBuf::from("/usr/local/share/rmicro/devices"),
        ];

        for dir in &default_paths {
            if dir.is_dir() {
                match db.load_dir(dir) {
                    Ok(count) => log::debug!("Loaded {} devices from {}", count, dir.display()),
                    Err(e) => log::warn!("Failed to load devices from {}: {}", dir.display(), e),
                }
            }
        }

        if db.is_empty() {
            log::warn!("No device database found in default locations");
        }
    }

    Ok(db)
}

/// Resolve a device given as a RON file path or as an id in the database
pub fn resolve_device(
    spec: &str,
    db_path: Option<&Path>,
) -> Result<DeviceConfig, Box<dyn std::error::Error>> {
    let path = Path::new(spec);
    if path.is_file() || path.extension().is_some_and(|ext| ext == "ron") {
        return Ok(DeviceConfig::from_file(path)?);
    }

    let db = load_device_database(db_path)?;
    match db.find(spec) {
        Some(device) => Ok(device.clone()),
        None => {
            let known: Vec<&str> = db.iter().map(|d| d.device_id.as_str()).collect();
            Err(format!(
                "Unknown device: {} (known: {})",
                spec,
                if known.is_empty() {
                    "none".to_string()
                } else {
                    known.join(", ")
                }
            )
            .into())
        }
    }
}

fn describe_comms(method: &CommsMethod) -> String {
    match method {
        CommsMethod::Host => "host process".to_string(),
        CommsMethod::OpenOcd {
            server_addr,
            server_port,
        } => format!("OpenOCD at {}:{}", server_addr, server_port),
        CommsMethod::Serial => "serial".to_string(),
    }
}

/// List all devices in the database
pub fn cmd_list(db: &DeviceDatabase) -> Result<(), Box<dyn std::error::Error>> {
    if db.is_empty() {
        println!("No devices found");
        return Ok(());
    }

    println!(
        "{:<20} {:>5} {:<24} {:>12}",
        "Device", "Bits", "Comms", "Workspace"
    );
    println!("{}", "-".repeat(64));
    for device in db.iter() {
        println!(
            "{:<20} {:>5} {:<24} {:>12}",
            device.device_id,
            device.word_size_bits,
            describe_comms(&device.comms_method),
            format_size(device.mem_layout.workspace_size())
        );
    }
    Ok(())
}

/// Show one device configuration
pub fn cmd_show(device: &DeviceConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("Device:      {}", device.device_id);
    if !device.toolchain_prefix.is_empty() {
        println!("Toolchain:   {}gcc", device.toolchain_prefix);
    }
    println!("Word size:   {} bits", device.word_size_bits);
    println!("Thumb mode:  {}", if device.thumb_mode { "yes" } else { "no" });
    println!(
        "Timer:       {}",
        if device.use_device_timer {
            "device"
        } else {
            "host"
        }
    );
    println!("Comms:       {}", describe_comms(&device.comms_method));
    println!();
    super::layout::print_layout(&device.mem_layout);
    Ok(())
}
