//! Layout command implementations

use std::fs;
use std::path::Path;

use rmicro_core::layout::{format_size, MemoryLayout};
use rmicro_core::DeviceConfig;

/// Show layout from a file
pub fn cmd_show(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let layout = MemoryLayout::from_toml_file(file)?;
    print_layout(&layout);
    Ok(())
}

/// Export a device's layout as TOML, to a file or stdout
pub fn cmd_export(
    device: &DeviceConfig,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let toml = device.mem_layout.to_toml_string(Some(&device.device_id));

    if let Some(out) = output {
        fs::write(out, &toml)?;
        println!("Saved layout of {} to {:?}", device.device_id, out);
    } else {
        print!("{}", toml);
    }

    Ok(())
}

/// Print layout information
pub fn print_layout(layout: &MemoryLayout) {
    println!(
        "{:<10} {:>12} {:>12} {:>12}",
        "Section", "Start", "End", "Size"
    );
    println!("{}", "-".repeat(50));

    for section in layout.sections() {
        let (start, end) = match (section.start, section.end()) {
            (Some(start), Some(end)) => (format!("{:#010x}", start), format!("{:#010x}", end)),
            _ => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:<10} {:>12} {:>12} {:>12}",
            section.name,
            start,
            end,
            format_size(section.size)
        );
    }

    println!("{}", "-".repeat(50));
    println!(
        "{:<10} {:>12} {:>12} {:>12}",
        "total",
        "",
        "",
        format_size(layout.total_size())
    );
}
