//! Workspace check and gated build commands

use std::fs;
use std::path::{Path, PathBuf};

use rmicro_core::compile::{CompileOptions, Compiler, GatedCompiler, ToolchainCompiler};
use rmicro_core::layout::format_size;
use rmicro_core::workspace::ensure_fits;
use rmicro_core::{DeviceConfig, MemoryLayout, WorkspaceAnalyzer, WorkspaceUsage};

/// Analyze a generated source file against a layout's workspace section
pub fn cmd_check(
    source: &Path,
    layout: &MemoryLayout,
) -> Result<WorkspaceUsage, Box<dyn std::error::Error>> {
    let contents = fs::read_to_string(source)?;
    let usage = WorkspaceAnalyzer::new().analyze(&contents)?;
    let capacity = layout.workspace_size();

    println!("Source:       {}", source.display());
    println!("Allocations:  {}", usage.allocations);
    println!("Frees:        {}", usage.frees);
    println!("Peak usage:   {} bytes", usage.peak);
    println!(
        "Workspace:    {} bytes ({})",
        capacity,
        format_size(capacity)
    );
    for (token, size) in &usage.unfreed {
        println!("  never freed: {} ({} bytes)", token, size);
    }

    ensure_fits(&usage, capacity)?;
    println!("OK: {} bytes to spare", capacity - usage.peak);
    Ok(usage)
}

/// Compile a generated source file for `device` once it passes the check
pub fn cmd_build(
    source: &Path,
    output: &Path,
    device: &DeviceConfig,
    headers: Vec<String>,
    include_paths: Vec<PathBuf>,
    extra_args: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let compiler = GatedCompiler::new(
        ToolchainCompiler::for_device(device),
        device.mem_layout.clone(),
    );
    build_with(&compiler, source, output, headers, include_paths, extra_args)?;
    println!("Built {} for {}", output.display(), device.device_id);
    Ok(())
}

fn build_with(
    compiler: &impl Compiler,
    source: &Path,
    output: &Path,
    headers: Vec<String>,
    include_paths: Vec<PathBuf>,
    extra_args: Vec<String>,
) -> rmicro_core::Result<()> {
    let options = CompileOptions {
        include_paths,
        headers,
        extra_args,
    };
    compiler.compile(output, source, &options)
}
