//! rmicro - Host tool for micro-target devices
//!
//! Checks that generated operator libraries fit a device's workspace, builds
//! them with the device toolchain, and opens sessions to devices over a
//! transport or a host-built binary.
//!
//! # Architecture
//!
//! Device configurations come from a database of RON files, each carrying the
//! memory layout used by the workspace check. Sessions are opened through
//! `rmicro-connect`, which turns a transport string into a transport factory
//! and hands it to the `rmicro-core` handshake.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, DeviceCommands, LayoutCommands, LayoutSource};
use commands::connect::Target;
use commands::device::{load_device_database, resolve_device};
use rmicro_core::MemoryLayout;
use std::path::Path;

/// Log level requested with `-v`/`-vv`, if any
fn verbosity_level(verbose: u8) -> Option<log::LevelFilter> {
    match verbose {
        0 => None, // default (info, or RUST_LOG)
        1 => Some(log::LevelFilter::Debug),
        _ => Some(log::LevelFilter::Trace),
    }
}

fn logger_builder(verbose: u8) -> env_logger::Builder {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    // RUST_LOG module directives still apply on top of the global level
    if let Some(level) = verbosity_level(verbose) {
        builder.filter_level(level);
    }
    builder
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logger_builder(cli.verbose).init();

    let db_path = cli.device_db.as_deref();

    match cli.command {
        Commands::Check { source, layout } => {
            let layout = load_layout(&layout, db_path)?;
            commands::check::cmd_check(&source, &layout).map(|_| ())
        }
        Commands::Build {
            source,
            output,
            device,
            includes,
            extra_args,
        } => {
            let device = resolve_device(&device, db_path)?;
            commands::check::cmd_build(
                &source,
                &output,
                &device,
                includes.headers,
                includes.include_paths,
                extra_args,
            )
        }
        Commands::Connect {
            transport,
            binary,
            binary_args,
            debugger,
            name,
            send,
            reply_timeout,
        } => {
            let target = match (transport, binary) {
                (Some(spec), None) => Target::Transport(spec),
                (None, Some(path)) => Target::Binary {
                    path,
                    args: binary_args,
                    debugger,
                },
                _ => return Err("Specify exactly one of --transport or --binary".into()),
            };
            commands::connect::cmd_connect(&target, &name, &send, reply_timeout)
        }
        Commands::ListTransports => {
            commands::list_transports();
            Ok(())
        }
        Commands::Device(subcmd) => match subcmd {
            DeviceCommands::List => {
                let db = load_device_database(db_path)?;
                log::info!("Loaded {} device definitions", db.len());
                commands::device::cmd_list(&db)
            }
            DeviceCommands::Show { device } => {
                commands::device::cmd_show(&resolve_device(&device, db_path)?)
            }
        },
        Commands::Layout(subcmd) => match subcmd {
            LayoutCommands::Show { file } => commands::layout::cmd_show(&file),
            LayoutCommands::Export { device, output } => {
                let device = resolve_device(&device, db_path)?;
                commands::layout::cmd_export(&device, output.as_deref())
            }
        },
    }
}

/// Load the memory layout for a check from a layout file or a device
fn load_layout(
    args: &LayoutSource,
    db_path: Option<&Path>,
) -> Result<MemoryLayout, Box<dyn std::error::Error>> {
    if let Some(path) = &args.layout {
        let layout = MemoryLayout::from_toml_file(path)?;
        log::info!("Loaded layout from {:?}", path);
        Ok(layout)
    } else if let Some(device) = &args.device {
        Ok(resolve_device(device, db_path)?.mem_layout)
    } else {
        Err("Layout source required (--layout or --device)".into())
    }
}
