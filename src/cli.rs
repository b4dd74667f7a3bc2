//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Generate dynamic help text for the transport argument
fn transport_help() -> String {
    format!(
        "Transport to use, as name[:key=value,...] [available: {}]",
        rmicro_connect::transport_names_short()
    )
}

#[derive(Parser)]
#[command(name = "rmicro")]
#[command(author, version, about = "Micro-target session and workspace tool", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory of device configurations (.ron files)
    /// Defaults to looking in ./devices/ and /usr/share/rmicro/devices/
    #[arg(long, global = true)]
    pub device_db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the memory layout for a check comes from
#[derive(clap::Args, Debug, Clone, Default)]
pub struct LayoutSource {
    /// Layout file (TOML format)
    #[arg(long, conflicts_with = "device")]
    pub layout: Option<PathBuf>,

    /// Device id or device configuration file (RON format)
    #[arg(short, long)]
    pub device: Option<String>,
}

/// Header injection options for a build
#[derive(clap::Args, Debug, Clone, Default)]
pub struct IncludeArgs {
    /// Header to inject as `#include <...>` (repeatable, requires --include-path)
    #[arg(long = "header", requires = "include_paths")]
    pub headers: Vec<String>,

    /// Include directory (repeatable, requires --header)
    #[arg(short = 'I', long = "include-path", requires = "headers")]
    pub include_paths: Vec<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that a generated library's workspace usage fits the device
    Check {
        /// Generated C source file
        source: PathBuf,

        #[command(flatten)]
        layout: LayoutSource,
    },

    /// Compile a generated library with the device toolchain, after checking it
    Build {
        /// Generated C source file
        source: PathBuf,

        /// Output object file
        #[arg(short, long)]
        output: PathBuf,

        /// Device id or device configuration file (RON format)
        #[arg(short, long)]
        device: String,

        #[command(flatten)]
        includes: IncludeArgs,

        /// Extra argument passed to the compiler (repeatable)
        #[arg(long = "cc-arg", allow_hyphen_values = true)]
        extra_args: Vec<String>,
    },

    /// Open a session to a device and exchange messages
    Connect {
        /// Transport to use
        #[arg(short, long, help = transport_help(), required_unless_present = "binary")]
        transport: Option<String>,

        /// Host binary to "flash" and run as the device instead of a transport
        #[arg(short, long, conflicts_with = "transport")]
        binary: Option<PathBuf>,

        /// Argument for the host binary (repeatable)
        #[arg(long = "arg", requires = "binary", allow_hyphen_values = true)]
        binary_args: Vec<String>,

        /// Run the host binary under a debugger (gdb, lldb or native)
        #[arg(long, requires = "binary", value_name = "DEBUGGER")]
        debugger: Option<String>,

        /// Session name
        #[arg(long, default_value = "rmicro")]
        name: String,

        /// Message to send once the session is up (repeatable)
        #[arg(short, long)]
        send: Vec<String>,

        /// Seconds to wait for each reply
        #[arg(long, default_value = "5")]
        reply_timeout: f64,
    },

    /// List available transports
    ListTransports,

    /// Device configuration operations
    #[command(subcommand)]
    Device(DeviceCommands),

    /// Layout operations
    #[command(subcommand)]
    Layout(LayoutCommands),
}

/// Device-related subcommands
#[derive(Subcommand)]
pub enum DeviceCommands {
    /// List devices in the device database
    List,

    /// Show a device configuration
    Show {
        /// Device id or device configuration file (RON format)
        device: String,
    },
}

/// Layout-related subcommands
#[derive(Subcommand)]
pub enum LayoutCommands {
    /// Show layout from a file
    Show {
        /// Layout file (TOML format)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Export a device's memory layout as TOML
    Export {
        /// Device id or device configuration file (RON format)
        #[arg(short, long)]
        device: String,

        /// Output layout file (TOML format, optional - prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_connect_requires_transport_or_binary() {
        assert!(Cli::try_parse_from(["rmicro", "connect"]).is_err());
        assert!(Cli::try_parse_from(["rmicro", "connect", "-t", "emulator"]).is_ok());
        assert!(Cli::try_parse_from(["rmicro", "connect", "-b", "/tmp/dev"]).is_ok());
        assert!(
            Cli::try_parse_from(["rmicro", "connect", "-t", "emulator", "-b", "/tmp/dev"]).is_err()
        );
    }

    #[test]
    fn test_headers_require_include_paths() {
        let base = ["rmicro", "build", "lib0.c", "-o", "lib0.o", "-d", "host"];
        let with = |extra: &[&'static str]| {
            Cli::try_parse_from(base.iter().chain(extra.iter()).copied().collect::<Vec<_>>())
        };
        assert!(with(&["--header", "x.h"]).is_err());
        assert!(with(&["-I", "/inc"]).is_err());
        match with(&["--header", "x.h", "-I", "/inc"]).unwrap().command {
            Commands::Build {
                includes, device, ..
            } => {
                assert_eq!(includes.headers, vec!["x.h"]);
                assert_eq!(device, "host");
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_check_layout_sources_conflict() {
        assert!(Cli::try_parse_from(["rmicro", "check", "a.c", "--layout", "l.toml"]).is_ok());
        assert!(
            Cli::try_parse_from(["rmicro", "check", "a.c", "--layout", "l.toml", "-d", "host"])
                .is_err()
        );
    }

    #[test]
    fn test_debugger_requires_binary() {
        assert!(
            Cli::try_parse_from(["rmicro", "connect", "-t", "emulator", "--debugger", "gdb"])
                .is_err()
        );
        let cli =
            Cli::try_parse_from(["rmicro", "connect", "-b", "/tmp/dev", "--debugger", "lldb"])
                .unwrap();
        match cli.command {
            Commands::Connect { debugger, .. } => assert_eq!(debugger.as_deref(), Some("lldb")),
            _ => panic!("expected connect"),
        }
    }

    #[test]
    fn test_verbosity_counts() {
        let cli = Cli::try_parse_from(["rmicro", "-vv", "list-transports"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
