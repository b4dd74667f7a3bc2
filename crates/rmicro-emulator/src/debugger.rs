//! Running a host device binary under a debugger
//!
//! The debugger keeps the terminal. The device binary's standard streams are
//! redirected to pipe ends the debugger inherits, named by path (usually
//! `/dev/fd/N`), so the session protocol never mixes with debugger output.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rmicro_core::error::Error;

/// Debugger used to launch a host binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debugger {
    /// GNU debugger
    Gdb,
    /// LLVM debugger
    Lldb,
}

impl Debugger {
    /// Usual debugger on this platform
    pub fn native() -> Self {
        if cfg!(target_os = "macos") {
            Debugger::Lldb
        } else {
            Debugger::Gdb
        }
    }

    /// Program to execute
    pub fn program(&self) -> &'static str {
        match self {
            Debugger::Gdb => "gdb",
            Debugger::Lldb => "lldb",
        }
    }

    /// Debugger arguments that run `binary` with `args`, reading its input
    /// from `input` and writing its output to `output`
    pub fn launch_args(
        &self,
        binary: &Path,
        args: &[OsString],
        input: &Path,
        output: &Path,
    ) -> Vec<OsString> {
        match self {
            Debugger::Gdb => {
                // gdb starts the inferior through a shell, which applies the redirections
                let mut launch = vec![OsString::from("--args"), binary.as_os_str().to_owned()];
                launch.extend(args.iter().cloned());
                launch.push(prefixed("<", input));
                launch.push(prefixed(">", output));
                launch
            }
            Debugger::Lldb => {
                let mut launch = vec![
                    OsString::from("-O"),
                    prefixed("target create ", binary),
                    OsString::from("-O"),
                    prefixed("settings set target.input-path ", input),
                    OsString::from("-O"),
                    prefixed("settings set target.output-path ", output),
                ];
                if !args.is_empty() {
                    let mut run_args = OsString::from("settings set target.run-args");
                    for arg in args {
                        run_args.push(" ");
                        run_args.push(arg);
                    }
                    launch.push(OsString::from("-O"));
                    launch.push(run_args);
                }
                launch
            }
        }
    }
}

fn prefixed(prefix: &str, path: &Path) -> OsString {
    let mut out = OsString::from(prefix);
    out.push(path.as_os_str());
    out
}

impl fmt::Display for Debugger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

impl FromStr for Debugger {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gdb" => Ok(Debugger::Gdb),
            "lldb" => Ok(Debugger::Lldb),
            "native" | "1" | "true" => Ok(Debugger::native()),
            _ => Err(Error::Config(format!(
                "unknown debugger '{}' (expected gdb or lldb)",
                s
            ))),
        }
    }
}
