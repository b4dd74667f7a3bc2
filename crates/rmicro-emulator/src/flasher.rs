//! Flasher for binaries built to run on the host

use std::ffi::OsString;

use rmicro_core::error::{Error, Result};
use rmicro_core::session::{Flasher, MicroBinary};
use rmicro_core::transport::BoxedTransportFactory;

use crate::debugger::Debugger;
use crate::subprocess::SubprocessFactory;

/// "Flashes" a host binary by arranging for it to be run as a subprocess
///
/// The binary is started when the session opens its transport and talks the
/// session protocol over its standard streams.
#[derive(Debug, Clone, Default)]
pub struct HostFlasher {
    args: Vec<OsString>,
    debugger: Option<Debugger>,
}

impl HostFlasher {
    /// Flasher passing no extra arguments
    pub fn new() -> Self {
        Self::default()
    }

    /// Flasher passing `args` to the binary
    pub fn with_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            debugger: None,
        }
    }

    /// Run the binary under `debugger` instead of directly
    pub fn debugger(mut self, debugger: Option<Debugger>) -> Self {
        self.debugger = debugger;
        self
    }
}

impl Flasher for HostFlasher {
    fn flash(&mut self, binary: &MicroBinary) -> Result<BoxedTransportFactory> {
        let path = binary.path();
        let meta = std::fs::metadata(path)
            .map_err(|e| Error::Flash(format!("{}: {}", path.display(), e)))?;
        if !meta.is_file() {
            return Err(Error::Flash(format!("{} is not a file", path.display())));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if meta.permissions().mode() & 0o111 == 0 {
                return Err(Error::Flash(format!("{} is not executable", path.display())));
            }
        }
        log::debug!("HostFlasher: {} ready to run", path.display());
        Ok(Box::new(
            SubprocessFactory::new(path, self.args.clone()).debugger(self.debugger),
        ))
    }
}
