//! Host platform preconditions

use crate::error::{Error, Result};

/// Properties of the host a session runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPlatform {
    /// Operating system family, as in `std::env::consts::OS`
    pub os: &'static str,
    /// Pointer width in bits
    pub pointer_width: u32,
}

impl HostPlatform {
    /// Describe an arbitrary host
    pub const fn new(os: &'static str, pointer_width: u32) -> Self {
        Self { os, pointer_width }
    }

    /// The host this process runs on
    pub fn detect() -> Self {
        Self::new(std::env::consts::OS, usize::BITS)
    }

    /// Fail unless sessions are supported on this host
    pub fn check(&self) -> Result<()> {
        if self.pointer_width != 64 {
            return Err(Error::UnsupportedPlatform(format!(
                "{}-bit host, 64-bit required",
                self.pointer_width
            )));
        }
        if self.os != "linux" {
            return Err(Error::UnsupportedPlatform(format!(
                "{} host, linux required",
                self.os
            )));
        }
        Ok(())
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::detect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check() {
        assert!(HostPlatform::new("linux", 64).check().is_ok());
        assert!(matches!(
            HostPlatform::new("linux", 32).check(),
            Err(Error::UnsupportedPlatform(_))
        ));
        assert!(matches!(
            HostPlatform::new("windows", 64).check(),
            Err(Error::UnsupportedPlatform(_))
        ));
    }

    #[test]
    fn test_detect_matches_build() {
        let host = HostPlatform::detect();
        assert_eq!(host.pointer_width as usize, std::mem::size_of::<usize>() * 8);
        assert_eq!(host.os, std::env::consts::OS);
    }
}
