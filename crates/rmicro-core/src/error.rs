//! Error types for rmicro-core
//!
//! A single error enum covers configuration, analysis and session failures.
//! Transport timeouts are deliberately absent: a timed-out read or write is
//! reported as [`IoOutcome::TimedOut`](crate::transport::IoOutcome) and handled
//! as ordinary control flow by the handshake.

use std::path::PathBuf;
use thiserror::Error;

use crate::layout::LayoutError;

/// Which phase of the handshake gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishFailure {
    /// No start-session reply arrived within the overall retry budget
    NoResponse,
    /// A reply arrived, but the device never confirmed the session
    NotConfirmed,
}

impl std::fmt::Display for EstablishFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoResponse => write!(f, "device never answered the start-session request"),
            Self::NotConfirmed => write!(f, "device answered but never confirmed the session"),
        }
    }
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// A required memory section is missing or malformed
    #[error("memory layout error: {0}")]
    MemoryLayout(#[from] LayoutError),

    /// Peak workspace usage exceeds the device's workspace section
    #[error("workspace allocations in library ({peak}) exceed available memory ({capacity})")]
    WorkspaceOverflow {
        /// Computed peak usage in bytes
        peak: u64,
        /// Declared workspace section size in bytes
        capacity: u64,
    },

    /// An allocation size could not be statically determined
    #[error("line {line}: allocation of `{token}` has non-constant size `{expr}`")]
    NonConstantAllocation {
        /// 1-based source line
        line: usize,
        /// Identifier being allocated
        token: String,
        /// Size expression as written
        expr: String,
    },

    /// An allocator call whose parentheses never close
    #[error("line {line}: call to `{call}` is not closed before the end of the source")]
    UnterminatedAllocationCall {
        /// 1-based line the call starts on
        line: usize,
        /// Allocator function name
        call: String,
    },

    /// A free names a token that is not currently allocated
    #[error("line {line}: free of `{token}` which is not allocated")]
    MalformedAllocationTrace {
        /// 1-based source line
        line: usize,
        /// Identifier being freed
        token: String,
    },

    /// The handshake could not establish a session
    #[error("session `{session}` could not be established after {elapsed_ms} ms: {failure}")]
    SessionEstablish {
        /// Session name
        session: String,
        /// Which phase gave up
        failure: EstablishFailure,
        /// Time spent before giving up
        elapsed_ms: u128,
    },

    /// Another session currently holds the registry slot
    #[error("session `{requested}` requested while `{active}` is active")]
    SessionAlreadyActive {
        /// Name of the session that holds the slot
        active: String,
        /// Name of the session that was refused
        requested: String,
    },

    /// The host does not meet the session preconditions
    #[error("unsupported host platform: {0}")]
    UnsupportedPlatform(String),

    /// Operation on a session in the wrong state
    #[error("invalid session state: expected {expected}, found {found}")]
    InvalidState {
        /// Required state
        expected: &'static str,
        /// Actual state
        found: &'static str,
    },

    /// Invalid session or build configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Device configuration file could not be parsed
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// File that failed to parse
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Flashing the binary onto the device failed
    #[error("flashing failed: {0}")]
    Flash(String),

    /// The external compiler reported a failure
    #[error("compilation failed: {0}")]
    Compile(String),

    /// Hard transport failure (not a timeout)
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed session-layer message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the core Error type
pub type Result<T> = std::result::Result<T, Error>;
