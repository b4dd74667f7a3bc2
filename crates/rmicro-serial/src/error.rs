//! Error types for serial and TCP transports

use thiserror::Error;

/// Serial/TCP transport errors
#[derive(Debug, Error)]
pub enum SerialError {
    /// No port matched the selector
    #[error("no serial port matches `{0}`")]
    PortNotFound(String),

    /// A grep pattern matched more than one port
    #[error("pattern `{pattern}` should match exactly one serial port; found {found:?}")]
    AmbiguousPort {
        /// Pattern as given
        pattern: String,
        /// Every matching port name
        found: Vec<String>,
    },

    /// A grep pattern is not a valid regular expression
    #[error("invalid port pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Failed to connect to a TCP endpoint
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer closed the connection
    #[error("connection closed by peer")]
    Disconnected,

    /// Read or write on a transport that is not open
    #[error("transport is not open")]
    NotOpen,

    /// Invalid connection parameter
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// I/O error during communication
    #[error("I/O error: {0}")]
    IoError(String),

    /// Serial port error
    #[error("serial port error: {0}")]
    SerialError(#[from] serialport::Error),
}

/// Result type for serial transport operations
pub type Result<T> = std::result::Result<T, SerialError>;

impl From<std::io::Error> for SerialError {
    fn from(e: std::io::Error) -> Self {
        SerialError::IoError(e.to_string())
    }
}

impl From<SerialError> for rmicro_core::Error {
    fn from(e: SerialError) -> Self {
        match e {
            SerialError::InvalidParameter(msg) => rmicro_core::Error::Config(msg),
            other => rmicro_core::Error::Transport(other.to_string()),
        }
    }
}
