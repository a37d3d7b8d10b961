//! Error types for serial operations

use thiserror::Error;

/// Serial transport errors
#[derive(Error, Debug)]
pub enum SerialError {
    /// The port is already in use, by this process or another one
    #[error("Port {port} is unavailable: {reason}")]
    PortUnavailable {
        /// Port name
        port: String,
        /// Why it could not be claimed
        reason: String,
    },

    /// Timeout during communication
    #[error("Communication timeout")]
    Timeout,

    /// I/O error during communication
    #[error("I/O error: {0}")]
    IoError(String),

    /// Serial port error
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),
}

/// Result type for serial operations
pub type Result<T> = core::result::Result<T, SerialError>;

impl From<std::io::Error> for SerialError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => SerialError::Timeout,
            _ => SerialError::IoError(e.to_string()),
        }
    }
}
