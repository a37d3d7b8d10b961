//! Error types for flashing

use mpyflash_core::ChipProfile;
use mpyflash_serial::SerialError;
use thiserror::Error;

/// Why flashing a board failed
#[derive(Error, Debug)]
pub enum FlashFailure {
    /// The artifact cannot be written to this board
    #[error("Cannot flash a {artifact} image to a {board} board")]
    UnsupportedProfile {
        /// Profile of the board
        board: ChipProfile,
        /// Profile the artifact was built for
        artifact: ChipProfile,
    },

    /// The port is held by another operation or process
    #[error("Port {port} is unavailable: {reason}")]
    PortUnavailable {
        /// Port name
        port: String,
        /// Why it could not be opened
        reason: String,
    },

    /// The loader stopped answering
    #[error("Timed out waiting for {0}")]
    TransferTimeout(&'static str),

    /// Flash contents differ from the artifact after writing
    #[error("Verification failed: expected MD5 {expected}, device reports {actual}")]
    VerificationMismatch {
        /// Digest of the artifact
        expected: String,
        /// Digest reported by the ROM
        actual: String,
    },

    /// The ROM reported a failure status
    #[error("{command} rejected: {reason} (0x{code:02X})")]
    Rejected {
        /// Command name
        command: &'static str,
        /// ROM error code
        code: u8,
        /// Readable error
        reason: &'static str,
    },

    /// A response did not have the expected shape
    #[error("Malformed response to {0}")]
    Protocol(&'static str),

    /// The artifact could not be read or the transport failed
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<SerialError> for FlashFailure {
    fn from(e: SerialError) -> Self {
        match e {
            SerialError::PortUnavailable { port, reason } => {
                FlashFailure::PortUnavailable { port, reason }
            }
            SerialError::Timeout => FlashFailure::TransferTimeout("serial read"),
            other => FlashFailure::Io(other.to_string()),
        }
    }
}

impl From<std::io::Error> for FlashFailure {
    fn from(e: std::io::Error) -> Self {
        FlashFailure::Io(e.to_string())
    }
}

/// Result type for flash operations
pub type Result<T> = core::result::Result<T, FlashFailure>;
