//! Error types for source management and firmware assembly

use std::io;
use std::path::PathBuf;

use mpyflash_core::ChipProfile;
use thiserror::Error;

/// Source cache failures
#[derive(Error, Debug)]
pub enum SourceManagerFailure {
    /// The upstream repository could not be reached
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The requested tag or branch does not exist upstream
    #[error("Version '{0}' not found")]
    VersionNotFound(String),

    /// On-disk state is inconsistent
    #[error(
        "Source cache at {} is corrupted: {reason}. Run `mpyflash build --clean` to reset it.",
        .root.display()
    )]
    CacheCorrupted {
        /// Cache root
        root: PathBuf,
        /// What was found
        reason: String,
    },

    /// A version control command failed for another reason
    #[error("{command} failed:\n{diagnostics}")]
    Fetch {
        /// Command line that failed
        command: String,
        /// Output of the command
        diagnostics: String,
    },

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Firmware assembly failures
#[derive(Error, Debug)]
pub enum BuildFailure {
    /// No build parameters exist for this profile
    #[error("Cannot build firmware for a {0} board")]
    UnsupportedProfile(ChipProfile),

    /// Two modules would land on the same name in the staging tree
    #[error("Module '{0}' is given more than once")]
    DuplicateModule(String),

    /// A module path does not exist
    #[error("Module {} not found", .0.display())]
    ModuleNotFound(PathBuf),

    /// The external build failed; output is passed through unmodified
    #[error("Build failed ({}):\n{diagnostics}", status_text(.status))]
    Toolchain {
        /// Exit code, if the process exited normally
        status: Option<i32>,
        /// Combined stdout and stderr
        diagnostics: String,
    },

    /// The build finished but the expected binary is missing
    #[error("Build produced no binary at {}", .0.display())]
    MissingArtifact(PathBuf),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn status_text(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}
