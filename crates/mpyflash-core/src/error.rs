//! Error types for mpyflash-core

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while validating a firmware request
///
/// These are produced before any filesystem, serial or network work starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FirmwareSpecError {
    /// Dev mode was combined with explicit modules or entrypoints
    #[error("The '--dev' switch is not compatible with '--module' or '--entrypoint'")]
    DevModeConflict,

    /// An entrypoint is not a dotted module path, optionally followed by `:function`
    #[error("Invalid entrypoint '{0}' (expected 'module', 'pkg.module' or 'module:function')")]
    InvalidEntrypoint(String),

    /// A module path has no usable file name
    #[error("Invalid module path: {}", .0.display())]
    InvalidModulePath(PathBuf),
}

/// Discovery outcomes that stop a command before any build or flash work
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryFailure {
    /// No port answered the handshake
    #[error("No boards detected!")]
    NoBoards,

    /// A single board was required but several were found
    #[error("{0} boards detected, but exactly one is required")]
    Ambiguous(usize),

    /// A selection named a port that discovery did not find
    #[error("Board on port {0} was not detected")]
    UnknownPort(String),
}
