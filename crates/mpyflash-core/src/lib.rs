//! mpyflash-core - Shared types for discovering, building and flashing boards
//!
//! This crate holds the data model every other mpyflash crate speaks:
//!
//! - [`Board`] and [`ChipProfile`] - what the prober identified on a port
//! - [`FirmwareSpec`] and [`BuildArtifact`] - what the caller asked to build
//!   and what the assembler produced
//! - [`ProfileDatabase`] - per-profile build and flash parameters, loaded
//!   from RON
//! - [`BoardRegistry`] - the boards found during one invocation
//!
//! It performs no serial or network I/O.
//!
//! # Example
//!
//! ```
//! use mpyflash_core::{Board, BoardRegistry, ChipProfile};
//!
//! let board = Board::new("/dev/ttyUSB0", 115200, ChipProfile::Esp32, "ESP32 module with ESP32");
//! let registry = BoardRegistry::from_boards(vec![board]);
//! assert_eq!(registry.single().unwrap().chip_profile, ChipProfile::Esp32);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod board;
pub mod config;
pub mod error;
pub mod firmware;
pub mod profile;
pub mod registry;

pub use board::{Board, ChipProfile};
pub use config::DiscoveryConfig;
pub use error::{DiscoveryFailure, FirmwareSpecError};
pub use firmware::{BuildArtifact, Entrypoint, FirmwareSpec, ModuleSource};
pub use profile::{FlashParams, ProfileDatabase, ProfileDbError, ProfileEntry};
pub use registry::BoardRegistry;
