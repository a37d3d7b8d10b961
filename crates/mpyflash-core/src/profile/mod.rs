//! Chip profile database
//!
//! Each [`ChipProfile`](crate::ChipProfile) maps to a [`ProfileEntry`] that
//! tells the assembler which port and board to build and the flasher how to
//! talk to the ROM bootloader. The built-in table is compiled in from
//! `assets/profiles.ron` and can be overridden from a file.

mod database;
mod types;

pub use database::*;
pub use types::*;
