//! mpyflash-esp - Flashing over the ESP ROM serial bootloader
//!
//! Espressif chips carry a mask-ROM bootloader that accepts SLIP-framed
//! commands on the UART once the chip is reset with GPIO0 held low. This
//! crate drives that bootloader to write a firmware image and verify it.
//!
//! - [`slip`] frames and unframes packets
//! - [`protocol`] holds command codes, checksums and ROM quirks
//! - [`loader::EspLoader`] issues individual commands over a
//!   [`Transport`](mpyflash_serial::Transport)
//! - [`Flasher`] runs the whole per-board sequence and reports
//!   [`FlashState`] transitions
//!
//! Per-chip differences (flash offset, status trailer length, SPI_ATTACH,
//! MD5 support) come from the [`FlashParams`](mpyflash_core::FlashParams)
//! of the board's profile.

pub mod error;
pub mod flasher;
pub mod loader;
pub mod protocol;
pub mod slip;

pub use error::FlashFailure;
pub use flasher::{FlashProgress, FlashState, Flasher};
pub use loader::EspLoader;
