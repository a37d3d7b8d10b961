//! mpyflash-serial - Serial port discovery and board probing
//!
//! This crate finds boards running the MicroPython REPL:
//!
//! 1. [`list_candidate_ports`] asks the host for serial devices
//! 2. [`Prober`] opens each one, interrupts and soft-resets the REPL, and
//!    parses the banner into a [`Board`](mpyflash_core::Board)
//! 3. [`discover`] wraps both into a [`BoardRegistry`](mpyflash_core::BoardRegistry)
//!
//! Every port access goes through a [`ScopedPort`], which holds a
//! process-wide claim on the port name for as long as the port is open, so
//! a second probe, flash or log stream on the same port fails fast with
//! [`SerialError::PortUnavailable`].
//!
//! # Example
//!
//! ```no_run
//! use mpyflash_core::DiscoveryConfig;
//! use mpyflash_serial::{discover, SystemPorts};
//!
//! let registry = discover(&SystemPorts, &DiscoveryConfig::default());
//! for board in registry.all() {
//!     println!("{}", board);
//! }
//! ```

pub mod enumerate;
pub mod error;
pub mod lock;
pub mod logs;
pub mod probe;
pub mod repl;
pub mod transport;

// Re-exports
pub use enumerate::list_candidate_ports;
pub use error::{Result, SerialError};
pub use lock::PortGuard;
pub use logs::stream_logs;
pub use probe::{discover, ProbeFailure, Prober};
pub use repl::Banner;
pub use transport::{PortOpener, ScopedPort, SerialTransport, SystemPorts, Transport};
