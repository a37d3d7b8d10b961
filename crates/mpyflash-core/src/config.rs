//! Discovery configuration
//!
//! The core never reads environment variables or config files. The CLI
//! resolves those into a [`DiscoveryConfig`] and passes it in.

use std::time::Duration;

/// Default serial baud rate of the MicroPython REPL
pub const DEFAULT_BAUD: u32 = 115200;

/// Default time to wait for the REPL banner after a soft reset
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Explicit discovery settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Probe only this port instead of every enumerated one
    pub port: Option<String>,
    /// Baud rate used for probing
    pub baud: u32,
    /// Upper bound on a single handshake
    pub probe_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: DEFAULT_BAUD,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl DiscoveryConfig {
    /// Config for a single explicit port
    pub fn for_port(port: impl Into<String>, baud: u32) -> Self {
        Self {
            port: Some(port.into()),
            baud,
            ..Self::default()
        }
    }
}
