//! Board probing
//!
//! A probe claims and opens a port, sends the REPL handshake (interrupt,
//! leave raw mode, soft reset) and waits a bounded time for the banner. The
//! banner's chip identity decides the board's [`ChipProfile`].

use std::time::{Duration, Instant};

use mpyflash_core::{Board, BoardRegistry, ChipProfile, DiscoveryConfig};
use thiserror::Error;

use crate::enumerate::list_candidate_ports;
use crate::error::SerialError;
use crate::repl::{banner_complete, Banner, HANDSHAKE};
use crate::transport::{PortOpener, ScopedPort, Transport};

/// Longest single wait inside the handshake read loop
const READ_SLICE_MS: u64 = 50;

/// Why a port did not yield a board
#[derive(Error, Debug)]
pub enum ProbeFailure {
    /// The port is held by another operation or process
    #[error("Port unavailable: {0}")]
    PortUnavailable(String),

    /// Nothing came back within the handshake window
    #[error("No response within {0:?}")]
    HandshakeTimeout(Duration),

    /// Something answered, but not with a REPL banner
    #[error("Unrecognized response: {0:?}")]
    MalformedResponse(String),

    /// The transport failed mid-handshake
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<SerialError> for ProbeFailure {
    fn from(e: SerialError) -> Self {
        match e {
            SerialError::PortUnavailable { port, reason } => {
                ProbeFailure::PortUnavailable(format!("{}: {}", port, reason))
            }
            other => ProbeFailure::Io(other.to_string()),
        }
    }
}

/// Probes ports for MicroPython boards
pub struct Prober<'a, O: PortOpener + ?Sized> {
    opener: &'a O,
    timeout: Duration,
}

impl<'a, O: PortOpener + ?Sized> Prober<'a, O> {
    /// Create a prober with the given handshake timeout
    pub fn new(opener: &'a O, timeout: Duration) -> Self {
        Self { opener, timeout }
    }

    /// Identify the board on `port`
    ///
    /// The port is closed and released before this returns, whatever the
    /// outcome.
    pub fn probe(&self, port: &str, baud: u32) -> Result<Board, ProbeFailure> {
        let mut transport = ScopedPort::open(self.opener, port, baud)?;
        let output = self.handshake(&mut *transport)?;

        let banner = Banner::find_last(&output).ok_or_else(|| {
            let snippet: String = output.chars().take(80).collect();
            ProbeFailure::MalformedResponse(snippet)
        })?;

        let profile = ChipProfile::from_chip_id(&banner.chip);
        if profile == ChipProfile::Unknown {
            log::warn!(
                "{}: chip '{}' has no profile mapping; it can be listed but not built for or flashed",
                port,
                banner.chip
            );
        }

        Ok(Board::new(port, baud, profile, banner.board).with_firmware_version(banner.version))
    }

    /// Probe every port concurrently, keeping only the boards that answered
    ///
    /// Each probe owns a distinct port, so probes share no state. Failures
    /// are logged and dropped.
    pub fn probe_all(&self, ports: &[String], baud: u32) -> Vec<Board>
    where
        O: Sync,
    {
        std::thread::scope(|scope| {
            let handles: Vec<_> = ports
                .iter()
                .map(|port| (port, scope.spawn(move || self.probe(port, baud))))
                .collect();

            handles
                .into_iter()
                .filter_map(|(port, handle)| match handle.join() {
                    Ok(Ok(board)) => {
                        log::debug!("{}: found {}", port, board.label);
                        Some(board)
                    }
                    Ok(Err(e)) => {
                        log::debug!("{}: not a board ({})", port, e);
                        None
                    }
                    Err(_) => {
                        log::warn!("{}: probe thread panicked", port);
                        None
                    }
                })
                .collect()
        })
    }

    fn handshake<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<String, ProbeFailure> {
        transport.clear_input()?;
        transport.write(HANDSHAKE)?;
        transport.flush()?;

        let deadline = Instant::now() + self.timeout;
        let mut output = Vec::new();
        let mut buf = [0u8; 256];

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let slice = (deadline - now).as_millis().min(READ_SLICE_MS as u128).max(1) as u32;
            let n = transport.read_nonblock(&mut buf, slice)?;
            output.extend_from_slice(&buf[..n]);
            if n > 0 && banner_complete(&String::from_utf8_lossy(&output)) {
                break;
            }
        }

        if output.is_empty() {
            return Err(ProbeFailure::HandshakeTimeout(self.timeout));
        }
        Ok(String::from_utf8_lossy(&output).into_owned())
    }
}

/// Run discovery as configured
///
/// With an explicit port only that port is probed; otherwise every
/// enumerated port is. An empty registry means nothing answered; the caller
/// reports that once.
pub fn discover<O: PortOpener + ?Sized>(opener: &O, config: &DiscoveryConfig) -> BoardRegistry {
    let prober = Prober::new(opener, config.probe_timeout);

    let boards = match &config.port {
        Some(port) => match prober.probe(port, config.baud) {
            Ok(board) => vec![board],
            Err(e) => {
                log::warn!("{}: {}", port, e);
                Vec::new()
            }
        },
        None => {
            let ports = list_candidate_ports();
            log::debug!("Probing {} candidate port(s)", ports.len());
            prober.probe_all(&ports, config.baud)
        }
    };

    BoardRegistry::from_boards(boards)
}
