//! Raw output streaming

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::transport::{PortOpener, ScopedPort, Transport};

const POLL_MS: u32 = 100;

/// Copy everything the board prints to `out` until `stop` is set
///
/// The port stays claimed for the whole stream. Returns the number of bytes
/// copied. Nothing is sent to the board; the caller may ask the user to
/// reset it to see boot output.
pub fn stream_logs<O, W>(
    opener: &O,
    port: &str,
    baud: u32,
    out: &mut W,
    stop: &AtomicBool,
) -> Result<u64>
where
    O: PortOpener + ?Sized,
    W: Write + ?Sized,
{
    let mut transport = ScopedPort::open(opener, port, baud)?;
    log::debug!("Streaming output from {}", transport.port());

    let mut buf = [0u8; 1024];
    let mut total = 0u64;

    while !stop.load(Ordering::Relaxed) {
        let n = transport.read_nonblock(&mut buf, POLL_MS)?;
        if n == 0 {
            continue;
        }
        out.write_all(&buf[..n])?;
        out.flush()?;
        total += n as u64;
    }

    log::debug!("Stopped streaming {} after {} bytes", port, total);
    Ok(total)
}
