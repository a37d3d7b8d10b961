//! Transport layer abstraction for board communication
//!
//! The prober, the flasher and the log streamer all talk to boards through
//! the [`Transport`] trait, and obtain transports through a [`PortOpener`]
//! wrapped in a [`ScopedPort`].

use std::ops::{Deref, DerefMut};

use crate::error::Result;
use crate::lock::PortGuard;

/// Transport trait for reading and writing bytes
pub trait Transport: Send {
    /// Write all bytes to the transport
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read with timeout
    ///
    /// Reads up to `buf.len()` bytes, waiting up to `timeout_ms` milliseconds.
    /// Returns the number of bytes read, or 0 if timeout.
    fn read_nonblock(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize>;

    /// Flush any buffered output
    fn flush(&mut self) -> Result<()>;

    /// Drop any bytes received but not yet read
    fn clear_input(&mut self) -> Result<()>;

    /// Drive the DTR line
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Drive the RTS line
    fn set_rts(&mut self, level: bool) -> Result<()>;
}

/// Opens transports by port name
///
/// The system implementation opens real serial devices; tests substitute
/// scripted fakes.
pub trait PortOpener: Sync {
    /// Transport type produced by this opener
    type Port: Transport;

    /// Open `port` at `baud`, with exclusive access
    fn open(&self, port: &str, baud: u32) -> Result<Self::Port>;
}

/// An open transport together with its claim on the port name
///
/// Dropping a `ScopedPort` closes the transport first and then releases the
/// claim, on every exit path.
pub struct ScopedPort<T: Transport> {
    // Field order matters: the transport is closed before the claim is released.
    transport: T,
    guard: PortGuard,
}

impl<T: Transport> ScopedPort<T> {
    /// Claim `port` and open it through `opener`
    pub fn open<O>(opener: &O, port: &str, baud: u32) -> Result<Self>
    where
        O: PortOpener<Port = T> + ?Sized,
    {
        let guard = PortGuard::acquire(port)?;
        let transport = opener.open(port, baud)?;
        Ok(Self { transport, guard })
    }

    /// The port name
    pub fn port(&self) -> &str {
        self.guard.port()
    }
}

impl<T: Transport> Deref for ScopedPort<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> DerefMut for ScopedPort<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

pub mod serial {
    //! Serial port transport implementation

    use super::*;
    use crate::error::SerialError;
    use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
    use std::io::{Read, Write};
    use std::time::Duration;

    /// Default read timeout for blocking reads
    const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

    /// Serial port transport
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
    }

    impl SerialTransport {
        /// Open a serial port with the specified baud rate
        ///
        /// On Unix the device is opened in exclusive mode, so a port held by
        /// another process is reported as unavailable.
        pub fn open(device: &str, baud: u32) -> Result<Self> {
            let port = serialport::new(device, baud)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(DEFAULT_TIMEOUT)
                .open()
                .map_err(|e| SerialError::PortUnavailable {
                    port: device.to_string(),
                    reason: e.to_string(),
                })?;

            log::debug!("Opened serial port {} at {} baud", device, baud);

            Ok(Self { port })
        }
    }

    impl Transport for SerialTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.port.write_all(data)?;
            Ok(())
        }

        fn read_nonblock(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize> {
            // Set temporary timeout
            let old_timeout = self.port.timeout();
            self.port
                .set_timeout(Duration::from_millis(timeout_ms as u64))?;

            let result = match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(SerialError::from(e)),
            };

            // Restore timeout
            self.port.set_timeout(old_timeout)?;
            result
        }

        fn flush(&mut self) -> Result<()> {
            self.port.flush()?;
            Ok(())
        }

        fn clear_input(&mut self) -> Result<()> {
            self.port.clear(ClearBuffer::Input)?;
            Ok(())
        }

        fn set_dtr(&mut self, level: bool) -> Result<()> {
            self.port.write_data_terminal_ready(level)?;
            Ok(())
        }

        fn set_rts(&mut self, level: bool) -> Result<()> {
            self.port.write_request_to_send(level)?;
            Ok(())
        }
    }
}

pub use serial::SerialTransport;

/// Opens real serial devices
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortOpener for SystemPorts {
    type Port = SerialTransport;

    fn open(&self, port: &str, baud: u32) -> Result<SerialTransport> {
        SerialTransport::open(port, baud)
    }
}
