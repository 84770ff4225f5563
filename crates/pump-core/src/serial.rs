//! Serial Port Abstractions
//!
//! Shared types and utilities for async serial communication with the pump bus.
//! The driver only needs two transport primitives: write a byte string, and read
//! until a terminator byte or a timeout. Both are expressed here over tokio's
//! `AsyncWrite` / `AsyncBufRead` so that real ports and in-memory duplex streams
//! are interchangeable.
//!
//! # Types
//!
//! - [`SerialPortIO`]: Trait alias combining AsyncRead + AsyncWrite for serial ports
//! - [`DynSerial`]: Type-erased boxed serial port
//! - [`SharedPort`]: Thread-safe shared serial port with buffered reading
//!
//! # Utilities
//!
//! - [`open_serial_async`]: Open a serial port with spawn_blocking
//! - [`drain_serial_buffer`]: Drain stale data from a serial port
//! - [`read_until_timeout`]: Read up to a terminator byte, bounded by a timeout
//! - [`available_ports`]: List serial ports present on the host
//!
//! # Example
//!
//! ```rust,ignore
//! use pump_core::serial::{open_serial_async, wrap_shared, SerialSettings};
//!
//! let settings = SerialSettings::new("/dev/ttyUSB0");
//! let port = open_serial_async(&settings).await?;
//! let shared = wrap_shared(Box::new(port));
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;

/// Default baud rate of the pump family.
pub const DEFAULT_BAUD_RATE: u32 = 19200;

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing and the simulated bus)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

// =============================================================================
// Type Aliases
// =============================================================================

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Thread-safe shared serial port with buffered reading.
///
/// The mutex is the bus lock: a command is written and its response consumed
/// while the guard is held, so no second request can interleave on the wire.
/// `BufReader` provides `read_until()` for ETX-terminated frames.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Create a SharedPort from a type-erased serial port.
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

// =============================================================================
// Port Settings
// =============================================================================

/// Physical settings for opening the bus adapter.
///
/// The pump family talks 8N1 without flow control; only the path and baud
/// rate vary between installations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM7")
    pub path: String,
    pub baud_rate: u32,
}

impl SerialSettings {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

// =============================================================================
// Serial Port Utilities
// =============================================================================

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
///
/// # Errors
///
/// Returns an error if the port cannot be opened or spawn_blocking fails.
pub async fn open_serial_async(
    settings: &SerialSettings,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let path = settings.path.clone();
    let baud_rate = settings.baud_rate;

    let port = spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!("Failed to open pump serial port: {}", path))
    })
    .await
    .context("spawn_blocking for serial port opening failed")??;

    tracing::info!(port = %settings.path, baud_rate, "Opened pump serial port");
    Ok(port)
}

/// List the serial ports present on this host.
pub fn available_ports() -> anyhow::Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards data until nothing more is immediately available or the
/// timeout expires. Returns the number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        if tokio::time::Instant::now() >= deadline {
            break;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                total_discarded += n;
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    total_discarded
}

/// Read bytes up to and including `terminator`, giving up after `timeout`.
///
/// Returns `Ok(None)` on timeout. Bytes received before a timeout are
/// discarded with the partial frame.
pub async fn read_until_timeout<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    terminator: u8,
    timeout: Duration,
) -> std::io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::with_capacity(32);
    match tokio::time::timeout(timeout, reader.read_until(terminator, &mut buf)).await {
        Ok(Ok(_)) => Ok(Some(buf)),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            if !buf.is_empty() {
                tracing::trace!(discarded = buf.len(), "Partial frame dropped on timeout");
            }
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_shared_port_with_duplex() {
        let (mut host, device) = tokio::io::duplex(64);
        let port: SharedPort = wrap_shared(Box::new(device));

        host.write_all(b"\x0200S\x03").await.unwrap();

        let mut guard = port.lock().await;
        let frame = read_until_timeout(&mut *guard, 0x03, Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(frame.as_deref(), Some(&b"\x0200S\x03"[..]));
    }

    #[tokio::test]
    async fn test_read_until_timeout_expires() {
        let (_host, device) = tokio::io::duplex(64);
        let mut reader = BufReader::new(device);

        let frame = read_until_timeout(&mut reader, 0x03, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn test_drain_serial_buffer() {
        let (mut host, mut device) = tokio::io::duplex(64);

        host.write_all(b"stale data 12345").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let discarded = drain_serial_buffer(&mut device, 50).await;
        assert_eq!(discarded, 16);
    }

    #[test]
    fn test_settings_default_baud() {
        let settings = SerialSettings::new("/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 19200);
        assert_eq!(settings.with_baud_rate(9600).baud_rate, 9600);
    }
}
