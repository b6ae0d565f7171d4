//! Serial port transport for the card reader.
//!
//! This module provides [`SerialTransport`], which implements the
//! [`Transport`] trait for the USB virtual COM port the MSR605 family
//! presents. The link is always raw 8N1 without flow control; only the baud
//! rate and exclusive-access flag are configurable.
//!
//! # Example
//!
//! ```no_run
//! use msrlib_transport::SerialTransport;
//! use msrlib_core::transport::Transport;
//!
//! # async fn example() -> msrlib_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 9600).await?;
//!
//! // Reset the reader.
//! transport.send(&[0x1B, b'a']).await?;
//! # Ok(())
//! # }
//! ```

use std::io;

use async_trait::async_trait;
use msrlib_core::error::{Error, Result};
use msrlib_core::transport::Transport;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

/// Baud rate the MSR605 ships configured for.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate (the reader is fixed at 9600 unless reprogrammed).
    pub baud_rate: u32,
    /// Request exclusive access to the tty (`TIOCEXCL`) on Unix.
    pub exclusive: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            exclusive: true,
        }
    }
}

/// Serial port transport for reader communication.
pub struct SerialTransport {
    /// The underlying serial port stream
    port: Option<SerialStream>,
    /// Port name for logging/debugging
    port_name: String,
}

impl SerialTransport {
    /// Open a serial port with the given baud rate and default settings.
    ///
    /// # Arguments
    ///
    /// * `port` - Serial port path (e.g., "/dev/ttyUSB0" on Linux, "COM3" on Windows)
    /// * `baud_rate` - Baud rate (9600 for a factory-configured reader)
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig {
            baud_rate,
            ..Default::default()
        };
        Self::open_with_config(port, config).await
    }

    /// Open a serial port with full configuration control.
    ///
    /// The line is configured raw: 8 data bits, no parity, one stop bit,
    /// no flow control, no echo, no canonical processing. Failure to open
    /// or configure the device is reported as [`Error::Device`] carrying
    /// the OS cause.
    pub async fn open_with_config(port: &str, config: SerialConfig) -> Result<Self> {
        tracing::debug!(
            port = %port,
            baud_rate = config.baud_rate,
            exclusive = config.exclusive,
            "Opening serial port"
        );

        let device_error = |e: tokio_serial::Error| {
            tracing::error!(port = %port, error = %e, "Failed to open serial port");
            Error::Device {
                path: port.to_string(),
                source: io::Error::from(e),
            }
        };

        #[allow(unused_mut)]
        let mut serial_stream = tokio_serial::new(port, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(device_error)?;

        #[cfg(unix)]
        serial_stream
            .set_exclusive(config.exclusive)
            .map_err(device_error)?;

        tracing::info!(port = %port, baud_rate = config.baud_rate, "Serial port opened successfully");

        Ok(Self {
            port: Some(serial_stream),
            port_name: port.to_string(),
        })
    }

    /// Get the name of the serial port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NoMedium)?;

        tracing::trace!(
            port = %self.port_name,
            bytes = data.len(),
            data = ?data,
            "Sending data"
        );

        let mut written = 0;
        while written < data.len() {
            match port.write(&data[written..]).await {
                Ok(0) => {
                    return Err(Error::ShortIo(io::Error::from(io::ErrorKind::WriteZero)));
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!(
                        port = %self.port_name,
                        written,
                        error = %e,
                        "Failed to send data"
                    );
                    return Err(Error::ShortIo(e));
                }
            }
        }

        port.flush().await.map_err(|e| {
            tracing::error!(
                port = %self.port_name,
                error = %e,
                "Failed to flush serial port"
            );
            Error::ShortIo(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NoMedium)?;

        match port.read(buf).await {
            Ok(0) => {
                tracing::error!(port = %self.port_name, "Serial port reported end of stream");
                Err(Error::ShortIo(io::Error::from(io::ErrorKind::UnexpectedEof)))
            }
            Ok(n) => {
                tracing::trace!(
                    port = %self.port_name,
                    bytes = n,
                    data = ?&buf[..n],
                    "Received data"
                );
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(Error::Interrupted),
            Err(e) => {
                tracing::error!(
                    port = %self.port_name,
                    error = %e,
                    "Failed to receive data"
                );
                Err(Error::ShortIo(e))
            }
        }
    }

    async fn discard_pending(&mut self) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NoMedium)?;
        port.clear(ClearBuffer::All)
            .map_err(|e| Error::ShortIo(io::Error::from(e)))?;
        tracing::trace!(port = %self.port_name, "Discarded pending serial I/O");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            tracing::debug!(port = %self.port_name, "Closing serial port");

            if let Err(e) = port.flush().await {
                tracing::warn!(
                    port = %self.port_name,
                    error = %e,
                    "Failed to flush before closing (continuing anyway)"
                );
            }

            // The port will be dropped here, which closes it
            tracing::info!(port = %self.port_name, "Serial port closed");
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.port.is_some() {
            tracing::debug!(port = %self.port_name, "SerialTransport dropped, closing port");
        }
    }
}
