//! Transport implementations for msrlib.
//!
//! This crate provides the concrete implementation of the
//! [`Transport`](msrlib_core::Transport) trait for the MSR605's USB-serial
//! link:
//!
//! - [`SerialTransport`]: raw 8N1 serial connection, exclusive access
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
//! // Communication test: the reader answers ESC 'y'.
//! transport.send(&[0x1B, b'e']).await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{DEFAULT_BAUD_RATE, SerialConfig, SerialTransport};
