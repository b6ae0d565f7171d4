//! Transport trait for reader communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the card
//! reader. The serial implementation lives in `msrlib-transport`; tests use
//! `MockTransport` from `msrlib-test-harness`.
//!
//! The trait carries no timeout of its own. The MSR605 session waits on the
//! transport and on a cancellation source in the same `tokio::select!`, and
//! owns the deadline for that wait.

use async_trait::async_trait;

use crate::error::Result;

/// Asynchronous byte-level transport to a card reader.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the device.
    ///
    /// Returns only once every byte has been handed to the underlying
    /// link. Interrupted writes are retried internally; any other failure
    /// is reported as [`Error::ShortIo`](crate::error::Error::ShortIo).
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive at least one byte into `buf`, waiting as long as necessary.
    ///
    /// Returns the number of bytes read. Implementations must be
    /// cancel-safe: if the future is dropped before completion no data may
    /// be lost. An interrupted wait is reported as
    /// [`Error::Interrupted`](crate::error::Error::Interrupted).
    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Discard any bytes pending in the link's input and output buffers.
    async fn discard_pending(&mut self) -> Result<()>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NoMedium`](crate::error::Error::NoMedium).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently open.
    fn is_connected(&self) -> bool;
}
