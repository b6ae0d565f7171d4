//! Buffered synchronizer: one wait over the device and the cancel channel.
//!
//! The reader can emit a reply at any time after a command (a swipe is
//! asynchronous to the host), and the user must be able to abort that wait.
//! [`Synchronizer::sync`] waits on both sources and a deadline in a single
//! `tokio::select!` and appends whatever arrives to one of two FIFO queues.
//! Matchers in [`frame`](crate::frame) then inspect the device queue.

use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use msrlib_core::error::{Error, Result};
use msrlib_core::transport::Transport;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

/// Upper bound on bytes drained from one source per wake-up.
pub const CHUNK_SIZE: usize = 256;

/// Largest device queue tolerated without a complete response.
pub const MAX_QUEUE: usize = 8192;

/// Line terminator that turns buffered cancel input into an abort request.
const CANCEL_TERMINATOR: u8 = b'\n';

/// Secondary byte source watched only for abort requests (stdin in the CLI).
pub type CancelSource = Box<dyn AsyncRead + Send + Unpin>;

enum Wake {
    Device(Result<usize>),
    Cancel(io::Result<usize>),
    Deadline,
}

/// Device and cancellation queues plus the cancellation source.
#[derive(Default)]
pub struct Synchronizer {
    device: BytesMut,
    cancel: BytesMut,
    cancel_source: Option<CancelSource>,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("device", &self.device.len())
            .field("cancel", &self.cancel.len())
            .field("cancel_source", &self.cancel_source.is_some())
            .finish()
    }
}

async fn read_cancel(source: Option<&mut CancelSource>, buf: &mut [u8]) -> io::Result<usize> {
    match source {
        Some(source) => source.read(buf).await,
        None => std::future::pending().await,
    }
}

impl Synchronizer {
    pub fn new(cancel_source: Option<CancelSource>) -> Self {
        Synchronizer {
            device: BytesMut::with_capacity(CHUNK_SIZE),
            cancel: BytesMut::new(),
            cancel_source,
        }
    }

    /// Replace the cancellation source; the queues are left untouched.
    pub fn set_cancel_source(&mut self, source: Option<CancelSource>) {
        self.cancel_source = source;
    }

    /// Whether a cancellation source is still being watched.
    pub fn has_cancel_source(&self) -> bool {
        self.cancel_source.is_some()
    }

    /// Bytes received from the device and not yet consumed.
    pub fn device_queue(&self) -> &[u8] {
        &self.device
    }

    /// Bytes received from the cancellation source and not yet consumed.
    pub fn cancel_queue(&self) -> &[u8] {
        &self.cancel
    }

    /// Wait until the device or the cancellation source has data, or until
    /// `timeout` elapses (`None` waits indefinitely).
    ///
    /// At most [`CHUNK_SIZE`] bytes are drained per call. A cancellation
    /// source that reaches end of stream is dropped and the wait continues
    /// on the device alone. Returns [`Error::Timeout`] if nothing arrived
    /// and [`Error::Interrupted`] if the wait was interrupted.
    pub async fn sync(
        &mut self,
        transport: &mut dyn Transport,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let deadline = async move {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let mut chunk = [0u8; CHUNK_SIZE];
        let mut cancel_chunk = [0u8; CHUNK_SIZE];
        loop {
            let wake = tokio::select! {
                r = transport.receive(&mut chunk) => Wake::Device(r),
                r = read_cancel(self.cancel_source.as_mut(), &mut cancel_chunk) => Wake::Cancel(r),
                _ = &mut deadline => Wake::Deadline,
            };

            match wake {
                Wake::Device(received) => {
                    let n = received?;
                    trace!(bytes = n, data = ?&chunk[..n], "Device data buffered");
                    self.device.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Wake::Cancel(Ok(0)) => {
                    debug!("Cancellation source closed, waiting on device only");
                    self.cancel_source = None;
                }
                Wake::Cancel(Ok(n)) => {
                    trace!(bytes = n, "Cancellation input buffered");
                    self.cancel.extend_from_slice(&cancel_chunk[..n]);
                    return Ok(());
                }
                Wake::Cancel(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {
                    return Err(Error::Interrupted);
                }
                Wake::Cancel(Err(e)) => return Err(Error::Io(e)),
                Wake::Deadline => return Err(Error::Timeout),
            }
        }
    }

    /// `true` iff the cancellation queue ends with a line terminator.
    pub fn cancel(&self) -> bool {
        self.cancel.last() == Some(&CANCEL_TERMINATOR)
    }

    /// Discard buffered cancellation input.
    pub fn clear_cancel(&mut self) {
        self.cancel.clear();
    }

    /// Remove `n` matched bytes from the front of the device queue.
    pub fn consume(&mut self, n: usize) {
        self.device.advance(n.min(self.device.len()));
    }

    /// Clear the device queue, returning how many bytes it held.
    pub fn clear_device(&mut self) -> usize {
        let n = self.device.len();
        self.device.clear();
        n
    }

    /// Clear both queues.
    pub fn clear(&mut self) {
        self.device.clear();
        self.cancel.clear();
    }

    /// Move up to `buf.len()` bytes from the device queue into `buf`.
    pub(crate) fn take_device(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.device.len());
        self.device.copy_to_slice(&mut buf[..n]);
        n
    }
}
