//! Error types for msrlib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Lifecycle misuse, transport failures,
//! framing violations, and device-reported status codes are all captured
//! here so callers can tell them apart without string matching.

use crate::types::Status;

/// The error type for all msrlib operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `start` was called on a session that is already active.
    #[error("session already active")]
    AlreadyActive,

    /// A lifecycle operation (`stop`) was called on an inactive session.
    #[error("session not active")]
    NotActive,

    /// The device could not be opened or its line discipline configured.
    #[error("unable to open {path}: {source}")]
    Device {
        /// Device path that failed to open.
        path: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A read or write on the device failed for a reason other than
    /// interruption.
    #[error("short I/O: {0}")]
    ShortIo(#[source] std::io::Error),

    /// Device I/O was attempted while the session is inactive.
    #[error("no medium: session is not active")]
    NoMedium,

    /// Nothing became ready within the configured synchronization timeout.
    ///
    /// For swipe-bound commands this usually means no card was swiped.
    #[error("timeout waiting for response")]
    Timeout,

    /// The response violates the expected grammar at a definite byte.
    #[error("protocol error at byte {position}: {reason}")]
    Protocol {
        /// Offset of the offending byte from the start of the response.
        position: usize,
        /// What was expected at that position.
        reason: String,
    },

    /// The operation was aborted through the cancellation channel.
    #[error("cancelled")]
    Cancelled,

    /// The device answered with a non-OK status byte.
    #[error("device reported {0}")]
    Status(Status),

    /// A caller-supplied argument was rejected before any I/O.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A wait was interrupted before anything became ready.
    ///
    /// The protocol engine retries on this variant; it never escapes a
    /// public session operation.
    #[error("interrupted")]
    Interrupted,

    /// An underlying I/O error on the cancellation source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a [`Error::Protocol`] at the given byte offset.
    pub fn protocol(position: usize, reason: impl Into<String>) -> Self {
        Error::Protocol {
            position,
            reason: reason.into(),
        }
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
