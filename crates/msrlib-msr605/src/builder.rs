//! Msr605Builder -- fluent builder for constructing [`Session`] instances.
//!
//! Separates configuration from construction so that callers can set the
//! baud rate, synchronization timeout, and recovery quiescence before the
//! device is opened.
//!
//! # Example
//!
//! ```no_run
//! use msrlib_msr605::Msr605Builder;
//! use std::time::Duration;
//!
//! # async fn example() -> msrlib_core::Result<()> {
//! let mut session = Msr605Builder::new()
//!     .sync_timeout(Some(Duration::from_secs(20)))
//!     .open("/dev/ttyUSB0", None)
//!     .await?;
//! session.test_comm().await?;
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use msrlib_core::error::Result;
use msrlib_core::transport::Transport;
use msrlib_transport::DEFAULT_BAUD_RATE;

use crate::session::Session;
use crate::sync::CancelSource;

/// Default bound on each wait for a response.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// Default pause before resynchronizing the device after a failure.
pub const DEFAULT_QUIESCENCE: Duration = Duration::from_millis(250);

/// Session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Serial baud rate used by [`Session::start`].
    pub baud_rate: u32,
    /// Bound on each wait for a response; `None` waits indefinitely.
    /// The sensor test always waits indefinitely.
    pub sync_timeout: Option<Duration>,
    /// Pause before the reset/flush that follows a failed swipe command.
    pub quiescence: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            baud_rate: DEFAULT_BAUD_RATE,
            sync_timeout: Some(DEFAULT_SYNC_TIMEOUT),
            quiescence: DEFAULT_QUIESCENCE,
        }
    }
}

/// Fluent builder for [`Session`].
#[derive(Debug, Clone, Default)]
pub struct Msr605Builder {
    config: SessionConfig,
}

impl Msr605Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the serial baud rate (default: 9600).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.config.baud_rate = baud;
        self
    }

    /// Set the bound on each response wait (default: 10s).
    pub fn sync_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.sync_timeout = timeout;
        self
    }

    /// Set the pause before post-failure recovery (default: 250ms).
    pub fn quiescence(mut self, quiescence: Duration) -> Self {
        self.config.quiescence = quiescence;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Build an inactive [`Session`]; call [`Session::start`] to open it.
    pub fn build(self) -> Session {
        Session::new(self.config)
    }

    /// Build a session and open the serial device at `path`.
    pub async fn open(self, path: &str, cancel: Option<CancelSource>) -> Result<Session> {
        let mut session = self.build();
        session.start(path, cancel).await?;
        Ok(session)
    }

    /// Build a session over a caller-provided transport.
    ///
    /// This is the primary entry point for testing (pass a
    /// `MockTransport` from `msrlib-test-harness`) and for links other
    /// than a local serial port.
    pub async fn open_with_transport(
        self,
        path: &str,
        transport: Box<dyn Transport>,
        cancel: Option<CancelSource>,
    ) -> Result<Session> {
        let mut session = self.build();
        session.start_with_transport(path, transport, cancel).await?;
        Ok(session)
    }
}
