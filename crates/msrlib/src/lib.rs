//! # msrlib -- Async driver for MSR605 magnetic-stripe readers
//!
//! `msrlib` talks to MSR605-family card readers/writers over their USB
//! serial port. It reads, writes, and erases the three magnetic-stripe
//! tracks, queries device identity, drives the front-panel LEDs, and runs
//! the built-in self-tests.
//!
//! ## Quick Start
//!
//! ```no_run
//! use msrlib::{Msr605Builder, TrackData};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Pressing Enter on stdin aborts a pending swipe wait.
//!     let mut reader = Msr605Builder::new()
//!         .open("/dev/ttyUSB0", Some(Box::new(tokio::io::stdin())))
//!         .await?;
//!
//!     println!("model {} firmware {}", reader.model().await?, reader.firmware().await?);
//!
//!     let tracks = reader.read().await?;
//!     for (track, content) in tracks.iter() {
//!         if let TrackData::Data(bytes) = content {
//!             println!("{track}: {}", String::from_utf8_lossy(bytes));
//!         }
//!     }
//!
//!     reader.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                 | Purpose                                            |
//! |-----------------------|----------------------------------------------------|
//! | `msrlib-core`         | [`Transport`] trait, track/status types, errors    |
//! | `msrlib-transport`    | Serial transport over `tokio-serial`               |
//! | `msrlib-msr605`       | MSR605 command set, response framing, session      |
//! | **`msrlib`**          | This facade crate -- re-exports everything         |
//!
//! ## Failure handling
//!
//! Commands that wait for a swipe (read, write, erase, raw read, sensor
//! test) reset the reader and flush stale bytes when they fail, then return
//! the original error. A line on the cancellation source aborts the wait
//! with [`Error::Cancelled`].

pub use msrlib_core::*;

/// Serial transport.
pub mod transport {
    pub use msrlib_transport::*;
}

/// MSR605 protocol backend.
pub mod msr605 {
    pub use msrlib_msr605::*;
}

pub use msrlib_msr605::raw::{Symbol, decode_symbols, render};
pub use msrlib_msr605::{CancelSource, Capabilities, Msr605Builder, Session, SessionConfig};
