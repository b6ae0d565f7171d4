//! msrlib-core: Core traits, types, and error definitions for msrlib.
//!
//! This crate defines the device-agnostic pieces that the MSR605 protocol
//! driver and its transports share. Client tooling depends on these types
//! without pulling in the serial stack.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel to the reader
//! - [`Track`] / [`TrackData`] / [`Tracks`] -- magnetic-stripe track content
//! - [`Status`] -- the device's one-byte outcome code
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use msrlib_core::*`.
pub use error::{Error, Result};
pub use transport::Transport;
pub use types::*;
