//! MSR605 magnetic-stripe reader/writer backend for msrlib.
//!
//! This crate implements the escape-framed command protocol spoken by the
//! MSR605 family over its USB serial port. It provides:
//!
//! - **Command builders** ([`commands`]) -- the exact request bytes for every
//!   operation, including the erase-mask quirk and write-block assembly.
//! - **Response matchers** ([`frame`]) -- incremental matchers for fixed
//!   acknowledgements, identity replies, and resumable track-frame parsing.
//! - **Synchronizer** ([`sync`]) -- one wait over the device and a
//!   cancellation source, feeding two FIFO queues.
//! - **Session** ([`session`]) -- the protocol engine: lifecycle, command
//!   issue, cancel/timeout handling, and resynchronization after failures.
//! - **Msr605Builder** ([`builder`]) -- fluent configuration of a session.
//! - **Raw decoder** ([`raw`]) -- bit-level symbol decoding with parity.
//!
//! # Example
//!
//! ```
//! use msrlib_msr605::commands::{cmd_erase, erase_mask};
//! use msrlib_msr605::frame::{match_model, Match};
//!
//! // Erase track 1 only; the firmware wants mask 0 for that.
//! let cmd = cmd_erase(erase_mask(true, false, false).unwrap());
//! assert_eq!(cmd, vec![0x1B, b'c', 0]);
//!
//! // A model reply from a three-track reader.
//! let reply = [0x1B, b'3', b'S'];
//! assert_eq!(
//!     match_model(&reply).unwrap(),
//!     Match::Complete { value: b'3', consumed: 3 }
//! );
//! ```

pub mod builder;
pub mod commands;
pub mod frame;
pub mod identity;
pub mod raw;
pub mod session;
pub mod sync;

pub use builder::{Msr605Builder, SessionConfig};
pub use identity::Capabilities;
pub use session::Session;
pub use sync::CancelSource;
