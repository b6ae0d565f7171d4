//! msrlib-test-harness: Test utilities and mock transports for msrlib.
//!
//! This crate provides [`MockTransport`] for deterministic testing of the
//! MSR605 protocol engine without a physical reader.

pub mod mock_serial;

pub use mock_serial::MockTransport;
