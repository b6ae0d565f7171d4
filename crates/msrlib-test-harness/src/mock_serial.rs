//! Mock transport for deterministic testing of the protocol engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. This lets you test command encoding, response
//! framing, cancellation, and recovery without a physical reader.
//!
//! The mock is a cheap handle over shared state: clone it before boxing it
//! into a session, and the clone can still inspect what was sent.
//!
//! # Example
//!
//! ```
//! use msrlib_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! // When the engine sends a comm test, answer with the comm-test ack.
//! mock.expect(&[0x1B, b'e'], &[0x1B, b'y']);
//! let inspector = mock.clone();
//! assert_eq!(inspector.remaining_expectations(), 1);
//! ```

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use msrlib_core::error::{Error, Result};
use msrlib_core::transport::Transport;

const ESC: u8 = 0x1B;
const FS: u8 = 0x1C;

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes that become readable once the request is sent.
    response: Vec<u8>,
}

#[derive(Debug)]
struct MockState {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Bytes waiting to be returned by `receive()`.
    inbound: VecDeque<u8>,
    /// Upper bound on bytes handed out per `receive()` call.
    chunk_size: usize,
    /// Whether the transport is "connected".
    connected: bool,
    /// Answer write/read commands from a stored data block.
    loopback: bool,
    /// Data block captured from the last loopback write.
    stored_block: Option<Vec<u8>>,
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
    /// Number of `discard_pending()` calls.
    discards: usize,
    /// Fail the next `receive()` with `Error::Interrupted`.
    interrupt_next_receive: bool,
    /// Fail the next `send()` with this I/O error kind.
    fail_next_send: Option<io::ErrorKind>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<MockState>,
    data_ready: Notify,
}

/// A mock [`Transport`] for testing the protocol engine without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation, and the
/// corresponding response becomes readable. `receive()` waits (without
/// timing out) until inbound bytes exist, so the session's own deadline
/// decides when a silent device times out.
///
/// If no expectation matches or the queue is exhausted, `send()` fails.
#[derive(Debug, Clone)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            shared: Arc::new(Shared {
                state: Mutex::new(MockState {
                    expectations: VecDeque::new(),
                    inbound: VecDeque::new(),
                    chunk_size: usize::MAX,
                    connected: true,
                    loopback: false,
                    stored_block: None,
                    sent_log: Vec::new(),
                    discards: 0,
                    interrupt_next_receive: false,
                    fail_next_send: None,
                }),
                data_ready: Notify::new(),
            }),
        }
    }

    /// Create a mock that behaves like a reader with a blank card on the
    /// head: a write command stores its data block and answers `ESC '0'`,
    /// and a read command replays the stored block followed by `ESC '0'`.
    ///
    /// Commands other than read/write consume a matching expectation if one
    /// is queued, and are otherwise accepted without a response.
    pub fn loopback() -> Self {
        let mock = Self::new();
        mock.lock().loopback = true;
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panic in another test thread must not hide this test's result.
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an expected request/response pair.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Expect a request that the device does not answer (reset, LEDs).
    pub fn expect_silent(&self, request: &[u8]) {
        self.expect(request, &[]);
    }

    /// Make bytes readable without any preceding request.
    pub fn push_inbound(&self, data: &[u8]) {
        self.lock().inbound.extend(data.iter().copied());
        self.shared.data_ready.notify_one();
    }

    /// Limit how many bytes a single `receive()` returns.
    pub fn set_chunk_size(&self, n: usize) {
        self.lock().chunk_size = n.max(1);
    }

    /// Fail the next `receive()` with [`Error::Interrupted`].
    pub fn interrupt_next_receive(&self) {
        self.lock().interrupt_next_receive = true;
        self.shared.data_ready.notify_one();
    }

    /// Fail the next `send()` with an I/O error of the given kind.
    pub fn fail_next_send(&self, kind: io::ErrorKind) {
        self.lock().fail_next_send = Some(kind);
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent calls return [`Error::NoMedium`].
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
        self.shared.data_ready.notify_one();
    }

    /// Return a copy of all data that has been sent through this transport.
    ///
    /// Each element is the byte slice from one `send()` call.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.lock().sent_log.clone()
    }

    /// Number of `send()` calls that reached the mock.
    pub fn send_count(&self) -> usize {
        self.lock().sent_log.len()
    }

    /// Number of `discard_pending()` calls.
    pub fn discard_count(&self) -> usize {
        self.lock().discards
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.lock().expectations.len()
    }

    /// Number of inbound bytes not yet returned by `receive()`.
    pub fn pending_inbound(&self) -> usize {
        self.lock().inbound.len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockState {
    /// Consume the next expectation, which must match `data`.
    fn take_expectation(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        match self.expectations.pop_front() {
            Some(expectation) if expectation.request == data => Ok(expectation.response),
            Some(expectation) => Err(Error::protocol(
                0,
                format!(
                    "unexpected send data: expected {:02X?}, got {:02X?}",
                    expectation.request, data
                ),
            )),
            None => Err(Error::protocol(0, "no more expectations in mock transport")),
        }
    }

    fn loopback_response(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        match data {
            [ESC, b'w', block @ ..] => {
                self.stored_block = Some(block.to_vec());
                Ok(vec![ESC, b'0'])
            }
            [ESC, b'r'] => {
                let mut response = self
                    .stored_block
                    .clone()
                    .unwrap_or_else(|| vec![ESC, b's', ESC, 1, ESC, 2, ESC, 3, b'?', FS]);
                response.extend_from_slice(&[ESC, b'0']);
                Ok(response)
            }
            _ => {
                let matches_next = self
                    .expectations
                    .front()
                    .is_some_and(|e| e.request == data);
                if matches_next {
                    self.take_expectation(data)
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        {
            let mut state = self.lock();
            if !state.connected {
                return Err(Error::NoMedium);
            }
            if let Some(kind) = state.fail_next_send.take() {
                return Err(Error::ShortIo(io::Error::from(kind)));
            }

            // Record what was sent.
            state.sent_log.push(data.to_vec());

            let response = if state.loopback {
                state.loopback_response(data)?
            } else {
                state.take_expectation(data)?
            };
            if response.is_empty() {
                return Ok(());
            }
            state.inbound.extend(response);
        }
        self.shared.data_ready.notify_one();
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            {
                let mut state = self.lock();
                if !state.connected {
                    return Err(Error::NoMedium);
                }
                if std::mem::take(&mut state.interrupt_next_receive) {
                    return Err(Error::Interrupted);
                }
                if !state.inbound.is_empty() {
                    let n = state.inbound.len().min(buf.len()).min(state.chunk_size);
                    for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
                        *slot = byte;
                    }
                    return Ok(n);
                }
            }
            self.shared.data_ready.notified().await;
        }
    }

    async fn discard_pending(&mut self) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::NoMedium);
        }
        state.inbound.clear();
        state.discards += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.connected = false;
        state.inbound.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }
}
