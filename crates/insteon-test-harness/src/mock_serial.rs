//! Mock transport for deterministic testing of the PLM engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. When the engine writes a frame that matches the
//! next expectation, the scripted response bytes become readable. Because
//! the PLM also talks unprompted (button presses, motion sensors, link
//! completions), a cloneable [`MockHandle`] can inject inbound bytes after
//! the transport has been handed to the engine.
//!
//! # Example
//!
//! ```
//! use insteon_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // GET_IM_INFO and its reply: address 1a.2b.3c, cat 03, subcat 15, fw 9b, ACK.
//! mock.expect(&[0x02, 0x60], &[0x02, 0x60, 0x1A, 0x2B, 0x3C, 0x03, 0x15, 0x9B, 0x06]);
//! let handle = mock.handle();
//! handle.inject(&[0x02, 0x55]); // USER_RESET_DETECTED
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use insteon_core::error::{Error, Result};
use insteon_core::transport::Transport;

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
    /// Largest number of bytes a single `receive()` may return.
    chunk_size: usize,
    /// Whether the transport is "connected".
    connected: bool,
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
    /// Number of `receive()` calls, successful or not.
    receive_calls: usize,
}

/// A mock [`Transport`] for testing the engine without a modem.
///
/// Expectations are consumed in order. A `send()` that does not match the
/// next expectation, or arrives when none are left, fails with
/// [`Error::Transport`].
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// A cloneable view onto a [`MockTransport`] that stays usable after the
/// transport itself has been moved into the engine.
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Arc<Mutex<MockState>>) -> MutexGuard<'_, MockState> {
    // A panic inside a test already fails that test; keep the data usable.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            state: Arc::new(Mutex::new(MockState {
                expectations: VecDeque::new(),
                inbound: VecDeque::new(),
                chunk_size: usize::MAX,
                connected: true,
                sent_log: Vec::new(),
                receive_calls: 0,
            })),
        }
    }

    /// Add an expected request/response pair.
    ///
    /// An empty `response` scripts a request the modem never answers.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        lock(&self.state).expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Limit every `receive()` to at most `n` bytes, to exercise frame
    /// reassembly across reads.
    pub fn set_chunk_size(&mut self, n: usize) {
        lock(&self.state).chunk_size = n.max(1);
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    /// A handle for injecting bytes and inspecting traffic later on.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Return a copy of all data that has been sent through this transport.
    ///
    /// Each element is the byte slice from one `send()` call.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        lock(&self.state).sent_log.clone()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        lock(&self.state).expectations.len()
    }
}

impl MockHandle {
    /// Make `bytes` readable, as if the modem had sent them unprompted.
    pub fn inject(&self, bytes: &[u8]) {
        lock(&self.state).inbound.extend(bytes.iter().copied());
    }

    /// Append another scripted exchange.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        lock(&self.state).expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        lock(&self.state).sent_log.clone()
    }

    pub fn remaining_expectations(&self) -> usize {
        lock(&self.state).expectations.len()
    }

    /// Drop or restore the link while the engine owns the transport.
    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    pub fn receive_calls(&self) -> usize {
        lock(&self.state).receive_calls
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(Error::NotConnected);
        }

        state.sent_log.push(data.to_vec());

        match state.expectations.pop_front() {
            Some(expectation) if expectation.request == data => {
                state.inbound.extend(expectation.response);
                Ok(())
            }
            Some(expectation) => Err(Error::Transport(format!(
                "unexpected send data: expected {:02X?}, got {:02X?}",
                expectation.request, data
            ))),
            None => Err(Error::Transport(
                "no more expectations in mock transport".into(),
            )),
        }
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let mut state = lock(&self.state);
        state.receive_calls += 1;
        if !state.connected {
            return Err(Error::NotConnected);
        }
        if state.inbound.is_empty() {
            return Err(Error::Timeout);
        }

        let n = state.inbound.len().min(buf.len()).min(state.chunk_size);
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.connected = false;
        state.inbound.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}
