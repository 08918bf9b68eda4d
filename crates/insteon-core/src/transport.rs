//! Transport trait for modem communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the PLM.
//! The serial implementation lives in `insteon-transport`; the engine in
//! `insteon-plm` only ever sees a `Box<dyn Transport>`, which is what lets
//! its tests run against `MockTransport` from `insteon-test-harness`.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a modem.
///
/// Implementations move raw bytes only. Framing, opcode lookup and
/// request/response correlation belong to the protocol engine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the modem.
    ///
    /// Returns once every byte has been handed to the underlying device.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the modem into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Waits up to `timeout`;
    /// returns [`Error::Timeout`](crate::error::Error::Timeout) if nothing
    /// arrives. A single call may return any fragment of a frame.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
