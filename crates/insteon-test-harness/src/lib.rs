//! insteon-test-harness: Test utilities for the Insteon PLM engine.
//!
//! This crate provides [`MockTransport`] for deterministic unit testing of
//! the engine without a modem, and [`MemoryDirectory`] / [`MemoryDevice`]
//! as recording stand-ins for the host application's device collaborators.

pub mod directory;
pub mod mock_serial;

pub use directory::{MemoryDevice, MemoryDirectory};
pub use mock_serial::{MockHandle, MockTransport};
