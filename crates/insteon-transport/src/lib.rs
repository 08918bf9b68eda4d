//! Transport implementations for the Insteon PLM engine.
//!
//! This crate provides [`SerialTransport`], the concrete
//! [`Transport`](insteon_core::Transport) used to talk to a PowerLinc Modem
//! over USB or RS-232, together with its [`SerialConfig`].

pub mod serial;

pub use serial::{
    DataBits, FlowControl, PLM_BAUD_RATE, Parity, SerialConfig, SerialTransport, StopBits,
};
