//! insteon-core: Core traits, types, and error definitions for the Insteon
//! PLM engine.
//!
//! This crate holds the pieces shared by every other crate in the
//! workspace. Host applications depend on these types to implement the
//! device collaborators without pulling in the protocol engine.
//!
//! # Key types
//!
//! - [`Address`] -- 3-byte Insteon device address
//! - [`MessageFlags`] -- the message-flags bitfield
//! - [`Transport`] -- byte-level communication channel
//! - [`Device`] / [`DeviceDirectory`] -- collaborator traits for state
//!   updates and device creation
//! - [`PlmEvent`] -- asynchronous engine notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod address;
pub mod device;
pub mod error;
pub mod events;
pub mod flags;
pub mod transport;

pub use address::Address;
pub use device::{
    Capability, Device, DeviceConfig, DeviceDescriptor, DeviceDirectory, LinkMode, StateDelta,
};
pub use error::{Error, Result};
pub use events::{LinkEnd, PlmEvent};
pub use flags::{MessageFlags, MessageType};
pub use transport::Transport;
