//! Asynchronous engine event types.
//!
//! Events are emitted through a [`tokio::sync::broadcast`] channel. They are
//! informational: the authoritative side effects still go through the
//! [`Device`](crate::device::Device) and
//! [`DeviceDirectory`](crate::device::DeviceDirectory) collaborators.

use crate::address::Address;
use crate::device::{DeviceDescriptor, LinkMode, StateDelta};

/// Why a link session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEnd {
    /// `stop_linking` was called.
    Stopped,
    /// The linking window elapsed without a completion.
    TimedOut,
    /// A device completed the link.
    Completed,
    /// The START_ALL_LINKING command itself failed.
    Failed,
}

/// An event emitted by the engine.
///
/// Delivery is best-effort through a bounded broadcast channel; slow
/// consumers may miss events.
#[derive(Debug, Clone)]
pub enum PlmEvent {
    /// A frame arrived from the modem. `command` is the resolved command
    /// table name, `summary` a one-line rendering for logs and monitors.
    MessageReceived {
        command: &'static str,
        summary: String,
    },

    /// An unsolicited report changed a device's state.
    StateChanged {
        address: Address,
        delta: StateDelta,
        description: String,
    },

    /// A message arrived from an address with no known device.
    UnknownDevice {
        address: Address,
        command: &'static str,
    },

    /// The modem entered linking mode.
    LinkingStarted { mode: LinkMode },

    /// The link session ended.
    LinkingStopped { reason: LinkEnd },

    /// A paired device was created or updated.
    DeviceLinked(DeviceDescriptor),

    /// A paired device is waiting for manual confirmation.
    DeviceStaged(DeviceDescriptor),

    /// Reads from the modem started failing. Emitted once per outage.
    Disconnected { error: String },

    /// Reads succeed again after a [`PlmEvent::Disconnected`].
    Reconnected,
}
