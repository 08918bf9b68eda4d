//! Device collaborator interface.
//!
//! The engine never stores devices itself. It resolves addresses, reports
//! state changes and creates newly paired devices through the
//! [`DeviceDirectory`] and [`Device`] traits, which the host application
//! implements on top of whatever persistence it uses.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::Result;

/// Provider tag stamped on descriptors created by this engine.
pub const PROVIDER: &str = "insteon";

/// Name given to devices created by auto-add during linking.
pub const NEW_DEVICE_NAME: &str = "New Device";

/// What a device can do, as far as unsolicited-message heuristics care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Light,
    Dimmer,
    #[serde(rename = "onoff")]
    OnOff,
    MotionSensor,
    #[serde(rename = "openclose")]
    OpenClose,
    Thermostat,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Light => "light",
            Capability::Dimmer => "dimmer",
            Capability::OnOff => "onoff",
            Capability::MotionSensor => "motion_sensor",
            Capability::OpenClose => "openclose",
            Capability::Thermostat => "thermostat",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role a device took in an all-link, and the mode code sent with
/// START_ALL_LINKING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    /// The modem responds to the device.
    Responder,
    /// The modem controls the device.
    Controller,
    /// Whichever side presses its set button first becomes controller.
    Either,
    /// Remove the link.
    Deleted,
}

impl LinkMode {
    pub const fn code(self) -> u8 {
        match self {
            LinkMode::Responder => 0x00,
            LinkMode::Controller => 0x01,
            LinkMode::Either => 0x03,
            LinkMode::Deleted => 0xFF,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(LinkMode::Responder),
            0x01 => Some(LinkMode::Controller),
            0x03 => Some(LinkMode::Either),
            0xFF => Some(LinkMode::Deleted),
            _ => None,
        }
    }
}

impl std::str::FromStr for LinkMode {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "responder" => Ok(LinkMode::Responder),
            "controller" => Ok(LinkMode::Controller),
            "either" => Ok(LinkMode::Either),
            "deleted" | "delete" => Ok(LinkMode::Deleted),
            other => Err(crate::error::Error::InvalidParameter(format!(
                "unknown link mode {other:?}"
            ))),
        }
    }
}

/// Provider-specific configuration attached to a device.
///
/// Populated from an ALL_LINKING_COMPLETED report and merged into the
/// existing configuration when an already-known device re-links.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub address: Option<Address>,
    pub link_mode: Option<LinkMode>,
    pub group: Option<u8>,
    pub category: Option<u8>,
    pub subcategory: Option<u8>,
    pub firmware: Option<u8>,
}

impl DeviceConfig {
    /// Overlay every field `other` sets onto `self`.
    pub fn merge(&mut self, other: &DeviceConfig) {
        if other.address.is_some() {
            self.address = other.address;
        }
        if other.link_mode.is_some() {
            self.link_mode = other.link_mode;
        }
        if other.group.is_some() {
            self.group = other.group;
        }
        if other.category.is_some() {
            self.category = other.category;
        }
        if other.subcategory.is_some() {
            self.subcategory = other.subcategory;
        }
        if other.firmware.is_some() {
            self.firmware = other.firmware;
        }
    }
}

/// Everything needed to create a device record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub address: Address,
    pub capabilities: Vec<Capability>,
    pub provider: String,
    pub config: DeviceConfig,
}

/// A partial device state. Unset fields are left untouched by the
/// collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDelta {
    #[serde(rename = "_on", skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    /// Brightness in percent.
    #[serde(rename = "_level", skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    #[serde(rename = "_motion", skip_serializing_if = "Option::is_none")]
    pub motion: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_battery: Option<bool>,
    /// Dusk/dawn sensor reading: `true` when dark.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dark: Option<bool>,
}

impl StateDelta {
    pub fn on(on: bool) -> Self {
        StateDelta {
            on: Some(on),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == StateDelta::default()
    }
}

/// A device known to the host application.
#[async_trait]
pub trait Device: Send + Sync {
    fn name(&self) -> String;

    fn address(&self) -> Address;

    fn capabilities(&self) -> Vec<Capability>;

    fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Last known on/off state, if any.
    fn is_on(&self) -> Option<bool>;

    fn config(&self) -> DeviceConfig;

    /// Apply a partial state change. `description` is a short human
    /// readable summary for the device's event log.
    async fn set_state(&self, delta: StateDelta, description: &str) -> Result<()>;

    /// Record an event that does not change state.
    async fn log_entry(&self, description: &str) -> Result<()>;

    /// Replace the device configuration and persist it.
    async fn save_config(&self, config: DeviceConfig) -> Result<()>;
}

/// The host's device registry.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn get_by_address(&self, address: &Address) -> Option<Arc<dyn Device>>;

    async fn create(&self, descriptor: DeviceDescriptor) -> Result<()>;

    /// Every device belonging to this provider, for the status poller.
    async fn all(&self) -> Vec<Arc<dyn Device>>;
}
