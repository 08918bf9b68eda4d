//! Link completion handling.
//!
//! The link session itself (open/close and its 4-minute window) lives in
//! the IO task. This module handles what happens once a device reports
//! ALL_LINKING_COMPLETED: create it, stage it for confirmation, or merge
//! the reported configuration into the device that already exists.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::info;

use insteon_core::device::{
    Capability, DeviceConfig, DeviceDescriptor, DeviceDirectory, NEW_DEVICE_NAME, PROVIDER,
};
use insteon_core::error::Result;
use insteon_core::events::PlmEvent;

use crate::message::LinkCompletion;

/// Holds the most recent device awaiting manual confirmation.
pub type StagedSlot = Arc<Mutex<Option<DeviceDescriptor>>>;

pub(crate) fn lock_staged(slot: &StagedSlot) -> MutexGuard<'_, Option<DeviceDescriptor>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What a link completion did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    Staged,
    Updated,
}

/// Capabilities implied by an Insteon device category.
///
/// Unrecognised categories are treated as lights.
pub fn capabilities_for(category: u8, subcategory: u8) -> Vec<Capability> {
    match category {
        0x01 => vec![Capability::Light, Capability::Dimmer],
        0x02 => vec![Capability::Light, Capability::OnOff],
        0x05 => vec![Capability::Thermostat],
        0x07 => vec![Capability::OnOff],
        // Security: TriggerLinc and hidden door sensors report open/close,
        // everything else in the category is a motion-style sensor.
        0x10 => match subcategory {
            0x02 | 0x09 | 0x11 => vec![Capability::OpenClose],
            _ => vec![Capability::MotionSensor],
        },
        _ => vec![Capability::Light],
    }
}

/// Device configuration carried by a completion report.
pub fn completion_config(completion: &LinkCompletion) -> DeviceConfig {
    DeviceConfig {
        address: Some(completion.address),
        link_mode: completion.mode(),
        group: Some(completion.group),
        category: Some(completion.category),
        subcategory: Some(completion.subcategory),
        firmware: Some(completion.firmware),
    }
}

/// Create, stage, or update the device named by `completion`.
pub(crate) async fn handle_completion(
    devices: &dyn DeviceDirectory,
    event_tx: &broadcast::Sender<PlmEvent>,
    staged: &StagedSlot,
    completion: LinkCompletion,
    auto_add: bool,
) -> Result<LinkOutcome> {
    let config = completion_config(&completion);

    if let Some(device) = devices.get_by_address(&completion.address).await {
        let mut merged = device.config();
        merged.merge(&config);
        device.save_config(merged.clone()).await?;
        info!(address = %completion.address, name = %device.name(), "linked device updated");
        let _ = event_tx.send(PlmEvent::DeviceLinked(DeviceDescriptor {
            name: device.name(),
            address: completion.address,
            capabilities: device.capabilities(),
            provider: PROVIDER.to_string(),
            config: merged,
        }));
        return Ok(LinkOutcome::Updated);
    }

    let descriptor = DeviceDescriptor {
        name: NEW_DEVICE_NAME.to_string(),
        address: completion.address,
        capabilities: capabilities_for(completion.category, completion.subcategory),
        provider: PROVIDER.to_string(),
        config,
    };

    if auto_add {
        devices.create(descriptor.clone()).await?;
        info!(address = %completion.address, "linked device created");
        let _ = event_tx.send(PlmEvent::DeviceLinked(descriptor));
        Ok(LinkOutcome::Created)
    } else {
        info!(address = %completion.address, "linked device staged for confirmation");
        *lock_staged(staged) = Some(descriptor.clone());
        let _ = event_tx.send(PlmEvent::DeviceStaged(descriptor));
        Ok(LinkOutcome::Staged)
    }
}
