//! Background status poller.
//!
//! Sweeps every statusable device, requests its level, and reports `_on`
//! and `_level` through the device collaborator. Sweeps repeat after a
//! fixed delay until the engine shuts down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use insteon_core::device::{Device, DeviceDirectory};
use insteon_core::error::Result;
use insteon_core::events::PlmEvent;

use crate::actions::{Action, RetryPolicy, execute, status_delta};
use crate::io::Submitter;

/// Device categories that answer LIGHT_STATUS: dimmable lighting, switched
/// lighting, sensors and actuators.
pub const STATUSABLE_CATEGORIES: [u8; 3] = [0x01, 0x02, 0x07];

/// Whether the poller should ask `device` for its status.
///
/// Devices with no recorded category are polled.
pub fn is_statusable(device: &dyn Device) -> bool {
    device
        .config()
        .category
        .is_none_or(|c| STATUSABLE_CATEGORIES.contains(&c))
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PollerConfig {
    /// Pause between sweeps.
    pub delay: Duration,
    /// Pause before each device within a sweep.
    pub device_gap: Duration,
    pub policy: RetryPolicy,
}

pub(crate) fn spawn_poller(
    devices: Arc<dyn DeviceDirectory>,
    submitter: Submitter,
    event_tx: broadcast::Sender<PlmEvent>,
    config: PollerConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(delay = ?config.delay, gap = ?config.device_gap, "status poller started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sweep(devices.as_ref(), &submitter, &event_tx, &config) => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(config.delay) => {}
            }
        }
        debug!("status poller stopped");
    })
}

async fn sweep(
    devices: &dyn DeviceDirectory,
    submitter: &Submitter,
    event_tx: &broadcast::Sender<PlmEvent>,
    config: &PollerConfig,
) {
    let targets: Vec<_> = devices
        .all()
        .await
        .into_iter()
        .filter(|d| is_statusable(d.as_ref()))
        .collect();
    debug!(devices = targets.len(), "status sweep");

    for device in targets {
        tokio::time::sleep(config.device_gap).await;
        if let Err(e) = poll_one(device.as_ref(), submitter, event_tx, config.policy).await {
            warn!(address = %device.address(), error = %e, "status poll failed");
        }
    }
}

async fn poll_one(
    device: &dyn Device,
    submitter: &Submitter,
    event_tx: &broadcast::Sender<PlmEvent>,
    policy: RetryPolicy,
) -> Result<()> {
    let address = device.address();
    let req = Action::LightStatus.request(address)?;
    let reply = execute(submitter, &req, policy).await?;
    let delta = status_delta(&reply)?;
    device.set_state(delta.clone(), "status poll").await?;
    let _ = event_tx.send(PlmEvent::StateChanged {
        address,
        delta,
        description: "status poll".to_string(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{IoConfig, LINK_WINDOW, spawn_io_task};
    use insteon_core::address::Address;
    use insteon_core::device::{Capability, DeviceConfig};
    use insteon_test_harness::{MemoryDevice, MemoryDirectory, MockTransport};
    use tokio::sync::mpsc;

    const DIMMER: Address = Address::new([0x11, 0x22, 0x33]);
    const THERMOSTAT: Address = Address::new([0x22, 0x33, 0x44]);
    const BARE: Address = Address::new([0x33, 0x44, 0x55]);

    fn with_category(device: MemoryDevice, address: Address, category: u8) -> MemoryDevice {
        device.with_config(DeviceConfig {
            address: Some(address),
            category: Some(category),
            ..Default::default()
        })
    }

    fn status_exchange(mock: &mut MockTransport, addr: Address, level: u8) {
        let [a, b, c] = addr.bytes();
        let request = [0x02, 0x62, a, b, c, 0x0F, 0x19, 0x00];
        let mut response = request.to_vec();
        response.push(0x06);
        response.extend_from_slice(&[0x02, 0x50, a, b, c, 0xAA, 0xBB, 0xCC, 0x2B, 0x00, level]);
        mock.expect(&request, &response);
    }

    #[test]
    fn statusable_categories() {
        let dimmer = with_category(MemoryDevice::new("d", DIMMER, &[Capability::Dimmer]), DIMMER, 0x01);
        let thermostat = with_category(
            MemoryDevice::new("t", THERMOSTAT, &[Capability::Thermostat]),
            THERMOSTAT,
            0x05,
        );
        let bare = MemoryDevice::new("b", BARE, &[Capability::Light]);
        assert!(is_statusable(&dimmer));
        assert!(!is_statusable(&thermostat));
        assert!(is_statusable(&bare));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_reports_status_for_statusable_devices() {
        let devices = Arc::new(MemoryDirectory::new());
        let dimmer = devices.add(with_category(
            MemoryDevice::new("Dimmer", DIMMER, &[Capability::Light, Capability::Dimmer]),
            DIMMER,
            0x01,
        ));
        let thermostat = devices.add(with_category(
            MemoryDevice::new("Thermostat", THERMOSTAT, &[Capability::Thermostat]),
            THERMOSTAT,
            0x05,
        ));
        let bare = devices.add(MemoryDevice::new("Porch", BARE, &[Capability::Light]));

        let mut mock = MockTransport::new();
        status_exchange(&mut mock, DIMMER, 0xFF);
        status_exchange(&mut mock, BARE, 0x00);
        let handle = mock.handle();

        let (event_tx, mut events) = broadcast::channel(64);
        let (dispatch_tx, _dispatch_rx) = mpsc::unbounded_channel();
        let io = spawn_io_task(
            Box::new(mock),
            IoConfig {
                timeout: Duration::from_millis(1000),
                queue_timeout: Duration::from_millis(5000),
                queue_interval: Duration::from_millis(50),
                link_window: LINK_WINDOW,
            },
            event_tx.clone(),
            dispatch_tx,
            CancellationToken::new(),
        );

        let cancel = CancellationToken::new();
        let poller = spawn_poller(
            devices.clone(),
            io.submitter.clone(),
            event_tx,
            PollerConfig {
                delay: Duration::from_secs(300),
                device_gap: Duration::from_millis(100),
                policy: RetryPolicy::ONCE,
            },
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(dimmer.states()[0].0.level, Some(100));
        assert_eq!(dimmer.states()[0].0.on, Some(true));
        assert_eq!(bare.states()[0].0.on, Some(false));
        assert!(thermostat.states().is_empty());
        assert_eq!(handle.remaining_expectations(), 0);

        let mut changed = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, PlmEvent::StateChanged { .. }) {
                changed += 1;
            }
        }
        assert_eq!(changed, 2);

        cancel.cancel();
        let _ = poller.await;
        let _ = io.shutdown().await;
    }
}
