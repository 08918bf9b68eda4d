//! Dispatcher task -- turns unsolicited messages into device state.
//!
//! The IO task settles expectations itself and forwards everything else
//! here, in arrival order. The dispatcher handles one item at a time:
//! link completions go to [`linking`](crate::linking), device reports are
//! interpreted against the sender's capabilities and applied through the
//! [`Device`] collaborator.
//!
//! Every step is bounded by a stall limit. A step that runs past it (a
//! collaborator that never returns, for instance) is abandoned with a
//! warning and the loop moves on to the next item.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use insteon_core::device::{Capability, Device, DeviceDirectory, StateDelta};
use insteon_core::events::PlmEvent;

use crate::actions::{Action, RetryPolicy, execute, status_delta};
use crate::commands::DeviceCommand;
use crate::io::{DispatchItem, Submitter};
use crate::linking::{self, StagedSlot};
use crate::message::{Message, MessageBody, StandardMessage};

// ---------------------------------------------------------------------------
// Suffix rules
// ---------------------------------------------------------------------------

/// What a group destination means for a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuffixMeaning {
    /// On is dark, off is light.
    DuskDawn,
    /// On is low battery.
    LowBattery,
}

/// Meaning of group destination `00.00.<suffix>` for devices with
/// `capability`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuffixRule {
    pub suffix: u8,
    pub capability: Capability,
    pub meaning: SuffixMeaning,
}

/// Group 2 is dusk/dawn on motion sensors; group 3 is low battery on
/// motion and open/close sensors.
pub fn default_suffix_rules() -> Vec<SuffixRule> {
    vec![
        SuffixRule {
            suffix: 0x02,
            capability: Capability::MotionSensor,
            meaning: SuffixMeaning::DuskDawn,
        },
        SuffixRule {
            suffix: 0x03,
            capability: Capability::MotionSensor,
            meaning: SuffixMeaning::LowBattery,
        },
        SuffixRule {
            suffix: 0x03,
            capability: Capability::OpenClose,
            meaning: SuffixMeaning::LowBattery,
        },
    ]
}

// ---------------------------------------------------------------------------
// Interpretation
// ---------------------------------------------------------------------------

/// What to do with a device report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpretation {
    /// Apply a state change.
    Apply { delta: StateDelta, description: String },
    /// Record the message on the device without changing state.
    Log(String),
    /// Drop silently.
    Suppress,
}

fn on_off(command: Option<DeviceCommand>) -> Option<bool> {
    match command {
        Some(c) if c.is_on() => Some(true),
        Some(c) if c.is_off() => Some(false),
        _ => None,
    }
}

fn apply(delta: StateDelta, description: impl Into<String>) -> Interpretation {
    Interpretation::Apply {
        delta,
        description: description.into(),
    }
}

/// Interpret a report from a known device.
///
/// `capabilities` and `known_on` describe the sender; `rules` give the
/// meaning of sensor group destinations.
pub fn interpret(
    msg: &StandardMessage,
    capabilities: &[Capability],
    known_on: Option<bool>,
    rules: &[SuffixRule],
) -> Interpretation {
    let command = msg.command();
    let name = msg.command_name();

    // A broadcast cleanup report names the original command in the first
    // destination byte.
    if command == Some(DeviceCommand::BroadcastCleanup) {
        let implied = on_off(DeviceCommand::resolve(msg.to.bytes()[0], 0x00));
        if implied.is_some() && implied == known_on {
            return Interpretation::Suppress;
        }
        return Interpretation::Log(name.to_string());
    }

    let onoff = on_off(command);

    if msg.flags.is_cleanup() && onoff.is_some() && onoff == known_on {
        return Interpretation::Suppress;
    }

    let rule = msg.to.group().and_then(|group| {
        rules
            .iter()
            .find(|r| r.suffix == group && capabilities.contains(&r.capability))
    });

    if capabilities.contains(&Capability::MotionSensor) {
        let Some(on) = onoff else {
            return Interpretation::Log(name.to_string());
        };
        return match (msg.to.is_group(), rule) {
            (true, Some(rule)) => suffix_delta(rule.meaning, on),
            (true, None) => Interpretation::Log(format!("{name} to {}", msg.to)),
            (false, _) => apply(
                StateDelta {
                    motion: Some(on),
                    ..Default::default()
                },
                if on { "motion detected" } else { "motion cleared" },
            ),
        };
    }

    if capabilities.contains(&Capability::OpenClose) {
        let Some(on) = onoff else {
            return Interpretation::Log(name.to_string());
        };
        return match (msg.to.is_group(), rule) {
            (true, Some(rule)) => suffix_delta(rule.meaning, on),
            (true, None) => Interpretation::Log(format!("{name} to {}", msg.to)),
            (false, _) => apply(StateDelta::on(on), if on { "opened" } else { "closed" }),
        };
    }

    match onoff {
        Some(on) => apply(StateDelta::on(on), name),
        None => Interpretation::Log(name.to_string()),
    }
}

fn suffix_delta(meaning: SuffixMeaning, on: bool) -> Interpretation {
    match meaning {
        SuffixMeaning::DuskDawn => apply(
            StateDelta {
                dark: Some(on),
                ..Default::default()
            },
            if on { "dark" } else { "light" },
        ),
        SuffixMeaning::LowBattery => apply(
            StateDelta {
                low_battery: Some(on),
                ..Default::default()
            },
            if on { "low battery" } else { "battery ok" },
        ),
    }
}

// ---------------------------------------------------------------------------
// Dispatcher task
// ---------------------------------------------------------------------------

pub(crate) struct Dispatcher {
    pub devices: Arc<dyn DeviceDirectory>,
    pub submitter: Submitter,
    pub event_tx: broadcast::Sender<PlmEvent>,
    pub staged: StagedSlot,
    pub rules: Vec<SuffixRule>,
    pub policy: RetryPolicy,
    pub stall_limit: Duration,
}

pub(crate) fn spawn_dispatcher(
    dispatcher: Dispatcher,
    rx: mpsc::UnboundedReceiver<DispatchItem>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(dispatch_loop(dispatcher, rx, cancel))
}

async fn dispatch_loop(
    dispatcher: Dispatcher,
    mut rx: mpsc::UnboundedReceiver<DispatchItem>,
    cancel: CancellationToken,
) {
    debug!("dispatcher started");
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let label = item.label();
        if tokio::time::timeout(dispatcher.stall_limit, dispatcher.handle(item))
            .await
            .is_err()
        {
            warn!(item = %label, limit = ?dispatcher.stall_limit, "dispatch step stalled, skipped");
        }
    }
    debug!("dispatcher stopped");
}

impl DispatchItem {
    fn label(&self) -> String {
        match self {
            DispatchItem::Message(msg) => msg.command.to_string(),
            DispatchItem::LinkCompleted { completion, .. } => {
                format!("link completion from {}", completion.address)
            }
        }
    }
}

impl Dispatcher {
    pub(crate) async fn handle(&self, item: DispatchItem) {
        match item {
            DispatchItem::LinkCompleted {
                completion,
                auto_add,
            } => {
                if let Err(e) = linking::handle_completion(
                    self.devices.as_ref(),
                    &self.event_tx,
                    &self.staged,
                    completion,
                    auto_add,
                )
                .await
                {
                    warn!(address = %completion.address, error = %e, "link completion not applied");
                }
            }
            DispatchItem::Message(msg) => self.handle_message(msg).await,
        }
    }

    async fn handle_message(&self, msg: Message) {
        match &msg.body {
            MessageBody::Standard(report) => self.device_report(report).await,
            MessageBody::Undecoded(raw) => {
                warn!(command = %msg.command, bytes = ?raw, "no decoder, message dropped");
            }
            MessageBody::CleanupFailure { group, address } => {
                warn!(group, address = %address, "all-link cleanup failed");
            }
            MessageBody::ButtonEvent(_) | MessageBody::UserReset => {
                info!(message = %msg, "modem event");
            }
            _ => debug!(message = %msg, "unsolicited modem message"),
        }
    }

    async fn device_report(&self, report: &StandardMessage) {
        let Some(device) = self.devices.get_by_address(&report.from).await else {
            warn!(address = %report.from, command = report.command_name(), "message from unknown device dropped");
            let _ = self.event_tx.send(PlmEvent::UnknownDevice {
                address: report.from,
                command: report.command_name(),
            });
            return;
        };

        if report.command() == Some(DeviceCommand::LightStopManualChange) {
            self.log(device.as_ref(), report.command_name()).await;
            self.refresh_status(device.as_ref()).await;
            return;
        }

        match interpret(report, &device.capabilities(), device.is_on(), &self.rules) {
            Interpretation::Apply { delta, description } => {
                self.apply(device.as_ref(), delta, description).await;
            }
            Interpretation::Log(description) => self.log(device.as_ref(), &description).await,
            Interpretation::Suppress => {
                debug!(address = %report.from, command = report.command_name(), "redundant cleanup suppressed");
            }
        }
    }

    /// Ask the device for its level after a manual dim/brighten.
    async fn refresh_status(&self, device: &dyn Device) {
        let address = device.address();
        let result = match Action::LightStatus.request(address) {
            Ok(req) => execute(&self.submitter, &req, self.policy).await,
            Err(e) => Err(e),
        };
        match result.and_then(|reply| status_delta(&reply)) {
            Ok(delta) => self.apply(device, delta, "status after manual change".to_string()).await,
            Err(e) => warn!(address = %address, error = %e, "status refresh failed"),
        }
    }

    async fn apply(&self, device: &dyn Device, delta: StateDelta, description: String) {
        let address = device.address();
        if let Err(e) = device.set_state(delta.clone(), &description).await {
            warn!(address = %address, error = %e, "set_state failed");
            return;
        }
        debug!(address = %address, %description, "device state updated");
        let _ = self.event_tx.send(PlmEvent::StateChanged {
            address,
            delta,
            description,
        });
    }

    async fn log(&self, device: &dyn Device, description: &str) {
        if let Err(e) = device.log_entry(description).await {
            warn!(address = %device.address(), error = %e, "log_entry failed");
        }
    }
}
