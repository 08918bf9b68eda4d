//! Device action catalog and caller-level retry.
//!
//! An [`Action`] is a named, parameterized operation on one device. It
//! compiles to a [`CommandRequest`]: the modem command to send, its
//! arguments, and the responses to wait for. [`ModemAction`] does the same
//! for commands addressed to the modem itself.
//!
//! Retries happen here rather than in the queue: [`execute`] resubmits a
//! request after a fixed delay until it succeeds, fails with a
//! non-retryable error, or runs out of attempts.

use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use insteon_core::address::Address;
use insteon_core::device::{LinkMode, StateDelta};
use insteon_core::error::{Error, Result};

use crate::codec::CommandArgs;
use crate::commands::{CommandName, DeviceCommand};
use crate::database::{self, DatabaseRecord};
use crate::expect::Expected;
use crate::io::Submitter;
use crate::message::{Message, MessageBody, StandardMessage, USER_DATA_LEN};

/// cmd1 of the extended get/set command.
const EXTENDED_GET_SET: u8 = 0x2E;
/// cmd1 of READ_WRITE_ALL_LINK_DATABASE.
const READ_WRITE_DATABASE: u8 = 0x2F;
/// cmd2 of GET_OPERATING_FLAGS that returns the database delta.
const DATABASE_DELTA: u8 = 0x01;

/// A modem command ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: CommandName,
    pub args: CommandArgs,
    pub expects: Vec<Expected>,
}

impl CommandRequest {
    /// A command that expects only the modem's echo of itself.
    pub fn echoed(command: CommandName, args: CommandArgs) -> Self {
        CommandRequest {
            command,
            args,
            expects: vec![Expected::modem(command)],
        }
    }

    /// SEND_INSTEON_STANDARD to `to`, expecting the echo.
    pub fn standard(to: Address, cmd1: u8, cmd2: u8) -> Self {
        Self::echoed(
            CommandName::SendStandard,
            CommandArgs::Standard {
                to,
                flags: None,
                cmd1,
                cmd2,
            },
        )
    }

    /// SEND_INSTEON_EXTENDED to `to`, expecting the echo. The codec
    /// writes the checksum into the last byte of `data`.
    pub fn extended(to: Address, cmd1: u8, cmd2: u8, data: [u8; USER_DATA_LEN]) -> Self {
        Self::echoed(
            CommandName::SendExtended,
            CommandArgs::Extended {
                to,
                flags: None,
                cmd1,
                cmd2,
                data,
            },
        )
    }

    /// Also wait for `response` from the target device.
    pub fn and_device(mut self, response: CommandName) -> Self {
        self.expects.push(Expected::device(response));
        self
    }

    /// Also wait for `response` from the modem.
    pub fn and_modem(mut self, response: CommandName) -> Self {
        self.expects.push(Expected::modem(response));
        self
    }

    /// The target device, for device commands.
    pub fn target(&self) -> Option<Address> {
        self.args.target()
    }
}

/// Thermostat operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermostatMode {
    Heat,
    Cool,
    Auto,
    Off,
}

impl ThermostatMode {
    fn cmd2(self) -> u8 {
        match self {
            ThermostatMode::Heat => 0x04,
            ThermostatMode::Cool => 0x05,
            ThermostatMode::Auto => 0x06,
            ThermostatMode::Off => 0x09,
        }
    }
}

impl std::str::FromStr for ThermostatMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "heat" => Ok(ThermostatMode::Heat),
            "cool" => Ok(ThermostatMode::Cool),
            "auto" => Ok(ThermostatMode::Auto),
            "off" => Ok(ThermostatMode::Off),
            other => Err(Error::InvalidParameter(format!("unknown thermostat mode {other:?}"))),
        }
    }
}

/// A high-level action on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    LightOn,
    LightOnFast,
    LightOff,
    LightOffFast,
    /// Brightness in percent.
    Level(u8),
    /// Brightness and ramp rate, both in percent.
    LevelRate { level: u8, rate: u8 },
    Brighten,
    Dim,
    StartBrighten,
    StartDim,
    StopChange,
    LightStatus,
    SensorStatus,
    Ping,
    IdRequest,
    ProductData,
    ThermostatUp,
    ThermostatDown,
    Temperature,
    Thermostat(ThermostatMode),
    FanOn,
    FanAuto,
    /// Setpoint in °F.
    SetCool(u8),
    SetHeat(u8),
    DirectStartLinking,
    DirectStartUnlinking,
    AddToGroup(u8),
    RemoveFromGroup(u8),
    Beep,
    /// Number of set-button taps to simulate.
    SetButtonTap(u8),
    Lock,
    Unlock,
    /// Extended ENTER_LINKING_MODE for a button group, as i2cs devices
    /// require.
    EnterLinking(u8),
    EnterUnlinking(u8),
    ExitLinking,
    DatabaseDelta,
    /// Extended data of one button group.
    ExtendedData(u8),
    /// `d1..d13` written as given.
    SetExtendedData([u8; 13]),
    /// Heartbeat interval, in device units.
    HeartbeatInterval(u8),
    LowBatteryLevel(u8),
    ReadRecord(u16),
    WriteRecord(DatabaseRecord),
}

fn percent(value: u8, what: &str) -> Result<u8> {
    if value > 100 {
        return Err(Error::InvalidParameter(format!("{what} must be 0-100, got {value}")));
    }
    Ok(value)
}

/// Scale a percentage onto `0..=max`, rounding to nearest.
fn scale(pct: u8, max: u32) -> u8 {
    ((max * pct as u32 + 50) / 100) as u8
}

fn setpoint(degrees: u8) -> Result<u8> {
    degrees
        .checked_mul(2)
        .ok_or_else(|| Error::InvalidParameter(format!("setpoint {degrees}°F out of range")))
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::LightOn => "LIGHT_ON",
            Action::LightOnFast => "LIGHT_ON_FAST",
            Action::LightOff => "LIGHT_OFF",
            Action::LightOffFast => "LIGHT_OFF_FAST",
            Action::Level(_) => "LIGHT_LEVEL",
            Action::LevelRate { .. } => "LIGHT_LEVEL_RATE",
            Action::Brighten => "LIGHT_BRIGHTEN",
            Action::Dim => "LIGHT_DIM",
            Action::StartBrighten => "START_BRIGHTEN",
            Action::StartDim => "START_DIM",
            Action::StopChange => "STOP_CHANGE",
            Action::LightStatus => "LIGHT_STATUS",
            Action::SensorStatus => "SENSOR_STATUS",
            Action::Ping => "PING",
            Action::IdRequest => "ID_REQUEST",
            Action::ProductData => "PRODUCT_DATA_REQUEST",
            Action::ThermostatUp => "THERMOSTAT_UP",
            Action::ThermostatDown => "THERMOSTAT_DOWN",
            Action::Temperature => "THERMOSTAT_TEMPERATURE",
            Action::Thermostat(ThermostatMode::Heat) => "THERMOSTAT_HEAT_ON",
            Action::Thermostat(ThermostatMode::Cool) => "THERMOSTAT_COOL_ON",
            Action::Thermostat(ThermostatMode::Auto) => "THERMOSTAT_AUTO",
            Action::Thermostat(ThermostatMode::Off) => "THERMOSTAT_ALL_OFF",
            Action::FanOn => "THERMOSTAT_FAN_ON",
            Action::FanAuto => "THERMOSTAT_FAN_AUTO",
            Action::SetCool(_) => "THERMOSTAT_SET_COOL",
            Action::SetHeat(_) => "THERMOSTAT_SET_HEAT",
            Action::DirectStartLinking => "DIRECT_START_LINKING",
            Action::DirectStartUnlinking => "DIRECT_START_UNLINKING",
            Action::AddToGroup(_) => "DIRECT_ADD_TO_GROUP",
            Action::RemoveFromGroup(_) => "DIRECT_REMOVE_FROM_GROUP",
            Action::Beep => "BEEP",
            Action::SetButtonTap(_) => "SET_BUTTON_TAP",
            Action::Lock => "LOCK",
            Action::Unlock => "UNLOCK",
            Action::EnterLinking(_) => "ENTER_LINKING_MODE",
            Action::EnterUnlinking(_) => "ENTER_UNLINKING_MODE",
            Action::ExitLinking => "EXIT_LINKING_MODE",
            Action::DatabaseDelta => "GET_ALL_LINK_DATABASE_DELTA",
            Action::ExtendedData(_) => "GET_EXTENDED_DATA",
            Action::SetExtendedData(_) => "SET_EXTENDED_DATA",
            Action::HeartbeatInterval(_) => "SET_HEARTBEAT_INTERVAL",
            Action::LowBatteryLevel(_) => "SET_LOW_BATTERY_LEVEL",
            Action::ReadRecord(_) => "READ_ALL_LINK_DATABASE",
            Action::WriteRecord(_) => "WRITE_ALL_LINK_DATABASE",
        }
    }

    /// The `(cmd1, cmd2)` pair this action sends.
    pub fn command_bytes(&self) -> Result<(u8, u8)> {
        let bytes = match *self {
            Action::LightOn => (DeviceCommand::LightOn.cmd1(), 0xFF),
            Action::LightOnFast => (DeviceCommand::LightOnFast.cmd1(), 0x01),
            Action::LightOff => (DeviceCommand::LightOff.cmd1(), 0x01),
            Action::LightOffFast => (DeviceCommand::LightOffFast.cmd1(), 0x01),
            Action::Level(pct) => (DeviceCommand::LightOn.cmd1(), scale(percent(pct, "level")?, 255)),
            Action::LevelRate { level, rate } => {
                let level = scale(percent(level, "level")?, 15);
                let rate = scale(percent(rate, "rate")?, 15);
                (DeviceCommand::LightOnAtRampRate.cmd1(), (level << 4) | rate)
            }
            Action::Brighten => (DeviceCommand::LightBrightenOneStep.cmd1(), 0x01),
            Action::Dim => (DeviceCommand::LightDimOneStep.cmd1(), 0x01),
            Action::StartBrighten => (DeviceCommand::LightStartManualChange.cmd1(), 0x01),
            Action::StartDim => (DeviceCommand::LightStartManualChange.cmd1(), 0x00),
            Action::StopChange => (DeviceCommand::LightStopManualChange.cmd1(), 0x00),
            Action::LightStatus => (DeviceCommand::LightStatusRequest.cmd1(), 0x00),
            Action::SensorStatus => (DeviceCommand::SensorStatusRequest.cmd1(), 0x00),
            Action::Ping => (DeviceCommand::Ping.cmd1(), 0x00),
            Action::IdRequest => (DeviceCommand::IdRequest.cmd1(), 0x00),
            Action::ProductData => (DeviceCommand::ProductDataRequest.cmd1(), 0x00),
            Action::ThermostatUp => (DeviceCommand::ThermostatTempUp.cmd1(), 0x01),
            Action::ThermostatDown => (DeviceCommand::ThermostatTempDown.cmd1(), 0x01),
            Action::Temperature => (DeviceCommand::ThermostatGetZoneInfo.cmd1(), 0x00),
            Action::Thermostat(mode) => (DeviceCommand::ThermostatControl.cmd1(), mode.cmd2()),
            Action::FanOn => (DeviceCommand::ThermostatControl.cmd1(), 0x07),
            Action::FanAuto => (DeviceCommand::ThermostatControl.cmd1(), 0x08),
            Action::SetCool(t) => (DeviceCommand::ThermostatSetCoolSetpoint.cmd1(), setpoint(t)?),
            Action::SetHeat(t) => (DeviceCommand::ThermostatSetHeatSetpoint.cmd1(), setpoint(t)?),
            Action::DirectStartLinking => (DeviceCommand::EnterLinkingMode.cmd1(), 0x00),
            Action::DirectStartUnlinking => (DeviceCommand::EnterUnlinkingMode.cmd1(), 0x00),
            Action::AddToGroup(group) => (DeviceCommand::AssignToAllLinkGroup.cmd1(), group),
            Action::RemoveFromGroup(group) => (DeviceCommand::DeleteFromAllLinkGroup.cmd1(), group),
            Action::Beep => (DeviceCommand::Beep.cmd1(), 0x00),
            Action::SetButtonTap(taps) => (DeviceCommand::SetButtonTap.cmd1(), taps),
            Action::Lock => (DeviceCommand::LightOn.cmd1(), 0xFF),
            Action::Unlock => (DeviceCommand::LightOn.cmd1(), 0x00),
            Action::EnterLinking(button) => (DeviceCommand::EnterLinkingMode.cmd1(), button),
            Action::EnterUnlinking(button) => (DeviceCommand::EnterUnlinkingMode.cmd1(), button),
            Action::ExitLinking => (DeviceCommand::ExitLinkingMode.cmd1(), 0x00),
            Action::DatabaseDelta => (DeviceCommand::GetOperatingFlags.cmd1(), DATABASE_DELTA),
            Action::ExtendedData(_)
            | Action::SetExtendedData(_)
            | Action::HeartbeatInterval(_)
            | Action::LowBatteryLevel(_) => (EXTENDED_GET_SET, 0x00),
            Action::ReadRecord(_) | Action::WriteRecord(_) => (READ_WRITE_DATABASE, 0x00),
        };
        Ok(bytes)
    }

    /// User data for actions sent as extended messages.
    pub fn user_data(&self) -> Option<[u8; USER_DATA_LEN]> {
        let mut data = [0u8; USER_DATA_LEN];
        match *self {
            Action::EnterLinking(_) => {}
            Action::ExtendedData(group) => data[0] = group,
            Action::SetExtendedData(values) => data[..values.len()].copy_from_slice(&values),
            Action::HeartbeatInterval(interval) => {
                data[1] = 0x02;
                data[2] = interval;
            }
            Action::LowBatteryLevel(level) => {
                data[1] = 0x03;
                data[2] = level;
            }
            Action::ReadRecord(offset) => data = database::read_data(offset),
            Action::WriteRecord(record) => data = record.write_data(),
            _ => return None,
        }
        Some(data)
    }

    /// Build the request for this action against device `to`.
    pub fn request(&self, to: Address) -> Result<CommandRequest> {
        let (cmd1, cmd2) = self.command_bytes()?;
        let req = match self.user_data() {
            Some(data) => CommandRequest::extended(to, cmd1, cmd2, data),
            None => CommandRequest::standard(to, cmd1, cmd2),
        };
        Ok(match self {
            Action::LightStatus
            | Action::SensorStatus
            | Action::Temperature
            | Action::Beep
            | Action::SetButtonTap(_)
            | Action::EnterLinking(_)
            | Action::EnterUnlinking(_)
            | Action::ExitLinking
            | Action::DatabaseDelta
            | Action::SetExtendedData(_)
            | Action::HeartbeatInterval(_)
            | Action::LowBatteryLevel(_)
            | Action::WriteRecord(_) => req.and_device(CommandName::StandardMessageReceived),
            Action::ProductData | Action::ExtendedData(_) | Action::ReadRecord(_) => req
                .and_device(CommandName::StandardMessageReceived)
                .and_device(CommandName::ExtendedMessageReceived),
            _ => req,
        })
    }

    /// State implied by a successful send, if any.
    pub fn implied_state(&self) -> Option<StateDelta> {
        match *self {
            Action::LightOn | Action::LightOnFast => Some(StateDelta {
                on: Some(true),
                level: Some(100),
                ..Default::default()
            }),
            Action::LightOff | Action::LightOffFast => Some(StateDelta {
                on: Some(false),
                level: Some(0),
                ..Default::default()
            }),
            Action::Level(pct) | Action::LevelRate { level: pct, .. } => Some(StateDelta {
                on: Some(pct > 0),
                level: Some(pct.min(100)),
                ..Default::default()
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command addressed to the modem itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemAction {
    GetImInfo,
    GetImConfiguration,
    SetImConfiguration(u8),
    LedOn,
    LedOff,
    Reset,
    StartAllLinking { mode: LinkMode, group: u8 },
    CancelAllLinking,
    GetFirstAllLinkRecord,
    GetNextAllLinkRecord,
    SendAllLinkCommand { group: u8, cmd1: u8, cmd2: u8 },
}

impl ModemAction {
    pub fn request(&self) -> CommandRequest {
        match *self {
            ModemAction::GetImInfo => CommandRequest::echoed(CommandName::GetImInfo, CommandArgs::None),
            ModemAction::GetImConfiguration => {
                CommandRequest::echoed(CommandName::GetImConfiguration, CommandArgs::None)
            }
            ModemAction::SetImConfiguration(flags) => {
                CommandRequest::echoed(CommandName::SetImConfiguration, CommandArgs::Raw(vec![flags]))
            }
            ModemAction::LedOn => CommandRequest::echoed(CommandName::LedOn, CommandArgs::None),
            ModemAction::LedOff => CommandRequest::echoed(CommandName::LedOff, CommandArgs::None),
            ModemAction::Reset => CommandRequest::echoed(CommandName::ResetTheIm, CommandArgs::None),
            ModemAction::StartAllLinking { mode, group } => CommandRequest::echoed(
                CommandName::StartAllLinking,
                CommandArgs::StartLinking { mode, group },
            ),
            ModemAction::CancelAllLinking => {
                CommandRequest::echoed(CommandName::CancelAllLinking, CommandArgs::None)
            }
            ModemAction::GetFirstAllLinkRecord => {
                CommandRequest::echoed(CommandName::GetFirstAllLinkRecord, CommandArgs::None)
                    .and_modem(CommandName::AllLinkRecordResponse)
            }
            ModemAction::GetNextAllLinkRecord => {
                CommandRequest::echoed(CommandName::GetNextAllLinkRecord, CommandArgs::None)
                    .and_modem(CommandName::AllLinkRecordResponse)
            }
            ModemAction::SendAllLinkCommand { group, cmd1, cmd2 } => CommandRequest::echoed(
                CommandName::SendAllLinkCommand,
                CommandArgs::AllLinkCommand { group, cmd1, cmd2 },
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// How many times to attempt a request, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// A single attempt.
    pub const ONCE: RetryPolicy = RetryPolicy {
        attempts: 1,
        delay: Duration::ZERO,
    };
}

/// A successful request: the matched responses in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub messages: Vec<Message>,
    pub attempts: u32,
}

impl Reply {
    /// The first response of type `command`.
    pub fn find(&self, command: CommandName) -> Option<&Message> {
        self.messages.iter().find(|m| m.command == command)
    }
}

/// Submit `req`, retrying retryable failures according to `policy`.
pub async fn execute(io: &Submitter, req: &CommandRequest, policy: RetryPolicy) -> Result<Reply> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match io.submit(req.clone()).await {
            Ok(messages) => {
                return Ok(Reply {
                    messages,
                    attempts: attempt,
                });
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= attempts => {
                warn!(command = %req.command, attempts = attempt, error = %e, "giving up");
                return Err(Error::MaxRetriesExceeded {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                debug!(command = %req.command, attempt, error = %e, "attempt failed, retrying");
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn device_reply(reply: &Reply) -> Result<(u8, u8)> {
    match reply.find(CommandName::StandardMessageReceived).map(|m| &m.body) {
        Some(MessageBody::Standard(m)) => Ok((m.cmd1, m.cmd2)),
        _ => Err(Error::Parse("no device reply in response".into())),
    }
}

/// Brightness in percent from a status reply: `round(cmd2 / 255 * 100)`.
pub fn status_level(reply: &Reply) -> Result<u8> {
    let (_, cmd2) = device_reply(reply)?;
    Ok(((cmd2 as u32 * 100 + 127) / 255) as u8)
}

/// `_on` and `_level` from a status reply.
pub fn status_delta(reply: &Reply) -> Result<StateDelta> {
    let level = status_level(reply)?;
    Ok(StateDelta {
        on: Some(level > 0),
        level: Some(level),
        ..Default::default()
    })
}

/// Current temperature in °F from a THERMOSTAT_TEMPERATURE reply.
pub fn temperature(reply: &Reply) -> Result<u8> {
    let (_, cmd2) = device_reply(reply)?;
    Ok(cmd2 / 2)
}

/// The database delta from a GET_ALL_LINK_DATABASE_DELTA acknowledgement.
pub fn database_delta(reply: &Reply) -> Result<u8> {
    let (_, cmd2) = device_reply(reply)?;
    Ok(cmd2)
}

/// The device's extended reply.
pub fn extended_reply(reply: &Reply) -> Result<&StandardMessage> {
    match reply.find(CommandName::ExtendedMessageReceived).map(|m| &m.body) {
        Some(MessageBody::Standard(m)) if m.data.is_some() => Ok(m),
        _ => Err(Error::Parse("no extended reply in response".into())),
    }
}
