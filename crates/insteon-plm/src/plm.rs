//! Plm -- a running engine bound to one modem.
//!
//! A `Plm` owns three tasks: the IO task (transport, queue, expectations,
//! link session), the dispatcher (unsolicited messages and link
//! completions), and optionally the status poller. Dropping it cancels all
//! three.
//!
//! Construct one with [`PlmBuilder`](crate::builder::PlmBuilder).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use insteon_core::address::Address;
use insteon_core::device::{Device, DeviceDescriptor, DeviceDirectory, LinkMode, StateDelta};
use insteon_core::error::{Error, Result};
use insteon_core::events::{LinkEnd, PlmEvent};
use insteon_core::transport::Transport;

use crate::actions::{
    self, Action, CommandRequest, ModemAction, Reply, RetryPolicy, ThermostatMode, execute,
};
use crate::commands::CommandName;
use crate::config::PlmConfig;
use crate::database::{self, DatabaseRecord, DeviceDatabase, LinkSpec};
use crate::dispatch::{Dispatcher, spawn_dispatcher};
use crate::io::{EngineStats, IoConfig, LINK_WINDOW, PlmIo, Submitter, spawn_io_task};
use crate::linking::{StagedSlot, lock_staged};
use crate::message::{ImConfiguration, ImInfo, LinkRecord, MessageBody, USER_DATA_LEN};
use crate::poller::{PollerConfig, spawn_poller};

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Upper bound on link-database iteration. The largest modems hold 2016
/// records.
const MAX_LINK_RECORDS: usize = 2048;

/// Group used when opening a link session from the engine.
const DEFAULT_LINK_GROUP: u8 = 0x01;

/// Pause between consecutive beeps.
const BEEP_GAP: Duration = Duration::from_millis(500);

/// Attempts per record when reading a device database.
const RECORD_ATTEMPTS: u32 = 3;

/// How long a scene member has to complete its link.
pub const SCENE_LINK_WINDOW: Duration = Duration::from_secs(10);

/// Identity reported in a device's PRODUCT_DATA_RESPONSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductData {
    pub product_key: [u8; 3],
    pub category: u8,
    pub subcategory: u8,
}

/// Settings of one button group, from an extended data reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedData {
    pub group: u8,
    pub ramp_rate: u8,
    pub on_level: u8,
    /// The raw user data, `d1..d14`.
    pub data: [u8; USER_DATA_LEN],
}

/// A running engine.
pub struct Plm {
    io: PlmIo,
    dispatcher: JoinHandle<()>,
    poller: Option<JoinHandle<()>>,
    event_tx: broadcast::Sender<PlmEvent>,
    devices: Arc<dyn DeviceDirectory>,
    staged: StagedSlot,
    policy: RetryPolicy,
}

impl Drop for Plm {
    fn drop(&mut self) {
        // The token is shared by all three tasks.
        self.io.cancel.cancel();
        self.io.task.abort();
        self.dispatcher.abort();
        if let Some(poller) = &self.poller {
            poller.abort();
        }
    }
}

fn no_record(address: Address, offset: u16) -> Error {
    Error::InvalidParameter(format!("no record at {offset:04X} in the database of {address}"))
}

impl Plm {
    /// Spawn the engine tasks over `transport`.
    ///
    /// Called by [`PlmBuilder`](crate::builder::PlmBuilder).
    pub(crate) fn start(
        transport: Box<dyn Transport>,
        devices: Arc<dyn DeviceDirectory>,
        config: &PlmConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let io = spawn_io_task(
            transport,
            IoConfig {
                timeout: config.timeout(),
                queue_timeout: config.queue_timeout(),
                queue_interval: config.queue_interval(),
                link_window: LINK_WINDOW,
            },
            event_tx.clone(),
            dispatch_tx,
            cancel.clone(),
        );

        let staged = StagedSlot::default();
        let policy = config.retry_policy();

        let dispatcher = spawn_dispatcher(
            Dispatcher {
                devices: Arc::clone(&devices),
                submitter: io.submitter.clone(),
                event_tx: event_tx.clone(),
                staged: Arc::clone(&staged),
                rules: config.suffix_rules.clone(),
                policy,
                stall_limit: config.dispatch_stall_limit(),
            },
            dispatch_rx,
            cancel.clone(),
        );

        let poller = config.poller_enabled.then(|| {
            spawn_poller(
                Arc::clone(&devices),
                io.submitter.clone(),
                event_tx.clone(),
                PollerConfig {
                    delay: config.poller_delay(),
                    device_gap: config.poller_device_gap(),
                    policy,
                },
                cancel.clone(),
            )
        });

        info!(
            timeout = ?config.timeout(),
            retries = policy.attempts,
            poller = config.poller_enabled,
            "engine started"
        );

        Plm {
            io,
            dispatcher,
            poller,
            event_tx,
            devices,
            staged,
            policy,
        }
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<PlmEvent> {
        self.event_tx.subscribe()
    }

    /// A cloneable handle for submitting raw requests.
    pub fn submitter(&self) -> Submitter {
        self.io.submitter.clone()
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        self.io.submitter.stats().await
    }

    // -- Requests ----------------------------------------------------------

    /// Submit `req` under the configured retry policy.
    pub async fn send(&self, req: &CommandRequest) -> Result<Reply> {
        execute(&self.io.submitter, req, self.policy).await
    }

    /// Perform `action` on the device at `address`.
    ///
    /// On success, the state the action implies (on, off, a level) is
    /// reported to the device if the directory knows it.
    pub async fn perform(&self, address: Address, action: Action) -> Result<Reply> {
        let req = action.request(address)?;
        let reply = self.send(&req).await?;
        if let Some(delta) = action.implied_state() {
            self.report(address, delta, action.as_str()).await;
        }
        Ok(reply)
    }

    async fn report(&self, address: Address, delta: StateDelta, description: &str) {
        let Some(device) = self.devices.get_by_address(&address).await else {
            return;
        };
        if let Err(e) = device.set_state(delta.clone(), description).await {
            warn!(address = %address, error = %e, "set_state failed");
            return;
        }
        let _ = self.event_tx.send(PlmEvent::StateChanged {
            address,
            delta,
            description: description.to_string(),
        });
    }

    // -- Lighting ----------------------------------------------------------

    pub async fn turn_on(&self, address: Address) -> Result<()> {
        self.perform(address, Action::LightOn).await.map(|_| ())
    }

    pub async fn turn_off(&self, address: Address) -> Result<()> {
        self.perform(address, Action::LightOff).await.map(|_| ())
    }

    /// Set brightness in percent.
    pub async fn set_level(&self, address: Address, percent: u8) -> Result<()> {
        self.perform(address, Action::Level(percent)).await.map(|_| ())
    }

    /// Ask the device for its brightness in percent.
    pub async fn level(&self, address: Address) -> Result<u8> {
        let reply = self.perform(address, Action::LightStatus).await?;
        let delta = actions::status_delta(&reply)?;
        let level = delta.level.unwrap_or_default();
        self.report(address, delta, "status").await;
        Ok(level)
    }

    /// Send an all-link group command from the modem.
    pub async fn group_command(&self, group: u8, on: bool) -> Result<()> {
        let (cmd1, cmd2) = if on {
            Action::LightOn.command_bytes()?
        } else {
            Action::LightOff.command_bytes()?
        };
        let req = ModemAction::SendAllLinkCommand { group, cmd1, cmd2 }.request();
        self.send(&req).await.map(|_| ())
    }

    // -- Thermostat --------------------------------------------------------

    pub async fn thermostat_mode(&self, address: Address, mode: ThermostatMode) -> Result<()> {
        self.perform(address, Action::Thermostat(mode)).await.map(|_| ())
    }

    /// Set the heat or cool setpoint in °F. Other modes are rejected.
    pub async fn thermostat_setpoint(&self, address: Address, mode: ThermostatMode, degrees: u8) -> Result<()> {
        let action = match mode {
            ThermostatMode::Heat => Action::SetHeat(degrees),
            ThermostatMode::Cool => Action::SetCool(degrees),
            other => {
                return Err(Error::InvalidParameter(format!(
                    "{other:?} has no setpoint"
                )));
            }
        };
        self.perform(address, action).await.map(|_| ())
    }

    /// Current temperature in °F.
    pub async fn temperature(&self, address: Address) -> Result<u8> {
        let reply = self.perform(address, Action::Temperature).await?;
        actions::temperature(&reply)
    }

    // -- Device info -------------------------------------------------------

    pub async fn product_data(&self, address: Address) -> Result<ProductData> {
        let reply = self.perform(address, Action::ProductData).await?;
        match reply.find(CommandName::ExtendedMessageReceived).map(|m| &m.body) {
            Some(MessageBody::Standard(m)) => {
                let data = m
                    .data
                    .ok_or_else(|| Error::Parse("product data reply has no user data".into()))?;
                Ok(ProductData {
                    product_key: [data[1], data[2], data[3]],
                    category: data[4],
                    subcategory: data[5],
                })
            }
            _ => Err(Error::Parse("no product data in response".into())),
        }
    }

    // -- Device settings ---------------------------------------------------

    /// Beep `count` times. Fails only if no beep was acknowledged.
    pub async fn beep(&self, address: Address, count: u32) -> Result<()> {
        let mut heard = false;
        let mut last = None;
        for i in 0..count.max(1) {
            if i > 0 {
                tokio::time::sleep(BEEP_GAP).await;
            }
            match self.perform(address, Action::Beep).await {
                Ok(_) => heard = true,
                Err(e) => {
                    debug!(address = %address, error = %e, "beep failed");
                    last = Some(e);
                }
            }
        }
        match last {
            Some(e) if !heard => Err(e),
            _ => Ok(()),
        }
    }

    /// Simulate `taps` presses of the set button.
    pub async fn set_button_tap(&self, address: Address, taps: u8) -> Result<()> {
        self.perform(address, Action::SetButtonTap(taps)).await.map(|_| ())
    }

    pub async fn lock(&self, address: Address) -> Result<()> {
        self.perform(address, Action::Lock).await.map(|_| ())
    }

    pub async fn unlock(&self, address: Address) -> Result<()> {
        self.perform(address, Action::Unlock).await.map(|_| ())
    }

    /// Read the settings of button `group`.
    pub async fn extended_data(&self, address: Address, group: u8) -> Result<ExtendedData> {
        let reply = self.perform(address, Action::ExtendedData(group)).await?;
        let msg = actions::extended_reply(&reply)?;
        let data = msg
            .data
            .ok_or_else(|| Error::Parse("extended data reply has no user data".into()))?;
        Ok(ExtendedData {
            group: data[0],
            ramp_rate: data[6],
            on_level: data[7],
            data,
        })
    }

    /// Write `d1..d13` of the extended get/set command.
    pub async fn set_extended_data(&self, address: Address, values: [u8; 13]) -> Result<()> {
        self.perform(address, Action::SetExtendedData(values)).await.map(|_| ())
    }

    pub async fn set_heartbeat_interval(&self, address: Address, interval: u8) -> Result<()> {
        self.perform(address, Action::HeartbeatInterval(interval)).await.map(|_| ())
    }

    pub async fn set_low_battery_level(&self, address: Address, level: u8) -> Result<()> {
        self.perform(address, Action::LowBatteryLevel(level)).await.map(|_| ())
    }

    // -- Device database ---------------------------------------------------

    async fn known_device(&self, address: Address) -> Result<Arc<dyn Device>> {
        self.devices
            .get_by_address(&address)
            .await
            .ok_or_else(|| Error::UnknownDevice(address.to_string()))
    }

    /// The device's database delta, which changes on every write.
    pub async fn database_delta(&self, address: Address) -> Result<u8> {
        let reply = self.perform(address, Action::DatabaseDelta).await?;
        actions::database_delta(&reply)
    }

    /// Read a device's all-link database, stopping at the record that ends
    /// the table.
    pub async fn load_database(&self, address: Address) -> Result<DeviceDatabase> {
        let device = self.known_device(address).await?;
        let delta = self.database_delta(address).await?;
        let policy = RetryPolicy {
            attempts: RECORD_ATTEMPTS,
            delay: self.policy.delay,
        };

        let mut db = DeviceDatabase {
            delta,
            records: Vec::new(),
        };
        let mut offset = Some(database::FIRST_RECORD);
        while let Some(at) = offset {
            let reply = execute(&self.io.submitter, &Action::ReadRecord(at).request(address)?, policy).await?;
            let record = DatabaseRecord::from_reply(actions::extended_reply(&reply)?)?;
            db.records.push(record);
            if record.is_last() {
                break;
            }
            offset = database::next_offset(at);
        }
        info!(
            address = %address,
            name = %device.name(),
            delta,
            links = db.links().count(),
            "device database loaded"
        );
        Ok(db)
    }

    /// Add a record to the device. Fails if `db` is stale, if the link
    /// already exists, or if the table is full.
    pub async fn create_record(
        &self,
        address: Address,
        db: &mut DeviceDatabase,
        link: LinkSpec,
    ) -> Result<DatabaseRecord> {
        self.known_device(address).await?;
        link.validate()?;
        self.check_delta(address, db).await?;
        if db.find(link.group, link.address, link.controller).is_some() {
            return Err(Error::InvalidParameter(format!(
                "{address} already links {} on group {}",
                link.address, link.group
            )));
        }
        let slot = *db
            .free_slot()
            .ok_or_else(|| Error::InvalidParameter(format!("database of {address} is full")))?;
        let record = self.write_record(address, db, slot.with_link(&link)).await?;

        // Filling the terminating slot moves the end of the table down one.
        if slot.is_last() {
            if let Some(next) = database::next_offset(slot.offset) {
                db.store(DatabaseRecord {
                    offset: next,
                    flags: 0,
                    group: 0,
                    address: Address::new([0, 0, 0]),
                    on_level: 0,
                    ramp_rate: 0,
                    button: 0,
                });
            }
        }
        Ok(record)
    }

    /// Rewrite the record at `offset`.
    pub async fn update_record(
        &self,
        address: Address,
        db: &mut DeviceDatabase,
        offset: u16,
        link: LinkSpec,
    ) -> Result<DatabaseRecord> {
        self.known_device(address).await?;
        link.validate()?;
        self.check_delta(address, db).await?;
        let existing = *db.get(offset).ok_or_else(|| no_record(address, offset))?;
        self.write_record(address, db, existing.with_link(&link)).await
    }

    /// Mark the record at `offset` unused.
    pub async fn delete_record(&self, address: Address, db: &mut DeviceDatabase, offset: u16) -> Result<DatabaseRecord> {
        self.known_device(address).await?;
        self.check_delta(address, db).await?;
        let existing = *db.get(offset).ok_or_else(|| no_record(address, offset))?;
        self.write_record(address, db, existing.deleted()).await
    }

    async fn check_delta(&self, address: Address, db: &DeviceDatabase) -> Result<()> {
        let delta = self.database_delta(address).await?;
        if delta != db.delta {
            warn!(address = %address, loaded = db.delta, current = delta, "device database changed");
            return Err(Error::DatabaseOutOfSync(address.to_string()));
        }
        Ok(())
    }

    /// Write `record` and bring `db` up to date, delta included.
    async fn write_record(
        &self,
        address: Address,
        db: &mut DeviceDatabase,
        record: DatabaseRecord,
    ) -> Result<DatabaseRecord> {
        self.perform(address, Action::WriteRecord(record)).await?;
        db.store(record);
        db.delta = self.database_delta(address).await?;
        debug!(address = %address, offset = record.offset, flags = record.flags, "record written");
        Ok(record)
    }

    // -- Scenes ------------------------------------------------------------

    /// Link `member`'s `button` as a responder to modem group `group`.
    pub async fn add_scene_member(&self, group: u8, member: Address, button: u8) -> Result<()> {
        self.scene_link(group, member, LinkMode::Controller, Action::EnterLinking(button))
            .await
    }

    /// Remove `member`'s `button` from modem group `group`.
    pub async fn delete_scene_member(&self, group: u8, member: Address, button: u8) -> Result<()> {
        self.scene_link(group, member, LinkMode::Deleted, Action::EnterUnlinking(button))
            .await
    }

    /// Change the level and ramp rate `member` uses for modem group `group`.
    pub async fn update_scene_member(
        &self,
        group: u8,
        member: Address,
        on_level: u8,
        ramp_rate: u8,
    ) -> Result<DatabaseRecord> {
        let modem = self.modem_info().await?.address;
        let mut db = self.load_database(member).await?;
        let existing = *db.find(group, modem, false).ok_or_else(|| {
            Error::InvalidParameter(format!("{member} is not a member of group {group}"))
        })?;
        let link = LinkSpec {
            controller: false,
            group,
            address: modem,
            on_level,
            ramp_rate,
            button: existing.button,
        };
        self.update_record(member, &mut db, existing.offset, link).await
    }

    async fn scene_link(&self, group: u8, member: Address, mode: LinkMode, enter: Action) -> Result<()> {
        self.known_device(member).await?;
        let mut events = self.subscribe();
        self.io.submitter.begin_linking(mode, false).await?;

        let result = self.await_scene_link(group, member, mode, enter, &mut events).await;

        // Both sides leave linking mode however the attempt ended.
        let _ = self.io.submitter.end_linking(LinkEnd::Stopped).await;
        if let Err(e) = self.send(&ModemAction::CancelAllLinking.request()).await {
            debug!(error = %e, "cancel all-linking failed");
        }
        if let Err(e) = self.perform(member, Action::ExitLinking).await {
            debug!(address = %member, error = %e, "exit linking mode failed");
        }

        match &result {
            Ok(()) => info!(address = %member, group, ?mode, "scene membership changed"),
            Err(e) => warn!(address = %member, group, ?mode, error = %e, "scene membership change failed"),
        }
        result
    }

    async fn await_scene_link(
        &self,
        group: u8,
        member: Address,
        mode: LinkMode,
        enter: Action,
        events: &mut broadcast::Receiver<PlmEvent>,
    ) -> Result<()> {
        self.send(&ModemAction::StartAllLinking { mode, group }.request()).await?;
        self.perform(member, enter).await?;

        let linked = tokio::time::timeout(SCENE_LINK_WINDOW, async {
            loop {
                match events.recv().await {
                    Ok(PlmEvent::DeviceLinked(d)) if d.address == member => return Ok(()),
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return Err(Error::NotConnected),
                }
            }
        })
        .await;
        linked.unwrap_or(Err(Error::Timeout))
    }

    // -- Modem -------------------------------------------------------------

    pub async fn modem_info(&self) -> Result<ImInfo> {
        let reply = self.send(&ModemAction::GetImInfo.request()).await?;
        match reply.find(CommandName::GetImInfo).map(|m| &m.body) {
            Some(MessageBody::ImInfo(info)) => Ok(*info),
            _ => Err(Error::Parse("no modem info in response".into())),
        }
    }

    pub async fn modem_config(&self) -> Result<ImConfiguration> {
        let reply = self.send(&ModemAction::GetImConfiguration.request()).await?;
        match reply.find(CommandName::GetImConfiguration).map(|m| &m.body) {
            Some(MessageBody::ImConfiguration(config)) => Ok(*config),
            _ => Err(Error::Parse("no modem configuration in response".into())),
        }
    }

    pub async fn set_modem_config(&self, flags: u8) -> Result<()> {
        self.send(&ModemAction::SetImConfiguration(flags).request())
            .await
            .map(|_| ())
    }

    pub async fn led(&self, on: bool) -> Result<()> {
        let action = if on { ModemAction::LedOn } else { ModemAction::LedOff };
        self.send(&action.request()).await.map(|_| ())
    }

    /// Read the modem's all-link database.
    ///
    /// Iterates first/next until the modem answers NAK (no more records)
    /// or a record repeats.
    pub async fn link_records(&self) -> Result<Vec<LinkRecord>> {
        let mut records: Vec<LinkRecord> = Vec::new();
        let mut action = ModemAction::GetFirstAllLinkRecord;
        while records.len() < MAX_LINK_RECORDS {
            let messages = match self.io.submitter.submit(action.request()).await {
                Ok(messages) => messages,
                Err(Error::Nak(_)) => break,
                Err(e) => return Err(e),
            };
            let record = messages.iter().find_map(|m| match &m.body {
                MessageBody::LinkRecord(r) => Some(*r),
                _ => None,
            });
            let Some(record) = record else {
                return Err(Error::Parse("no link record in response".into()));
            };
            if records.contains(&record) {
                debug!(address = %record.address, "link record repeated, stopping");
                break;
            }
            records.push(record);
            action = ModemAction::GetNextAllLinkRecord;
        }
        debug!(count = records.len(), "link database read");
        Ok(records)
    }

    // -- Linking -----------------------------------------------------------

    /// Put the modem into linking mode for up to four minutes.
    ///
    /// A device that completes the link is created when `auto_add` is set,
    /// and staged for [`confirm_staged`](Self::confirm_staged) otherwise.
    pub async fn start_linking(&self, mode: LinkMode, auto_add: bool) -> Result<()> {
        self.io.submitter.begin_linking(mode, auto_add).await?;
        let req = ModemAction::StartAllLinking {
            mode,
            group: DEFAULT_LINK_GROUP,
        }
        .request();
        if let Err(e) = self.send(&req).await {
            let _ = self.io.submitter.end_linking(LinkEnd::Failed).await;
            return Err(e);
        }
        Ok(())
    }

    /// Leave linking mode. The modem is told to cancel whether or not a
    /// session was open, and the outcome of that cancel is not reported.
    pub async fn stop_linking(&self) -> Result<()> {
        self.io.submitter.end_linking(LinkEnd::Stopped).await?;
        if let Err(e) = self.send(&ModemAction::CancelAllLinking.request()).await {
            debug!(error = %e, "cancel all-linking failed");
        }
        Ok(())
    }

    /// The last linked device awaiting confirmation, if any.
    pub fn staged_device(&self) -> Option<DeviceDescriptor> {
        lock_staged(&self.staged).clone()
    }

    /// Create the staged device in the directory.
    pub async fn confirm_staged(&self) -> Result<Option<DeviceDescriptor>> {
        let Some(descriptor) = lock_staged(&self.staged).take() else {
            return Ok(None);
        };
        self.devices.create(descriptor.clone()).await?;
        info!(address = %descriptor.address, "staged device confirmed");
        let _ = self.event_tx.send(PlmEvent::DeviceLinked(descriptor.clone()));
        Ok(Some(descriptor))
    }

    /// Stop the engine and return the transport.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        let transport = self.io.submitter.shutdown().await?;
        info!("engine stopped");
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PlmBuilder;
    use crate::codec;
    use crate::commands::lookup_by_name;
    use insteon_core::device::Capability;
    use insteon_test_harness::{MemoryDevice, MemoryDirectory, MockTransport};

    const LAMP: Address = Address::new([0x11, 0x22, 0x33]);
    const SWITCH: Address = Address::new([0x44, 0x55, 0x66]);
    const LIGHT_ON: [u8; 8] = [0x02, 0x62, 0x11, 0x22, 0x33, 0x0F, 0x11, 0xFF];
    const LIGHT_ON_ACK: [u8; 9] = [0x02, 0x62, 0x11, 0x22, 0x33, 0x0F, 0x11, 0xFF, 0x06];
    const START_LINKING: [u8; 4] = [0x02, 0x64, 0x01, 0x01];
    const START_LINKING_ACK: [u8; 5] = [0x02, 0x64, 0x01, 0x01, 0x06];
    const LINK_COMPLETED: [u8; 10] = [0x02, 0x53, 0x01, 0x01, 0x44, 0x55, 0x66, 0x02, 0x2A, 0x43];
    const MODEM: Address = Address::new([0xAA, 0xBB, 0xCC]);
    const NOWHERE: Address = Address::new([0, 0, 0]);

    fn sent(to: Address, action: Action) -> Vec<u8> {
        let req = action.request(to).unwrap();
        codec::encode(lookup_by_name(req.command), &req.args).unwrap()
    }

    /// Expect `action` and answer with its ACK echo followed by `replies`.
    fn expect_action(mock: &mut MockTransport, to: Address, action: Action, replies: &[&[u8]]) {
        let frame = sent(to, action);
        let mut response = frame.clone();
        response.push(0x06);
        for reply in replies {
            response.extend_from_slice(reply);
        }
        mock.expect(&frame, &response);
    }

    fn direct_ack(from: Address, cmd1: u8, cmd2: u8) -> Vec<u8> {
        let mut bytes = vec![0x02, 0x50];
        bytes.extend_from_slice(&from.bytes());
        bytes.extend_from_slice(&MODEM.bytes());
        bytes.extend_from_slice(&[0x2B, cmd1, cmd2]);
        bytes
    }

    fn extended_from(from: Address, cmd1: u8, data: [u8; USER_DATA_LEN]) -> Vec<u8> {
        let mut bytes = vec![0x02, 0x51];
        bytes.extend_from_slice(&from.bytes());
        bytes.extend_from_slice(&MODEM.bytes());
        bytes.extend_from_slice(&[0x1B, cmd1, 0x00]);
        bytes.extend_from_slice(&data);
        bytes
    }

    fn expect_delta(mock: &mut MockTransport, to: Address, delta: u8) {
        expect_action(mock, to, Action::DatabaseDelta, &[&direct_ack(to, 0x1F, delta)]);
    }

    fn db_record(offset: u16, flags: u8, group: u8, address: Address) -> DatabaseRecord {
        DatabaseRecord {
            offset,
            flags,
            group,
            address,
            on_level: 0xFF,
            ramp_rate: 0x1C,
            button: 0x01,
        }
    }

    fn expect_record(mock: &mut MockTransport, to: Address, record: DatabaseRecord) {
        let [hi, lo] = record.offset.to_be_bytes();
        let [a0, a1, a2] = record.address.bytes();
        let data = [
            0x00, 0x01, hi, lo, 0x00, record.flags, record.group, a0, a1, a2,
            record.on_level, record.ramp_rate, record.button, 0x00,
        ];
        expect_action(
            mock,
            to,
            Action::ReadRecord(record.offset),
            &[&direct_ack(to, 0x2F, 0x00), &extended_from(to, 0x2F, data)],
        );
    }

    fn expect_write(mock: &mut MockTransport, to: Address, record: DatabaseRecord) {
        expect_action(mock, to, Action::WriteRecord(record), &[&direct_ack(to, 0x2F, 0x00)]);
    }

    fn lamp_directory() -> Arc<MemoryDirectory> {
        let devices = Arc::new(MemoryDirectory::new());
        devices.add(MemoryDevice::new("Lamp", LAMP, &[Capability::Light]));
        devices
    }

    fn loaded(delta: u8) -> DeviceDatabase {
        DeviceDatabase {
            delta,
            records: vec![db_record(0x0FFF, 0xE2, 0x01, MODEM), db_record(0x0FF7, 0x00, 0x00, NOWHERE)],
        }
    }

    fn controller_of(address: Address, group: u8) -> LinkSpec {
        LinkSpec {
            controller: true,
            group,
            address,
            on_level: 0xFF,
            ramp_rate: 0x1F,
            button: 0x01,
        }
    }

    async fn build(mock: MockTransport, devices: Arc<MemoryDirectory>) -> Plm {
        PlmBuilder::new()
            .build_with_transport(Box::new(mock), devices)
            .await
            .unwrap()
    }

    async fn next_linked(rx: &mut broadcast::Receiver<PlmEvent>) -> PlmEvent {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match rx.recv().await.unwrap() {
                    e @ (PlmEvent::DeviceLinked(_) | PlmEvent::DeviceStaged(_)) => return e,
                    _ => continue,
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn third_attempt_succeeds() {
        let mut mock = MockTransport::new();
        mock.expect(&LIGHT_ON, &[]);
        mock.expect(&LIGHT_ON, &[]);
        mock.expect(&LIGHT_ON, &LIGHT_ON_ACK);
        let plm = build(mock, Arc::new(MemoryDirectory::new())).await;

        let reply = plm.perform(LAMP, Action::LightOn).await.unwrap();
        assert_eq!(reply.attempts, 3);
        assert_eq!(reply.messages[0].ack(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhausted() {
        let mut mock = MockTransport::new();
        for _ in 0..3 {
            mock.expect(&LIGHT_ON, &[]);
        }
        let plm = build(mock, Arc::new(MemoryDirectory::new())).await;

        let err = plm.turn_on(LAMP).await.unwrap_err();
        match err {
            Error::MaxRetriesExceeded { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, Error::Timeout));
            }
            other => panic!("expected MaxRetriesExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn turn_on_reports_implied_state() {
        let devices = Arc::new(MemoryDirectory::new());
        let lamp = devices.add(MemoryDevice::new("Lamp", LAMP, &[Capability::Light]));
        let mut mock = MockTransport::new();
        mock.expect(&LIGHT_ON, &LIGHT_ON_ACK);
        let plm = build(mock, devices).await;

        plm.turn_on(LAMP).await.unwrap();
        assert_eq!(lamp.is_on(), Some(true));
        assert_eq!(lamp.states()[0].0.level, Some(100));
        assert_eq!(lamp.states()[0].1, "LIGHT_ON");
    }

    #[tokio::test]
    async fn level_reads_status() {
        let mut mock = MockTransport::new();
        let status = [0x02, 0x62, 0x11, 0x22, 0x33, 0x0F, 0x19, 0x00];
        let mut response = status.to_vec();
        response.push(0x06);
        response.extend_from_slice(&[0x02, 0x50, 0x11, 0x22, 0x33, 0xAA, 0xBB, 0xCC, 0x2B, 0x00, 0x40]);
        mock.expect(&status, &response);
        let plm = build(mock, Arc::new(MemoryDirectory::new())).await;

        // round(64 / 255 * 100) = 25
        assert_eq!(plm.level(LAMP).await.unwrap(), 25);
    }

    #[tokio::test]
    async fn setpoint_rejects_non_heat_cool() {
        let plm = build(MockTransport::new(), Arc::new(MemoryDirectory::new())).await;
        let err = plm
            .thermostat_setpoint(LAMP, ThermostatMode::Auto, 70)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn modem_info_decodes() {
        let mut mock = MockTransport::new();
        mock.expect(&[0x02, 0x60], &[0x02, 0x60, 0xAA, 0xBB, 0xCC, 0x03, 0x15, 0x9B, 0x06]);
        let plm = build(mock, Arc::new(MemoryDirectory::new())).await;

        let info = plm.modem_info().await.unwrap();
        assert_eq!(info.address, Address::new([0xAA, 0xBB, 0xCC]));
        assert_eq!(info.category, 0x03);
        assert_eq!(info.subcategory, 0x15);
        assert_eq!(info.firmware, 0x9B);
    }

    #[tokio::test]
    async fn link_records_stop_at_nak() {
        let mut mock = MockTransport::new();
        mock.expect(
            &[0x02, 0x69],
            &[0x02, 0x69, 0x06, 0x02, 0x57, 0xE2, 0x01, 0x11, 0x22, 0x33, 0x01, 0x20, 0x41],
        );
        mock.expect(
            &[0x02, 0x6A],
            &[0x02, 0x6A, 0x06, 0x02, 0x57, 0xA2, 0x01, 0x44, 0x55, 0x66, 0x02, 0x2A, 0x43],
        );
        mock.expect(&[0x02, 0x6A], &[0x02, 0x6A, 0x15]);
        let plm = build(mock, Arc::new(MemoryDirectory::new())).await;

        let records = plm.link_records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].address, LAMP);
        assert!(records[0].is_controller());
        assert_eq!(records[1].address, SWITCH);
        assert!(!records[1].is_controller());
    }

    #[tokio::test]
    async fn link_records_stop_at_repeat() {
        let record = [0x02, 0x57, 0xE2, 0x01, 0x11, 0x22, 0x33, 0x01, 0x20, 0x41];
        let mut mock = MockTransport::new();
        let mut first = vec![0x02, 0x69, 0x06];
        first.extend_from_slice(&record);
        mock.expect(&[0x02, 0x69], &first);
        let mut next = vec![0x02, 0x6A, 0x06];
        next.extend_from_slice(&record);
        mock.expect(&[0x02, 0x6A], &next);
        let plm = build(mock, Arc::new(MemoryDirectory::new())).await;

        assert_eq!(plm.link_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn linking_with_auto_add_creates_device() {
        let devices = Arc::new(MemoryDirectory::new());
        let mut mock = MockTransport::new();
        mock.expect(&START_LINKING, &START_LINKING_ACK);
        let handle = mock.handle();
        let plm = build(mock, Arc::clone(&devices)).await;
        let mut events = plm.subscribe();

        plm.start_linking(LinkMode::Controller, true).await.unwrap();
        assert!(plm.stats().await.unwrap().linking);

        handle.inject(&LINK_COMPLETED);
        let PlmEvent::DeviceLinked(descriptor) = next_linked(&mut events).await else {
            panic!("expected DeviceLinked");
        };
        assert_eq!(descriptor.address, SWITCH);
        assert_eq!(descriptor.name, "New Device");
        assert_eq!(descriptor.capabilities, vec![Capability::Light, Capability::OnOff]);

        let created = devices.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].address, SWITCH);
        assert!(!plm.stats().await.unwrap().linking);
        assert!(plm.staged_device().is_none());
    }

    #[tokio::test]
    async fn linking_without_auto_add_stages_device() {
        let devices = Arc::new(MemoryDirectory::new());
        let mut mock = MockTransport::new();
        mock.expect(&START_LINKING, &START_LINKING_ACK);
        let handle = mock.handle();
        let plm = build(mock, Arc::clone(&devices)).await;
        let mut events = plm.subscribe();

        plm.start_linking(LinkMode::Controller, false).await.unwrap();
        handle.inject(&LINK_COMPLETED);
        assert!(matches!(next_linked(&mut events).await, PlmEvent::DeviceStaged(_)));

        assert!(devices.created().is_empty());
        assert_eq!(plm.staged_device().map(|d| d.address), Some(SWITCH));

        let confirmed = plm.confirm_staged().await.unwrap().unwrap();
        assert_eq!(confirmed.address, SWITCH);
        assert_eq!(devices.created().len(), 1);
        assert!(plm.staged_device().is_none());
    }

    #[tokio::test]
    async fn second_start_linking_is_rejected() {
        let mut mock = MockTransport::new();
        mock.expect(&START_LINKING, &START_LINKING_ACK);
        let plm = build(mock, Arc::new(MemoryDirectory::new())).await;

        plm.start_linking(LinkMode::Controller, true).await.unwrap();
        let err = plm.start_linking(LinkMode::Controller, true).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyLinking));
    }

    #[tokio::test]
    async fn failed_start_linking_ends_session() {
        let mut mock = MockTransport::new();
        let mut nak = START_LINKING.to_vec();
        nak.push(0x15);
        for _ in 0..3 {
            mock.expect(&START_LINKING, &nak);
        }
        let plm = PlmBuilder::new()
            .retry_delay(Duration::from_millis(1))
            .build_with_transport(Box::new(mock), Arc::new(MemoryDirectory::new()))
            .await
            .unwrap();
        let mut events = plm.subscribe();

        assert!(plm.start_linking(LinkMode::Controller, true).await.is_err());
        assert!(!plm.stats().await.unwrap().linking);

        let mut reasons = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let PlmEvent::LinkingStopped { reason } = event {
                reasons.push(reason);
            }
        }
        assert_eq!(reasons, vec![LinkEnd::Failed]);
    }

    #[tokio::test]
    async fn stop_linking_cancels_on_modem() {
        let mut mock = MockTransport::new();
        mock.expect(&START_LINKING, &START_LINKING_ACK);
        mock.expect(&[0x02, 0x65], &[0x02, 0x65, 0x06]);
        let handle = mock.handle();
        let plm = build(mock, Arc::new(MemoryDirectory::new())).await;

        plm.start_linking(LinkMode::Controller, true).await.unwrap();
        plm.stop_linking().await.unwrap();
        assert!(!plm.stats().await.unwrap().linking);
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn beep_succeeds_if_any_beep_is_heard() {
        let mut mock = MockTransport::new();
        expect_action(&mut mock, LAMP, Action::Beep, &[]);
        expect_action(&mut mock, LAMP, Action::Beep, &[&direct_ack(LAMP, 0x30, 0x00)]);
        let handle = mock.handle();
        let plm = PlmBuilder::new()
            .retries(1)
            .build_with_transport(Box::new(mock), Arc::new(MemoryDirectory::new()))
            .await
            .unwrap();

        plm.beep(LAMP, 2).await.unwrap();
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn beep_fails_when_every_beep_is_lost() {
        let mut mock = MockTransport::new();
        expect_action(&mut mock, LAMP, Action::Beep, &[]);
        expect_action(&mut mock, LAMP, Action::Beep, &[]);
        let plm = PlmBuilder::new()
            .retries(1)
            .build_with_transport(Box::new(mock), Arc::new(MemoryDirectory::new()))
            .await
            .unwrap();

        assert!(plm.beep(LAMP, 2).await.is_err());
    }

    #[tokio::test]
    async fn lock_and_button_tap_frames() {
        let mut mock = MockTransport::new();
        mock.expect(&LIGHT_ON, &LIGHT_ON_ACK);
        expect_action(&mut mock, LAMP, Action::SetButtonTap(2), &[&direct_ack(LAMP, 0x25, 0x02)]);
        let handle = mock.handle();
        let devices = lamp_directory();
        let plm = build(mock, Arc::clone(&devices)).await;

        plm.lock(LAMP).await.unwrap();
        plm.set_button_tap(LAMP, 2).await.unwrap();
        assert_eq!(handle.remaining_expectations(), 0);
        // Locking says nothing about the load.
        let lamp = devices.get_by_address(&LAMP).await.unwrap();
        assert_eq!(lamp.is_on(), None);
    }

    #[tokio::test]
    async fn extended_data_is_parsed() {
        let mut data = [0u8; USER_DATA_LEN];
        data[0] = 0x01;
        data[6] = 0x1C;
        data[7] = 0xC0;
        let mut mock = MockTransport::new();
        expect_action(
            &mut mock,
            LAMP,
            Action::ExtendedData(1),
            &[&direct_ack(LAMP, 0x2E, 0x00), &extended_from(LAMP, 0x2E, data)],
        );
        let plm = build(mock, Arc::new(MemoryDirectory::new())).await;

        let settings = plm.extended_data(LAMP, 1).await.unwrap();
        assert_eq!((settings.group, settings.ramp_rate, settings.on_level), (0x01, 0x1C, 0xC0));
    }

    #[tokio::test]
    async fn heartbeat_and_battery_settings_are_acknowledged() {
        let mut mock = MockTransport::new();
        expect_action(&mut mock, LAMP, Action::HeartbeatInterval(0x18), &[&direct_ack(LAMP, 0x2E, 0x00)]);
        expect_action(&mut mock, LAMP, Action::LowBatteryLevel(0x40), &[&direct_ack(LAMP, 0x2E, 0x00)]);
        let handle = mock.handle();
        let plm = build(mock, Arc::new(MemoryDirectory::new())).await;

        plm.set_heartbeat_interval(LAMP, 0x18).await.unwrap();
        plm.set_low_battery_level(LAMP, 0x40).await.unwrap();
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn database_operations_require_known_device() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let plm = build(mock, Arc::new(MemoryDirectory::new())).await;

        let err = plm.load_database(LAMP).await.unwrap_err();
        assert!(matches!(err, Error::UnknownDevice(ref a) if a == "11.22.33"), "{err:?}");
        let mut db = loaded(5);
        let err = plm.create_record(LAMP, &mut db, controller_of(MODEM, 2)).await.unwrap_err();
        assert!(matches!(err, Error::UnknownDevice(_)));
        let err = plm.delete_record(LAMP, &mut db, 0x0FFF).await.unwrap_err();
        assert!(matches!(err, Error::UnknownDevice(_)));
        let err = plm.add_scene_member(5, SWITCH, 1).await.unwrap_err();
        assert!(matches!(err, Error::UnknownDevice(ref a) if a == "44.55.66"));
        assert!(handle.sent_data().is_empty());
    }

    #[tokio::test]
    async fn load_database_stops_at_last_record() {
        let mut mock = MockTransport::new();
        expect_delta(&mut mock, LAMP, 5);
        expect_record(&mut mock, LAMP, db_record(0x0FFF, 0xE2, 0x01, MODEM));
        expect_record(&mut mock, LAMP, db_record(0x0FF7, 0xA2, 0x01, SWITCH));
        expect_record(&mut mock, LAMP, db_record(0x0FEF, 0x00, 0x00, NOWHERE));
        let handle = mock.handle();
        let plm = build(mock, lamp_directory()).await;

        let db = plm.load_database(LAMP).await.unwrap();
        assert_eq!(db.delta, 5);
        assert_eq!(db.records.len(), 3);
        assert_eq!(db.links().count(), 2);
        assert!(db.find(0x01, MODEM, true).is_some());
        assert!(db.find(0x01, SWITCH, false).is_some());
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_record_is_read_again() {
        let mut mock = MockTransport::new();
        expect_delta(&mut mock, LAMP, 1);
        // The first read is acknowledged but the record never arrives.
        expect_action(&mut mock, LAMP, Action::ReadRecord(0x0FFF), &[&direct_ack(LAMP, 0x2F, 0x00)]);
        expect_record(&mut mock, LAMP, db_record(0x0FFF, 0x00, 0x00, NOWHERE));
        let plm = build(mock, lamp_directory()).await;

        let db = plm.load_database(LAMP).await.unwrap();
        assert_eq!(db.records.len(), 1);
        assert!(db.free_slot().is_some());
    }

    #[tokio::test]
    async fn create_record_fills_first_free_slot() {
        let link = controller_of(SWITCH, 0x02);
        let mut mock = MockTransport::new();
        expect_delta(&mut mock, LAMP, 5);
        expect_write(&mut mock, LAMP, db_record(0x0FF7, 0x00, 0x00, NOWHERE).with_link(&link));
        expect_delta(&mut mock, LAMP, 6);
        let handle = mock.handle();
        let plm = build(mock, lamp_directory()).await;

        let mut db = loaded(5);
        let record = plm.create_record(LAMP, &mut db, link).await.unwrap();
        assert_eq!(record.offset, 0x0FF7);
        assert_eq!(record.flags, 0xC2);
        assert_eq!(db.delta, 6);
        assert_eq!(db.get(0x0FF7), Some(&record));
        assert_eq!(db.free_slot().map(|r| r.offset), Some(0x0FEF));
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn stale_database_is_not_written() {
        let mut mock = MockTransport::new();
        expect_delta(&mut mock, LAMP, 7);
        let handle = mock.handle();
        let plm = build(mock, lamp_directory()).await;

        let mut db = loaded(5);
        let err = plm.create_record(LAMP, &mut db, controller_of(SWITCH, 2)).await.unwrap_err();
        assert!(matches!(err, Error::DatabaseOutOfSync(_)), "{err:?}");
        assert_eq!(handle.sent_data().len(), 1);
        assert_eq!(db, loaded(5));
    }

    #[tokio::test]
    async fn duplicate_link_is_refused() {
        let mut mock = MockTransport::new();
        expect_delta(&mut mock, LAMP, 5);
        let plm = build(mock, lamp_directory()).await;

        let mut db = loaded(5);
        let err = plm.create_record(LAMP, &mut db, controller_of(MODEM, 0x01)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn update_record_checks_ramp_rate_before_sending() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let plm = build(mock, lamp_directory()).await;

        let mut db = loaded(5);
        let link = LinkSpec {
            ramp_rate: 32,
            ..controller_of(MODEM, 1)
        };
        let err = plm.update_record(LAMP, &mut db, 0x0FFF, link).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(handle.sent_data().is_empty());
    }

    #[tokio::test]
    async fn delete_record_marks_slot_unused() {
        let mut mock = MockTransport::new();
        expect_delta(&mut mock, LAMP, 5);
        expect_write(&mut mock, LAMP, db_record(0x0FFF, 0x22, 0x01, MODEM));
        expect_delta(&mut mock, LAMP, 6);
        let plm = build(mock, lamp_directory()).await;

        let mut db = loaded(5);
        let record = plm.delete_record(LAMP, &mut db, 0x0FFF).await.unwrap();
        assert!(!record.in_use() && record.used_before());
        assert_eq!(db.links().count(), 0);
        assert_eq!(db.free_slot().map(|r| r.offset), Some(0x0FFF));
    }

    fn switch_directory() -> Arc<MemoryDirectory> {
        let devices = Arc::new(MemoryDirectory::new());
        devices.add(MemoryDevice::new("Switch", SWITCH, &[Capability::OnOff]));
        devices
    }

    #[tokio::test]
    async fn scene_member_is_linked_and_both_sides_exit_linking() {
        let mut mock = MockTransport::new();
        mock.expect(&[0x02, 0x64, 0x01, 0x05], &[0x02, 0x64, 0x01, 0x05, 0x06]);
        expect_action(
            &mut mock,
            SWITCH,
            Action::EnterLinking(1),
            &[
                &direct_ack(SWITCH, 0x09, 0x01),
                &[0x02, 0x53, 0x01, 0x05, 0x44, 0x55, 0x66, 0x02, 0x2A, 0x43],
            ],
        );
        mock.expect(&[0x02, 0x65], &[0x02, 0x65, 0x06]);
        expect_action(&mut mock, SWITCH, Action::ExitLinking, &[&direct_ack(SWITCH, 0x08, 0x00)]);
        let handle = mock.handle();
        let plm = build(mock, switch_directory()).await;

        plm.add_scene_member(5, SWITCH, 1).await.unwrap();
        assert_eq!(handle.remaining_expectations(), 0);
        assert!(!plm.stats().await.unwrap().linking);
    }

    #[tokio::test(start_paused = true)]
    async fn scene_member_that_never_links_times_out() {
        let mut mock = MockTransport::new();
        mock.expect(&[0x02, 0x64, 0xFF, 0x05], &[0x02, 0x64, 0xFF, 0x05, 0x06]);
        expect_action(&mut mock, SWITCH, Action::EnterUnlinking(1), &[&direct_ack(SWITCH, 0x0A, 0x01)]);
        mock.expect(&[0x02, 0x65], &[0x02, 0x65, 0x06]);
        expect_action(&mut mock, SWITCH, Action::ExitLinking, &[&direct_ack(SWITCH, 0x08, 0x00)]);
        let handle = mock.handle();
        let plm = build(mock, switch_directory()).await;

        let err = plm.delete_scene_member(5, SWITCH, 1).await.unwrap_err();
        assert!(matches!(err, Error::Timeout), "{err:?}");
        assert_eq!(handle.remaining_expectations(), 0);
        assert!(!plm.stats().await.unwrap().linking);
    }

    #[tokio::test]
    async fn scene_member_level_is_rewritten() {
        let member = db_record(0x0FFF, 0xA2, 0x05, MODEM);
        let link = LinkSpec {
            controller: false,
            group: 0x05,
            address: MODEM,
            on_level: 0x80,
            ramp_rate: 0x10,
            button: member.button,
        };
        let mut mock = MockTransport::new();
        mock.expect(&[0x02, 0x60], &[0x02, 0x60, 0xAA, 0xBB, 0xCC, 0x03, 0x15, 0x9B, 0x06]);
        expect_delta(&mut mock, SWITCH, 3);
        expect_record(&mut mock, SWITCH, member);
        expect_record(&mut mock, SWITCH, db_record(0x0FF7, 0x00, 0x00, NOWHERE));
        expect_delta(&mut mock, SWITCH, 3);
        expect_write(&mut mock, SWITCH, member.with_link(&link));
        expect_delta(&mut mock, SWITCH, 4);
        let handle = mock.handle();
        let plm = build(mock, switch_directory()).await;

        let record = plm.update_scene_member(5, SWITCH, 0x80, 0x10).await.unwrap();
        assert_eq!((record.on_level, record.ramp_rate), (0x80, 0x10));
        assert_eq!(record.flags, 0xA2);
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn shutdown_returns_transport() {
        let plm = build(MockTransport::new(), Arc::new(MemoryDirectory::new())).await;
        let transport = plm.shutdown().await.unwrap();
        assert!(transport.is_connected());
    }
}
