//! Decoded inbound messages.
//!
//! Each deserializer here receives exactly `read_size` payload bytes (the
//! codec checks the length first) and produces a [`MessageBody`]. Offsets
//! below are relative to the payload, i.e. after `0x02 <opcode>`.

use std::fmt;

use insteon_core::address::Address;
use insteon_core::device::LinkMode;
use insteon_core::error::{Error, Result};
use insteon_core::flags::MessageFlags;

use crate::commands::{ACK, CommandName, DeviceCommand, NAK, device_command_name};

/// Number of user-data bytes in an extended message.
pub const USER_DATA_LEN: usize = 14;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: CommandName,
    pub body: MessageBody,
}

impl Message {
    /// The originating device, for messages relayed from the Insteon network.
    pub fn from_address(&self) -> Option<Address> {
        match &self.body {
            MessageBody::Standard(m) => Some(m.from),
            _ => None,
        }
    }

    /// `Some(true)` for ACK, `Some(false)` for NAK, `None` when the message
    /// carries no ack byte.
    pub fn ack(&self) -> Option<bool> {
        match &self.body {
            MessageBody::SendEcho(m) => Some(m.ack),
            MessageBody::ImInfo(m) => Some(m.ack),
            MessageBody::ImConfiguration(m) => Some(m.ack),
            MessageBody::LinkingStarted { ack, .. } => Some(*ack),
            MessageBody::AllLinkCommand { ack, .. } => Some(*ack),
            MessageBody::Ack { ack, .. } => Some(*ack),
            _ => None,
        }
    }

    /// Whether the modem or the target device refused the command.
    pub fn is_nak(&self) -> bool {
        match &self.body {
            MessageBody::Standard(m) => m.flags.message_type().is_nak(),
            _ => self.ack() == Some(false),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            MessageBody::Standard(m) => write!(
                f,
                "{} {} -> {} {} ({:02X}/{:02X}) {:?}",
                self.command,
                m.from,
                m.to,
                m.command_name(),
                m.cmd1,
                m.cmd2,
                m.flags.message_type()
            ),
            MessageBody::SendEcho(m) => write!(
                f,
                "{} to {} {:02X}/{:02X} {}",
                self.command,
                m.to,
                m.cmd1,
                m.cmd2,
                if m.ack { "ACK" } else { "NAK" }
            ),
            MessageBody::LinkCompleted(c) => write!(
                f,
                "{} {} group {} cat {:02X}.{:02X}",
                self.command, c.address, c.group, c.category, c.subcategory
            ),
            MessageBody::LinkRecord(r) => write!(
                f,
                "{} {} group {} flags {:02X}",
                self.command, r.address, r.group, r.flags
            ),
            MessageBody::Undecoded(raw) => write!(f, "{} (no decoder) {:02X?}", self.command, raw),
            other => write!(f, "{} {:?}", self.command, other),
        }
    }
}

/// Command-specific message contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// INSTEON_STANDARD/EXTENDED_MESSAGE_RECEIVED.
    Standard(StandardMessage),
    /// Echo of SEND_INSTEON_STANDARD/EXTENDED.
    SendEcho(SendEcho),
    ImInfo(ImInfo),
    ImConfiguration(ImConfiguration),
    /// Echo of START_ALL_LINKING.
    LinkingStarted { code: u8, group: u8, ack: bool },
    LinkCompleted(LinkCompletion),
    LinkRecord(LinkRecord),
    /// Echo of SEND_ALL_LINK_COMMAND.
    AllLinkCommand { group: u8, cmd1: u8, cmd2: u8, ack: bool },
    CleanupFailure { group: u8, address: Address },
    ButtonEvent(u8),
    UserReset,
    /// Generic command echo: the echoed payload followed by ACK/NAK.
    Ack { echo: Vec<u8>, ack: bool },
    /// The descriptor has no deserializer; the payload is kept as-is.
    Undecoded(Vec<u8>),
}

/// A standard or extended message relayed from the Insteon network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardMessage {
    pub from: Address,
    pub to: Address,
    pub flags: MessageFlags,
    pub cmd1: u8,
    pub cmd2: u8,
    /// User data of an extended message.
    pub data: Option<[u8; USER_DATA_LEN]>,
}

impl StandardMessage {
    pub fn command(&self) -> Option<DeviceCommand> {
        DeviceCommand::resolve(self.cmd1, self.cmd2)
    }

    /// Resolved command name, or `UNKNOWN`.
    pub fn command_name(&self) -> &'static str {
        device_command_name(self.cmd1, self.cmd2)
    }
}

/// The modem's echo of a message it sent for us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendEcho {
    pub to: Address,
    pub flags: MessageFlags,
    pub cmd1: u8,
    pub cmd2: u8,
    pub data: Option<[u8; USER_DATA_LEN]>,
    pub ack: bool,
}

/// Reply to GET_IM_INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImInfo {
    pub address: Address,
    pub category: u8,
    pub subcategory: u8,
    pub firmware: u8,
    pub ack: bool,
}

/// Reply to GET_IM_CONFIGURATION.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImConfiguration {
    pub flags: u8,
    pub ack: bool,
}

impl ImConfiguration {
    pub const MONITOR_MODE: u8 = 0x20;
    pub const DISABLE_AUTO_LINKING: u8 = 0x10;
    pub const AUTO_LED: u8 = 0x08;
    pub const DEADMAN: u8 = 0x04;

    pub fn monitor_mode(&self) -> bool {
        self.flags & Self::MONITOR_MODE != 0
    }

    pub fn auto_linking_disabled(&self) -> bool {
        self.flags & Self::DISABLE_AUTO_LINKING != 0
    }

    pub fn auto_led(&self) -> bool {
        self.flags & Self::AUTO_LED != 0
    }

    pub fn deadman(&self) -> bool {
        self.flags & Self::DEADMAN != 0
    }
}

/// ALL_LINKING_COMPLETED report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkCompletion {
    /// Raw link code: 0x00 the modem is responder, 0x01 controller,
    /// 0xFF the link was deleted.
    pub code: u8,
    pub group: u8,
    pub address: Address,
    pub category: u8,
    pub subcategory: u8,
    pub firmware: u8,
}

impl LinkCompletion {
    pub fn mode(&self) -> Option<LinkMode> {
        LinkMode::from_code(self.code)
    }
}

/// One entry of the modem's all-link database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRecord {
    pub flags: u8,
    pub group: u8,
    pub address: Address,
    pub data: [u8; 3],
}

impl LinkRecord {
    pub fn in_use(&self) -> bool {
        self.flags & 0x80 != 0
    }

    /// Whether the modem is controller for this link.
    pub fn is_controller(&self) -> bool {
        self.flags & 0x40 != 0
    }
}

fn need(payload: &[u8], len: usize, what: &str) -> Result<()> {
    if payload.len() < len {
        return Err(Error::Parse(format!(
            "{what} payload needs {len} bytes, got {}",
            payload.len()
        )));
    }
    Ok(())
}

fn ack_byte(b: u8) -> Result<bool> {
    match b {
        ACK => Ok(true),
        NAK => Ok(false),
        other => Err(Error::Parse(format!("expected ACK/NAK, got 0x{other:02X}"))),
    }
}

fn user_data(bytes: &[u8]) -> [u8; USER_DATA_LEN] {
    let mut data = [0u8; USER_DATA_LEN];
    data.copy_from_slice(&bytes[..USER_DATA_LEN]);
    data
}

// ---------------------------------------------------------------------------
// Deserializers
// ---------------------------------------------------------------------------

/// `from[0..3] to[3..6] flags[6] cmd1[7] cmd2[8]`
pub fn standard_received(payload: &[u8]) -> Result<MessageBody> {
    need(payload, 9, "standard message")?;
    Ok(MessageBody::Standard(StandardMessage {
        from: Address::from_slice(&payload[0..3])?,
        to: Address::from_slice(&payload[3..6])?,
        flags: MessageFlags::from_bits(payload[6]),
        cmd1: payload[7],
        cmd2: payload[8],
        data: None,
    }))
}

/// Standard layout followed by `data[9..23]`.
pub fn extended_received(payload: &[u8]) -> Result<MessageBody> {
    need(payload, 9 + USER_DATA_LEN, "extended message")?;
    match standard_received(payload)? {
        MessageBody::Standard(mut m) => {
            m.data = Some(user_data(&payload[9..]));
            Ok(MessageBody::Standard(m))
        }
        other => Ok(other),
    }
}

/// Standard: `to[0..3] flags[3] cmd1[4] cmd2[5] ack[6]`.
/// Extended: `to[0..3] flags[3] cmd1[4] cmd2[5] data[6..20] ack[20]`.
pub fn send_echo(payload: &[u8]) -> Result<MessageBody> {
    need(payload, 7, "send echo")?;
    let flags = MessageFlags::from_bits(payload[3]);
    let (data, ack) = if flags.is_extended() {
        need(payload, 7 + USER_DATA_LEN, "extended send echo")?;
        (Some(user_data(&payload[6..])), payload[6 + USER_DATA_LEN])
    } else {
        (None, payload[6])
    };
    Ok(MessageBody::SendEcho(SendEcho {
        to: Address::from_slice(&payload[0..3])?,
        flags,
        cmd1: payload[4],
        cmd2: payload[5],
        data,
        ack: ack_byte(ack)?,
    }))
}

/// `address[0..3] category[3] subcategory[4] firmware[5] ack[6]`
pub fn im_info(payload: &[u8]) -> Result<MessageBody> {
    need(payload, 7, "IM info")?;
    Ok(MessageBody::ImInfo(ImInfo {
        address: Address::from_slice(&payload[0..3])?,
        category: payload[3],
        subcategory: payload[4],
        firmware: payload[5],
        ack: ack_byte(payload[6])?,
    }))
}

/// `flags[0] spare[1..3] ack[3]`
pub fn im_configuration(payload: &[u8]) -> Result<MessageBody> {
    need(payload, 4, "IM configuration")?;
    Ok(MessageBody::ImConfiguration(ImConfiguration {
        flags: payload[0],
        ack: ack_byte(payload[3])?,
    }))
}

/// `code[0] group[1] ack[2]`
pub fn linking_started(payload: &[u8]) -> Result<MessageBody> {
    need(payload, 3, "start all-linking echo")?;
    Ok(MessageBody::LinkingStarted {
        code: payload[0],
        group: payload[1],
        ack: ack_byte(payload[2])?,
    })
}

/// `code[0] group[1] address[2..5] category[5] subcategory[6] firmware[7]`
pub fn link_completed(payload: &[u8]) -> Result<MessageBody> {
    need(payload, 8, "all-linking completed")?;
    Ok(MessageBody::LinkCompleted(LinkCompletion {
        code: payload[0],
        group: payload[1],
        address: Address::from_slice(&payload[2..5])?,
        category: payload[5],
        subcategory: payload[6],
        firmware: payload[7],
    }))
}

/// `flags[0] group[1] address[2..5] data[5..8]`
pub fn link_record(payload: &[u8]) -> Result<MessageBody> {
    need(payload, 8, "all-link record")?;
    Ok(MessageBody::LinkRecord(LinkRecord {
        flags: payload[0],
        group: payload[1],
        address: Address::from_slice(&payload[2..5])?,
        data: [payload[5], payload[6], payload[7]],
    }))
}

/// `group[0] cmd1[1] cmd2[2] ack[3]`
pub fn all_link_command_echo(payload: &[u8]) -> Result<MessageBody> {
    need(payload, 4, "all-link command echo")?;
    Ok(MessageBody::AllLinkCommand {
        group: payload[0],
        cmd1: payload[1],
        cmd2: payload[2],
        ack: ack_byte(payload[3])?,
    })
}

/// `0x01[0] group[1] address[2..4]`
pub fn cleanup_failure(payload: &[u8]) -> Result<MessageBody> {
    need(payload, 4, "cleanup failure report")?;
    // The report carries only the low two address bytes after a marker
    // byte; the high byte is not present on the wire.
    Ok(MessageBody::CleanupFailure {
        group: payload[1],
        address: Address::new([0x00, payload[2], payload[3]]),
    })
}

pub fn button_event(payload: &[u8]) -> Result<MessageBody> {
    need(payload, 1, "button event")?;
    Ok(MessageBody::ButtonEvent(payload[0]))
}

pub fn user_reset(_payload: &[u8]) -> Result<MessageBody> {
    Ok(MessageBody::UserReset)
}

/// Any echo whose last byte is ACK/NAK.
pub fn ack(payload: &[u8]) -> Result<MessageBody> {
    let (last, echo) = payload
        .split_last()
        .ok_or_else(|| Error::Parse("ack payload is empty".into()))?;
    Ok(MessageBody::Ack {
        echo: echo.to_vec(),
        ack: ack_byte(*last)?,
    })
}
