//! A device's own all-link database.
//!
//! i2cs devices keep their links in a table read and written one 8-byte
//! record at a time with READ_WRITE_ALL_LINK_DATABASE (extended `0x2F`).
//! Records live at descending offsets from `0x0FFF`; the table ends at the
//! first record that was never used or that names `00.00.00`.
//!
//! Every write bumps the device's database delta. Writes against a copy
//! whose delta no longer matches the device are refused, so a stale copy
//! never overwrites a slot somebody else just filled.

use insteon_core::address::Address;
use insteon_core::error::{Error, Result};

use crate::message::{StandardMessage, USER_DATA_LEN};

/// Offset of the first record.
pub const FIRST_RECORD: u16 = 0x0FFF;

/// Bytes between consecutive records.
pub const RECORD_STRIDE: u16 = 8;

/// Fastest ramp rate code a record accepts.
pub const MAX_RAMP_RATE: u8 = 31;

const IN_USE: u8 = 0x80;
const CONTROLLER: u8 = 0x40;
const USED_BEFORE: u8 = 0x02;
/// Bits 5..2 and the reserved bit, which writes carry over unchanged.
const KEPT_BITS: u8 = 0x3D;

/// `d2` of a 0x2F request.
const READ_REQUEST: u8 = 0x00;
const RECORD_RESPONSE: u8 = 0x01;
const WRITE_REQUEST: u8 = 0x02;

/// One record of a device's all-link database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseRecord {
    pub offset: u16,
    pub flags: u8,
    pub group: u8,
    pub address: Address,
    pub on_level: u8,
    pub ramp_rate: u8,
    pub button: u8,
}

impl DatabaseRecord {
    pub fn in_use(&self) -> bool {
        self.flags & IN_USE != 0
    }

    pub fn is_controller(&self) -> bool {
        self.flags & CONTROLLER != 0
    }

    pub fn used_before(&self) -> bool {
        self.flags & USED_BEFORE != 0
    }

    /// Whether this record terminates the table.
    pub fn is_last(&self) -> bool {
        self.address == Address::new([0, 0, 0]) || !self.used_before()
    }

    /// Parse the extended reply to a record read.
    ///
    /// `d2 = 0x01`, offset in `d3..d5`, flags `d6`, group `d7`, address
    /// `d8..d11`, link data `d11..d14`.
    pub fn from_reply(msg: &StandardMessage) -> Result<Self> {
        let data = msg
            .data
            .ok_or_else(|| Error::Parse(format!("record reply from {} has no user data", msg.from)))?;
        if msg.cmd1 != 0x2F || data[1] != RECORD_RESPONSE {
            return Err(Error::Parse(format!(
                "not a database record: cmd1 {:02X}, d2 {:02X}",
                msg.cmd1, data[1]
            )));
        }
        Ok(DatabaseRecord {
            offset: u16::from_be_bytes([data[2], data[3]]),
            flags: data[5],
            group: data[6],
            address: Address::from_slice(&data[7..10])?,
            on_level: data[10],
            ramp_rate: data[11],
            button: data[12],
        })
    }

    /// This record rewritten to `link`, keeping the bits writes leave alone.
    pub fn with_link(&self, link: &LinkSpec) -> Self {
        let role = if link.controller { CONTROLLER } else { 0 };
        DatabaseRecord {
            offset: self.offset,
            flags: (self.flags & KEPT_BITS) | IN_USE | USED_BEFORE | role,
            group: link.group,
            address: link.address,
            on_level: link.on_level,
            ramp_rate: link.ramp_rate,
            button: link.button,
        }
    }

    /// This record marked unused. The slot stays part of the table.
    pub fn deleted(&self) -> Self {
        DatabaseRecord {
            flags: (self.flags & KEPT_BITS) | USED_BEFORE,
            ..*self
        }
    }

    /// User data for writing this record. The codec fills in `d14`.
    pub fn write_data(&self) -> [u8; USER_DATA_LEN] {
        let [hi, lo] = self.offset.to_be_bytes();
        let [a0, a1, a2] = self.address.bytes();
        let mut data = [0u8; USER_DATA_LEN];
        data[1] = WRITE_REQUEST;
        data[2] = hi;
        data[3] = lo;
        data[4] = 0x08;
        data[5] = self.flags;
        data[6] = self.group;
        data[7] = a0;
        data[8] = a1;
        data[9] = a2;
        data[10] = self.on_level;
        data[11] = self.ramp_rate;
        data[12] = self.button;
        data
    }
}

/// User data asking for the record at `offset`.
pub fn read_data(offset: u16) -> [u8; USER_DATA_LEN] {
    let [hi, lo] = offset.to_be_bytes();
    let mut data = [0u8; USER_DATA_LEN];
    data[1] = READ_REQUEST;
    data[2] = hi;
    data[3] = lo;
    data[4] = 0x01;
    data
}

/// The offset after `offset`, or `None` past the bottom of memory.
pub fn next_offset(offset: u16) -> Option<u16> {
    offset.checked_sub(RECORD_STRIDE)
}

/// What a record should link to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSpec {
    pub controller: bool,
    pub group: u8,
    pub address: Address,
    pub on_level: u8,
    pub ramp_rate: u8,
    pub button: u8,
}

impl LinkSpec {
    pub fn validate(&self) -> Result<()> {
        if self.ramp_rate > MAX_RAMP_RATE {
            return Err(Error::InvalidParameter(format!(
                "ramp rate must be 0-{MAX_RAMP_RATE}, got {}",
                self.ramp_rate
            )));
        }
        Ok(())
    }
}

/// A loaded copy of a device's database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDatabase {
    /// The device's delta when the copy was taken.
    pub delta: u8,
    /// Records in table order, including the terminating one.
    pub records: Vec<DatabaseRecord>,
}

impl DeviceDatabase {
    pub fn get(&self, offset: u16) -> Option<&DatabaseRecord> {
        self.records.iter().find(|r| r.offset == offset)
    }

    /// The live record linking `address` on `group` in the given role.
    pub fn find(&self, group: u8, address: Address, controller: bool) -> Option<&DatabaseRecord> {
        self.records
            .iter()
            .find(|r| r.in_use() && r.group == group && r.address == address && r.is_controller() == controller)
    }

    /// The first slot not in use.
    pub fn free_slot(&self) -> Option<&DatabaseRecord> {
        self.records.iter().find(|r| !r.in_use())
    }

    /// Live records only.
    pub fn links(&self) -> impl Iterator<Item = &DatabaseRecord> {
        self.records.iter().filter(|r| r.in_use())
    }

    /// Replace the record at `record.offset`, or append it.
    pub fn store(&mut self, record: DatabaseRecord) {
        match self.records.iter_mut().find(|r| r.offset == record.offset) {
            Some(slot) => *slot = record,
            None => self.records.push(record),
        }
    }
}
