//! The Insteon message-flags byte.
//!
//! ```text
//!   bit  7 6 5 | 4        | 3 2       | 1 0
//!        type  | extended | hops left | max hops
//! ```
//!
//! | Type bits | Meaning                   |
//! |-----------|---------------------------|
//! | `000`     | direct                    |
//! | `001`     | ACK of direct             |
//! | `010`     | all-link cleanup          |
//! | `011`     | ACK of all-link cleanup   |
//! | `100`     | broadcast                 |
//! | `101`     | NAK of direct             |
//! | `110`     | all-link broadcast        |
//! | `111`     | NAK of all-link cleanup   |

use std::fmt;

use crate::address::Address;

/// The 3-bit message type carried in the top of the flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Direct = 0b000,
    DirectAck = 0b001,
    AllLinkCleanup = 0b010,
    AllLinkCleanupAck = 0b011,
    Broadcast = 0b100,
    DirectNak = 0b101,
    AllLinkBroadcast = 0b110,
    AllLinkCleanupNak = 0b111,
}

impl MessageType {
    /// Decode the low three bits of `bits`.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0b000 => MessageType::Direct,
            0b001 => MessageType::DirectAck,
            0b010 => MessageType::AllLinkCleanup,
            0b011 => MessageType::AllLinkCleanupAck,
            0b100 => MessageType::Broadcast,
            0b101 => MessageType::DirectNak,
            0b110 => MessageType::AllLinkBroadcast,
            _ => MessageType::AllLinkCleanupNak,
        }
    }

    /// The three type bits.
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Whether this is any kind of NAK.
    pub const fn is_nak(self) -> bool {
        matches!(self, MessageType::DirectNak | MessageType::AllLinkCleanupNak)
    }
}

const TYPE_SHIFT: u8 = 5;
const EXTENDED_BIT: u8 = 0x10;
const HOPS_LEFT_SHIFT: u8 = 2;
const HOPS_MASK: u8 = 0b11;

/// Default hop budget for outbound messages.
pub const DEFAULT_HOPS: u8 = 3;

/// The flags byte of an Insteon message.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageFlags(u8);

impl MessageFlags {
    /// Assemble a flags byte. Hop counts are truncated to two bits.
    pub const fn new(message_type: MessageType, extended: bool, hops_left: u8, max_hops: u8) -> Self {
        let mut bits = message_type.bits() << TYPE_SHIFT;
        if extended {
            bits |= EXTENDED_BIT;
        }
        bits |= (hops_left & HOPS_MASK) << HOPS_LEFT_SHIFT;
        bits |= max_hops & HOPS_MASK;
        MessageFlags(bits)
    }

    /// Flags for an outbound message to `to`.
    ///
    /// Group pseudo-addresses (`00.00.xx`) are sent as all-link broadcasts,
    /// everything else as direct messages, both with three hops.
    pub fn outbound(to: &Address, extended: bool) -> Self {
        let message_type = if to.is_group() {
            MessageType::AllLinkBroadcast
        } else {
            MessageType::Direct
        };
        Self::new(message_type, extended, DEFAULT_HOPS, DEFAULT_HOPS)
    }

    pub const fn from_bits(bits: u8) -> Self {
        MessageFlags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn message_type(self) -> MessageType {
        MessageType::from_bits(self.0 >> TYPE_SHIFT)
    }

    pub const fn is_extended(self) -> bool {
        self.0 & EXTENDED_BIT != 0
    }

    pub const fn hops_left(self) -> u8 {
        (self.0 >> HOPS_LEFT_SHIFT) & HOPS_MASK
    }

    pub const fn max_hops(self) -> u8 {
        self.0 & HOPS_MASK
    }

    /// Whether the message is an all-link cleanup (a directed follow-up
    /// to a group broadcast).
    pub const fn is_cleanup(self) -> bool {
        matches!(self.message_type(), MessageType::AllLinkCleanup)
    }
}

impl From<u8> for MessageFlags {
    fn from(bits: u8) -> Self {
        MessageFlags(bits)
    }
}

impl From<MessageFlags> for u8 {
    fn from(flags: MessageFlags) -> Self {
        flags.0
    }
}

impl fmt::Debug for MessageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageFlags")
            .field("bits", &format_args!("0x{:02X}", self.0))
            .field("type", &self.message_type())
            .field("extended", &self.is_extended())
            .field("hops_left", &self.hops_left())
            .field("max_hops", &self.max_hops())
            .finish()
    }
}
