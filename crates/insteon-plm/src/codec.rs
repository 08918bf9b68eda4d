//! Frame codec -- outbound serialization and inbound payload decoding.
//!
//! Every PLM frame is `0x02 <opcode> <payload>`. Outbound payloads are
//! exactly the descriptor's `write_size`; inbound payloads are exactly its
//! `read_size`. The serializers in this module produce payloads only;
//! [`encode`] adds the header.

use bytes::{BufMut, BytesMut};

use insteon_core::address::Address;
use insteon_core::device::LinkMode;
use insteon_core::error::{Error, Result};
use insteon_core::flags::MessageFlags;

use crate::commands::{CommandDescriptor, HEADER_LEN, START_BYTE};
use crate::message::{Message, MessageBody, USER_DATA_LEN};

/// Arguments for a modem command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CommandArgs {
    /// Commands with no payload.
    #[default]
    None,
    /// A standard Insteon message. `flags` defaults to
    /// [`MessageFlags::outbound`] for the target.
    Standard {
        to: Address,
        flags: Option<MessageFlags>,
        cmd1: u8,
        cmd2: u8,
    },
    /// An extended Insteon message with 14 bytes of user data.
    Extended {
        to: Address,
        flags: Option<MessageFlags>,
        cmd1: u8,
        cmd2: u8,
        data: [u8; USER_DATA_LEN],
    },
    /// SEND_ALL_LINK_COMMAND.
    AllLinkCommand { group: u8, cmd1: u8, cmd2: u8 },
    /// START_ALL_LINKING.
    StartLinking { mode: LinkMode, group: u8 },
    /// Pre-built payload bytes, passed through unchanged.
    Raw(Vec<u8>),
}

impl CommandArgs {
    /// The device this command is addressed to, if any.
    pub fn target(&self) -> Option<Address> {
        match self {
            CommandArgs::Standard { to, .. } | CommandArgs::Extended { to, .. } => Some(*to),
            _ => None,
        }
    }

    /// `(to, cmd1, cmd2)` of an Insteon message, as the modem echoes it.
    pub fn message_fields(&self) -> Option<(Address, u8, u8)> {
        match self {
            CommandArgs::Standard { to, cmd1, cmd2, .. } | CommandArgs::Extended { to, cmd1, cmd2, .. } => {
                Some((*to, *cmd1, *cmd2))
            }
            CommandArgs::Raw(bytes) if bytes.len() >= 6 => Address::from_slice(&bytes[0..3])
                .ok()
                .map(|to| (to, bytes[4], bytes[5])),
            _ => None,
        }
    }
}

fn wrong_args(expected: &str, args: &CommandArgs) -> Error {
    Error::InvalidParameter(format!("expected {expected} arguments, got {args:?}"))
}

// ---------------------------------------------------------------------------
// Serializers
// ---------------------------------------------------------------------------

/// `to[0..3] flags[3] cmd1[4] cmd2[5]`
pub fn standard(args: &CommandArgs) -> Result<Vec<u8>> {
    match args {
        CommandArgs::Standard {
            to,
            flags,
            cmd1,
            cmd2,
        } => {
            let flags = flags.unwrap_or_else(|| MessageFlags::outbound(to, false));
            let mut buf = BytesMut::with_capacity(6);
            buf.put_slice(&to.bytes());
            buf.put_u8(flags.bits());
            buf.put_u8(*cmd1);
            buf.put_u8(*cmd2);
            Ok(buf.to_vec())
        }
        CommandArgs::Raw(bytes) => Ok(bytes.clone()),
        other => Err(wrong_args("standard message", other)),
    }
}

/// `to[0..3] flags[3] cmd1[4] cmd2[5] data[6..20]`
///
/// The last user-data byte is replaced with the checksum the i2cs engine
/// expects over `cmd1 cmd2 data[0..13]`.
pub fn extended(args: &CommandArgs) -> Result<Vec<u8>> {
    match args {
        CommandArgs::Extended {
            to,
            flags,
            cmd1,
            cmd2,
            data,
        } => {
            let flags = flags.unwrap_or_else(|| MessageFlags::outbound(to, true));
            let mut data = *data;
            data[USER_DATA_LEN - 1] = checksum(*cmd1, *cmd2, &data[..USER_DATA_LEN - 1]);

            let mut buf = BytesMut::with_capacity(6 + USER_DATA_LEN);
            buf.put_slice(&to.bytes());
            buf.put_u8(flags.bits());
            buf.put_u8(*cmd1);
            buf.put_u8(*cmd2);
            buf.put_slice(&data);
            Ok(buf.to_vec())
        }
        CommandArgs::Raw(bytes) => Ok(bytes.clone()),
        other => Err(wrong_args("extended message", other)),
    }
}

/// `group[0] cmd1[1] cmd2[2]`
pub fn all_link_command(args: &CommandArgs) -> Result<Vec<u8>> {
    match args {
        CommandArgs::AllLinkCommand { group, cmd1, cmd2 } => Ok(vec![*group, *cmd1, *cmd2]),
        CommandArgs::Raw(bytes) => Ok(bytes.clone()),
        other => Err(wrong_args("all-link command", other)),
    }
}

/// `code[0] group[1]`
pub fn start_linking(args: &CommandArgs) -> Result<Vec<u8>> {
    match args {
        CommandArgs::StartLinking { mode, group } => Ok(vec![mode.code(), *group]),
        CommandArgs::Raw(bytes) => Ok(bytes.clone()),
        other => Err(wrong_args("start linking", other)),
    }
}

pub fn raw(args: &CommandArgs) -> Result<Vec<u8>> {
    match args {
        CommandArgs::Raw(bytes) => Ok(bytes.clone()),
        other => Err(wrong_args("raw", other)),
    }
}

/// Two's complement of the byte sum, as used by extended messages.
pub fn checksum(cmd1: u8, cmd2: u8, data: &[u8]) -> u8 {
    let sum = data
        .iter()
        .fold(cmd1.wrapping_add(cmd2), |acc, b| acc.wrapping_add(*b));
    (!sum).wrapping_add(1)
}

// ---------------------------------------------------------------------------
// Frame encode / decode
// ---------------------------------------------------------------------------

/// Encode a complete outbound frame for `desc`.
pub fn encode(desc: &CommandDescriptor, args: &CommandArgs) -> Result<Vec<u8>> {
    let payload = match desc.serialize {
        Some(serialize) => serialize(args)?,
        None if desc.write_size > 0 => {
            return Err(Error::InvalidParameter(format!(
                "{} has no serializer",
                desc.name
            )));
        }
        None => Vec::new(),
    };

    if payload.len() != desc.write_size {
        return Err(Error::SerializationSizeMismatch {
            command: desc.name.as_str(),
            expected: desc.write_size,
            actual: payload.len(),
        });
    }

    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u8(START_BYTE);
    frame.put_u8(desc.opcode);
    frame.put_slice(&payload);
    Ok(frame.to_vec())
}

/// Decode an inbound payload (header already stripped).
///
/// Commands without a deserializer decode to [`MessageBody::Undecoded`].
pub fn decode(desc: &CommandDescriptor, payload: &[u8]) -> Result<Message> {
    if payload.len() != desc.read_size {
        return Err(Error::Parse(format!(
            "{} payload is {} bytes, expected {}",
            desc.name,
            payload.len(),
            desc.read_size
        )));
    }

    let body = match desc.deserialize {
        Some(deserialize) => deserialize(payload)?,
        None => MessageBody::Undecoded(payload.to_vec()),
    };

    Ok(Message {
        command: desc.name,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{ACK, COMMANDS, CommandName, NAK, lookup_by_name};

    const LAMP: Address = Address::new([0x11, 0x22, 0x33]);

    /// Host commands occupy 0x60 and up; lower opcodes originate at the modem.
    const FIRST_HOST_OPCODE: u8 = 0x60;

    fn sample_args(desc: &CommandDescriptor) -> CommandArgs {
        match desc.name {
            CommandName::SendStandard => CommandArgs::Standard {
                to: LAMP,
                flags: None,
                cmd1: 0x19,
                cmd2: 0x00,
            },
            CommandName::SendExtended => CommandArgs::Extended {
                to: LAMP,
                flags: None,
                cmd1: 0x2F,
                cmd2: 0x00,
                data: std::array::from_fn(|i| i as u8 + 1),
            },
            CommandName::SendAllLinkCommand => CommandArgs::AllLinkCommand {
                group: 0x02,
                cmd1: 0x11,
                cmd2: 0xFF,
            },
            CommandName::StartAllLinking => CommandArgs::StartLinking {
                mode: LinkMode::Either,
                group: 0x05,
            },
            _ if desc.serialize.is_some() => CommandArgs::Raw((1..=desc.write_size).map(|b| b as u8).collect()),
            _ => CommandArgs::None,
        }
    }

    #[test]
    fn every_host_command_round_trips_through_its_echo() {
        for desc in COMMANDS.iter().filter(|d| d.opcode >= FIRST_HOST_OPCODE) {
            let args = sample_args(desc);
            let frame = encode(desc, &args).unwrap_or_else(|e| panic!("{}: {e}", desc.name));
            assert_eq!(frame[..HEADER_LEN], [START_BYTE, desc.opcode], "{}", desc.name);
            assert_eq!(frame.len(), HEADER_LEN + desc.write_size, "{}", desc.name);

            // The modem echoes the payload, appends any reply data, then ACK.
            let payload = &frame[HEADER_LEN..];
            let mut response = payload.to_vec();
            response.resize(desc.read_size - 1, 0x00);
            response.push(ACK);

            let msg = decode(desc, &response).unwrap_or_else(|e| panic!("{}: {e}", desc.name));
            assert_eq!(msg.command, desc.name);
            assert_eq!(msg.ack(), Some(true), "{}", desc.name);

            match (&args, &msg.body) {
                (CommandArgs::Standard { to, cmd1, cmd2, .. }, MessageBody::SendEcho(e)) => {
                    assert_eq!((e.to, e.cmd1, e.cmd2), (*to, *cmd1, *cmd2));
                    assert!(!e.flags.is_extended());
                }
                (CommandArgs::Extended { to, cmd1, cmd2, data, .. }, MessageBody::SendEcho(e)) => {
                    assert_eq!((e.to, e.cmd1, e.cmd2), (*to, *cmd1, *cmd2));
                    let echoed = e.data.unwrap();
                    assert_eq!(echoed[..13], data[..13]);
                    assert_eq!(echoed[13], checksum(*cmd1, *cmd2, &data[..13]));
                }
                (CommandArgs::AllLinkCommand { group, cmd1, cmd2 }, MessageBody::AllLinkCommand { group: g, cmd1: c1, cmd2: c2, .. }) => {
                    assert_eq!((g, c1, c2), (group, cmd1, cmd2));
                }
                (CommandArgs::StartLinking { mode, group }, MessageBody::LinkingStarted { code, group: g, .. }) => {
                    assert_eq!((*code, g), (mode.code(), group));
                }
                (_, MessageBody::Ack { echo, .. }) => assert_eq!(echo.as_slice(), payload, "{}", desc.name),
                (CommandArgs::None, MessageBody::ImInfo(_) | MessageBody::ImConfiguration(_)) => {}
                (args, body) => panic!("{}: {args:?} decoded to {body:?}", desc.name),
            }

            *response.last_mut().unwrap() = NAK;
            assert!(decode(desc, &response).unwrap().is_nak(), "{}", desc.name);
        }
    }

    #[test]
    fn every_modem_report_decodes() {
        for desc in COMMANDS.iter().filter(|d| d.opcode < FIRST_HOST_OPCODE) {
            let payload: Vec<u8> = match desc.name {
                CommandName::AllLinkCleanupStatusReport => vec![ACK],
                _ => (0..desc.read_size).map(|i| 0x10 + i as u8).collect(),
            };
            let msg = decode(desc, &payload).unwrap_or_else(|e| panic!("{}: {e}", desc.name));
            assert_eq!(msg.command, desc.name);
            assert_eq!(
                matches!(msg.body, MessageBody::Undecoded(_)),
                desc.name == CommandName::X10Received,
                "{}",
                desc.name
            );
        }
    }

    #[test]
    fn light_on_frame_is_bit_exact() {
        let args = CommandArgs::Standard {
            to: LAMP,
            flags: None,
            cmd1: 0x11,
            cmd2: 0xFF,
        };
        let frame = encode(lookup_by_name(CommandName::SendStandard), &args).unwrap();
        assert_eq!(frame, vec![0x02, 0x62, 0x11, 0x22, 0x33, 0x0F, 0x11, 0xFF]);
    }

    #[test]
    fn group_target_uses_all_link_broadcast_flags() {
        let args = CommandArgs::Standard {
            to: Address::new([0x00, 0x00, 0x01]),
            flags: None,
            cmd1: 0x13,
            cmd2: 0x00,
        };
        let frame = encode(lookup_by_name(CommandName::SendStandard), &args).unwrap();
        assert_eq!(frame[5], 0xCF);
    }

    #[test]
    fn zero_payload_commands() {
        let frame = encode(lookup_by_name(CommandName::GetImInfo), &CommandArgs::None).unwrap();
        assert_eq!(frame, vec![0x02, 0x60]);
        let frame = encode(lookup_by_name(CommandName::CancelAllLinking), &CommandArgs::None).unwrap();
        assert_eq!(frame, vec![0x02, 0x65]);
    }

    #[test]
    fn start_linking_frame() {
        let args = CommandArgs::StartLinking {
            mode: LinkMode::Controller,
            group: 1,
        };
        let frame = encode(lookup_by_name(CommandName::StartAllLinking), &args).unwrap();
        assert_eq!(frame, vec![0x02, 0x64, 0x01, 0x01]);
    }

    #[test]
    fn all_link_command_frame() {
        let args = CommandArgs::AllLinkCommand {
            group: 0x02,
            cmd1: 0x11,
            cmd2: 0xFF,
        };
        let frame = encode(lookup_by_name(CommandName::SendAllLinkCommand), &args).unwrap();
        assert_eq!(frame, vec![0x02, 0x61, 0x02, 0x11, 0xFF]);
    }

    #[test]
    fn extended_frame_carries_checksum() {
        let args = CommandArgs::Extended {
            to: LAMP,
            flags: None,
            cmd1: 0x2E,
            cmd2: 0x00,
            data: [0; USER_DATA_LEN],
        };
        let frame = encode(lookup_by_name(CommandName::SendExtended), &args).unwrap();
        assert_eq!(frame.len(), HEADER_LEN + 20);
        assert_eq!(frame[5], 0x1F);
        // 0x2E + 0x00 = 0x2E, two's complement is 0xD2.
        assert_eq!(*frame.last().unwrap(), 0xD2);
    }

    #[test]
    fn raw_size_mismatch_is_rejected() {
        let err = encode(
            lookup_by_name(CommandName::SetImConfiguration),
            &CommandArgs::Raw(vec![0x40, 0x00]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::SerializationSizeMismatch {
                command: "SET_IM_CONFIGURATION",
                expected: 1,
                actual: 2
            }
        ));
    }

    #[test]
    fn wrong_argument_kind_is_rejected() {
        let err = encode(lookup_by_name(CommandName::SendStandard), &CommandArgs::None).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn decode_checks_length_before_deserializing() {
        let desc = lookup_by_name(CommandName::StandardMessageReceived);
        assert!(matches!(decode(desc, &[0x11, 0x22]), Err(Error::Parse(_))));
    }

    #[test]
    fn decode_without_deserializer_keeps_payload() {
        let msg = decode(lookup_by_name(CommandName::X10Received), &[0x66, 0x80]).unwrap();
        assert_eq!(msg.command, CommandName::X10Received);
        assert_eq!(msg.body, MessageBody::Undecoded(vec![0x66, 0x80]));
    }

    #[test]
    fn encode_then_decode_echo() {
        // The modem echoes the sent payload with an ACK byte appended.
        let args = CommandArgs::Standard {
            to: LAMP,
            flags: None,
            cmd1: 0x13,
            cmd2: 0x01,
        };
        let desc = lookup_by_name(CommandName::SendStandard);
        let mut echo = encode(desc, &args).unwrap()[HEADER_LEN..].to_vec();
        echo.push(0x06);

        let msg = decode(desc, &echo).unwrap();
        let MessageBody::SendEcho(e) = msg.body else {
            panic!("expected SendEcho");
        };
        assert_eq!(e.to, LAMP);
        assert_eq!((e.cmd1, e.cmd2, e.ack), (0x13, 0x01, true));
    }

    #[test]
    fn checksum_wraps() {
        assert_eq!(checksum(0x00, 0x00, &[]), 0x00);
        assert_eq!(checksum(0xFF, 0x01, &[]), 0x00);
        assert_eq!(checksum(0x2F, 0x00, &[0x00, 0x01]), 0xD0);
    }
}
