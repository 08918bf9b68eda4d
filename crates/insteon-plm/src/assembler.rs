//! Byte assembler -- rebuilds PLM frames from an arbitrary byte stream.
//!
//! The serial port delivers bytes in whatever chunks the driver feels like.
//! [`Assembler`] is a small state machine fed one chunk at a time; it emits
//! every complete, decoded [`Message`] and carries partial frames over to
//! the next call, so the output does not depend on how the input was split.

use tracing::{trace, warn};

use crate::codec;
use crate::commands::{
    CommandDescriptor, CommandName, HEADER_LEN, START_BYTE, lookup_by_name, lookup_by_opcode,
};
use crate::message::Message;

/// Offset of the flags byte inside a SEND_INSTEON_* echo payload.
const ECHO_FLAGS_OFFSET: usize = 3;

/// Extended-message bit in the flags byte.
const EXTENDED_BIT: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingStart,
    ReadingType,
    AccumulatingPayload,
}

/// Incremental frame reassembler.
#[derive(Debug)]
pub struct Assembler {
    state: State,
    buf: Vec<u8>,
    desc: Option<&'static CommandDescriptor>,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Assembler {
            state: State::AwaitingStart,
            buf: Vec::with_capacity(32),
            desc: None,
        }
    }

    /// Feed a chunk of received bytes, returning every message completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Message> {
        let mut out = Vec::new();
        for &b in bytes {
            if let Some(msg) = self.push_byte(b) {
                out.push(msg);
            }
        }
        out
    }

    /// Whether a partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.state == State::AwaitingStart
    }

    fn reset(&mut self) {
        self.state = State::AwaitingStart;
        self.buf.clear();
        self.desc = None;
    }

    fn push_byte(&mut self, b: u8) -> Option<Message> {
        match self.state {
            State::AwaitingStart => {
                if b == START_BYTE {
                    self.buf.clear();
                    self.buf.push(b);
                    self.state = State::ReadingType;
                } else {
                    trace!(byte = format_args!("0x{b:02X}"), "discarding byte outside frame");
                }
                None
            }
            State::ReadingType => {
                self.buf.push(b);
                let Some(desc) = lookup_by_opcode(b) else {
                    warn!(opcode = format_args!("0x{b:02X}"), "unknown opcode, resynchronising");
                    self.reset();
                    return None;
                };
                if desc.read_size == 0 {
                    self.reset();
                    return Self::finish(desc, &[]);
                }
                self.desc = Some(desc);
                self.state = State::AccumulatingPayload;
                None
            }
            State::AccumulatingPayload => {
                self.buf.push(b);
                let mut desc = self.desc?;

                // 0x62 echoes are ambiguous until the flags byte arrives.
                if desc.name == CommandName::SendStandard
                    && self.buf.len() == HEADER_LEN + ECHO_FLAGS_OFFSET + 1
                    && b & EXTENDED_BIT != 0
                {
                    desc = lookup_by_name(CommandName::SendExtended);
                    self.desc = Some(desc);
                }

                if self.buf.len() < HEADER_LEN + desc.read_size {
                    return None;
                }
                let frame = std::mem::take(&mut self.buf);
                self.reset();
                Self::finish(desc, &frame[HEADER_LEN..])
            }
        }
    }

    fn finish(desc: &'static CommandDescriptor, payload: &[u8]) -> Option<Message> {
        trace!(command = %desc.name, payload = ?payload, "frame complete");
        match codec::decode(desc, payload) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!(command = %desc.name, error = %e, "dropping undecodable frame");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBody;

    fn stream() -> Vec<u8> {
        let mut s = Vec::new();
        // Line noise before the first frame.
        s.extend([0xFF, 0x00]);
        // LIGHT_ON echo with ACK.
        s.extend([0x02, 0x62, 0x11, 0x22, 0x33, 0x0F, 0x11, 0xFF, 0x06]);
        // USER_RESET_DETECTED (zero-length payload).
        s.extend([0x02, 0x55]);
        // Extended echo: flags 0x1F, 14 data bytes, ACK.
        s.extend([0x02, 0x62, 0x11, 0x22, 0x33, 0x1F, 0x2E, 0x00]);
        s.extend([0u8; 14]);
        s.push(0x06);
        // Standard message received from 11.22.33, broadcast to group 1.
        s.extend([0x02, 0x50, 0x11, 0x22, 0x33, 0x00, 0x00, 0x01, 0xCF, 0x13, 0x00]);
        s
    }

    #[test]
    fn decodes_whole_stream() {
        let mut asm = Assembler::new();
        let msgs = asm.push(&stream());
        let names: Vec<_> = msgs.iter().map(|m| m.command).collect();
        assert_eq!(
            names,
            vec![
                CommandName::SendStandard,
                CommandName::UserResetDetected,
                CommandName::SendExtended,
                CommandName::StandardMessageReceived,
            ]
        );
        assert!(asm.is_idle());
    }

    #[test]
    fn output_is_independent_of_chunking() {
        let input = stream();
        let whole = Assembler::new().push(&input);

        for split in 1..input.len() {
            let mut asm = Assembler::new();
            let mut msgs = asm.push(&input[..split]);
            msgs.extend(asm.push(&input[split..]));
            assert_eq!(msgs, whole, "split at {split}");
        }

        let mut asm = Assembler::new();
        let bytewise: Vec<_> = input.iter().flat_map(|b| asm.push(&[*b])).collect();
        assert_eq!(bytewise, whole);
    }

    #[test]
    fn unknown_opcode_resynchronises() {
        let mut asm = Assembler::new();
        let msgs = asm.push(&[0x02, 0x99, 0x02, 0x55]);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].command, CommandName::UserResetDetected);
    }

    #[test]
    fn decode_failure_drops_frame_and_recovers() {
        let mut asm = Assembler::new();
        // Bad ACK byte (0x42) makes the echo undecodable.
        let mut input = vec![0x02, 0x62, 0x11, 0x22, 0x33, 0x0F, 0x11, 0xFF, 0x42];
        input.extend([0x02, 0x55]);
        let msgs = asm.push(&input);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].body, MessageBody::UserReset);
    }

    #[test]
    fn partial_frame_is_held() {
        let mut asm = Assembler::new();
        assert!(asm.push(&[0x02, 0x60, 0x1A, 0x2B]).is_empty());
        assert!(!asm.is_idle());
        let msgs = asm.push(&[0x3C, 0x03, 0x15, 0x9B, 0x06]);
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0].body, MessageBody::ImInfo(_)));
    }
}
