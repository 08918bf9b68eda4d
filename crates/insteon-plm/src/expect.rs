//! Expectation table -- correlates inbound messages with the in-flight job.
//!
//! A job declares the responses it waits for as a list of [`Expected`]
//! entries. When the job is sent, each becomes a live entry in the
//! [`ExpectationTable`] keyed by [`ExpectKey`], with its own deadline timer.
//! Keys are unique: registering a key that is already live fails with
//! [`Error::ExpectationConflict`]. Device replies are keyed by sender and
//! command echoes by the message they echo.
//!
//! Timers run as spawned tasks. A timer that fires sends an [`Expired`]
//! notice back to the IO task, which calls [`ExpectationTable::expire`].
//! Settling an entry by match cancels its timer's token; a notice that
//! still slips through names an id that is no longer live and is ignored.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use insteon_core::address::Address;
use insteon_core::error::{Error, Result};
use insteon_core::flags::MessageType;

use crate::codec::CommandArgs;
use crate::commands::CommandName;
use crate::message::{Message, MessageBody};

/// What a live expectation is narrowed to beyond its response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Any response of the type, from the modem.
    Modem,
    /// A direct reply (ACK, NAK or direct data) relayed from one device.
    /// Broadcasts and cleanups from that device never match.
    Device(Address),
    /// The modem's echo of one specific Insteon message.
    Echo { to: Address, cmd1: u8, cmd2: u8 },
}

/// Lookup key for a live expectation: the response type and its [`Scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExpectKey {
    pub command: CommandName,
    pub scope: Scope,
}

impl ExpectKey {
    /// Key for a response produced by the modem itself.
    pub const fn modem(command: CommandName) -> Self {
        ExpectKey {
            command,
            scope: Scope::Modem,
        }
    }

    /// Key for a direct reply relayed from device `from`.
    pub const fn device(command: CommandName, from: Address) -> Self {
        ExpectKey {
            command,
            scope: Scope::Device(from),
        }
    }

    /// Key for the echo of a message sent to `to` carrying `cmd1`/`cmd2`.
    pub const fn echo(command: CommandName, to: Address, cmd1: u8, cmd2: u8) -> Self {
        ExpectKey {
            command,
            scope: Scope::Echo { to, cmd1, cmd2 },
        }
    }

    /// The key an inbound message can satisfy, if any.
    ///
    /// Network messages only answer a request when they are direct
    /// traffic; broadcasts and all-link cleanups are left for the
    /// dispatcher.
    pub fn for_message(msg: &Message) -> Option<ExpectKey> {
        match &msg.body {
            MessageBody::Standard(m) => match m.flags.message_type() {
                MessageType::Direct | MessageType::DirectAck | MessageType::DirectNak => {
                    Some(ExpectKey::device(msg.command, m.from))
                }
                _ => None,
            },
            MessageBody::SendEcho(e) => Some(ExpectKey::echo(msg.command, e.to, e.cmd1, e.cmd2)),
            _ => Some(ExpectKey::modem(msg.command)),
        }
    }
}

impl fmt::Display for ExpectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Scope::Modem => write!(f, "{}", self.command),
            Scope::Device(from) => write!(f, "{}:{}", self.command, from),
            Scope::Echo { to, cmd1, cmd2 } => {
                write!(f, "{}:{}:{:02X}/{:02X}", self.command, to, cmd1, cmd2)
            }
        }
    }
}

/// A response a command waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    pub command: CommandName,
    /// Whether the response comes from the command's target device rather
    /// than from the modem.
    pub from_target: bool,
}

impl Expected {
    pub const fn modem(command: CommandName) -> Self {
        Expected {
            command,
            from_target: false,
        }
    }

    pub const fn device(command: CommandName) -> Self {
        Expected {
            command,
            from_target: true,
        }
    }

    /// Resolve to a concrete key for a command sent with `args`.
    ///
    /// Echoes of SEND_INSTEON_* are pinned to the message that was sent,
    /// so a late echo of an earlier message cannot settle this one.
    pub fn key(self, args: &CommandArgs) -> ExpectKey {
        if self.from_target {
            return match args.target() {
                Some(to) => ExpectKey::device(self.command, to),
                None => ExpectKey::modem(self.command),
            };
        }
        match (self.command, args.message_fields()) {
            (CommandName::SendStandard | CommandName::SendExtended, Some((to, cmd1, cmd2))) => {
                ExpectKey::echo(self.command, to, cmd1, cmd2)
            }
            _ => ExpectKey::modem(self.command),
        }
    }
}

/// Deadline notice from a timer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired {
    pub key: ExpectKey,
    pub id: u64,
}

/// One live expectation.
#[derive(Debug)]
pub struct Expectation {
    pub id: u64,
    /// Owning job.
    pub job: u64,
    /// Position in the job's declared response list.
    pub slot: usize,
    cancel: CancellationToken,
}

/// Live expectations, keyed by [`ExpectKey`].
#[derive(Debug)]
pub struct ExpectationTable {
    entries: HashMap<ExpectKey, Expectation>,
    expiry_tx: mpsc::UnboundedSender<Expired>,
    next_id: u64,
    registered: u64,
    settled: u64,
}

impl ExpectationTable {
    pub fn new(expiry_tx: mpsc::UnboundedSender<Expired>) -> Self {
        ExpectationTable {
            entries: HashMap::new(),
            expiry_tx,
            next_id: 1,
            registered: 0,
            settled: 0,
        }
    }

    /// Register every key of a job at once. Either all keys become live or,
    /// on a conflict, none do.
    pub fn register_all(&mut self, job: u64, keys: &[(ExpectKey, Duration)]) -> Result<()> {
        for (i, (key, _)) in keys.iter().enumerate() {
            if self.entries.contains_key(key) || keys[..i].iter().any(|(k, _)| k == key) {
                return Err(Error::ExpectationConflict(key.to_string()));
            }
        }
        for (slot, (key, deadline)) in keys.iter().enumerate() {
            self.insert(*key, job, slot, *deadline);
        }
        Ok(())
    }

    fn insert(&mut self, key: ExpectKey, job: u64, slot: usize, deadline: Duration) {
        let id = self.next_id;
        self.next_id += 1;
        self.registered += 1;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let tx = self.expiry_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    let _ = tx.send(Expired { key, id });
                }
            }
        });

        debug!(%key, id, job, ?deadline, "expectation registered");
        self.entries.insert(
            key,
            Expectation {
                id,
                job,
                slot,
                cancel,
            },
        );
    }

    /// Settle the entry for `key` by match.
    pub fn resolve(&mut self, key: &ExpectKey) -> Option<Expectation> {
        let entry = self.entries.remove(key)?;
        entry.cancel.cancel();
        self.settled += 1;
        debug!(%key, id = entry.id, "expectation matched");
        Some(entry)
    }

    /// Settle the entry for `key` by deadline, if `id` is still the live one.
    pub fn expire(&mut self, key: &ExpectKey, id: u64) -> Option<Expectation> {
        if self.entries.get(key).is_none_or(|e| e.id != id) {
            debug!(%key, id, "late deadline ignored");
            return None;
        }
        let entry = self.entries.remove(key)?;
        self.settled += 1;
        debug!(%key, id, "expectation expired");
        Some(entry)
    }

    /// Withdraw every remaining entry of `job`, cancelling their timers.
    pub fn withdraw_job(&mut self, job: u64) -> usize {
        let keys: Vec<ExpectKey> = self
            .entries
            .iter()
            .filter(|(_, e)| e.job == job)
            .map(|(k, _)| *k)
            .collect();
        for key in &keys {
            if let Some(entry) = self.entries.remove(key) {
                entry.cancel.cancel();
                self.settled += 1;
            }
        }
        keys.len()
    }

    /// Cancel every timer; used on shutdown.
    pub fn clear(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.cancel.cancel();
            self.settled += 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Total entries ever registered.
    pub fn registered(&self) -> u64 {
        self.registered
    }

    /// Total entries settled by match, deadline, or withdrawal.
    pub fn settled(&self) -> u64 {
        self.settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{SendEcho, StandardMessage};
    use insteon_core::flags::MessageFlags;

    const LAMP: Address = Address::new([0x11, 0x22, 0x33]);

    fn table() -> (ExpectationTable, mpsc::UnboundedReceiver<Expired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ExpectationTable::new(tx), rx)
    }

    fn received(flags: u8, cmd1: u8, cmd2: u8) -> Message {
        Message {
            command: CommandName::StandardMessageReceived,
            body: MessageBody::Standard(StandardMessage {
                from: LAMP,
                to: Address::new([0xAA, 0xBB, 0xCC]),
                flags: MessageFlags::from_bits(flags),
                cmd1,
                cmd2,
                data: None,
            }),
        }
    }

    #[test]
    fn key_display() {
        assert_eq!(
            ExpectKey::device(CommandName::StandardMessageReceived, LAMP).to_string(),
            "INSTEON_STANDARD_MESSAGE_RECEIVED:11.22.33"
        );
        assert_eq!(ExpectKey::modem(CommandName::GetImInfo).to_string(), "GET_IM_INFO");
        assert_eq!(
            ExpectKey::echo(CommandName::SendStandard, LAMP, 0x19, 0x00).to_string(),
            "SEND_INSTEON_STANDARD:11.22.33:19/00"
        );
    }

    #[test]
    fn expected_resolves_against_args() {
        let args = CommandArgs::Standard {
            to: LAMP,
            flags: None,
            cmd1: 0x19,
            cmd2: 0x00,
        };
        let e = Expected::device(CommandName::StandardMessageReceived);
        assert_eq!(e.key(&args).scope, Scope::Device(LAMP));
        assert_eq!(
            Expected::modem(CommandName::SendStandard).key(&args),
            ExpectKey::echo(CommandName::SendStandard, LAMP, 0x19, 0x00)
        );
        assert_eq!(
            Expected::modem(CommandName::CancelAllLinking).key(&CommandArgs::None).scope,
            Scope::Modem
        );
    }

    #[test]
    fn direct_replies_are_scoped_to_sender() {
        // Direct ACK, direct NAK, and an extended direct message.
        for flags in [0x2B, 0xAB, 0x1B] {
            assert_eq!(
                ExpectKey::for_message(&received(flags, 0x19, 0x80)),
                Some(ExpectKey::device(CommandName::StandardMessageReceived, LAMP)),
                "flags {flags:02X}"
            );
        }
    }

    #[test]
    fn broadcast_and_cleanup_match_nothing() {
        // All-link broadcast, all-link cleanup, broadcast, cleanup ACK.
        for flags in [0xCF, 0x41, 0x8B, 0x61] {
            assert_eq!(ExpectKey::for_message(&received(flags, 0x13, 0x00)), None, "flags {flags:02X}");
        }
    }

    #[test]
    fn echo_key_carries_sent_message() {
        let msg = Message {
            command: CommandName::SendStandard,
            body: MessageBody::SendEcho(SendEcho {
                to: LAMP,
                flags: MessageFlags::from_bits(0x0F),
                cmd1: 0x11,
                cmd2: 0xFF,
                data: None,
                ack: true,
            }),
        };
        assert_eq!(
            ExpectKey::for_message(&msg),
            Some(ExpectKey::echo(CommandName::SendStandard, LAMP, 0x11, 0xFF))
        );
    }

    #[tokio::test]
    async fn duplicate_live_key_conflicts() {
        let (mut t, _rx) = table();
        let key = ExpectKey::modem(CommandName::SendStandard);
        t.register_all(1, &[(key, Duration::from_secs(1))]).unwrap();

        let err = t.register_all(2, &[(key, Duration::from_secs(1))]).unwrap_err();
        assert!(matches!(err, Error::ExpectationConflict(ref k) if k == "SEND_INSTEON_STANDARD"));
        assert_eq!(t.len(), 1);
    }

    #[tokio::test]
    async fn conflict_registers_nothing() {
        let (mut t, _rx) = table();
        let a = ExpectKey::modem(CommandName::GetFirstAllLinkRecord);
        let b = ExpectKey::modem(CommandName::AllLinkRecordResponse);
        let err = t
            .register_all(1, &[(a, Duration::from_secs(1)), (b, Duration::from_secs(2)), (a, Duration::from_secs(3))])
            .unwrap_err();
        assert!(matches!(err, Error::ExpectationConflict(_)));
        assert!(t.is_empty());
        assert_eq!(t.registered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_once_and_late_fire_is_ignored() {
        let (mut t, mut rx) = table();
        let key = ExpectKey::modem(CommandName::GetImInfo);
        t.register_all(7, &[(key, Duration::from_millis(1000))]).unwrap();

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.key, key);
        let entry = t.expire(&notice.key, notice.id).unwrap();
        assert_eq!(entry.job, 7);

        // Second delivery of the same notice is a no-op.
        assert!(t.expire(&notice.key, notice.id).is_none());
        assert_eq!((t.registered(), t.settled()), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn match_cancels_timer() {
        let (mut t, mut rx) = table();
        let key = ExpectKey::modem(CommandName::LedOn);
        t.register_all(1, &[(key, Duration::from_millis(100))]).unwrap();
        assert!(t.resolve(&key).is_some());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!((t.registered(), t.settled()), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn withdraw_settles_remaining_entries() {
        let (mut t, _rx) = table();
        let a = ExpectKey::modem(CommandName::SendStandard);
        let b = ExpectKey::device(CommandName::StandardMessageReceived, LAMP);
        t.register_all(3, &[(a, Duration::from_secs(1)), (b, Duration::from_secs(2))])
            .unwrap();

        let first = t.resolve(&a).unwrap();
        assert_eq!(first.slot, 0);
        assert_eq!(t.withdraw_job(3), 1);
        assert!(t.is_empty());
        assert_eq!((t.registered(), t.settled()), (2, 2));
    }
}
