//! Insteon PowerLinc Modem protocol engine.
//!
//! This crate drives an Insteon PLM (2413U/2413S) over a byte transport.
//! It provides:
//!
//! - **Command table** ([`commands`]) -- every modem command with its
//!   opcode, frame sizes, serializer and deserializer, plus the device
//!   command (`cmd1`/`cmd2`) table.
//! - **Frame codec** ([`codec`], [`message`]) -- encode outbound frames
//!   and decode inbound payloads into typed [`Message`]s.
//! - **Byte assembler** ([`assembler`]) -- reassemble frames from arbitrary
//!   transport chunks and resynchronise after garbage.
//! - **IO task** ([`io`]) -- the FIFO command queue, the expectation table
//!   ([`expect`]) and the link session, all owned by one task.
//! - **Dispatcher** ([`dispatch`]) -- apply unsolicited device reports to
//!   the host's devices using capability heuristics.
//! - **Linking** ([`linking`]) -- create, stage, or update devices when they
//!   complete a link.
//! - **Actions** ([`actions`]) -- the catalog of device and modem actions,
//!   with caller-level retry.
//! - **Device database** ([`database`]) -- records of a device's own
//!   all-link table, read and written over extended messages.
//! - **Poller** ([`poller`]) -- optional periodic status sweep.
//! - **Plm** ([`plm`]) and **PlmBuilder** ([`builder`]) -- the running
//!   engine and its fluent builder; [`config`] loads the same settings from
//!   TOML.
//!
//! # Example
//!
//! ```
//! use insteon_core::Address;
//! use insteon_plm::codec;
//! use insteon_plm::commands::lookup_by_name;
//! use insteon_plm::Action;
//!
//! let req = Action::LightOn.request(Address::new([0x11, 0x22, 0x33])).unwrap();
//! let frame = codec::encode(lookup_by_name(req.command), &req.args).unwrap();
//! assert_eq!(frame, vec![0x02, 0x62, 0x11, 0x22, 0x33, 0x0F, 0x11, 0xFF]);
//! ```

pub mod actions;
pub mod assembler;
pub mod builder;
pub mod codec;
pub mod commands;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod expect;
pub mod io;
pub mod linking;
pub mod message;
pub mod plm;
pub mod poller;

pub use actions::{Action, CommandRequest, ModemAction, Reply, RetryPolicy, ThermostatMode};
pub use builder::PlmBuilder;
pub use commands::{CommandName, DeviceCommand};
pub use config::PlmConfig;
pub use database::{DatabaseRecord, DeviceDatabase, LinkSpec};
pub use dispatch::{Interpretation, SuffixMeaning, SuffixRule};
pub use io::{EngineStats, LINK_WINDOW, Submitter};
pub use linking::LinkOutcome;
pub use message::{ImConfiguration, ImInfo, LinkCompletion, LinkRecord, Message, MessageBody};
pub use plm::{ExtendedData, Plm, ProductData, SCENE_LINK_WINDOW};
