//! # insteon -- Insteon home automation over a PowerLinc Modem
//!
//! `insteon` is an asynchronous Rust library for driving Insteon lighting,
//! sensors and thermostats through an Insteon PowerLinc Modem (2413U USB
//! or 2413S serial). It handles the modem's binary framing, correlates
//! responses with commands, retries what the powerline drops, and turns
//! unsolicited device reports into state changes on your devices.
//!
//! ## Quick Start
//!
//! Add `insteon` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! insteon = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! Implement [`DeviceDirectory`] over your own device store (or use the
//! in-memory one from `insteon-test-harness`), then build an engine:
//!
//! ```no_run
//! use std::sync::Arc;
//! use insteon::{Address, DeviceDirectory, PlmBuilder};
//!
//! # async fn example(devices: Arc<dyn DeviceDirectory>) -> anyhow::Result<()> {
//! let plm = PlmBuilder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .build(devices)
//!     .await?;
//!
//! let lamp: Address = "11.22.33".parse()?;
//! plm.turn_on(lamp).await?;
//! println!("level: {}%", plm.level(lamp).await?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Crate                  | Purpose                                              |
//! |------------------------|------------------------------------------------------|
//! | `insteon-core`         | Address, flags, errors, events, collaborator traits  |
//! | `insteon-transport`    | Serial transport on `tokio-serial`                   |
//! | `insteon-plm`          | Protocol engine: codec, queue, dispatcher, linking   |
//! | `insteon-test-harness` | Mock transport and in-memory device directory        |
//! | **`insteon`**          | This facade crate -- re-exports everything           |
//!
//! ## Feature Flags
//!
//! | Feature  | Enables                                   | Default |
//! |----------|-------------------------------------------|---------|
//! | `serial` | [`transport`] module (`SerialTransport`)  | yes     |
//!
//! ## Events
//!
//! The engine emits [`PlmEvent`]s through a broadcast channel:
//!
//! ```no_run
//! use insteon::{Plm, PlmEvent};
//! # async fn example(plm: &Plm) {
//! let mut events = plm.subscribe();
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         PlmEvent::StateChanged { address, description, .. } => {
//!             println!("{address}: {description}");
//!         }
//!         other => println!("{other:?}"),
//!     }
//! }
//! # }
//! ```

pub use insteon_core::*;
pub use insteon_plm::{
    Action, CommandName, DatabaseRecord, DeviceDatabase, EngineStats, ExtendedData, ImConfiguration, ImInfo,
    LinkRecord, LinkSpec, Message, ModemAction, Plm, PlmBuilder, PlmConfig, ProductData, Reply, RetryPolicy,
    SuffixMeaning, SuffixRule, ThermostatMode,
};

/// The protocol engine, for access to the command table, codec and other
/// lower-level pieces.
pub mod plm {
    pub use insteon_plm::*;
}

/// Serial transport for the modem.
#[cfg(feature = "serial")]
pub mod transport {
    pub use insteon_transport::*;
}
