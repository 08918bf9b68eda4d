//! Pair a new device with the modem.
//!
//! Opens a linking session with auto-add disabled, waits for a device to
//! complete the link, then confirms the staged device into the directory.
//!
//! # Requirements
//!
//! - An Insteon PLM on a serial port
//! - A device to pair: hold its set button until it beeps once the modem
//!   is in linking mode
//!
//! # Usage
//!
//! ```sh
//! cargo run -p insteon --example pair_device
//! ```

use std::sync::Arc;

use insteon::plm::LINK_WINDOW;
use insteon::{LinkMode, PlmBuilder, PlmEvent};
use insteon_test_harness::MemoryDirectory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let devices = Arc::new(MemoryDirectory::new());
    let plm = PlmBuilder::new()
        .serial_port("/dev/ttyUSB0")
        .build(devices.clone())
        .await?;

    let mut events = plm.subscribe();
    plm.start_linking(LinkMode::Controller, false).await?;
    println!(
        "Modem is in linking mode for {} seconds. Press the device's set button now.",
        LINK_WINDOW.as_secs()
    );

    loop {
        match events.recv().await? {
            PlmEvent::DeviceStaged(descriptor) => {
                println!(
                    "Device {} linked (category {:02X?}), capabilities {:?}",
                    descriptor.address, descriptor.config.category, descriptor.capabilities
                );
                break;
            }
            PlmEvent::DeviceLinked(descriptor) => {
                println!("Existing device {} re-linked", descriptor.address);
                plm.shutdown().await?;
                return Ok(());
            }
            PlmEvent::LinkingStopped { reason } => {
                println!("Linking ended without a device: {reason:?}");
                plm.shutdown().await?;
                return Ok(());
            }
            _ => {}
        }
    }

    if let Some(confirmed) = plm.confirm_staged().await? {
        println!("Added {} as {:?}", confirmed.address, confirmed.name);
    }
    println!("Directory now holds {} device(s)", devices.created().len());

    plm.shutdown().await?;
    Ok(())
}
