//! Turn a light on, read its level back, and turn it off again.
//!
//! # Requirements
//!
//! - An Insteon PLM (2413U or 2413S) on a serial port
//! - A linked dimmer or switch; adjust the address below
//!
//! # Usage
//!
//! ```sh
//! cargo run -p insteon --example toggle_light
//! ```

use std::sync::Arc;
use std::time::Duration;

use insteon::{Address, Capability, PlmBuilder};
use insteon_test_harness::{MemoryDevice, MemoryDirectory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let serial_port = "/dev/ttyUSB0";
    let lamp: Address = "11.22.33".parse()?;

    let devices = Arc::new(MemoryDirectory::new());
    let device = devices.add(MemoryDevice::new("Lamp", lamp, &[Capability::Light, Capability::Dimmer]));

    println!("Connecting to PLM on {serial_port}...");
    let plm = PlmBuilder::new().serial_port(serial_port).build(devices).await?;

    let info = plm.modem_info().await?;
    println!("Modem {} firmware {:02X}\n", info.address, info.firmware);

    plm.turn_on(lamp).await?;
    println!("{lamp} on, level {}%", plm.level(lamp).await?);

    tokio::time::sleep(Duration::from_secs(2)).await;

    plm.set_level(lamp, 30).await?;
    println!("{lamp} dimmed, level {}%", plm.level(lamp).await?);

    tokio::time::sleep(Duration::from_secs(2)).await;

    plm.turn_off(lamp).await?;
    println!("{lamp} off");

    println!("\nState changes recorded:");
    for (delta, description) in device.states() {
        println!("  {description}: {delta:?}");
    }

    plm.shutdown().await?;
    Ok(())
}
