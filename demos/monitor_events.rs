//! Monitor engine events.
//!
//! Subscribes to the engine's event stream and prints everything that
//! arrives for 60 seconds: raw modem messages, device state changes from
//! switches and sensors, and reports from devices the directory does not
//! know.
//!
//! # Requirements
//!
//! - An Insteon PLM on a serial port
//!
//! # Usage
//!
//! ```sh
//! RUST_LOG=insteon_plm=debug cargo run -p insteon --example monitor_events
//! ```

use std::sync::Arc;
use std::time::Duration;

use insteon::{PlmBuilder, PlmEvent};
use insteon_test_harness::MemoryDirectory;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let serial_port = "/dev/ttyUSB0";
    println!("Connecting to PLM on {serial_port}...");

    let plm = PlmBuilder::new()
        .serial_port(serial_port)
        .build(Arc::new(MemoryDirectory::new()))
        .await?;

    let mut events = plm.subscribe();
    println!("Monitoring for 60 seconds. Press a switch paddle or walk past a sensor.\n");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    loop {
        let event = match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) => event,
            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(n))) => {
                println!("  (missed {n} events)");
                continue;
            }
            Ok(Err(_)) | Err(_) => break,
        };

        match event {
            PlmEvent::MessageReceived { summary, .. } => println!("[rx]      {summary}"),
            PlmEvent::StateChanged {
                address,
                description,
                ..
            } => println!("[state]   {address}: {description}"),
            PlmEvent::UnknownDevice { address, command } => {
                println!("[unknown] {address} sent {command}")
            }
            PlmEvent::Disconnected { error } => println!("[link]    modem lost: {error}"),
            PlmEvent::Reconnected => println!("[link]    modem back"),
            other => println!("[event]   {other:?}"),
        }
    }

    println!("\nDone.");
    plm.shutdown().await?;
    Ok(())
}
