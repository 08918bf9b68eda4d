// insteon test application -- CLI tool for exercising an Insteon PowerLinc
// Modem against real hardware or a mock transport.
//
// Usage:
//   insteon-test-app --port /dev/ttyUSB0 info
//   insteon-test-app --port /dev/ttyUSB0 on 11.22.33
//   insteon-test-app --port /dev/ttyUSB0 level 11.22.33 40
//   insteon-test-app --port /dev/ttyUSB0 status 11.22.33
//   insteon-test-app --port /dev/ttyUSB0 records
//   insteon-test-app --port /dev/ttyUSB0 database 11.22.33
//   insteon-test-app --port /dev/ttyUSB0 beep 11.22.33 --count 3
//   insteon-test-app --port /dev/ttyUSB0 link --mode controller --no-auto-add
//   insteon-test-app --config insteon.toml monitor --duration 60
//   insteon-test-app --mock info
//
// Set RUST_LOG=debug to see queue and expectation traffic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use insteon::{Address, LinkMode, Plm, PlmBuilder, PlmConfig, PlmEvent};
use insteon::plm::LINK_WINDOW;
use insteon_test_harness::{MemoryDevice, MemoryDirectory, MockTransport};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// insteon test application -- drives an Insteon PLM from the command line.
#[derive(Parser)]
#[command(name = "insteon-test-app", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyUSB0, COM3). Overrides the
    /// configuration file.
    #[arg(long)]
    port: Option<String>,

    /// Override the baud rate (default 19200).
    #[arg(long)]
    baud: Option<u32>,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<String>,

    /// Use a mock transport instead of a real serial port.
    /// Useful for verifying CLI parsing and builder wiring without hardware.
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

fn parse_address(s: &str) -> std::result::Result<Address, String> {
    s.parse::<Address>().map_err(|e| e.to_string())
}

#[derive(Subcommand)]
enum Command {
    /// Show the modem's address, category and firmware.
    Info,

    /// Show the modem's configuration flags.
    Config,

    /// Turn a device on.
    On {
        #[arg(value_parser = parse_address)]
        address: Address,
    },

    /// Turn a device off.
    Off {
        #[arg(value_parser = parse_address)]
        address: Address,
    },

    /// Set a dimmer's brightness.
    Level {
        #[arg(value_parser = parse_address)]
        address: Address,
        /// Brightness in percent (0-100).
        percent: u8,
    },

    /// Ask a device for its current level.
    Status {
        #[arg(value_parser = parse_address)]
        address: Address,
    },

    /// Dump the modem's all-link database.
    Records,

    /// Dump a device's own all-link database.
    Database {
        #[arg(value_parser = parse_address)]
        address: Address,
    },

    /// Make a device beep.
    Beep {
        #[arg(value_parser = parse_address)]
        address: Address,
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Put the modem into linking mode and wait for a device.
    Link {
        /// responder, controller, either, or deleted.
        #[arg(long, default_value = "controller")]
        mode: String,

        /// Stage the linked device instead of creating it.
        #[arg(long)]
        no_auto_add: bool,
    },

    /// Take the modem out of linking mode.
    Unlink,

    /// Print engine events as they arrive.
    Monitor {
        /// Seconds to monitor (0 = until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
}

// ---------------------------------------------------------------------------
// Engine construction
// ---------------------------------------------------------------------------

fn load_config(cli: &Cli) -> Result<PlmConfig> {
    let mut config = match &cli.config {
        Some(path) => PlmConfig::load(path).with_context(|| format!("failed to load {path}"))?,
        None => PlmConfig::default(),
    };
    if let Some(port) = &cli.port {
        config.device = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    tracing::debug!(device = %config.device, baud = config.serial.baud_rate, retries = config.retries, "configuration loaded");
    Ok(config)
}

/// A mock modem that answers GET_IM_INFO and GET_IM_CONFIGURATION.
fn mock_transport() -> MockTransport {
    let mut mock = MockTransport::new();
    mock.expect(&[0x02, 0x60], &[0x02, 0x60, 0x1A, 0x2B, 0x3C, 0x03, 0x15, 0x9B, 0x06]);
    mock.expect(&[0x02, 0x73], &[0x02, 0x73, 0x48, 0x00, 0x00, 0x06]);
    mock
}

async fn create_plm(cli: &Cli, devices: Arc<MemoryDirectory>) -> Result<Plm> {
    let config = load_config(cli)?;
    let device = config.device.clone();
    let baud = config.serial.baud_rate;
    let builder = PlmBuilder::from_config(config);

    if cli.mock {
        let plm = builder
            .build_with_transport(Box::new(mock_transport()), devices)
            .await
            .context("failed to build engine with mock transport")?;
        println!("Connected (mock transport)");
        Ok(plm)
    } else {
        let plm = builder
            .build(devices)
            .await
            .with_context(|| format!("failed to open modem on {device} at {baud} baud"))?;
        println!("Connected to {device} at {baud} baud");
        Ok(plm)
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_info(plm: &Plm) -> Result<()> {
    let info = plm.modem_info().await.context("GET_IM_INFO failed")?;
    println!("Modem Information");
    println!("  Address:        {}", info.address);
    println!("  Category:       {:02X}.{:02X}", info.category, info.subcategory);
    println!("  Firmware:       {:02X}", info.firmware);
    Ok(())
}

async fn cmd_config(plm: &Plm) -> Result<()> {
    let config = plm.modem_config().await.context("GET_IM_CONFIGURATION failed")?;
    println!("Modem Configuration ({:02X})", config.flags);
    println!("  Auto-linking disabled: {}", config.auto_linking_disabled());
    println!("  Monitor mode:          {}", config.monitor_mode());
    println!("  Auto LED:              {}", config.auto_led());
    println!("  Deadman:               {}", config.deadman());
    Ok(())
}

async fn cmd_records(plm: &Plm) -> Result<()> {
    let records = plm.link_records().await.context("failed to read link database")?;
    if records.is_empty() {
        println!("Link database is empty.");
        return Ok(());
    }
    println!("{:<10} {:<6} {:<11} {:<8}", "Address", "Group", "Role", "Data");
    for record in &records {
        println!(
            "{:<10} {:<6} {:<11} {:02X} {:02X} {:02X}",
            record.address.to_string(),
            record.group,
            if record.is_controller() { "controller" } else { "responder" },
            record.data[0],
            record.data[1],
            record.data[2],
        );
    }
    println!("{} record(s)", records.len());
    Ok(())
}

async fn cmd_database(plm: &Plm, devices: &MemoryDirectory, address: Address) -> Result<()> {
    // Database access is limited to known devices.
    devices.add(MemoryDevice::new(&address.to_string(), address, &[]));
    let db = plm
        .load_database(address)
        .await
        .with_context(|| format!("failed to read the database of {address}"))?;
    println!("Database of {address} (delta {})", db.delta);
    println!("{:<7} {:<10} {:<6} {:<11} {:<8}", "Offset", "Address", "Group", "Role", "Data");
    for record in db.links() {
        println!(
            "{:04X}    {:<10} {:<6} {:<11} {:02X} {:02X} {:02X}",
            record.offset,
            record.address.to_string(),
            record.group,
            if record.is_controller() { "controller" } else { "responder" },
            record.on_level,
            record.ramp_rate,
            record.button,
        );
    }
    println!("{} link(s)", db.links().count());
    Ok(())
}

async fn cmd_link(plm: &Plm, mode: &str, auto_add: bool) -> Result<()> {
    let mode: LinkMode = mode.parse()?;
    let mut events = plm.subscribe();
    plm.start_linking(mode, auto_add)
        .await
        .context("failed to start linking")?;
    println!("Linking ({mode:?}). Press the set button on the device...");

    let deadline = Instant::now() + LINK_WINDOW + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            bail!("no device linked");
        }
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(PlmEvent::DeviceLinked(d))) => {
                println!("Linked {} ({}) as {:?}", d.address, d.name, d.capabilities);
                return Ok(());
            }
            Ok(Ok(PlmEvent::DeviceStaged(d))) => {
                println!("Staged {} for confirmation ({:?})", d.address, d.capabilities);
                return Ok(());
            }
            Ok(Ok(PlmEvent::LinkingStopped { reason })) => {
                println!("Linking ended: {reason:?}");
            }
            Ok(Ok(_)) => {}
            Ok(Err(RecvError::Lagged(n))) => {
                println!("[warning] missed {n} events (consumer too slow)");
            }
            Ok(Err(RecvError::Closed)) => bail!("event channel closed"),
            Err(_) => bail!("no device linked"),
        }
    }
}

async fn cmd_monitor(plm: &Plm, duration_secs: u64) -> Result<()> {
    let mut events = plm.subscribe();

    println!("Monitoring modem events (Ctrl-C to stop)...");

    let deadline = (duration_secs > 0).then(|| Instant::now() + Duration::from_secs(duration_secs));

    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Monitor duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        match tokio::time::timeout(timeout, events.recv()).await {
            Ok(Ok(PlmEvent::MessageReceived { summary, .. })) => println!("[rx] {summary}"),
            Ok(Ok(event)) => println!("[event] {event:?}"),
            Ok(Err(RecvError::Lagged(n))) => {
                println!("[warning] missed {n} events (consumer too slow)");
            }
            Ok(Err(RecvError::Closed)) => {
                println!("Event channel closed.");
                break;
            }
            Err(_) => {
                if deadline.is_some() {
                    println!("Monitor duration elapsed.");
                }
                break;
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if let Command::Level { percent, .. } = &cli.command {
        if *percent > 100 {
            bail!("level must be 0-100, got {percent}");
        }
    }

    let devices = Arc::new(MemoryDirectory::new());
    let plm = create_plm(&cli, Arc::clone(&devices)).await?;

    let result = match &cli.command {
        Command::Info => cmd_info(&plm).await,
        Command::Config => cmd_config(&plm).await,
        Command::On { address } => plm.turn_on(*address).await.context("LIGHT_ON failed").map(|_| {
            println!("{address} on");
        }),
        Command::Off { address } => plm.turn_off(*address).await.context("LIGHT_OFF failed").map(|_| {
            println!("{address} off");
        }),
        Command::Level { address, percent } => plm
            .set_level(*address, *percent)
            .await
            .context("LIGHT_LEVEL failed")
            .map(|_| println!("{address} at {percent}%")),
        Command::Status { address } => plm
            .level(*address)
            .await
            .context("LIGHT_STATUS failed")
            .map(|level| println!("{address}: {level}%")),
        Command::Records => cmd_records(&plm).await,
        Command::Database { address } => cmd_database(&plm, &devices, *address).await,
        Command::Beep { address, count } => plm
            .beep(*address, *count)
            .await
            .context("BEEP failed")
            .map(|_| println!("{address} beeped")),
        Command::Link { mode, no_auto_add } => cmd_link(&plm, mode, !no_auto_add).await,
        Command::Unlink => plm
            .stop_linking()
            .await
            .context("failed to stop linking")
            .map(|_| println!("Linking stopped")),
        Command::Monitor { duration } => cmd_monitor(&plm, *duration).await,
    };

    plm.shutdown().await.ok();
    result
}
