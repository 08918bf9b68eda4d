//! Serial port transport for modem communication.
//!
//! This module provides [`SerialTransport`], which implements the [`Transport`]
//! trait for the PowerLinc Modem's serial interface. USB modems (2413U) show
//! up as an FTDI virtual COM port; the serial-only 2413S uses a real RS-232
//! port. Both run at 19200 baud, 8N1, no flow control.
//!
//! # Example
//!
//! ```no_run
//! use insteon_transport::SerialTransport;
//! use insteon_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> insteon_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 19200).await?;
//!
//! // GET_IM_INFO
//! transport.send(&[0x02, 0x60]).await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use insteon_core::error::{Error, Result};
use insteon_core::transport::Transport;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Baud rate of every PowerLinc Modem.
pub const PLM_BAUD_RATE: u32 = 19200;

/// Serial port configuration.
///
/// Defaults match the PLM: 19200 baud, 8 data bits, 1 stop bit, no parity,
/// no flow control. Deserializes from a TOML table where every key is
/// optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate
    #[serde(alias = "baud")]
    pub baud_rate: u32,
    /// Number of data bits
    #[serde(alias = "databits")]
    pub data_bits: DataBits,
    /// Number of stop bits
    #[serde(alias = "stopbits")]
    pub stop_bits: StopBits,
    /// Parity checking
    pub parity: Parity,
    /// Flow control
    #[serde(alias = "flowcontrol")]
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: PLM_BAUD_RATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = String;

    fn try_from(bits: u8) -> std::result::Result<Self, String> {
        match bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(format!("unsupported data bits: {other}")),
        }
    }
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => tokio_serial::DataBits::Five,
            DataBits::Six => tokio_serial::DataBits::Six,
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum StopBits {
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(bits: u8) -> std::result::Result<Self, String> {
        match bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(format!("unsupported stop bits: {other}")),
        }
    }
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

/// Serial port transport for the PLM.
pub struct SerialTransport {
    /// The underlying serial port stream
    port: Option<SerialStream>,
    /// Port name for logging/debugging
    port_name: String,
}

impl SerialTransport {
    /// Open a serial port with the given baud rate and default settings
    /// (8N1, no flow control).
    ///
    /// # Arguments
    ///
    /// * `port` - Serial port path (e.g., "/dev/ttyUSB0" on Linux, "COM3" on Windows)
    /// * `baud_rate` - Baud rate; the PLM always uses 19200
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig {
            baud_rate,
            ..Default::default()
        };
        Self::open_with_config(port, config).await
    }

    /// Open a serial port with full configuration control.
    ///
    /// Failure is reported as [`Error::TransportOpen`], which callers treat
    /// as fatal.
    pub async fn open_with_config(port: &str, config: SerialConfig) -> Result<Self> {
        tracing::debug!(
            port = %port,
            baud_rate = config.baud_rate,
            data_bits = ?config.data_bits,
            stop_bits = ?config.stop_bits,
            parity = ?config.parity,
            flow_control = ?config.flow_control,
            "Opening serial port"
        );

        let serial_stream = tokio_serial::new(port, config.baud_rate)
            .data_bits(config.data_bits.into())
            .stop_bits(config.stop_bits.into())
            .parity(config.parity.into())
            .flow_control(config.flow_control.into())
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %port, error = %e, "Failed to open serial port");
                Error::TransportOpen(format!("{port}: {e}"))
            })?;

        tracing::info!(port = %port, baud_rate = config.baud_rate, "Serial port opened");

        Ok(Self {
            port: Some(serial_stream),
            port_name: port.to_string(),
        })
    }

    /// Get the name of the serial port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

fn map_io_error(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::BrokenPipe || e.kind() == std::io::ErrorKind::NotConnected {
        Error::ConnectionLost
    } else {
        Error::Io(e)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(port = %self.port_name, bytes = data.len(), data = ?data, "Sending data");

        port.write_all(data).await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "Failed to send data");
            map_io_error(e)
        })?;

        port.flush().await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "Failed to flush serial port");
            Error::Io(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, port.read(buf)).await {
            Ok(Ok(0)) => {
                tracing::warn!(port = %self.port_name, "Serial port reported end of stream");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                tracing::trace!(port = %self.port_name, bytes = n, data = ?&buf[..n], "Received data");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(port = %self.port_name, error = %e, "Failed to receive data");
                Err(map_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            tracing::debug!(port = %self.port_name, "Closing serial port");

            if let Err(e) = port.flush().await {
                tracing::warn!(
                    port = %self.port_name,
                    error = %e,
                    "Failed to flush before closing (continuing anyway)"
                );
            }

            tracing::info!(port = %self.port_name, "Serial port closed");
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.port.is_some() {
            tracing::debug!(port = %self.port_name, "SerialTransport dropped, closing port");
        }
    }
}
