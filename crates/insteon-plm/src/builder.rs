//! PlmBuilder -- fluent builder for constructing [`Plm`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! the serial port, timeouts, retry policy, and background tasks before
//! the modem connection is opened.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use insteon_plm::PlmBuilder;
//! # use insteon_core::device::DeviceDirectory;
//!
//! # async fn example(devices: Arc<dyn DeviceDirectory>) -> insteon_core::Result<()> {
//! let plm = PlmBuilder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .timeout(Duration::from_millis(1500))
//!     .retries(5)
//!     .build(devices)
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use insteon_core::device::DeviceDirectory;
use insteon_core::error::{Error, Result};
use insteon_core::transport::Transport;

use crate::config::PlmConfig;
use crate::dispatch::SuffixRule;
use crate::plm::Plm;

/// Fluent builder for [`Plm`].
///
/// Every setting defaults to the value in [`PlmConfig::default`].
#[derive(Debug, Clone, Default)]
pub struct PlmBuilder {
    config: PlmConfig,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl PlmBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration file.
    pub fn from_config(config: PlmConfig) -> Self {
        PlmBuilder { config }
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0` or `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.config.device = port.to_string();
        self
    }

    /// Override the baud rate (default: 19200).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.config.serial.baud_rate = baud;
        self
    }

    /// Deadline unit for expected responses (default: 1s). A command's
    /// i-th expected response waits `timeout * i`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = millis(timeout);
        self
    }

    /// Bound from submission to settlement (default: 5s).
    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.config.queue_timeout_ms = millis(timeout);
        self
    }

    /// Attempts per command, including the first (default: 3).
    pub fn retries(mut self, n: u32) -> Self {
        self.config.retries = n;
        self
    }

    /// Pause between attempts (default: 400ms).
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.delay_ms = millis(delay);
        self
    }

    pub fn queue_interval(mut self, interval: Duration) -> Self {
        self.config.queue_interval_ms = millis(interval);
        self
    }

    /// Enable or disable the background status poller (default: off).
    pub fn poller(mut self, enabled: bool) -> Self {
        self.config.poller_enabled = enabled;
        self
    }

    /// Pause between poller sweeps, in whole minutes.
    pub fn poller_delay_minutes(mut self, minutes: u64) -> Self {
        self.config.poller_delay_minutes = minutes;
        self
    }

    pub fn poller_device_gap(mut self, gap: Duration) -> Self {
        self.config.poller_device_gap_ms = millis(gap);
        self
    }

    pub fn dispatch_poll(mut self, interval: Duration) -> Self {
        self.config.dispatch_poll_ms = millis(interval);
        self
    }

    pub fn dispatch_max_stalled_polls(mut self, n: u32) -> Self {
        self.config.dispatch_max_stalled_polls = n;
        self
    }

    /// Replace the sensor group-destination rules.
    pub fn suffix_rules(mut self, rules: Vec<SuffixRule>) -> Self {
        self.config.suffix_rules = rules;
        self
    }

    pub fn config(&self) -> &PlmConfig {
        &self.config
    }

    /// Build a [`Plm`] over a caller-provided transport.
    ///
    /// This is the entry point for testing (pass a `MockTransport` from
    /// `insteon-test-harness`) and for callers that manage the transport
    /// themselves.
    pub async fn build_with_transport(
        self,
        transport: Box<dyn Transport>,
        devices: Arc<dyn DeviceDirectory>,
    ) -> Result<Plm> {
        if self.config.timeout_ms == 0 {
            return Err(Error::InvalidParameter("timeout must be non-zero".into()));
        }
        if self.config.queue_timeout_ms == 0 {
            return Err(Error::InvalidParameter("queue timeout must be non-zero".into()));
        }
        self.config.validate()?;
        Ok(Plm::start(transport, devices, &self.config))
    }

    /// Open the configured serial port and build a [`Plm`] over it.
    pub async fn build(self, devices: Arc<dyn DeviceDirectory>) -> Result<Plm> {
        if self.config.device.is_empty() {
            return Err(Error::InvalidParameter("serial port is required for build()".into()));
        }
        let transport = insteon_transport::SerialTransport::open_with_config(
            &self.config.device,
            self.config.serial.clone(),
        )
        .await?;
        self.build_with_transport(Box::new(transport), devices).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::RetryPolicy;
    use insteon_test_harness::{MemoryDirectory, MockTransport};

    fn directory() -> Arc<MemoryDirectory> {
        Arc::new(MemoryDirectory::new())
    }

    #[tokio::test]
    async fn builder_defaults() {
        let builder = PlmBuilder::new();
        assert_eq!(builder.config(), &PlmConfig::default());

        let plm = builder
            .build_with_transport(Box::new(MockTransport::new()), directory())
            .await
            .unwrap();
        let stats = plm.stats().await.unwrap();
        assert_eq!(stats.queued, 0);
        assert!(!stats.linking);
    }

    #[tokio::test]
    async fn builder_fluent_chain() {
        let builder = PlmBuilder::new()
            .serial_port("/dev/ttyS3")
            .baud_rate(9600)
            .timeout(Duration::from_millis(1500))
            .queue_timeout(Duration::from_secs(8))
            .retries(5)
            .retry_delay(Duration::from_millis(250))
            .poller(true)
            .poller_delay_minutes(10)
            .poller_device_gap(Duration::from_secs(2))
            .dispatch_max_stalled_polls(20);

        let config = builder.config();
        assert_eq!(config.device, "/dev/ttyS3");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.timeout_ms, 1500);
        assert_eq!(config.queue_timeout_ms, 8000);
        assert_eq!(
            config.retry_policy(),
            RetryPolicy {
                attempts: 5,
                delay: Duration::from_millis(250)
            }
        );
        assert!(config.poller_enabled);
        assert_eq!(config.poller_delay(), Duration::from_secs(600));
        assert_eq!(config.dispatch_stall_limit(), Duration::from_secs(1));

        let plm = builder
            .build_with_transport(Box::new(MockTransport::new()), directory())
            .await
            .unwrap();
        drop(plm);
    }

    #[tokio::test]
    async fn from_config_keeps_settings() {
        let config = PlmConfig::from_toml_str("retries = 7\ndevice = \"/dev/ttyACM0\"").unwrap();
        let builder = PlmBuilder::from_config(config);
        assert_eq!(builder.config().retries, 7);
        assert_eq!(builder.config().device, "/dev/ttyACM0");
    }

    #[tokio::test]
    async fn zero_timeout_is_rejected() {
        let result = PlmBuilder::new()
            .timeout(Duration::ZERO)
            .build_with_transport(Box::new(MockTransport::new()), directory())
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn overflowing_poller_delay_is_rejected() {
        let result = PlmBuilder::new()
            .poller_delay_minutes(u64::MAX)
            .build_with_transport(Box::new(MockTransport::new()), directory())
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn serial_port_required_for_build() {
        let result = PlmBuilder::new().serial_port("").build(directory()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_serial_device_fails_to_open() {
        let result = PlmBuilder::new()
            .serial_port("/dev/nonexistent-insteon-modem")
            .build(directory())
            .await;
        assert!(matches!(result, Err(Error::TransportOpen(_))));
    }
}
