//! Engine configuration.
//!
//! [`PlmConfig`] deserializes from TOML. Every key is optional; a missing
//! key takes the default shown below.
//!
//! ```toml
//! device = "/dev/ttyUSB0"
//! timeout_ms = 1000
//! queue_timeout_ms = 5000
//! delay_ms = 400
//! retries = 3
//! queue_interval_ms = 50
//! poller_enabled = false
//! poller_delay_minutes = 5
//! poller_device_gap_ms = 5000
//! dispatch_poll_ms = 50
//! dispatch_max_stalled_polls = 200
//!
//! [serial]
//! baud_rate = 19200
//!
//! [[suffix_rules]]
//! suffix = 2
//! capability = "motion_sensor"
//! meaning = "dusk_dawn"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use insteon_core::error::{Error, Result};
use insteon_transport::SerialConfig;

use crate::actions::RetryPolicy;
use crate::dispatch::{SuffixRule, default_suffix_rules};

/// Default serial device path.
pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlmConfig {
    /// Serial device path.
    pub device: String,
    pub serial: SerialConfig,
    /// Per-expectation deadline unit.
    pub timeout_ms: u64,
    /// Bound from submission to settlement.
    pub queue_timeout_ms: u64,
    /// Delay between retry attempts.
    pub delay_ms: u64,
    /// Attempts per command, including the first.
    pub retries: u32,
    pub queue_interval_ms: u64,
    pub poller_enabled: bool,
    pub poller_delay_minutes: u64,
    pub poller_device_gap_ms: u64,
    pub dispatch_poll_ms: u64,
    pub dispatch_max_stalled_polls: u32,
    pub suffix_rules: Vec<SuffixRule>,
}

impl Default for PlmConfig {
    fn default() -> Self {
        PlmConfig {
            device: DEFAULT_DEVICE.to_string(),
            serial: SerialConfig::default(),
            timeout_ms: 1000,
            queue_timeout_ms: 5000,
            delay_ms: 400,
            retries: 3,
            queue_interval_ms: 50,
            poller_enabled: false,
            poller_delay_minutes: 5,
            poller_device_gap_ms: 5000,
            dispatch_poll_ms: 50,
            dispatch_max_stalled_polls: 200,
            suffix_rules: default_suffix_rules(),
        }
    }
}

impl PlmConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: PlmConfig = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings whose derived durations overflow.
    pub fn validate(&self) -> Result<()> {
        if self.poller_delay_minutes.checked_mul(60).is_none() {
            return Err(Error::Config(format!(
                "poller_delay_minutes = {} is out of range",
                self.poller_delay_minutes
            )));
        }
        if Duration::from_millis(self.dispatch_poll_ms)
            .checked_mul(self.dispatch_max_stalled_polls.max(1))
            .is_none()
        {
            return Err(Error::Config(format!(
                "dispatch_poll_ms = {} x dispatch_max_stalled_polls = {} is out of range",
                self.dispatch_poll_ms, self.dispatch_max_stalled_polls
            )));
        }
        Ok(())
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn queue_interval(&self) -> Duration {
        Duration::from_millis(self.queue_interval_ms.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retries.max(1),
            delay: Duration::from_millis(self.delay_ms),
        }
    }

    pub fn poller_delay(&self) -> Duration {
        Duration::from_secs(self.poller_delay_minutes.saturating_mul(60))
    }

    pub fn poller_device_gap(&self) -> Duration {
        Duration::from_millis(self.poller_device_gap_ms)
    }

    /// How long a single dispatch step may run before it is abandoned.
    pub fn dispatch_stall_limit(&self) -> Duration {
        Duration::from_millis(self.dispatch_poll_ms).saturating_mul(self.dispatch_max_stalled_polls.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::SuffixMeaning;
    use insteon_core::device::Capability;

    #[test]
    fn empty_document_gives_defaults() {
        let config = PlmConfig::from_toml_str("").unwrap();
        assert_eq!(config, PlmConfig::default());
        assert_eq!(config.device, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 19200);
        assert_eq!(config.timeout(), Duration::from_millis(1000));
        assert_eq!(config.queue_timeout(), Duration::from_millis(5000));
        assert_eq!(
            config.retry_policy(),
            RetryPolicy {
                attempts: 3,
                delay: Duration::from_millis(400)
            }
        );
        assert_eq!(config.poller_delay(), Duration::from_secs(300));
        assert!(!config.poller_enabled);
        assert_eq!(config.dispatch_stall_limit(), Duration::from_secs(10));
        assert_eq!(config.suffix_rules.len(), 3);
    }

    #[test]
    fn partial_document_overrides() {
        let config = PlmConfig::from_toml_str(
            r#"
            device = "/dev/ttyS1"
            retries = 5
            poller_enabled = true

            [serial]
            baud = 9600

            [[suffix_rules]]
            suffix = 4
            capability = "openclose"
            meaning = "low_battery"
            "#,
        )
        .unwrap();
        assert_eq!(config.device, "/dev/ttyS1");
        assert_eq!(config.retries, 5);
        assert!(config.poller_enabled);
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.timeout_ms, 1000);
        assert_eq!(
            config.suffix_rules,
            vec![SuffixRule {
                suffix: 4,
                capability: Capability::OpenClose,
                meaning: SuffixMeaning::LowBattery,
            }]
        );
    }

    #[test]
    fn malformed_document_is_config_error() {
        let err = PlmConfig::from_toml_str("retries = \"lots\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = PlmConfig::load("/nonexistent/insteon.toml").unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("/nonexistent/insteon.toml")));
    }

    #[test]
    fn oversized_poller_delay_is_config_error() {
        let err = PlmConfig::from_toml_str(&format!("poller_delay_minutes = {}", u64::MAX / 2)).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("poller_delay_minutes")));
    }

    #[test]
    fn oversized_stall_limit_is_config_error() {
        let err = PlmConfig::from_toml_str(&format!(
            "dispatch_poll_ms = {}\ndispatch_max_stalled_polls = 4294967295",
            i64::MAX
        ))
        .unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("dispatch_poll_ms")));
    }

    #[test]
    fn derived_durations_saturate_instead_of_panicking() {
        let config = PlmConfig {
            poller_delay_minutes: u64::MAX,
            dispatch_poll_ms: u64::MAX,
            dispatch_max_stalled_polls: u32::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.poller_delay(), Duration::from_secs(u64::MAX));
        assert_eq!(config.dispatch_stall_limit(), Duration::MAX);
    }

    #[test]
    fn zero_retries_still_attempts_once() {
        let config = PlmConfig {
            retries: 0,
            ..Default::default()
        };
        assert_eq!(config.retry_policy().attempts, 1);
    }
}
