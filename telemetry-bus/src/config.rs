//! Bus configuration types
//!
//! Plain data describing channels, sensors and dispatcher timing. The
//! application layer loads these from its configuration file; the library
//! only consumes them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of one CAN channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Network interface name (e.g. "can0")
    pub name: String,

    /// Nominal bitrate in bit/s
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    /// Open the channel with CAN FD frames enabled
    #[serde(default)]
    pub fd: bool,
}

fn default_bitrate() -> u32 {
    1_000_000
}

impl ChannelConfig {
    /// Create a classic channel configuration at the default bitrate
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bitrate: default_bitrate(),
            fd: false,
        }
    }

    /// Builder method: set the bitrate
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Builder method: enable or disable CAN FD
    pub fn with_fd(mut self, enabled: bool) -> Self {
        self.fd = enabled;
        self
    }
}

/// Configuration of a BME68x sensor on a spidev node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Name reported with each reading
    #[serde(default = "default_sensor_name")]
    pub name: String,

    /// spidev device node
    #[serde(default = "default_spi_path")]
    pub spi_path: String,

    /// SPI clock in Hz
    #[serde(default = "default_max_speed_hz")]
    pub max_speed_hz: u32,

    /// Value expected in the chip identity register
    #[serde(default = "default_chip_id")]
    pub expected_chip_id: u8,

    /// Period between scheduled reads in milliseconds
    #[serde(default = "default_read_interval")]
    pub read_interval_ms: u64,
}

fn default_sensor_name() -> String {
    "bme688".to_string()
}

fn default_spi_path() -> String {
    "/dev/spidev0.0".to_string()
}

fn default_max_speed_hz() -> u32 {
    1_000_000
}

fn default_chip_id() -> u8 {
    crate::device::bme688::EXPECTED_CHIP_ID
}

fn default_read_interval() -> u64 {
    1000
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            name: default_sensor_name(),
            spi_path: default_spi_path(),
            max_speed_hz: default_max_speed_hz(),
            expected_chip_id: default_chip_id(),
            read_interval_ms: default_read_interval(),
        }
    }
}

impl SensorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the spidev node
    pub fn with_spi_path(mut self, path: impl Into<String>) -> Self {
        self.spi_path = path.into();
        self
    }

    /// Builder method: set the read period
    pub fn with_read_interval(mut self, interval: Duration) -> Self {
        self.read_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn read_interval(&self) -> Duration {
        Duration::from_millis(self.read_interval_ms)
    }
}

/// Timing of the dispatcher poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Sleep between loop iterations in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Receive window per channel and iteration in milliseconds
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_ms: u64,
}

fn default_poll_interval() -> u64 {
    100
}

fn default_receive_timeout() -> u64 {
    10
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            receive_timeout_ms: default_receive_timeout(),
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method: set the per-channel receive timeout
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_builder() {
        let config = ChannelConfig::new("can1").with_bitrate(500_000).with_fd(true);
        assert_eq!(config.name, "can1");
        assert_eq!(config.bitrate, 500_000);
        assert!(config.fd);
    }

    #[test]
    fn test_dispatcher_defaults() {
        let config = DispatcherConfig::new();
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.receive_timeout(), Duration::from_millis(10));

        let config = config
            .with_poll_interval(Duration::from_millis(5))
            .with_receive_timeout(Duration::from_millis(1));
        assert_eq!(config.poll_interval_ms, 5);
        assert_eq!(config.receive_timeout_ms, 1);
    }

    #[test]
    fn test_sensor_defaults() {
        let config = SensorConfig::new().with_spi_path("/dev/spidev1.0");
        assert_eq!(config.name, "bme688");
        assert_eq!(config.spi_path, "/dev/spidev1.0");
        assert_eq!(config.max_speed_hz, 1_000_000);
        assert_eq!(config.expected_chip_id, 0x61);
        assert_eq!(config.read_interval(), Duration::from_secs(1));
    }
}
