//! Configuration loading and parsing

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use telemetry_bus::{ChannelConfig, DispatcherConfig, Frame, SensorConfig};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub sensor: Option<SensorConfig>,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub transmit: Vec<TransmitConfig>,
}

/// How the CLI manages interface bring-up/teardown
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkConfig {
    /// Bring interfaces up before opening and down after the run
    #[serde(default = "default_true")]
    pub manage: bool,
    /// Run `ip` through sudo
    #[serde(default = "default_true")]
    pub sudo: bool,
    /// Data-phase bitrate for CAN FD interfaces
    #[serde(default = "default_data_bitrate")]
    pub data_bitrate: u32,
}

fn default_true() -> bool {
    true
}

fn default_data_bitrate() -> u32 {
    2_000_000
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            manage: true,
            sudo: true,
            data_bitrate: default_data_bitrate(),
        }
    }
}

/// A periodic frame sent by the dispatcher
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransmitConfig {
    pub channel: String,
    pub id: u32,
    #[serde(default = "default_period")]
    pub period_ms: u64,
    #[serde(default)]
    pub payload: Vec<u8>,
    /// Payload index overwritten with a wrapping counter on every send
    pub counter_byte: Option<usize>,
}

fn default_period() -> u64 {
    100
}

/// Semantic problems in an otherwise well-formed configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no channels and no sensor configured")]
    Empty,

    #[error("channel '{0}' is listed more than once")]
    DuplicateChannel(String),

    #[error("transmit entry 0x{id:X} refers to unknown channel '{channel}'")]
    UnknownChannel { id: u32, channel: String },

    #[error("transmit entry 0x{id:X}: counter byte {index} is outside the {len}-byte payload")]
    CounterOutOfRange { id: u32, index: usize, len: usize },

    #[error("transmit entry 0x{id:X} is not a valid frame: {reason}")]
    InvalidFrame { id: u32, reason: String },
}

impl AppConfig {
    /// Check cross-references between sections
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.channels.is_empty() && self.sensor.is_none() {
            return Err(ConfigError::Empty);
        }

        let mut names = HashSet::new();
        for channel in &self.channels {
            if !names.insert(channel.name.as_str()) {
                return Err(ConfigError::DuplicateChannel(channel.name.clone()));
            }
        }

        for entry in &self.transmit {
            if !names.contains(entry.channel.as_str()) {
                return Err(ConfigError::UnknownChannel {
                    id: entry.id,
                    channel: entry.channel.clone(),
                });
            }
            // Same construction the periodic producer uses
            if let Err(e) = Frame::new(entry.id, &entry.payload) {
                return Err(ConfigError::InvalidFrame {
                    id: entry.id,
                    reason: e.to_string(),
                });
            }
            if let Some(index) = entry.counter_byte {
                if index >= entry.payload.len() {
                    return Err(ConfigError::CounterOutOfRange {
                        id: entry.id,
                        index,
                        len: entry.payload.len(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [[channels]]
            name = "can0"

            [[channels]]
            name = "can1"
            bitrate = 500000
            fd = true

            [sensor]
            spi_path = "/dev/spidev0.1"

            [dispatcher]
            poll_interval_ms = 50

            [link]
            sudo = false

            [[transmit]]
            channel = "can0"
            id = 0x123
            payload = [0, 0x22, 0x33]
            counter_byte = 0
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[0].bitrate, 1_000_000);
        assert!(!config.channels[0].fd);
        assert_eq!(config.channels[1].bitrate, 500_000);
        assert!(config.channels[1].fd);

        let sensor = config.sensor.as_ref().unwrap();
        assert_eq!(sensor.spi_path, "/dev/spidev0.1");
        assert_eq!(sensor.expected_chip_id, 0x61);

        assert_eq!(config.dispatcher.poll_interval_ms, 50);
        assert_eq!(config.dispatcher.receive_timeout_ms, 10);
        assert!(config.link.manage);
        assert!(!config.link.sudo);
        assert_eq!(config.transmit[0].id, 0x123);
        assert_eq!(config.transmit[0].period_ms, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut config: AppConfig = toml::from_str("").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Empty)));

        config.channels.push(ChannelConfig::new("can0"));
        config.channels.push(ChannelConfig::new("can0"));
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateChannel(_))));

        config.channels.pop();
        config.transmit.push(TransmitConfig {
            channel: "can1".to_string(),
            id: 0x10,
            period_ms: 100,
            payload: vec![],
            counter_byte: None,
        });
        assert!(matches!(config.validate(), Err(ConfigError::UnknownChannel { .. })));

        config.transmit[0].channel = "can0".to_string();
        config.transmit[0].counter_byte = Some(0);
        assert!(matches!(config.validate(), Err(ConfigError::CounterOutOfRange { .. })));
    }

    #[test]
    fn test_invalid_transmit_frames_rejected() {
        let mut config: AppConfig = toml::from_str("[[channels]]\nname = \"can0\"").unwrap();
        config.transmit.push(TransmitConfig {
            channel: "can0".to_string(),
            id: 0x800,
            period_ms: 100,
            payload: vec![0; 8],
            counter_byte: None,
        });
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFrame { id: 0x800, .. })));

        config.transmit[0].id = 0x7FF;
        assert!(config.validate().is_ok());

        config.transmit[0].payload = vec![0; 9];
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFrame { id: 0x7FF, .. })));
    }

    #[test]
    fn test_load_config_rejects_oversized_payload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[channels]]\nname = \"vcan0\"\n\n[[transmit]]\nchannel = \"vcan0\"\nid = 0x10\npayload = [1, 2, 3, 4, 5, 6, 7, 8, 9]"
        )
        .unwrap();

        let error = load_config(file.path()).unwrap_err();
        assert!(format!("{:#}", error).contains("not a valid frame"));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[channels]]\nname = \"vcan0\"\n\n[link]\nmanage = false").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.channels[0].name, "vcan0");
        assert!(!config.link.manage);
    }

    #[test]
    fn test_load_config_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[channels]]\nbitrate = \"fast\"").unwrap();

        let error = load_config(file.path()).unwrap_err();
        assert!(format!("{:#}", error).contains("Failed to parse config file"));
    }
}
