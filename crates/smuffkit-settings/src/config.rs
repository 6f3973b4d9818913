//! Configuration for SMuFFKit
//!
//! Provides configuration file handling and validation.
//! Supports JSON and TOML file formats.
//!
//! Configuration is organized into sections:
//! - `[device]`: the first (or only) controller
//! - `[device_b]`: the second controller, used only when `has_idex` is set
//! - `[connector]`: background connect/reconnect behavior
//! - `[tool_change]`: cadence of the tool change stages

use crate::error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings of one controller connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Serial device path, e.g. `/dev/serial/by-id/...`
    pub serial: String,
    pub baud_rate: u32,
    /// Byte timeout of a single read on the serial line
    pub serial_timeout_s: f64,
    /// Wait bound for ordinary commands
    pub command_timeout_s: f64,
    /// Wait bound for tool changes
    pub toolchange_timeout_s: f64,
    /// Maximum silence before the connection is considered lost
    pub watchdog_timeout_s: f64,
    /// Start the background connector at startup
    pub auto_connect: bool,
    /// Append ` S1` to tool select commands so the device loads the filament
    pub auto_load: bool,
    pub has_cutter: bool,
    pub has_wiper: bool,
    /// Start with raw traffic logging enabled
    pub debug: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            serial: String::new(),
            baud_rate: 115200,
            serial_timeout_s: 5.0,
            command_timeout_s: 20.0,
            toolchange_timeout_s: 90.0,
            watchdog_timeout_s: 60.0,
            auto_connect: true,
            auto_load: true,
            has_cutter: true,
            has_wiper: false,
            debug: false,
        }
    }
}

impl DeviceSettings {
    /// Settings for the given serial path, everything else at defaults
    pub fn for_port(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            ..Self::default()
        }
    }

    pub fn serial_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.serial_timeout_s)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.command_timeout_s)
    }

    pub fn toolchange_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.toolchange_timeout_s)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.watchdog_timeout_s)
    }

    /// Validate the section, prefixing key names with `section`
    pub fn validate(&self, section: &str) -> ConfigResult<()> {
        let key = |name: &str| {
            if section.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", section, name)
            }
        };

        if self.serial.trim().is_empty() {
            return Err(ConfigError::MissingKey(key("serial")));
        }

        if self.baud_rate == 0 {
            return Err(ConfigError::ValueOutOfRange {
                key: key("baud_rate"),
                value: self.baud_rate.to_string(),
            });
        }

        for (name, value) in [
            ("serial_timeout_s", self.serial_timeout_s),
            ("command_timeout_s", self.command_timeout_s),
            ("toolchange_timeout_s", self.toolchange_timeout_s),
            ("watchdog_timeout_s", self.watchdog_timeout_s),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::ValueOutOfRange {
                    key: key(name),
                    value: value.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Background connector behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorSettings {
    /// Delay before the first connection attempt
    pub settle_delay_ms: u64,
    /// Delay between failed connection attempts
    pub retry_interval_ms: u64,
    /// Reconnect when the watchdog reports the connection lost
    pub auto_reconnect: bool,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            settle_delay_ms: 3000,
            retry_interval_ms: 1000,
            auto_reconnect: true,
        }
    }
}

/// Cadence of the tool change stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolChangeSettings {
    pub pre_delay_ms: u64,
    /// Pause after the tool select command before polling for completion
    pub send_settle_ms: u64,
    pub await_poll_ms: u64,
    pub feed_state_delay_ms: u64,
    pub post_delay_ms: u64,
}

impl Default for ToolChangeSettings {
    fn default() -> Self {
        Self {
            pre_delay_ms: 100,
            send_settle_ms: 5000,
            await_poll_ms: 1000,
            feed_state_delay_ms: 200,
            post_delay_ms: 100,
        }
    }
}

/// Complete driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Two independent controllers are attached
    pub has_idex: bool,
    /// Suppress `echo: dbg:` lines entirely
    pub ignore_debug: bool,
    pub device: DeviceSettings,
    pub device_b: Option<DeviceSettings>,
    pub connector: ConnectorSettings,
    pub tool_change: ToolChangeSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            has_idex: false,
            ignore_debug: true,
            device: DeviceSettings::default(),
            device_b: None,
            connector: ConnectorSettings::default(),
            tool_change: ToolChangeSettings::default(),
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)?;

        let config: Self = match extension_of(path)? {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> SettingsResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match extension_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, content).map_err(|source| SettingsError::Save {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("Saved configuration to {}", path.display());

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        self.device.validate("")?;

        if self.has_idex {
            match &self.device_b {
                Some(device_b) => device_b.validate("device_b")?,
                None => return Err(ConfigError::MissingKey("device_b".to_string())),
            }
        }

        if self.connector.retry_interval_ms == 0 {
            return Err(ConfigError::ValueOutOfRange {
                key: "connector.retry_interval_ms".to_string(),
                value: "0".to_string(),
            });
        }

        if self.tool_change.await_poll_ms == 0 {
            return Err(ConfigError::ValueOutOfRange {
                key: "tool_change.await_poll_ms".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }

    /// Device settings per instance id, `A` first
    pub fn instances(&self) -> Vec<(&'static str, &DeviceSettings)> {
        let mut instances = vec![("A", &self.device)];
        if self.has_idex {
            if let Some(device_b) = &self.device_b {
                instances.push(("B", device_b));
            }
        }
        instances
    }
}

enum Format {
    Json,
    Toml,
}

fn extension_of(path: &Path) -> ConfigResult<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(ConfigError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}
