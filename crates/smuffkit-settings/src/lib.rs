//! SMuFFKit Settings Crate
//!
//! Handles loading, validating and saving the driver configuration.

pub mod config;
pub mod error;

pub use config::{Config, ConnectorSettings, DeviceSettings, ToolChangeSettings};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
