//! Settings errors
//!
//! Anything reported here is fatal at startup: the driver refuses to build
//! an engine from a configuration it could not read or validate.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Reading, writing or validating a configuration file failed
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Cannot read configuration: {0}")]
    Io(#[from] io::Error),

    #[error("Cannot write configuration to {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Cannot render TOML configuration: {0}")]
    TomlRender(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ConfigError),
}

/// A configuration that parsed but cannot drive a device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required setting absent or blank, e.g. the serial device path
    #[error("Missing setting '{0}'")]
    MissingKey(String),

    #[error("Unsupported configuration format '{0}', use .toml or .json")]
    UnsupportedFormat(String),

    #[error("Invalid value for '{key}': {value}")]
    ValueOutOfRange { key: String, value: String },
}

pub type SettingsResult<T> = Result<T, SettingsError>;

pub type ConfigResult<T> = Result<T, ConfigError>;
