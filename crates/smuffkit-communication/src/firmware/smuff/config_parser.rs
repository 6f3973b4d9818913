//! Parser for the JSON configuration blocks
//!
//! The device answers `M503 S{n}W` with a category marker line
//! (`/* materials */`) followed by a single line of JSON. The marker selects
//! how the payload is interpreted. Every block is converted in full before it
//! is applied, so a malformed block never leaves a table half written.

use super::commands::ConfigQuery;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smuffkit_core::{ConfigTables, DeviceState, Material, ProtocolError};
use std::fmt;

/// Category announced by a `/* ... */` marker line
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigCategory {
    Basic,
    Steppers,
    TmcDriver,
    Materials,
    ToolSwaps,
    ServoMapping,
    FeedState,
    Unknown(String),
}

impl ConfigCategory {
    /// Classify the text between the comment delimiters
    pub fn from_marker(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "basic" => ConfigCategory::Basic,
            "steppers" => ConfigCategory::Steppers,
            "tmc driver" => ConfigCategory::TmcDriver,
            "materials" => ConfigCategory::Materials,
            "tool swaps" => ConfigCategory::ToolSwaps,
            "servo mapping" => ConfigCategory::ServoMapping,
            "feed state" => ConfigCategory::FeedState,
            other => ConfigCategory::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ConfigCategory::Basic => "basic",
            ConfigCategory::Steppers => "steppers",
            ConfigCategory::TmcDriver => "tmc driver",
            ConfigCategory::Materials => "materials",
            ConfigCategory::ToolSwaps => "tool swaps",
            ConfigCategory::ServoMapping => "servo mapping",
            ConfigCategory::FeedState => "feed state",
            ConfigCategory::Unknown(name) => name,
        }
    }

    /// The query that produces this category, if any
    pub fn query(&self) -> Option<ConfigQuery> {
        match self {
            ConfigCategory::Basic => Some(ConfigQuery::Basic),
            ConfigCategory::Steppers => Some(ConfigQuery::Steppers),
            ConfigCategory::TmcDriver => Some(ConfigQuery::TmcDriver),
            ConfigCategory::Materials => Some(ConfigQuery::Materials),
            ConfigCategory::ToolSwaps => Some(ConfigQuery::ToolSwaps),
            ConfigCategory::ServoMapping => Some(ConfigQuery::ServoMapping),
            ConfigCategory::FeedState => Some(ConfigQuery::FeedState),
            ConfigCategory::Unknown(_) => None,
        }
    }
}

impl fmt::Display for ConfigCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Contents of the `basic` block
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BasicConfig {
    #[serde(rename = "Device")]
    pub device: String,
    #[serde(rename = "Tools")]
    pub tools: u32,
    #[serde(rename = "UseCutter")]
    pub use_cutter: bool,
    #[serde(rename = "UseSplitter")]
    pub use_splitter: bool,
    #[serde(rename = "UseDDE")]
    pub use_dde: bool,
}

#[derive(Deserialize)]
struct MaterialEntry {
    #[serde(rename = "Material")]
    material: String,
    #[serde(rename = "Color")]
    color: String,
    #[serde(rename = "PFactor")]
    purge_factor: u32,
}

/// A fully parsed configuration block
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigBlock {
    Basic(BasicConfig),
    Materials(Vec<Material>),
    Swaps(Vec<i64>),
    ServoMap(Vec<i64>),
    FeedStates(Vec<i64>),
    /// A category the driver does not keep (steppers, TMC, unknown)
    Ignored(ConfigCategory),
}

impl ConfigBlock {
    /// Parse a JSON payload announced as `category`
    ///
    /// Per-tool tables are read for `T0..T{tool_count-1}`.
    pub fn parse(
        category: &ConfigCategory,
        json: &str,
        tool_count: u32,
    ) -> Result<Self, ProtocolError> {
        let malformed = |reason: String| ProtocolError::MalformedJson {
            category: category.name().to_string(),
            reason,
        };

        let value: Value = serde_json::from_str(json).map_err(|e| malformed(e.to_string()))?;

        match category {
            ConfigCategory::Basic => {
                let basic = BasicConfig::deserialize(&value).map_err(|e| malformed(e.to_string()))?;
                Ok(ConfigBlock::Basic(basic))
            }
            ConfigCategory::Materials => {
                let materials = per_tool(category, &value, tool_count, |entry| {
                    MaterialEntry::deserialize(entry)
                        .map(|m| Material::new(m.material, m.color, m.purge_factor))
                        .map_err(|e| e.to_string())
                })?;
                Ok(ConfigBlock::Materials(materials))
            }
            ConfigCategory::ToolSwaps => {
                let swaps = per_tool(category, &value, tool_count, |entry| {
                    entry.as_i64().ok_or_else(|| "not an integer".to_string())
                })?;
                Ok(ConfigBlock::Swaps(swaps))
            }
            ConfigCategory::ServoMapping => {
                let servo_map = per_tool(category, &value, tool_count, |entry| {
                    entry
                        .get("Close")
                        .and_then(Value::as_i64)
                        .ok_or_else(|| "no integer 'Close' angle".to_string())
                })?;
                Ok(ConfigBlock::ServoMap(servo_map))
            }
            ConfigCategory::FeedState => {
                let feed_states = per_tool(category, &value, tool_count, |entry| match entry {
                    Value::Bool(state) => Ok(i64::from(*state)),
                    other => other
                        .as_i64()
                        .ok_or_else(|| "not a boolean or integer".to_string()),
                })?;
                Ok(ConfigBlock::FeedStates(feed_states))
            }
            ConfigCategory::Steppers | ConfigCategory::TmcDriver | ConfigCategory::Unknown(_) => {
                Ok(ConfigBlock::Ignored(category.clone()))
            }
        }
    }

    /// Store the block in the device mirror and tables
    pub fn apply(self, device: &mut DeviceState, tables: &mut ConfigTables) {
        match self {
            ConfigBlock::Basic(basic) => {
                device.device_name = basic.device;
                device.tool_count = basic.tools;
                device.has_cutter = basic.use_cutter;
                device.has_splitter = basic.use_splitter;
                device.has_dde = basic.use_dde;
            }
            ConfigBlock::Materials(materials) => tables.replace_materials(materials),
            ConfigBlock::Swaps(swaps) => tables.replace_swaps(swaps),
            ConfigBlock::ServoMap(servo_map) => tables.replace_servo_map(servo_map),
            ConfigBlock::FeedStates(feed_states) => tables.replace_feed_states(feed_states),
            ConfigBlock::Ignored(_) => {}
        }
    }
}

fn per_tool<T>(
    category: &ConfigCategory,
    value: &Value,
    tool_count: u32,
    convert: impl Fn(&Value) -> Result<T, String>,
) -> Result<Vec<T>, ProtocolError> {
    (0..tool_count)
        .map(|tool| {
            let key = format!("T{}", tool);
            let entry = value.get(&key).ok_or_else(|| ProtocolError::MissingKey {
                category: category.name().to_string(),
                key: key.clone(),
            })?;
            convert(entry).map_err(|reason| ProtocolError::MalformedJson {
                category: category.name().to_string(),
                reason: format!("{}: {}", key, reason),
            })
        })
        .collect()
}
