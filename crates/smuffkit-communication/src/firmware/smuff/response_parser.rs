//! SMuFF Response Parser
//!
//! Classifies every line received from the device by its prefix. The order of
//! the checks matters: `echo:` lines may contain anything, and `ok` must only
//! be recognized once every other prefix has been ruled out.

use super::commands::{ACTION_PREFIX, PERIODIC_STATES};
use super::config_parser::ConfigCategory;
use super::status_parser::parse_tool_number;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Requests the device makes of the host via `//action:` lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionRequest {
    /// The operator selected a tool on the device itself
    ToolChange(i32),
    Wait,
    Continue,
    Abort,
    Pong,
    Other(String),
}

/// SMuFF response types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SmuffResponse {
    /// The device (re)booted
    Start,
    /// Echo of the periodic states command
    PeriodicStatesEnabled,
    /// `echo: dbg:` debug output
    Debug(String),
    /// `echo: states:` periodic state report (text after the marker)
    States(String),
    /// `echo: busy`
    Busy(String),
    /// Any other `echo:` line
    Echo(String),
    /// `error:` with the message that followed it
    Error(String),
    Action(ActionRequest),
    /// `/* category */` marker preceding a JSON block
    JsonCategory(ConfigCategory),
    /// A JSON payload line
    Json(String),
    /// `FIRMWARE_...` identity line
    FirmwareInfo(String),
    /// Command terminator
    Ok,
    /// Anything else, part of a command's response
    Text(String),
}

impl SmuffResponse {
    /// Whether the line resolves an outstanding command
    pub fn is_terminal(&self) -> bool {
        matches!(self, SmuffResponse::Ok | SmuffResponse::Error(_))
    }
}

impl fmt::Display for SmuffResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::PeriodicStatesEnabled => write!(f, "periodic_states"),
            Self::Debug(text) => write!(f, "debug:{}", text),
            Self::States(text) => write!(f, "states:{}", text),
            Self::Busy(text) => write!(f, "busy:{}", text),
            Self::Echo(text) => write!(f, "echo:{}", text),
            Self::Error(text) => write!(f, "error:{}", text),
            Self::Action(action) => write!(f, "action:{:?}", action),
            Self::JsonCategory(category) => write!(f, "category:{}", category),
            Self::Json(json) => write!(f, "json:{}", json),
            Self::FirmwareInfo(info) => write!(f, "firmware:{}", info),
            Self::Ok => write!(f, "ok"),
            Self::Text(text) => write!(f, "text:{}", text),
        }
    }
}

/// Parse one received line
///
/// Returns `None` for empty lines.
pub fn parse(line: &str) -> Option<SmuffResponse> {
    let line = line.trim_end();
    if line.trim_start().is_empty() {
        return None;
    }

    if line.starts_with("start") {
        return Some(SmuffResponse::Start);
    }

    if line.starts_with(PERIODIC_STATES) {
        return Some(SmuffResponse::PeriodicStatesEnabled);
    }

    if let Some(rest) = line.strip_prefix("echo:") {
        let rest = rest.trim_start();
        if let Some(debug) = rest.strip_prefix("dbg:") {
            return Some(SmuffResponse::Debug(debug.trim().to_string()));
        }
        if let Some(states) = rest.strip_prefix("states:") {
            return Some(SmuffResponse::States(states.trim().to_string()));
        }
        if rest.starts_with("busy") {
            return Some(SmuffResponse::Busy(rest.to_string()));
        }
        return Some(SmuffResponse::Echo(rest.to_string()));
    }

    if let Some(rest) = line.strip_prefix("error:") {
        return Some(SmuffResponse::Error(rest.trim().to_string()));
    }

    if let Some(rest) = line.strip_prefix(ACTION_PREFIX) {
        return Some(SmuffResponse::Action(parse_action(rest.trim())));
    }

    if let Some(rest) = line.strip_prefix("/*") {
        let category = rest.trim_end_matches(['*', '/']).trim();
        return Some(SmuffResponse::JsonCategory(ConfigCategory::from_marker(
            category,
        )));
    }

    if line.starts_with('{') {
        return Some(SmuffResponse::Json(line.to_string()));
    }

    if line.starts_with("FIRMWARE_") {
        return Some(SmuffResponse::FirmwareInfo(line.to_string()));
    }

    if line.starts_with("ok") {
        return Some(SmuffResponse::Ok);
    }

    Some(SmuffResponse::Text(line.to_string()))
}

fn parse_action(text: &str) -> ActionRequest {
    if let Some(tool) = text.strip_prefix('T') {
        let tool = parse_tool_number(tool);
        if tool >= 0 {
            return ActionRequest::ToolChange(tool);
        }
        return ActionRequest::Other(text.to_string());
    }
    if text.starts_with("WAIT") {
        ActionRequest::Wait
    } else if text.starts_with("CONTINUE") {
        ActionRequest::Continue
    } else if text.starts_with("ABORT") {
        ActionRequest::Abort
    } else if text.starts_with("PONG") {
        ActionRequest::Pong
    } else {
        ActionRequest::Other(text.to_string())
    }
}
