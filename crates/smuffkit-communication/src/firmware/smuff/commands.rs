//! SMuFF command vocabulary
//!
//! Builders for every GCode line the driver sends. The transport appends the
//! line terminator.

use std::fmt;

/// Query the firmware identity
pub const FIRMWARE_INFO: &str = "M115";
/// Prefix of the periodic states command (and of its echo)
pub const PERIODIC_STATES: &str = "M155";
pub const WIPE: &str = "G12";
pub const CUT: &str = "G12 C";
pub const LID_OPEN: &str = "M280 R0";
pub const LID_CLOSE: &str = "M280 R1";
pub const HOME: &str = "G28";
pub const LOAD: &str = "M700";
pub const UNLOAD: &str = "M701";
pub const MOTORS_OFF: &str = "M18";
pub const CLEAR_JAM: &str = "M562";
pub const RESET: &str = "M999";
/// Prefix of every tool select command
pub const TOOL_PREFIX: &str = "T";

/// Prefix of action lines in both directions
pub const ACTION_PREFIX: &str = "//action:";

/// Enable or disable periodic state reporting
pub fn periodic_states(enabled: bool) -> String {
    format!("{} S{}", PERIODIC_STATES, if enabled { 1 } else { 0 })
}

/// Move a servo to an angle in degrees
pub fn set_servo(servo: u32, angle: u32) -> String {
    format!("M280 P{} S{}", servo, angle)
}

/// Select a tool, optionally loading its filament afterwards
pub fn select_tool(tool: i32, auto_load: bool) -> String {
    if auto_load {
        format!("{}{} S1", TOOL_PREFIX, tool)
    } else {
        format!("{}{}", TOOL_PREFIX, tool)
    }
}

/// Change a configuration parameter on the device
pub fn set_parameter(name: &str, value: &str) -> String {
    format!("M205 P\"{}\"S{}", name, value)
}

/// Whether a command is a tool select (and waits with the tool change bound)
pub fn is_tool_select(command: &str) -> bool {
    command.starts_with(TOOL_PREFIX)
}

/// First whitespace-separated token of a command, used for echo matching
pub fn command_token(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or("")
}

/// Configuration blocks that can be requested with `M503`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigQuery {
    Basic,
    Steppers,
    TmcDriver,
    ServoMapping,
    Materials,
    ToolSwaps,
    FeedState,
}

impl ConfigQuery {
    /// Section number understood by the firmware
    pub fn section(self) -> u8 {
        match self {
            ConfigQuery::Basic => 1,
            ConfigQuery::Steppers => 2,
            ConfigQuery::TmcDriver => 3,
            ConfigQuery::ServoMapping => 4,
            ConfigQuery::Materials => 5,
            ConfigQuery::ToolSwaps => 6,
            ConfigQuery::FeedState => 8,
        }
    }

    /// The `M503` line requesting this block as JSON
    pub fn command(self) -> String {
        format!("M503 S{}W", self.section())
    }
}

/// Replies to a controller initiated tool change request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionReply {
    Ok,
    NozzleTooCold,
    NoNozzleTemp,
    PrinterNotReady,
}

impl fmt::Display for ActionReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionReply::Ok => write!(f, "{} T: OK", ACTION_PREFIX),
            ActionReply::NozzleTooCold => write!(f, "{} T: \"Nozzle too cold\"", ACTION_PREFIX),
            ActionReply::NoNozzleTemp => {
                write!(f, "{} T: \"No nozzle temp. avail.\"", ACTION_PREFIX)
            }
            ActionReply::PrinterNotReady => {
                write!(f, "{} T: \"Printer not ready\"", ACTION_PREFIX)
            }
        }
    }
}
