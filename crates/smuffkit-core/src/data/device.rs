//! In-memory mirror of the controller
//!
//! Written by the response demultiplexer (periodic state lines, configuration
//! blocks, firmware info) and by the tool change state machine; read by
//! everything else.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tool index meaning "no tool selected"
pub const NO_TOOL: i32 = -1;

/// Where the filament of the active tool currently resides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LoadState {
    /// No tool is selected
    #[default]
    NoTool,
    /// Tool selected, filament not loaded
    NotLoaded,
    /// Loaded up to the selector or the splitter
    LoadedToSelectorOrSplitter,
    /// Loaded up to the nozzle
    LoadedToNozzle,
    /// Loaded into the direct drive extruder
    LoadedToDDE,
}

impl LoadState {
    /// Derive the load state from the `SPL:` bitmask of a periodic state line
    ///
    /// Returns `None` for bit patterns that carry no load information, in which
    /// case the previous load state stays in effect.
    pub fn from_splitter_bits(current_tool: i32, bits: u32) -> Option<Self> {
        if current_tool == NO_TOOL {
            return Some(LoadState::NoTool);
        }
        match bits {
            0 => Some(LoadState::NotLoaded),
            0x01 | 0x10 => Some(LoadState::LoadedToSelectorOrSplitter),
            0x02 | 0x20 => Some(LoadState::LoadedToNozzle),
            0x40 => Some(LoadState::LoadedToDDE),
            _ => None,
        }
    }

    /// Numeric code used by status consumers (-1 = no tool)
    pub fn code(self) -> i32 {
        match self {
            LoadState::NoTool => -1,
            LoadState::NotLoaded => 0,
            LoadState::LoadedToSelectorOrSplitter => 1,
            LoadState::LoadedToNozzle => 2,
            LoadState::LoadedToDDE => 3,
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LoadState::NoTool => "no tool",
            LoadState::NotLoaded => "not loaded",
            LoadState::LoadedToSelectorOrSplitter => "loaded to selector/splitter",
            LoadState::LoadedToNozzle => "loaded to nozzle",
            LoadState::LoadedToDDE => "loaded to DDE",
        };
        f.write_str(text)
    }
}

/// Endstop and switch states reported by the periodic state line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Endstops {
    /// Selector endstop triggered
    pub selector: bool,
    /// Revolver endstop triggered
    pub revolver: bool,
    /// Feeder endstop triggered
    pub feeder: bool,
    /// Second (DDE) feeder endstop triggered
    pub feeder2: bool,
    /// Lid closed
    pub lid: bool,
    /// SD card present
    pub sd_card_present: bool,
    /// Settings were changed on the device
    pub config_changed: bool,
    /// Device reports idle
    pub idle: bool,
}

/// Firmware identity as reported by `M115`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FirmwareInfo {
    /// The complete line as received
    pub raw: String,
    pub version: Option<String>,
    pub board: Option<String>,
    pub mode: Option<String>,
    pub options: Option<String>,
}

impl FirmwareInfo {
    /// Whether a firmware line was received at all
    pub fn is_known(&self) -> bool {
        !self.raw.is_empty()
    }
}

/// The device mirror
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub current_tool: i32,
    pub pending_tool: i32,
    pub previous_tool: i32,
    pub endstops: Endstops,
    pub load_state: LoadState,
    /// Last raw `SPL:` value
    pub splitter_bits: u32,
    pub busy: bool,
    pub error: bool,
    /// A blocking command is being waited on
    pub processing: bool,
    pub firmware: FirmwareInfo,
    pub device_name: String,
    pub tool_count: u32,
    pub has_cutter: bool,
    pub has_wiper: bool,
    pub has_splitter: bool,
    pub has_dde: bool,
    pub uses_tmc: bool,
    pub tmc_warning: bool,
    /// `//action: WAIT` received and not yet cleared
    pub wait_requested: bool,
    /// `//action: ABORT` received and not yet cleared
    pub abort_requested: bool,
    /// The device acknowledged periodic state reporting
    pub periodic_states: bool,
    /// Number of periodic state lines parsed since construction
    pub state_lines: u64,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            current_tool: NO_TOOL,
            pending_tool: NO_TOOL,
            previous_tool: NO_TOOL,
            endstops: Endstops::default(),
            load_state: LoadState::NoTool,
            splitter_bits: 0,
            busy: false,
            error: false,
            processing: false,
            firmware: FirmwareInfo::default(),
            device_name: String::new(),
            tool_count: 0,
            has_cutter: false,
            has_wiper: false,
            has_splitter: false,
            has_dde: false,
            uses_tmc: false,
            tmc_warning: false,
            wait_requested: false,
            abort_requested: false,
            periodic_states: false,
            state_lines: 0,
        }
    }
}

impl DeviceState {
    /// Create a mirror seeded with the locally configured capabilities
    pub fn with_capabilities(has_cutter: bool, has_wiper: bool) -> Self {
        Self {
            has_cutter,
            has_wiper,
            ..Self::default()
        }
    }

    /// Whether a tool is currently selected
    pub fn has_tool(&self) -> bool {
        self.current_tool != NO_TOOL
    }

    /// Whether `tool` is a valid index for this device
    ///
    /// Indices above the reported tool count are rejected; an index equal to
    /// the count is let through to the device, which answers for itself.
    pub fn accepts_tool(&self, tool: i32) -> bool {
        tool >= 0 && tool <= self.tool_count as i32
    }

    /// Apply an `SPL:` bitmask against the current tool
    pub fn apply_splitter_bits(&mut self, bits: u32) {
        self.splitter_bits = bits;
        if let Some(state) = LoadState::from_splitter_bits(self.current_tool, bits) {
            self.load_state = state;
        }
    }
}
