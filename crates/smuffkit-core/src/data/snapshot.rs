//! Point-in-time status of one controller, for external polling

use super::{ConfigTables, DeviceState, LoadState, Material, ToolChangeStats};
use serde::{Deserialize, Serialize};

/// Serializable view over the device mirror, tables and statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub tools: u32,
    pub active_tool: i32,
    pub pending_tool: i32,
    pub selector: bool,
    pub revolver: bool,
    pub feeder: bool,
    pub feeder2: bool,
    pub fw_info: String,
    pub is_busy: bool,
    pub is_error: bool,
    pub is_processing: bool,
    pub is_connected: bool,
    pub is_idle: bool,
    pub sd_state: bool,
    pub lid_state: bool,
    pub config_changed: bool,
    pub has_cutter: bool,
    pub has_wiper: bool,
    pub device: String,
    pub materials: Vec<Material>,
    pub swaps: Vec<i64>,
    pub lid_mappings: Vec<i64>,
    pub feed_states: Vec<i64>,
    pub version: String,
    pub fw_version: Option<String>,
    pub fw_board: Option<String>,
    pub fw_mode: Option<String>,
    pub fw_options: Option<String>,
    pub load_state: LoadState,
    pub is_dde: bool,
    pub has_splitter: bool,
    pub wait_requested: bool,
    pub abort_requested: bool,
    pub uses_tmc: bool,
    pub tmc_warning: bool,
    pub tool_changes: u64,
    pub average_tool_change_secs: f64,
}

impl StatusSnapshot {
    /// Assemble a snapshot from the pieces an engine holds
    pub fn capture(
        device: &DeviceState,
        tables: &ConfigTables,
        stats: &ToolChangeStats,
        connected: bool,
        version: &str,
    ) -> Self {
        Self {
            tools: device.tool_count,
            active_tool: device.current_tool,
            pending_tool: device.pending_tool,
            selector: device.endstops.selector,
            revolver: device.endstops.revolver,
            feeder: device.endstops.feeder,
            feeder2: device.endstops.feeder2,
            fw_info: device.firmware.raw.clone(),
            is_busy: device.busy,
            is_error: device.error,
            is_processing: device.processing,
            is_connected: connected,
            is_idle: device.endstops.idle,
            sd_state: device.endstops.sd_card_present,
            lid_state: device.endstops.lid,
            config_changed: device.endstops.config_changed,
            has_cutter: device.has_cutter,
            has_wiper: device.has_wiper,
            device: device.device_name.clone(),
            materials: tables.materials.clone(),
            swaps: tables.swaps.clone(),
            lid_mappings: tables.servo_map.clone(),
            feed_states: tables.feed_states.clone(),
            version: version.to_string(),
            fw_version: device.firmware.version.clone(),
            fw_board: device.firmware.board.clone(),
            fw_mode: device.firmware.mode.clone(),
            fw_options: device.firmware.options.clone(),
            load_state: device.load_state,
            is_dde: device.has_dde,
            has_splitter: device.has_splitter,
            wait_requested: device.wait_requested,
            abort_requested: device.abort_requested,
            uses_tmc: device.uses_tmc,
            tmc_warning: device.tmc_warning,
            tool_changes: stats.total_changes,
            average_tool_change_secs: stats.average_secs(),
        }
    }
}
