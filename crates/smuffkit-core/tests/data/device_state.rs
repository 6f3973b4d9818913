use smuffkit_core::{
    ConfigTables, DeviceState, LoadState, Material, StatusSnapshot, ToolChangeStats, NO_TOOL,
};
use std::time::Duration;

#[test]
fn test_default_state_has_no_tool() {
    let state = DeviceState::default();
    assert_eq!(state.current_tool, NO_TOOL);
    assert_eq!(state.pending_tool, NO_TOOL);
    assert_eq!(state.load_state, LoadState::NoTool);
    assert!(!state.has_tool());
}

#[test]
fn test_splitter_bits_follow_tool_selection() {
    let mut state = DeviceState::default();
    state.apply_splitter_bits(0x02);
    assert_eq!(state.load_state, LoadState::NoTool);

    state.current_tool = 0;
    state.apply_splitter_bits(0x02);
    assert_eq!(state.load_state, LoadState::LoadedToNozzle);

    state.apply_splitter_bits(0x01);
    assert_eq!(state.load_state, LoadState::LoadedToSelectorOrSplitter);
}

#[test]
fn test_snapshot_reflects_tables_and_stats() {
    let mut device = DeviceState::with_capabilities(false, true);
    device.device_name = "SMuFF".into();
    device.tool_count = 2;
    device.firmware.version = Some("3.22".into());

    let mut tables = ConfigTables::default();
    tables.replace_materials(vec![
        Material::new("PLA", "Red", 110),
        Material::new("PETG", "Black", 100),
    ]);

    let mut stats = ToolChangeStats::default();
    stats.record(Duration::from_secs(30));
    stats.record(Duration::from_secs(50));

    let snapshot = StatusSnapshot::capture(&device, &tables, &stats, false, "smuffkit 0.4");
    assert_eq!(snapshot.device, "SMuFF");
    assert_eq!(snapshot.tools, 2);
    assert_eq!(snapshot.materials[1].material, "PETG");
    assert_eq!(snapshot.fw_version.as_deref(), Some("3.22"));
    assert!(snapshot.has_wiper);
    assert!(!snapshot.has_cutter);
    assert_eq!(snapshot.tool_changes, 2);
    assert!((snapshot.average_tool_change_secs - 40.0).abs() < 1e-9);
}
