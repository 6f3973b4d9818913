//! Routing of received lines through a connected controller

use crate::common::*;
use smuffkit_communication::communication::mock::{MockOpener, MockTransport};
use smuffkit_communication::SmuffController;
use smuffkit_core::{HostServices, LoadState, Material};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// Push `lines` followed by a state line and wait until that state line
/// has been handled, so everything before it was routed too
fn push_and_settle(controller: &SmuffController, transport: &MockTransport, lines: &[&str]) {
    let seen = controller.device_state().state_lines;
    let current = controller.device_state().current_tool;
    transport.push_lines(lines.iter().copied());
    transport.push_line(states_line(current));
    assert!(wait_until(Duration::from_secs(2), || {
        controller.device_state().state_lines > seen
    }));
}

#[test]
fn test_states_line_updates_device() {
    let transport = smuff_device();
    let controller = connected_with(transport.clone(), fast_config(), HostServices::default(), 0);
    let seen = controller.device_state().state_lines;

    transport.push_line(
        "echo: states: T: T3  S: off  R: off  F: on  F2: off  SD: off  SC: off  LID: on  I: off  SPL: 0",
    );
    assert!(wait_until(Duration::from_secs(2), || {
        controller.device_state().state_lines == seen + 1
    }));

    let device = controller.device_state();
    assert_eq!(device.current_tool, 3);
    assert!(!device.endstops.selector);
    assert!(device.endstops.feeder);
    assert!(device.endstops.lid);
    assert_eq!(device.load_state, LoadState::NotLoaded);
}

#[test]
fn test_materials_for_single_tool() {
    let transport = scripted_device(|command| match command {
        "M503 S1W" => Some(vec![
            "/* basic */".to_string(),
            r#"{"Device":"SMuFF","Tools":1,"UseCutter":false,"UseSplitter":false,"UseDDE":false}"#
                .to_string(),
            "ok".to_string(),
        ]),
        "M503 S5W" => Some(vec![
            "/* materials */".to_string(),
            r#"{"T0":{"Material":"PLA","Color":"Red","PFactor":110}}"#.to_string(),
            "ok".to_string(),
        ]),
        _ => None,
    });
    let controller = SmuffController::new(
        fast_config(),
        MockOpener::with_transport(transport),
        HostServices::default(),
    );
    controller.connect().unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        controller.tables().servo_map.len() == 1
    }));

    assert_eq!(controller.device_state().tool_count, 1);
    assert_eq!(
        controller.tables().materials,
        vec![Material::new("PLA", "Red", 110)]
    );
}

#[test]
fn test_malformed_json_keeps_table() {
    let transport = smuff_device();
    let controller = connected_with(transport.clone(), fast_config(), HostServices::default(), 0);
    let before = controller.tables();

    push_and_settle(
        &controller,
        &transport,
        &["/* materials */", r#"{"T0":{"Material":"PETG""#],
    );
    assert_eq!(controller.tables(), before);

    push_and_settle(&controller, &transport, &[r#"{"T0":{"Material":"ABS"}}"#]);
    assert_eq!(controller.tables(), before);
}

#[test]
fn test_device_error_fails_request() {
    let transport = scripted_device(|command| match command {
        "X1" => Some(vec![
            "error: Unknown command: X1".to_string(),
            "ok".to_string(),
        ]),
        "M119" => Some(vec![
            "M119".to_string(),
            "Endstops: open".to_string(),
            "ok".to_string(),
        ]),
        _ => None,
    });
    let host = RecordingHost::new();
    let controller = connected_with(transport.clone(), fast_config(), host.services(), 0);

    let started = Instant::now();
    let err = controller.send_raw("X1").unwrap_err();
    assert!(err.is_device_error());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(err.to_string().contains("Unknown command: X1"));
    assert!(transport.clear_count() >= 1);
    assert!(controller.device_state().error);
    assert!(host
        .messages()
        .iter()
        .any(|m| m.contains("Unknown command: X1")));

    // the trailing ok of the failed command must not resolve the next one
    push_and_settle(&controller, &transport, &[]);
    let response = controller.send_raw("M119").unwrap();
    assert_eq!(response.as_deref(), Some("Endstops: open"));
}

#[test]
fn test_error_without_trailing_ok_leaves_next_command_intact() {
    let transport = scripted_device(|command| match command {
        "X1" => Some(vec!["error: Unknown command: X1".to_string()]),
        _ => None,
    });
    let controller = connected_with(transport.clone(), fast_config(), HostServices::default(), 0);

    let err = controller.send_raw("X1").unwrap_err();
    assert!(err.is_device_error());

    let started = Instant::now();
    let response = controller.send_raw("M18").unwrap();
    assert_eq!(response.as_deref(), Some(""));
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "M18 took {:?}",
        started.elapsed()
    );
}

#[test]
fn test_echo_of_command_is_suppressed() {
    let transport = scripted_device(|command| match command {
        "M119" => Some(vec![
            "M119".to_string(),
            "Selector: open".to_string(),
            "Feeder: triggered".to_string(),
            "ok".to_string(),
        ]),
        _ => None,
    });
    let host = RecordingHost::new();
    let controller = connected_with(transport, fast_config(), host.services(), 0);

    let response = controller.send_raw("M119").unwrap();
    assert_eq!(
        response.as_deref(),
        Some("Selector: open\nFeeder: triggered")
    );
    assert!(host
        .messages()
        .iter()
        .any(|m| m == "SMuFF responded with Selector: open\nFeeder: triggered."));
}

#[test]
fn test_silent_device_times_out_on_bound() {
    let transport = scripted_device(|command| match command {
        "M119" => Some(Vec::new()),
        _ => None,
    });
    let mut config = fast_config();
    config.command_timeout = Duration::from_millis(300);
    let controller = connected_with(transport, config, HostServices::default(), 0);

    let started = Instant::now();
    let err = controller.send_raw("M119").unwrap_err();
    let elapsed = started.elapsed();
    assert!(err.is_timeout(), "unexpected error {}", err);
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(550), "took {:?}", elapsed);
}

#[test]
fn test_busy_is_not_terminal() {
    let transport = scripted_device(|command| match command {
        "G28" => Some(vec!["echo: busy".to_string()]),
        _ => None,
    });
    let mut config = fast_config();
    config.command_timeout = Duration::from_millis(300);
    let controller = connected_with(transport, config, HostServices::default(), 0);

    let started = Instant::now();
    let err = controller.send_raw("G28").unwrap_err();
    assert!(err.is_timeout(), "unexpected error {}", err);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(controller.device_state().busy);
}

#[test]
fn test_remote_tool_change_accepted() {
    let transport = smuff_device();
    let host = RecordingHost::new();
    let _controller = connected_with(transport.clone(), fast_config(), host.services(), 0);

    transport.push_line("//action: T2");
    assert!(transport.wait_for_written(Duration::from_secs(2), |line| {
        line == "//action: T: OK"
    }));
    assert_eq!(host.calls(), vec!["select 2".to_string()]);
}

#[test]
fn test_remote_tool_change_while_printing() {
    let transport = smuff_device();
    let host = RecordingHost::new();
    host.printing.store(true, Ordering::SeqCst);
    let _controller = connected_with(transport.clone(), fast_config(), host.services(), 0);

    transport.push_line("//action: T1");
    assert!(transport.wait_for_written(Duration::from_secs(2), |line| {
        line == "//action: T: \"Printer not ready\""
    }));
    assert!(host.calls().is_empty());
}

#[test]
fn test_remote_tool_change_cold_nozzle() {
    let transport = smuff_device();
    let host = RecordingHost::new();
    host.cold.store(true, Ordering::SeqCst);
    let _controller = connected_with(transport.clone(), fast_config(), host.services(), 0);

    transport.push_line("//action: T1");
    assert!(transport.wait_for_written(Duration::from_secs(2), |line| {
        line == "//action: T: \"Nozzle too cold\""
    }));
    assert!(host.calls().is_empty());
}

#[test]
fn test_flow_control_actions() {
    let transport = smuff_device();
    let controller = connected_with(transport.clone(), fast_config(), HostServices::default(), 0);

    push_and_settle(&controller, &transport, &["//action: WAIT"]);
    assert!(controller.device_state().wait_requested);

    push_and_settle(&controller, &transport, &["//action: ABORT"]);
    let device = controller.device_state();
    assert!(!device.wait_requested);
    assert!(device.abort_requested);

    push_and_settle(&controller, &transport, &["//action: CONTINUE", "//action: PONG"]);
    let device = controller.device_state();
    assert!(!device.wait_requested);
    assert!(!device.abort_requested);
}

#[test]
fn test_device_start_restarts_configuration() {
    let transport = smuff_device();
    let controller = connected_with(transport.clone(), fast_config(), HostServices::default(), 0);
    assert_eq!(transport.count_written("M155 S1"), 1);

    transport.push_line("start");
    assert!(wait_until(Duration::from_secs(2), || {
        transport.count_written("M155 S1") == 2
    }));
    assert!(wait_until(Duration::from_secs(3), || {
        transport.count_written("M503 S4W") == 2
    }));
    assert!(controller.device_state().periodic_states);
}

#[test]
fn test_debug_lines_do_not_touch_state() {
    let transport = smuff_device();
    let controller = connected_with(transport.clone(), fast_config(), HostServices::default(), 0);
    let before = controller.device_state();

    push_and_settle(
        &controller,
        &transport,
        &["echo: dbg: Feeder moved 10mm", "echo: hello"],
    );
    let after = controller.device_state();
    assert_eq!(after.current_tool, before.current_tool);
    assert!(!after.busy);
    assert!(!after.error);
}
