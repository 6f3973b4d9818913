//! Tool change sessions and tracked load/unload

use crate::common::*;
use smuffkit_communication::{
    CommandOutcome, SmuffController, Step, ToolChangeOutcome, ToolChangeSession, ToolChangeStage,
    ToolChangeStart,
};
use smuffkit_core::{Error, HostServices, ToolChangeError, NO_TOOL};
use std::sync::atomic::Ordering;
use std::time::Duration;

fn started(controller: &SmuffController, tool: i32) -> ToolChangeSession {
    match controller.change_tool(tool) {
        Ok(ToolChangeStart::Started(session)) => session,
        other => panic!("tool change to T{} did not start: {:?}", tool, other),
    }
}

#[test]
fn test_tool_change_completes() {
    let transport = smuff_device();
    let controller = connected_with(transport.clone(), fast_config(), HostServices::default(), 0);

    let session = started(&controller, 2);
    assert_eq!(session.tool(), 2);
    assert_eq!(session.stage(), ToolChangeStage::Pre);
    assert_eq!(controller.device_state().pending_tool, 2);

    let outcome = session.run_blocking();
    match outcome {
        ToolChangeOutcome::Completed { previous, tool, .. } => {
            assert_eq!(previous, 0);
            assert_eq!(tool, 2);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let device = controller.device_state();
    assert_eq!(device.current_tool, 2);
    assert_eq!(device.previous_tool, 0);
    assert_eq!(device.pending_tool, NO_TOOL);
    assert!(!device.processing);
    assert_eq!(controller.status().tool_changes, 1);
    assert_eq!(transport.count_written("T2 S1"), 1);
    assert!(wait_until(Duration::from_secs(1), || {
        transport.count_written("M503 S8W") == 1
    }));
}

#[tokio::test]
async fn test_tool_change_on_tokio() {
    let transport = smuff_device();
    let controller = connected_with(transport.clone(), fast_config(), HostServices::default(), 1);

    let session = started(&controller, 3);
    let outcome = session.run_async().await;
    assert!(outcome.is_completed());
    assert_eq!(controller.device_state().current_tool, 3);
    assert_eq!(transport.count_written("T3 S1"), 1);
}

#[test]
fn test_stepping_by_hand() {
    let transport = smuff_device();
    let controller = connected_with(transport, fast_config(), HostServices::default(), 0);

    let mut session = started(&controller, 1);
    let mut stages = vec![session.stage()];
    while let Step::Continue(delay) = session.step() {
        std::thread::sleep(delay);
        if stages.last() != Some(&session.stage()) {
            stages.push(session.stage());
        }
    }
    stages.push(session.stage());
    assert_eq!(
        stages,
        vec![
            ToolChangeStage::Pre,
            ToolChangeStage::Send,
            ToolChangeStage::Await,
            ToolChangeStage::QueryFeedState,
            ToolChangeStage::Post,
            ToolChangeStage::Finalize,
            ToolChangeStage::Done,
        ]
    );
    assert!(session.outcome().is_some_and(ToolChangeOutcome::is_completed));
    assert_eq!(session.step(), Step::Done);
}

#[test]
fn test_same_tool_is_skipped() {
    let transport = smuff_device();
    let host = RecordingHost::new();
    let controller = connected_with(transport.clone(), fast_config(), host.services(), 2);
    transport.take_written();

    match controller.change_tool(2).unwrap() {
        ToolChangeStart::AlreadyLoaded(tool) => assert_eq!(tool, 2),
        other => panic!("unexpected start {:?}", other),
    }
    assert!(transport.written().is_empty());
    assert_eq!(controller.status().tool_changes, 0);
    assert!(host
        .messages()
        .iter()
        .any(|m| m == "Selected tool (T2) is already loaded. Skipping tool change."));
}

#[test]
fn test_invalid_tool_is_rejected() {
    let transport = smuff_device();
    let controller = connected_with(transport.clone(), fast_config(), HostServices::default(), 0);
    transport.take_written();

    let err = controller.change_tool(9).unwrap_err();
    assert!(matches!(
        err,
        Error::ToolChange(ToolChangeError::InvalidTool {
            tool: 9,
            tool_count: 5
        })
    ));
    assert!(controller.change_tool(-2).is_err());
    assert_eq!(controller.device_state().pending_tool, NO_TOOL);
    assert!(transport.written().is_empty());
}

#[test]
fn test_second_change_is_busy() {
    let transport = smuff_device();
    let controller = connected_with(transport, fast_config(), HostServices::default(), 0);

    let session = started(&controller, 2);
    assert!(matches!(
        controller.change_tool(3),
        Err(Error::ToolChange(ToolChangeError::Busy))
    ));
    assert!(matches!(
        controller.load(),
        Err(Error::ToolChange(ToolChangeError::Busy))
    ));

    drop(session);
    let device = controller.device_state();
    assert_eq!(device.pending_tool, NO_TOOL);
    assert!(!device.processing);
    assert!(started(&controller, 3).run_blocking().is_completed());
}

#[test]
fn test_device_error_aborts_change() {
    let transport = scripted_device(|command| match command {
        "T2 S1" => Some(vec![
            "error: Feeder jammed".to_string(),
            "ok".to_string(),
        ]),
        _ => None,
    });
    let host = RecordingHost::new();
    let controller = connected_with(transport, fast_config(), host.services(), 0);

    let outcome = started(&controller, 2).run_blocking();
    match outcome {
        ToolChangeOutcome::Aborted { tool, reason, .. } => {
            assert_eq!(tool, 2);
            assert!(reason.contains("Feeder jammed"), "reason: {}", reason);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(controller.device_state().current_tool, 0);
    assert_eq!(controller.status().tool_changes, 1);
    assert!(host
        .messages()
        .iter()
        .any(|m| m.starts_with("Tool change to T2 aborted")));
}

#[test]
fn test_silent_device_times_out() {
    let transport = scripted_device(|command| match command {
        "T4 S1" => Some(Vec::new()),
        _ => None,
    });
    let mut config = fast_config();
    config.toolchange_timeout = Duration::from_millis(300);
    let controller = connected_with(transport, config, HostServices::default(), 0);

    match started(&controller, 4).run_blocking() {
        ToolChangeOutcome::Aborted { reason, elapsed, .. } => {
            assert!(reason.contains("timed out"), "reason: {}", reason);
            assert!(elapsed >= Duration::from_millis(300));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(controller.device_state().current_tool, 0);
}

#[test]
fn test_pre_macro_failure_aborts_before_sending() {
    let transport = smuff_device();
    let host = RecordingHost::new();
    host.printing.store(true, Ordering::SeqCst);
    host.fail_pre.store(true, Ordering::SeqCst);
    let controller = connected_with(transport.clone(), fast_config(), host.services(), 0);

    let outcome = started(&controller, 2).run_blocking();
    assert!(!outcome.is_completed());
    assert_eq!(transport.count_written("T2 S1"), 0);
    assert_eq!(host.calls(), vec!["pre 2".to_string()]);
    assert_eq!(controller.device_state().current_tool, 0);
}

#[test]
fn test_macros_follow_print_state() {
    let transport = smuff_device();
    let host = RecordingHost::new();
    let controller = connected_with(transport, fast_config(), host.services(), 0);

    host.printing.store(true, Ordering::SeqCst);
    assert!(started(&controller, 2).run_blocking().is_completed());
    assert_eq!(host.calls(), vec!["pre 2".to_string()]);

    host.printing.store(false, Ordering::SeqCst);
    host.paused.store(true, Ordering::SeqCst);
    assert!(started(&controller, 4).run_blocking().is_completed());
    assert_eq!(
        host.calls(),
        vec!["pre 2".to_string(), "post 2 4".to_string()]
    );
}

#[test]
fn test_load_requires_tool() {
    let controller = connected_with(smuff_device(), fast_config(), HostServices::default(), NO_TOOL);
    assert!(matches!(
        controller.load(),
        Err(Error::ToolChange(ToolChangeError::NoToolSelected))
    ));
    assert!(matches!(
        controller.unload(),
        Err(Error::ToolChange(ToolChangeError::NoToolSelected))
    ));
}

#[test]
fn test_load_in_flight_is_busy() {
    let transport = scripted_device(|command| match command {
        "M700" => Some(Vec::new()),
        _ => None,
    });
    let mut config = fast_config();
    config.command_timeout = Duration::from_millis(200);
    let controller = connected_with(transport.clone(), config, HostServices::default(), 1);

    let ticket = controller.load().unwrap();
    assert!(controller.poll(&ticket).is_none());
    assert!(matches!(
        controller.unload(),
        Err(Error::ToolChange(ToolChangeError::Busy))
    ));
    assert!(wait_until(Duration::from_secs(2), || {
        controller.poll(&ticket) == Some(CommandOutcome::TimedOut)
    }));
    assert_eq!(transport.count_written("M700"), 1);
}

#[tokio::test]
async fn test_unload_resolves() {
    let transport = scripted_device(|command| match command {
        "M701" => Some(vec!["Unloaded".to_string(), "ok".to_string()]),
        _ => None,
    });
    let controller = connected_with(transport, fast_config(), HostServices::default(), 1);

    let ticket = controller.unload().unwrap();
    let outcome = controller
        .wait_for(&ticket, Duration::from_millis(10))
        .await;
    assert_eq!(outcome, CommandOutcome::Response("Unloaded".to_string()));
}

#[test]
fn test_tool_change_waits_for_earlier_command() {
    let transport = scripted_device(|command| match command {
        "G12 C" => Some(Vec::new()),
        _ => None,
    });
    let controller = connected_with(transport.clone(), fast_config(), HostServices::default(), 0);

    controller.cut().unwrap();
    let session = started(&controller, 2);
    let handle = std::thread::spawn(move || session.run_blocking());

    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(transport.count_written("T2 S1"), 0);

    // the device finally finishes cutting
    transport.push_line("ok");
    let outcome = handle.join().unwrap();
    assert!(outcome.is_completed(), "unexpected outcome {:?}", outcome);
    assert_eq!(controller.device_state().current_tool, 2);

    let written = transport.written();
    let cut = written.iter().position(|l| l == "G12 C");
    let select = written.iter().position(|l| l == "T2 S1");
    assert!(cut.is_some() && select.is_some() && cut < select, "{:?}", written);
}

#[test]
fn test_commands_queue_behind_tool_select() {
    let transport = scripted_device(|command| match command {
        "T2 S1" => Some(Vec::new()),
        _ => None,
    });
    let controller = connected_with(transport.clone(), fast_config(), HostServices::default(), 0);

    let session = started(&controller, 2);
    let handle = std::thread::spawn(move || session.run_blocking());
    assert!(wait_until(Duration::from_secs(1), || {
        transport.count_written("T2 S1") == 1
    }));

    controller.cut().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(transport.count_written("G12 C"), 0);

    transport.push_lines([states_line(2).as_str(), "ok"]);
    let outcome = handle.join().unwrap();
    assert!(outcome.is_completed(), "unexpected outcome {:?}", outcome);
    assert!(wait_until(Duration::from_secs(1), || {
        transport.count_written("G12 C") == 1
    }));
}
