//! Two devices behind one coordinator

use crate::common::*;
use smuffkit_communication::communication::mock::{MockOpener, MockTransport};
use smuffkit_communication::{
    Coordinator, Instance, Operation, OperationResult, SmuffController, ToolChangeStart,
};
use std::sync::Arc;
use std::time::Duration;

struct Rig {
    coordinator: Coordinator,
    a: Arc<MockTransport>,
    b: Arc<MockTransport>,
    host: Arc<RecordingHost>,
}

fn rig() -> Rig {
    let a = smuff_device();
    let b = smuff_device();
    let host = RecordingHost::new();
    let coordinator = Coordinator::dual(
        (fast_config(), MockOpener::with_transport(a.clone())),
        (fast_config(), MockOpener::with_transport(b.clone())),
        host.services(),
    );
    for (instance, transport) in [(Instance::A, &a), (Instance::B, &b)] {
        coordinator.execute_on(instance, Operation::Connect).unwrap();
        let controller = coordinator.controller(instance).unwrap();
        assert!(wait_until(Duration::from_secs(3), || init_complete(controller)));
        transport.push_line(states_line(0));
        assert!(wait_until(Duration::from_secs(2), || {
            controller.device_state().current_tool == 0
        }));
    }
    Rig {
        coordinator,
        a,
        b,
        host,
    }
}

fn controller(rig: &Rig, instance: Instance) -> &SmuffController {
    rig.coordinator.controller(instance).unwrap()
}

#[test]
fn test_tool_change_on_b_leaves_a_alone() {
    let rig = rig();
    rig.coordinator.select_instance(Instance::B).unwrap();
    assert_eq!(rig.coordinator.active_instance(), Instance::B);

    let session = match rig.coordinator.execute(Operation::ChangeTool(2)).unwrap() {
        OperationResult::ToolChange(ToolChangeStart::Started(session)) => session,
        other => panic!("unexpected result {:?}", other),
    };
    assert!(session.run_blocking().is_completed());

    assert_eq!(controller(&rig, Instance::B).device_state().current_tool, 2);
    assert_eq!(controller(&rig, Instance::A).device_state().current_tool, 0);
    assert_eq!(controller(&rig, Instance::B).status().tool_changes, 1);
    assert_eq!(controller(&rig, Instance::A).status().tool_changes, 0);
    assert_eq!(rig.b.count_written("T2 S1"), 1);
    assert_eq!(rig.a.count_written("T2 S1"), 0);
}

#[test]
fn test_messages_carry_instance() {
    let rig = rig();
    rig.coordinator
        .execute_on(Instance::B, Operation::Cut)
        .unwrap();
    rig.coordinator
        .execute_on(Instance::A, Operation::Wipe)
        .unwrap();

    let messages = rig.host.messages();
    assert!(messages.iter().any(|m| m == " [ B ]  Cutting filament..."));
    assert!(messages.iter().any(|m| m == " [ A ]  Wiping nozzle..."));
    assert_eq!(rig.b.count_written("G12 C"), 1);
    assert_eq!(rig.a.count_written("G12 C"), 0);
}

#[test]
fn test_disconnect_one_keeps_other() {
    let rig = rig();
    rig.coordinator
        .execute_on(Instance::A, Operation::Disconnect)
        .unwrap();
    assert!(!controller(&rig, Instance::A).is_connected());
    assert!(controller(&rig, Instance::B).is_connected());

    match rig.coordinator.execute(Operation::ConnectionStatus).unwrap() {
        OperationResult::Text(text) => assert_eq!(text, "SMuFF is currently not connected."),
        other => panic!("unexpected result {:?}", other),
    }
    rig.coordinator.disconnect_all();
    assert!(rig.coordinator.controllers().all(|c| !c.is_connected()));
}

#[test]
fn test_raw_dump_is_per_instance() {
    let rig = rig();
    match rig
        .coordinator
        .execute_on(Instance::B, Operation::ToggleRawDump)
        .unwrap()
    {
        OperationResult::Flag(enabled) => assert!(enabled),
        other => panic!("unexpected result {:?}", other),
    }
    match rig
        .coordinator
        .execute_on(Instance::A, Operation::ToggleRawDump)
        .unwrap()
    {
        OperationResult::Flag(enabled) => assert!(enabled),
        other => panic!("unexpected result {:?}", other),
    }
    assert!(rig
        .host
        .messages()
        .iter()
        .any(|m| m == " [ B ]  SMuFF dump raw serial data is ON"));
}
