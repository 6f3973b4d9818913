use parking_lot::Mutex;
use smuffkit_core::{HostError, HostServices, MacroRunner, Notifier, PrintState};
use std::sync::Arc;

#[derive(Default)]
struct RecordingMacros {
    calls: Mutex<Vec<String>>,
}

impl MacroRunner for RecordingMacros {
    fn run_pre_toolchange(&self, pending_tool: i32) -> Result<(), HostError> {
        self.calls.lock().push(format!("pre {}", pending_tool));
        Err(HostError::new("macro failed"))
    }
}

struct ColdPrinter;

impl PrintState for ColdPrinter {
    fn is_printing(&self) -> bool {
        true
    }

    fn can_extrude(&self) -> Result<bool, HostError> {
        Ok(false)
    }
}

#[derive(Default)]
struct Console(Mutex<Vec<String>>);

impl Notifier for Console {
    fn respond(&self, text: &str) {
        self.0.lock().push(text.to_string());
    }
}

#[test]
fn test_overridden_collaborators() {
    let macros = Arc::new(RecordingMacros::default());
    let console = Arc::new(Console::default());
    let services = HostServices::default()
        .with_macros(macros.clone())
        .with_print_state(Arc::new(ColdPrinter))
        .with_notifier(console.clone());

    assert!(services.macros.run_pre_toolchange(2).is_err());
    assert!(services.macros.run_post_toolchange(1, 2).is_ok());
    assert_eq!(*macros.calls.lock(), vec!["pre 2".to_string()]);

    assert!(services.print_state.is_printing());
    assert_eq!(services.print_state.can_extrude(), Ok(false));

    services.prefixed("A").notifier.respond("hello");
    assert_eq!(*console.0.lock(), vec![" [ A ]  hello".to_string()]);
}
