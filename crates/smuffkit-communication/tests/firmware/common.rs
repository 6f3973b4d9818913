//! Scripted SMuFF and recording host collaborators
#![allow(dead_code)]

use parking_lot::Mutex;
use smuffkit_communication::communication::mock::{MockOpener, MockTransport};
use smuffkit_communication::{ConnectorConfig, SmuffConfig, SmuffController, ToolChangeTiming};
use smuffkit_core::{HostError, HostServices, MacroRunner, Notifier, PrintState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const TOOLS: u32 = 5;

pub const FW_INFO: &str = "FIRMWARE_NAME: Smart.Multi.Filament.Feeder (SMuFF) FIRMWARE_VERSION: V3.20 ELECTRONICS: SKR E3-DIP V1.1 DATE: Jan 02 2023 MODE: SMUFF OPTIONS: TMC|NEOPIXELS";

/// State line as the device sends it with `tool` selected
pub fn states_line(tool: i32) -> String {
    format!(
        "echo: states: T: T{}  S: off  R: off  F: on  F2: off  TMC: -off  SD: off  SC: off  LID: on  I: off  SPL: 0",
        tool
    )
}

fn per_tool(value: impl Fn(u32) -> String) -> String {
    let entries: Vec<String> = (0..TOOLS)
        .map(|tool| format!("\"T{}\":{}", tool, value(tool)))
        .collect();
    format!("{{{}}}", entries.join(","))
}

/// How a well-behaved device answers `command`
pub fn device_reply(command: &str) -> Vec<String> {
    let mut lines: Vec<String> = match command {
        "M155 S1" => vec!["M155 S1".to_string()],
        "M503 S1W" => vec![
            "/* basic */".to_string(),
            format!(
                r#"{{"Device":"SMuFF","Tools":{},"UseCutter":true,"UseSplitter":false,"UseDDE":false}}"#,
                TOOLS
            ),
        ],
        "M503 S5W" => vec![
            "/* materials */".to_string(),
            per_tool(|tool| {
                format!(
                    r#"{{"Material":"PLA","Color":"Color{}","PFactor":{}}}"#,
                    tool,
                    100 + tool
                )
            }),
        ],
        "M115" => vec![FW_INFO.to_string()],
        "M503 S6W" => vec!["/* tool swaps */".to_string(), per_tool(|tool| tool.to_string())],
        "M503 S4W" => vec![
            "/* servo mapping */".to_string(),
            per_tool(|tool| format!(r#"{{"Close":{}}}"#, 90 + tool)),
        ],
        "M503 S8W" => vec!["/* feed state */".to_string(), per_tool(|_| "false".to_string())],
        other if other.starts_with('T') => {
            let tool: i32 = other[1..]
                .split_whitespace()
                .next()
                .and_then(|t| t.parse().ok())
                .unwrap_or(-1);
            vec![states_line(tool)]
        }
        _ => Vec::new(),
    };
    lines.push("ok".to_string());
    lines
}

/// A transport impersonating a SMuFF; `overrides` answers first when it
/// returns `Some`
pub fn scripted_device<F>(overrides: F) -> Arc<MockTransport>
where
    F: Fn(&str) -> Option<Vec<String>> + Send + 'static,
{
    let transport = MockTransport::new();
    transport.set_responder(move |command| overrides(command).unwrap_or_else(|| device_reply(command)));
    transport
}

pub fn smuff_device() -> Arc<MockTransport> {
    scripted_device(|_| None)
}

/// Short timings so tests finish quickly
pub fn fast_config() -> SmuffConfig {
    let mut config = SmuffConfig::for_port("mock");
    config.command_timeout = Duration::from_secs(2);
    config.toolchange_timeout = Duration::from_secs(5);
    config.connector = ConnectorConfig {
        settle_delay: Duration::from_millis(10),
        retry_interval: Duration::from_millis(20),
        auto_reconnect: true,
    };
    config.timing = ToolChangeTiming {
        pre: Duration::from_millis(5),
        send_settle: Duration::from_millis(10),
        await_poll: Duration::from_millis(10),
        feed_state: Duration::from_millis(5),
        post: Duration::from_millis(5),
    };
    config
}

pub fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Whether the configuration fetch after connecting has finished
pub fn init_complete(controller: &SmuffController) -> bool {
    controller.tables().servo_map.len() == TOOLS as usize
}

/// Connect a controller to `transport`, wait for the configuration fetch
/// and select `tool` via a state line
pub fn connected_with(
    transport: Arc<MockTransport>,
    config: SmuffConfig,
    host: HostServices,
    tool: i32,
) -> SmuffController {
    let controller = SmuffController::new(config, MockOpener::with_transport(transport.clone()), host);
    controller.connect().expect("connect to scripted device");
    assert!(
        wait_until(Duration::from_secs(3), || init_complete(&controller)),
        "configuration fetch did not finish"
    );
    transport.push_line(states_line(tool));
    assert!(wait_until(Duration::from_secs(2), || {
        controller.device_state().current_tool == tool
    }));
    controller
}

/// Host collaborators that record what the engine asked of them
#[derive(Default)]
pub struct RecordingHost {
    pub printing: AtomicBool,
    pub paused: AtomicBool,
    pub cold: AtomicBool,
    pub fail_pre: AtomicBool,
    pub calls: Mutex<Vec<String>>,
    pub messages: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn services(self: &Arc<Self>) -> HostServices {
        HostServices::default()
            .with_macros(self.clone())
            .with_print_state(self.clone())
            .with_notifier(self.clone())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl MacroRunner for RecordingHost {
    fn run_pre_toolchange(&self, pending_tool: i32) -> Result<(), HostError> {
        self.calls.lock().push(format!("pre {}", pending_tool));
        if self.fail_pre.load(Ordering::SeqCst) {
            return Err(HostError::new("macro aborted"));
        }
        Ok(())
    }

    fn run_post_toolchange(&self, previous_tool: i32, new_tool: i32) -> Result<(), HostError> {
        self.calls
            .lock()
            .push(format!("post {} {}", previous_tool, new_tool));
        Ok(())
    }

    fn select_tool(&self, tool: i32) -> Result<(), HostError> {
        self.calls.lock().push(format!("select {}", tool));
        Ok(())
    }
}

impl PrintState for RecordingHost {
    fn is_printing(&self) -> bool {
        self.printing.load(Ordering::SeqCst)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn can_extrude(&self) -> Result<bool, HostError> {
        Ok(!self.cold.load(Ordering::SeqCst))
    }
}

impl Notifier for RecordingHost {
    fn respond(&self, text: &str) {
        self.messages.lock().push(text.to_string());
    }
}
