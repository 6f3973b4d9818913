//! Response demultiplexer
//!
//! Runs on the reader thread. Every received line is classified by
//! [`response_parser::parse`] and routed: state lines update the device
//! mirror and feed the watchdog, configuration blocks land in the tables,
//! terminators resolve the pending command and everything else is collected
//! as that command's response.
//!
//! Nothing here may block on the device. Replies to action requests are
//! written directly to the transport.

use super::commands::{self, ActionReply, ConfigQuery};
use super::config_parser::{ConfigBlock, ConfigCategory};
use super::engine::Engine;
use super::firmware_info::parse_firmware_info;
use super::response_parser::{self, ActionRequest, SmuffResponse};
use super::status_parser::StatesReport;
use smuffkit_core::DeviceError;
use std::time::{Duration, Instant};

/// Steps of the configuration fetch that follows a (re)connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitStep {
    #[default]
    Idle,
    Basic,
    Materials,
    FirmwareInfo,
    Swaps,
    ServoMaps,
}

impl InitStep {
    fn next(self) -> Self {
        match self {
            InitStep::Basic => InitStep::Materials,
            InitStep::Materials => InitStep::FirmwareInfo,
            InitStep::FirmwareInfo => InitStep::Swaps,
            InitStep::Swaps => InitStep::ServoMaps,
            InitStep::ServoMaps | InitStep::Idle => InitStep::Idle,
        }
    }

    /// The query this step issues
    pub fn command(self) -> Option<String> {
        match self {
            InitStep::Idle => None,
            InitStep::Basic => Some(ConfigQuery::Basic.command()),
            InitStep::Materials => Some(ConfigQuery::Materials.command()),
            InitStep::FirmwareInfo => Some(commands::FIRMWARE_INFO.to_string()),
            InitStep::Swaps => Some(ConfigQuery::ToolSwaps.command()),
            InitStep::ServoMaps => Some(ConfigQuery::ServoMapping.command()),
        }
    }

    fn expects(self, category: &ConfigCategory) -> bool {
        matches!(
            (self, category),
            (InitStep::Basic, ConfigCategory::Basic)
                | (InitStep::Materials, ConfigCategory::Materials)
                | (InitStep::Swaps, ConfigCategory::ToolSwaps)
                | (InitStep::ServoMaps, ConfigCategory::ServoMapping)
        )
    }
}

/// Progress of the configuration fetch
#[derive(Debug, Default)]
pub(crate) struct InitSequence {
    step: InitStep,
    issued_at: Option<Instant>,
}

impl InitSequence {
    pub(crate) fn begin(&mut self) {
        tracing::debug!("Starting configuration fetch");
        self.step = InitStep::Basic;
        self.issued_at = None;
    }

    pub(crate) fn step(&self) -> InitStep {
        self.step
    }

    /// The query to send now, if the current step has not been issued
    /// recently
    fn due(&mut self, now: Instant, retry_after: Duration) -> Option<String> {
        let command = self.step.command()?;
        if let Some(issued) = self.issued_at {
            if now.duration_since(issued) < retry_after {
                return None;
            }
        }
        self.issued_at = Some(now);
        Some(command)
    }

    fn advance(&mut self) {
        self.step = self.step.next();
        self.issued_at = None;
        if self.step == InitStep::Idle {
            tracing::info!("Configuration fetch complete");
        }
    }

    fn on_category(&mut self, category: &ConfigCategory) {
        if self.step.expects(category) {
            self.advance();
        }
    }

    fn on_firmware_info(&mut self) {
        if self.step == InitStep::FirmwareInfo {
            self.advance();
        }
    }
}

/// Reader-side protocol state
#[derive(Debug, Default)]
pub(crate) struct DemuxState {
    /// Category announced for the next JSON line
    json_category: Option<ConfigCategory>,
    pub(crate) init: InitSequence,
}

impl DemuxState {
    pub(crate) fn reset(&mut self) {
        *self = DemuxState::default();
    }
}

impl Engine {
    /// Route one received line
    pub(crate) fn handle_line(&self, line: &str) {
        self.log_received(line);
        let Some(response) = response_parser::parse(line) else {
            return;
        };

        match response {
            SmuffResponse::Start => self.on_device_start(),
            SmuffResponse::PeriodicStatesEnabled => {
                self.device.write().periodic_states = true;
                self.demux.lock().init.begin();
            }
            SmuffResponse::Debug(text) => {
                if !self.config.ignore_debug {
                    tracing::debug!("SMuFF debug: {}", text);
                }
            }
            SmuffResponse::States(text) => self.on_states(&text),
            SmuffResponse::Busy(_) => {
                self.device.write().busy = true;
                self.sync.on_busy();
                self.notify("SMuFF is busy...");
            }
            SmuffResponse::Echo(text) => tracing::debug!("SMuFF echo: {}", text),
            SmuffResponse::Error(message) => self.on_device_error(message),
            SmuffResponse::Action(action) => self.on_action(action),
            SmuffResponse::JsonCategory(category) => {
                self.demux.lock().json_category = Some(category);
            }
            SmuffResponse::Json(json) => self.on_json(&json),
            SmuffResponse::FirmwareInfo(raw) => {
                let info = parse_firmware_info(&raw);
                self.notify(&format!("SMuFF: FW-Info:\n{}", info.raw));
                self.device.write().firmware = info;
                self.demux.lock().init.on_firmware_info();
            }
            SmuffResponse::Ok => {
                if let Some(command) = self.sync.on_ok() {
                    tracing::debug!("'{}' done", command);
                }
                self.advance_init();
            }
            SmuffResponse::Text(text) => self.sync.on_line(&text),
        }
    }

    fn on_device_start(&self) {
        tracing::info!("SMuFF has sent a start response");
        self.sync.abandon();
        {
            let mut demux = self.demux.lock();
            demux.json_category = None;
            demux.init = InitSequence::default();
        }
        self.device.write().periodic_states = false;
        if let Err(err) = self.send(&commands::periodic_states(true)) {
            tracing::warn!("Failed to re-enable periodic states: {}", err);
        }
    }

    fn on_states(&self, text: &str) {
        let report = StatesReport::parse(text);
        if report.is_empty() {
            tracing::warn!("Unrecognized state line: [{}]", text);
            return;
        }
        {
            let mut device = self.device.write();
            report.apply(&mut device);
            device.state_lines += 1;
        }
        self.watcher.heartbeat();
        self.advance_init();
    }

    fn on_device_error(&self, message: String) {
        let error = DeviceError::new(message);
        tracing::error!("{}", error);
        self.notify(&error.to_string());
        if error.is_unknown_command() {
            if let Some(transport) = self.current_transport() {
                if let Err(err) = transport.clear_buffers() {
                    tracing::warn!("Failed to clear buffers: {}", err);
                }
            }
        }
        self.device.write().error = true;
        self.sync.on_error(&error.message);
    }

    fn on_json(&self, json: &str) {
        let mut demux = self.demux.lock();
        let Some(category) = demux.json_category.take() else {
            tracing::warn!("JSON block without category marker: [{}]", json);
            return;
        };

        let tool_count = self.device.read().tool_count;
        match ConfigBlock::parse(&category, json, tool_count) {
            Ok(block) => {
                tracing::debug!("Received '{}' configuration", category);
                let mut device = self.device.write();
                let mut tables = self.tables.write();
                block.apply(&mut device, &mut tables);
            }
            Err(err) => tracing::warn!("Ignoring configuration block: {}", err),
        }
        demux.init.on_category(&category);
    }

    fn on_action(&self, action: ActionRequest) {
        match action {
            ActionRequest::ToolChange(tool) => self.on_remote_tool_change(tool),
            ActionRequest::Wait => {
                tracing::info!("SMuFF requested WAIT");
                self.device.write().wait_requested = true;
            }
            ActionRequest::Continue => {
                tracing::info!("SMuFF requested CONTINUE");
                let mut device = self.device.write();
                device.wait_requested = false;
                device.abort_requested = false;
            }
            ActionRequest::Abort => {
                tracing::info!("SMuFF requested ABORT");
                let mut device = self.device.write();
                device.wait_requested = false;
                device.abort_requested = true;
            }
            ActionRequest::Pong => tracing::info!("SMuFF sent PONG"),
            ActionRequest::Other(text) => tracing::debug!("Unhandled action: {}", text),
        }
    }

    /// The operator selected a tool on the device itself
    fn on_remote_tool_change(&self, tool: i32) {
        tracing::info!("SMuFF requested tool change to T{}", tool);
        let reply = if self.host.print_state.is_printing() {
            ActionReply::PrinterNotReady
        } else {
            match self.host.print_state.can_extrude() {
                Ok(true) => match self.host.macros.select_tool(tool) {
                    Ok(()) => ActionReply::Ok,
                    Err(err) => {
                        tracing::error!("Selecting T{} on the host failed: {}", tool, err);
                        ActionReply::PrinterNotReady
                    }
                },
                Ok(false) => ActionReply::NozzleTooCold,
                Err(err) => {
                    tracing::warn!("Nozzle temperature unavailable: {}", err);
                    ActionReply::NoNozzleTemp
                }
            }
        };
        if let Err(err) = self.write_line(&reply.to_string()) {
            tracing::warn!("Failed to answer tool change request: {}", err);
        }
    }

    /// Issue the next configuration query when the line is free
    fn advance_init(&self) {
        let mut demux = self.demux.lock();
        if demux.init.step() == InitStep::Idle || self.sync.is_pending() {
            return;
        }
        let Some(command) = demux
            .init
            .due(Instant::now(), self.config.command_timeout)
        else {
            return;
        };
        tracing::debug!("Configuration fetch: {:?}", demux.init.step());
        if let Err(err) = self.send(&command) {
            tracing::warn!("Failed to send '{}': {}", command, err);
        }
    }
}
