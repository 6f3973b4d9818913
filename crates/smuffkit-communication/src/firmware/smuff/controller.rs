//! SMuFF controller
//!
//! The public handle on one device engine. Every operation of the command
//! surface lives here; the engine underneath owns the threads and the state.
//!
//! Operations that wait for the device (`send_raw`, `set_parameter`,
//! `fw_info`, the table queries) block the calling thread up to the command
//! timeout. Call them from a worker, e.g. `tokio::task::spawn_blocking`.

use super::commands::{self, ConfigQuery};
use super::config::SmuffConfig;
use super::engine::{ConnectionState, Engine};
use super::synchronizer::{CommandOutcome, CommandTicket};
use super::tool_change::{self, ToolChangeStart};
use crate::communication::{SerialOpener, TransportOpener};
use smuffkit_core::{
    CommandError, ConfigTables, DeviceState, Error, FirmwareInfo, HostServices, Material, Result,
    StatusSnapshot, ToolChangeError,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Driver name and version reported by [`SmuffController::module_version`]
pub const MODULE_VERSION: &str = concat!("smuffkit ", env!("CARGO_PKG_VERSION"));

/// Lid servo
pub const DEFAULT_SERVO: u32 = 1;

/// Handle on one SMuFF
///
/// Dropping the handle disconnects and stops every background thread.
pub struct SmuffController {
    engine: Arc<Engine>,
}

impl SmuffController {
    pub fn new(config: SmuffConfig, opener: Arc<dyn TransportOpener>, host: HostServices) -> Self {
        Self {
            engine: Engine::new(config, opener, host),
        }
    }

    /// Controller talking to a serial port
    pub fn serial(config: SmuffConfig, host: HostServices) -> Self {
        Self::new(config, Arc::new(SerialOpener), host)
    }

    pub fn instance(&self) -> &str {
        &self.engine.config.instance
    }

    pub fn config(&self) -> &SmuffConfig {
        &self.engine.config
    }

    // ---------------------------------------------------------------------
    // Connection
    // ---------------------------------------------------------------------

    pub fn connect(&self) -> Result<()> {
        self.engine.connect().inspect_err(|err| {
            self.engine.notify(&format!("Connecting to SMuFF has failed: {}", err));
        })
    }

    pub fn disconnect(&self) {
        self.engine.disconnect();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.engine.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Human readable connection status, also sent to the operator
    pub fn connection_status(&self) -> String {
        let status = if self.is_connected() {
            format!("SMuFF is connected on {}.", self.engine.port())
        } else {
            "SMuFF is currently not connected.".to_string()
        };
        self.engine.notify(&status);
        status
    }

    /// Connect in the background, retrying until it succeeds
    ///
    /// Returns false when a connector is already running.
    pub fn start_connector(&self) -> bool {
        let _entered = self.engine.span.enter();
        self.engine.start_connector()
    }

    /// Drop the connection and re-establish it in the background
    pub fn reconnect(&self) -> bool {
        let _entered = self.engine.span.enter();
        self.engine.trigger_reconnect()
    }

    // ---------------------------------------------------------------------
    // Simple device actions
    // ---------------------------------------------------------------------

    fn fire(&self, command: &str, message: Option<&str>) -> Result<()> {
        let _entered = self.engine.span.enter();
        self.engine.ensure_connected()?;
        if let Some(message) = message {
            self.engine.notify(message);
        }
        self.engine.send(command)?;
        Ok(())
    }

    pub fn cut(&self) -> Result<()> {
        self.fire(commands::CUT, Some("Cutting filament..."))
    }

    pub fn wipe(&self) -> Result<()> {
        self.fire(commands::WIPE, Some("Wiping nozzle..."))
    }

    pub fn open_lid(&self) -> Result<()> {
        self.fire(commands::LID_OPEN, Some("Opening lid..."))
    }

    pub fn close_lid(&self) -> Result<()> {
        self.fire(commands::LID_CLOSE, Some("Closing lid..."))
    }

    /// Move a servo; `servo` defaults to the lid servo
    pub fn set_servo(&self, servo: Option<u32>, angle: i32) -> Result<()> {
        let _entered = self.engine.span.enter();
        self.engine.ensure_connected()?;
        let servo = servo.unwrap_or(DEFAULT_SERVO);
        let angle = u32::try_from(angle)
            .ok()
            .filter(|angle| *angle <= 180)
            .ok_or_else(|| CommandError::InvalidParameter {
                name: "ANGLE".to_string(),
                reason: "Servo position must be between 0 and 180.".to_string(),
            })?;
        self.engine
            .notify(&format!("Positioning servo {} to {} deg.", servo, angle));
        self.engine.send(&commands::set_servo(servo, angle))?;
        Ok(())
    }

    pub fn home(&self) -> Result<()> {
        self.fire(commands::HOME, None)
    }

    pub fn motors_off(&self) -> Result<()> {
        self.fire(commands::MOTORS_OFF, None)
    }

    pub fn clear_jam(&self) -> Result<()> {
        self.fire(commands::CLEAR_JAM, None)
    }

    /// Reboot the device; it stays silent for a while, so the watchdog gets
    /// extra time
    pub fn reset(&self) -> Result<()> {
        self.fire(commands::RESET, None)?;
        self.engine.watcher.grant_grace();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Tool change, load and unload
    // ---------------------------------------------------------------------

    /// Validate and start a tool change
    ///
    /// The returned session must be driven by the caller (see
    /// [`ToolChangeSession`](super::tool_change::ToolChangeSession)).
    pub fn change_tool(&self, tool: i32) -> Result<ToolChangeStart> {
        let _entered = self.engine.span.enter();
        tool_change::begin(&self.engine, tool).inspect_err(|err| {
            tracing::warn!("Tool change to T{} rejected: {}", tool, err);
            self.engine.notify(&err.to_string());
        })
    }

    fn track(&self, command: &str) -> Result<CommandTicket> {
        let _entered = self.engine.span.enter();
        self.engine.ensure_connected()?;
        if self.engine.session_active.load(Ordering::SeqCst) {
            return Err(ToolChangeError::Busy.into());
        }
        if !self.engine.device.read().has_tool() {
            return Err(ToolChangeError::NoToolSelected.into());
        }
        self.engine.send_tracked(command).map_err(|err| match err {
            Error::Command(CommandError::InFlight { .. }) => {
                ToolChangeError::Busy.into()
            }
            other => other,
        })
    }

    /// Load the selected tool's filament
    pub fn load(&self) -> Result<CommandTicket> {
        self.track(commands::LOAD)
    }

    /// Unload the selected tool's filament
    pub fn unload(&self) -> Result<CommandTicket> {
        self.track(commands::UNLOAD)
    }

    /// Outcome of a tracked command, `None` while still pending
    pub fn poll(&self, ticket: &CommandTicket) -> Option<CommandOutcome> {
        self.engine.sync.poll(ticket)
    }

    /// Poll a tracked command on the tokio timer until it resolves
    pub async fn wait_for(&self, ticket: &CommandTicket, interval: Duration) -> CommandOutcome {
        loop {
            if let Some(outcome) = self.poll(ticket) {
                return outcome;
            }
            tokio::time::sleep(interval).await;
        }
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Ask the device for its firmware identity
    pub fn fw_info(&self) -> Result<FirmwareInfo> {
        let _entered = self.engine.span.enter();
        self.engine.send_and_wait(commands::FIRMWARE_INFO)?;
        Ok(self.engine.device.read().firmware.clone())
    }

    /// Send any GCode line
    ///
    /// `M999` (reset) is sent without waiting and extends the watchdog once.
    /// Everything else waits for the answer, which is also reported to the
    /// operator.
    pub fn send_raw(&self, gcode: &str) -> Result<Option<String>> {
        let _entered = self.engine.span.enter();
        self.engine.ensure_connected()?;
        let gcode = gcode.trim();
        if gcode.is_empty() {
            return Err(CommandError::MissingParameter {
                name: "GCODE".to_string(),
            }
            .into());
        }
        if gcode.eq_ignore_ascii_case(commands::RESET) {
            self.engine.watcher.grant_grace();
            self.engine.send(commands::RESET)?;
            return Ok(None);
        }

        let response = self.engine.send_and_wait(gcode)?;
        if !response.is_empty() {
            self.engine
                .notify(&format!("SMuFF responded with {}.", response));
        }
        Ok(Some(response))
    }

    /// Change a device setting
    pub fn set_parameter(&self, name: &str, value: &str) -> Result<String> {
        let _entered = self.engine.span.enter();
        self.engine.ensure_connected()?;
        for (key, given) in [("PARAM", name), ("PARAMVAL", value)] {
            if given.trim().is_empty() {
                return Err(CommandError::MissingParameter {
                    name: key.to_string(),
                }
                .into());
            }
        }
        self.engine
            .send_and_wait(&commands::set_parameter(name.trim(), value.trim()))
            .inspect_err(|err| {
                if err.is_device_error() {
                    self.engine.notify(&err.to_string());
                }
            })
    }

    fn query(&self, query: ConfigQuery) -> Result<()> {
        let _entered = self.engine.span.enter();
        self.engine.send_and_wait(&query.command())?;
        Ok(())
    }

    pub fn query_materials(&self) -> Result<Vec<Material>> {
        self.query(ConfigQuery::Materials)?;
        Ok(self.engine.tables.read().materials.clone())
    }

    pub fn query_swaps(&self) -> Result<Vec<i64>> {
        self.query(ConfigQuery::ToolSwaps)?;
        Ok(self.engine.tables.read().swaps.clone())
    }

    /// Closed angle of the lid servo per tool
    pub fn query_servo_maps(&self) -> Result<Vec<i64>> {
        self.query(ConfigQuery::ServoMapping)?;
        Ok(self.engine.tables.read().servo_map.clone())
    }

    /// Point-in-time status of the device
    pub fn status(&self) -> StatusSnapshot {
        let device = self.engine.device.read();
        let tables = self.engine.tables.read();
        let stats = self.engine.stats.lock();
        StatusSnapshot::capture(
            &device,
            &tables,
            &stats,
            self.engine.is_connected(),
            MODULE_VERSION,
        )
    }

    pub fn device_state(&self) -> DeviceState {
        self.engine.device.read().clone()
    }

    pub fn tables(&self) -> ConfigTables {
        self.engine.tables.read().clone()
    }

    // ---------------------------------------------------------------------
    // Housekeeping
    // ---------------------------------------------------------------------

    pub fn reset_statistics(&self) {
        self.engine.stats.lock().reset();
        self.engine.notify("Ok.");
    }

    /// Flip raw traffic logging; returns the new setting
    pub fn toggle_raw_dump(&self) -> bool {
        let enabled = self.engine.toggle_raw_dump();
        self.engine.notify(&format!(
            "SMuFF dump raw serial data is {}",
            if enabled { "ON" } else { "OFF" }
        ));
        enabled
    }

    pub fn module_version(&self) -> &'static str {
        MODULE_VERSION
    }
}

impl std::fmt::Debug for SmuffController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmuffController")
            .field("instance", &self.engine.config.instance)
            .field("port", &self.engine.port())
            .field("state", &self.engine.connection_state())
            .finish()
    }
}

impl Drop for SmuffController {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}
