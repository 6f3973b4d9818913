//! Instance coordinator
//!
//! A printer with two independent carriages (IDEX) may have one SMuFF per
//! carriage. The coordinator owns one or two controllers and routes each
//! operation to the selected one. The controllers share nothing; in dual
//! mode every operator message is tagged with its instance.

use super::smuff::{CommandTicket, SmuffConfig, SmuffController, ToolChangeStart};
use crate::communication::{SerialOpener, TransportOpener};
use parking_lot::RwLock;
use smuffkit_core::{Error, FirmwareInfo, HostServices, Material, Result, StatusSnapshot};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// One of the two possible devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Instance {
    #[default]
    A,
    B,
}

impl Instance {
    pub fn name(self) -> &'static str {
        match self {
            Instance::A => "A",
            Instance::B => "B",
        }
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Instance {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" | "0" => Ok(Instance::A),
            "B" | "1" => Ok(Instance::B),
            other => Err(Error::other(format!("Unknown instance '{}'", other))),
        }
    }
}

/// Operations of the command surface, routable to either instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Disconnect,
    ConnectionStatus,
    Cut,
    Wipe,
    OpenLid,
    CloseLid,
    SetServo { servo: Option<u32>, angle: i32 },
    ChangeTool(i32),
    FirmwareInfo,
    Status,
    SendRaw(String),
    SetParameter { name: String, value: String },
    Materials,
    Swaps,
    ServoMaps,
    Load,
    Unload,
    Home,
    MotorsOff,
    ClearJam,
    Reset,
    ResetStatistics,
    ToggleRawDump,
    Version,
}

/// What an operation produced
#[derive(Debug)]
pub enum OperationResult {
    Done,
    Text(String),
    Response(Option<String>),
    Status(Box<StatusSnapshot>),
    Firmware(FirmwareInfo),
    Materials(Vec<Material>),
    Table(Vec<i64>),
    ToolChange(ToolChangeStart),
    Ticket(CommandTicket),
    Flag(bool),
}

/// Routes operations to one of up to two controllers
pub struct Coordinator {
    primary: SmuffController,
    secondary: Option<SmuffController>,
    active: RwLock<Instance>,
}

impl Coordinator {
    /// A single device
    pub fn single(config: SmuffConfig, opener: Arc<dyn TransportOpener>, host: HostServices) -> Self {
        Self {
            primary: SmuffController::new(config.with_instance(Instance::A.name()), opener, host),
            secondary: None,
            active: RwLock::new(Instance::A),
        }
    }

    /// Two independent devices; operator messages get an instance prefix
    pub fn dual(
        a: (SmuffConfig, Arc<dyn TransportOpener>),
        b: (SmuffConfig, Arc<dyn TransportOpener>),
        host: HostServices,
    ) -> Self {
        let controller = |instance: Instance, (config, opener): (SmuffConfig, Arc<dyn TransportOpener>)| {
            SmuffController::new(
                config.with_instance(instance.name()),
                opener,
                host.prefixed(instance.name()),
            )
        };
        Self {
            primary: controller(Instance::A, a),
            secondary: Some(controller(Instance::B, b)),
            active: RwLock::new(Instance::A),
        }
    }

    /// Devices on serial ports; `b` makes it a dual setup
    pub fn serial(a: SmuffConfig, b: Option<SmuffConfig>, host: HostServices) -> Self {
        match b {
            Some(b) => Self::dual(
                (a, Arc::new(SerialOpener)),
                (b, Arc::new(SerialOpener)),
                host,
            ),
            None => Self::single(a, Arc::new(SerialOpener), host),
        }
    }

    pub fn is_dual(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn active_instance(&self) -> Instance {
        *self.active.read()
    }

    /// Route subsequent operations to `instance`
    pub fn select_instance(&self, instance: Instance) -> Result<()> {
        if !self.is_dual() {
            return Err(Error::other("No IDEX configured"));
        }
        *self.active.write() = instance;
        tracing::info!("Active SMuFF instance is now {}", instance);
        Ok(())
    }

    pub fn controller(&self, instance: Instance) -> Option<&SmuffController> {
        match instance {
            Instance::A => Some(&self.primary),
            Instance::B => self.secondary.as_ref(),
        }
    }

    /// The controller operations are currently routed to
    pub fn active(&self) -> &SmuffController {
        match (self.active_instance(), &self.secondary) {
            (Instance::B, Some(secondary)) => secondary,
            _ => &self.primary,
        }
    }

    pub fn controllers(&self) -> impl Iterator<Item = &SmuffController> {
        std::iter::once(&self.primary).chain(self.secondary.as_ref())
    }

    /// Start the connector loop of every controller that asks for it
    pub fn start_connectors<F>(&self, wants_connect: F)
    where
        F: Fn(&SmuffController) -> bool,
    {
        for controller in self.controllers().filter(|c| wants_connect(c)) {
            controller.start_connector();
        }
    }

    pub fn disconnect_all(&self) {
        for controller in self.controllers() {
            controller.disconnect();
        }
    }

    /// Run an operation on the active instance
    pub fn execute(&self, operation: Operation) -> Result<OperationResult> {
        Self::run(self.active(), operation)
    }

    /// Run an operation on a specific instance
    pub fn execute_on(&self, instance: Instance, operation: Operation) -> Result<OperationResult> {
        let controller = self
            .controller(instance)
            .ok_or_else(|| Error::other("No IDEX configured"))?;
        Self::run(controller, operation)
    }

    fn run(controller: &SmuffController, operation: Operation) -> Result<OperationResult> {
        tracing::debug!("SMuFF {}: {:?}", controller.instance(), operation);
        let result = match operation {
            Operation::Connect => {
                controller.connect()?;
                OperationResult::Done
            }
            Operation::Disconnect => {
                controller.disconnect();
                OperationResult::Done
            }
            Operation::ConnectionStatus => OperationResult::Text(controller.connection_status()),
            Operation::Cut => controller.cut().map(|_| OperationResult::Done)?,
            Operation::Wipe => controller.wipe().map(|_| OperationResult::Done)?,
            Operation::OpenLid => controller.open_lid().map(|_| OperationResult::Done)?,
            Operation::CloseLid => controller.close_lid().map(|_| OperationResult::Done)?,
            Operation::SetServo { servo, angle } => {
                controller.set_servo(servo, angle)?;
                OperationResult::Done
            }
            Operation::ChangeTool(tool) => OperationResult::ToolChange(controller.change_tool(tool)?),
            Operation::FirmwareInfo => OperationResult::Firmware(controller.fw_info()?),
            Operation::Status => OperationResult::Status(Box::new(controller.status())),
            Operation::SendRaw(gcode) => OperationResult::Response(controller.send_raw(&gcode)?),
            Operation::SetParameter { name, value } => {
                OperationResult::Response(Some(controller.set_parameter(&name, &value)?))
            }
            Operation::Materials => OperationResult::Materials(controller.query_materials()?),
            Operation::Swaps => OperationResult::Table(controller.query_swaps()?),
            Operation::ServoMaps => OperationResult::Table(controller.query_servo_maps()?),
            Operation::Load => OperationResult::Ticket(controller.load()?),
            Operation::Unload => OperationResult::Ticket(controller.unload()?),
            Operation::Home => controller.home().map(|_| OperationResult::Done)?,
            Operation::MotorsOff => controller.motors_off().map(|_| OperationResult::Done)?,
            Operation::ClearJam => controller.clear_jam().map(|_| OperationResult::Done)?,
            Operation::Reset => controller.reset().map(|_| OperationResult::Done)?,
            Operation::ResetStatistics => {
                controller.reset_statistics();
                OperationResult::Done
            }
            Operation::ToggleRawDump => OperationResult::Flag(controller.toggle_raw_dump()),
            Operation::Version => OperationResult::Text(controller.module_version().to_string()),
        };
        Ok(result)
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("primary", &self.primary)
            .field("secondary", &self.secondary)
            .field("active", &self.active_instance())
            .finish()
    }
}
