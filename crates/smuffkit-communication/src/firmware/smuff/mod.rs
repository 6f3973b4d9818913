//! SMuFF firmware support
//!
//! Line protocol parsers, the command/response synchronizer and the device
//! engine with its public [`SmuffController`] handle.

pub mod commands;
pub mod config;
pub mod config_parser;
pub mod controller;
mod demux;
mod engine;
pub mod firmware_info;
pub mod response_parser;
pub mod status_parser;
pub mod synchronizer;
pub mod tool_change;

pub use commands::{ActionReply, ConfigQuery};
pub use config::{ConnectorConfig, SmuffConfig, ToolChangeTiming};
pub use config_parser::{BasicConfig, ConfigBlock, ConfigCategory};
pub use controller::{SmuffController, DEFAULT_SERVO, MODULE_VERSION};
pub use demux::InitStep;
pub use engine::ConnectionState;
pub use firmware_info::parse_firmware_info;
pub use response_parser::{ActionRequest, SmuffResponse};
pub use status_parser::{parse_tool_number, StatesReport, TmcState};
pub use synchronizer::{CommandOutcome, CommandTicket, Synchronizer};
pub use tool_change::{
    Step, ToolChangeOutcome, ToolChangeSession, ToolChangeStage, ToolChangeStart,
};
