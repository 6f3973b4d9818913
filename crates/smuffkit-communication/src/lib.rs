//! # SMuFFKit Communication
//!
//! Serial transport, the SMuFF line protocol and the device engine.
//!
//! A [`SmuffController`] drives one SMuFF: it keeps the connection alive,
//! mirrors the device state and runs tool changes. A [`Coordinator`] routes
//! operations to one of two controllers on IDEX printers.

pub mod communication;
pub mod firmware;

pub use communication::{
    list_ports, ConnectionParams, SerialOpener, SerialPortInfo, SerialTransport, Transport,
    TransportOpener,
};

pub use firmware::coordinator::{Coordinator, Instance, Operation, OperationResult};
pub use firmware::smuff::{
    CommandOutcome, CommandTicket, ConnectionState, ConnectorConfig, SmuffConfig,
    SmuffController, Step, ToolChangeOutcome, ToolChangeSession, ToolChangeStage,
    ToolChangeStart, ToolChangeTiming, MODULE_VERSION,
};
pub use firmware::{ConnectionWatchConfig, ConnectionWatchState, ConnectionWatcher};
