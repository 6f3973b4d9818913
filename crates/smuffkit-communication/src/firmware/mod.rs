//! Firmware support
//!
//! - `smuff`: protocol and device engine for the SMuFF controller
//! - `connection_watch`: liveness watchdog shared by the engines
//! - `coordinator`: routes operations to one of two devices (IDEX)

pub mod connection_watch;
pub mod coordinator;
pub mod smuff;

pub use connection_watch::{ConnectionWatchConfig, ConnectionWatchState, ConnectionWatcher};
pub use coordinator::{Coordinator, Instance, Operation, OperationResult};
pub use smuff::{SmuffConfig, SmuffController};
