//! # SMuFFKit Core
//!
//! Core types, traits, and utilities for SMuFFKit.
//! Provides the device state mirror, the host collaborator interfaces,
//! and the error types shared by every crate in the workspace.

pub mod core;
pub mod data;
pub mod error;

pub use core::{
    HostServices, IdlePrinter, LogNotifier, MacroRunner, NoopMacros, Notifier, PrefixedNotifier,
    PrintState,
};

pub use data::{
    ConfigTables, DeviceState, Endstops, FirmwareInfo, LoadState, Material, StatusSnapshot,
    ToolChangeStats, NO_TOOL,
};

pub use error::{
    CommandError, ConnectionError, DeviceError, Error, HostError, ProtocolError, Result,
    ToolChangeError,
};
