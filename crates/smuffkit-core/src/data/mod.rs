//! Data models for the device mirror
//!
//! This module provides:
//! - The device state mirror (tool, endstops, load state, firmware identity)
//! - Per-tool configuration tables (materials, swaps, servo map, feed states)
//! - Tool change statistics
//! - A serializable status snapshot

pub mod config_tables;
pub mod device;
pub mod snapshot;
pub mod stats;

pub use config_tables::{ConfigTables, Material};
pub use device::{DeviceState, Endstops, FirmwareInfo, LoadState, NO_TOOL};
pub use snapshot::StatusSnapshot;
pub use stats::ToolChangeStats;
