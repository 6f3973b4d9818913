//! # SMuFFKit
//!
//! Host-side driver for SMuFF filament controllers attached over a serial
//! line.
//!
//! ## Architecture
//!
//! SMuFFKit is organized as a workspace with multiple crates:
//!
//! 1. **smuffkit-core** - Device state mirror, host collaborator traits, errors
//! 2. **smuffkit-communication** - Serial transport, line protocol, device engine
//! 3. **smuffkit-settings** - Configuration loading and validation
//! 4. **smuffkit** - This crate: wiring, logging and the operator console binary
//!
//! ## Features
//!
//! - **Connection Management**: background connect with retry, watchdog driven reconnect
//! - **Tool Changes**: non-blocking staged state machine with host macro hooks
//! - **Configuration Mirror**: materials, swaps, servo mappings and feed states
//! - **IDEX**: two independent devices routed through one coordinator

pub mod console;

pub use smuffkit_communication::firmware;
pub use smuffkit_core::data;

pub use smuffkit_core::{
    CommandError, ConfigTables, ConnectionError, DeviceError, DeviceState, Error, FirmwareInfo,
    HostError, HostServices, LoadState, MacroRunner, Material, Notifier, PrintState, Result,
    StatusSnapshot, ToolChangeError,
};

pub use smuffkit_communication::{
    list_ports, CommandOutcome, CommandTicket, ConnectionParams, ConnectionState, Coordinator,
    Instance, Operation, OperationResult, SerialPortInfo, SmuffConfig, SmuffController,
    ToolChangeOutcome, ToolChangeSession, ToolChangeStart, MODULE_VERSION,
};

pub use smuffkit_settings::{Config, ConnectorSettings, DeviceSettings, ToolChangeSettings};

use smuffkit_communication::{ConnectionWatchConfig, ConnectorConfig, ToolChangeTiming};
use std::time::Duration;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date, stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Install the global tracing subscriber
///
/// Logs go to stderr with:
/// - target, level and line number on every event
/// - `RUST_LOG` filtering, INFO when unset
/// - Thread names, so reader, watchdog and connector lines can be told apart
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::INFO.to_string()));

    // stdout belongs to the operator console
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Engine configuration for one configured device
pub fn engine_config(config: &Config, device: &DeviceSettings, instance: &str) -> SmuffConfig {
    let watchdog = ConnectionWatchConfig {
        timeout_ms: device.watchdog_timeout().as_millis() as u64,
        ..ConnectionWatchConfig::default()
    };
    let connector = ConnectorConfig {
        settle_delay: Duration::from_millis(config.connector.settle_delay_ms),
        retry_interval: Duration::from_millis(config.connector.retry_interval_ms),
        auto_reconnect: config.connector.auto_reconnect,
    };
    let tool_change = &config.tool_change;
    let timing = ToolChangeTiming {
        pre: Duration::from_millis(tool_change.pre_delay_ms),
        send_settle: Duration::from_millis(tool_change.send_settle_ms),
        await_poll: Duration::from_millis(tool_change.await_poll_ms),
        feed_state: Duration::from_millis(tool_change.feed_state_delay_ms),
        post: Duration::from_millis(tool_change.post_delay_ms),
    };

    SmuffConfig {
        instance: instance.to_string(),
        params: ConnectionParams::new(
            device.serial.clone(),
            device.baud_rate,
            device.serial_timeout(),
        ),
        command_timeout: device.command_timeout(),
        toolchange_timeout: device.toolchange_timeout(),
        watchdog,
        auto_load: device.auto_load,
        has_cutter: device.has_cutter,
        has_wiper: device.has_wiper,
        raw_dump: device.debug,
        ignore_debug: config.ignore_debug,
        connector,
        timing,
    }
}

/// Build the coordinator for a validated configuration, on serial ports
pub fn build_coordinator(config: &Config, host: HostServices) -> Coordinator {
    let mut engines = config
        .instances()
        .into_iter()
        .map(|(instance, device)| engine_config(config, device, instance));
    let primary = engines
        .next()
        .unwrap_or_else(|| engine_config(config, &config.device, "A"));
    Coordinator::serial(primary, engines.next(), host)
}

/// Start the background connector of every device that asks for it
pub fn start_auto_connect(config: &Config, coordinator: &Coordinator) {
    let wanted: Vec<&str> = config
        .instances()
        .into_iter()
        .filter(|(_, device)| device.auto_connect)
        .map(|(instance, _)| instance)
        .collect();
    coordinator.start_connectors(|controller| wanted.contains(&controller.instance()));
}
