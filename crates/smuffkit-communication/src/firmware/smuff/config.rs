//! Runtime configuration of one device engine

use crate::communication::ConnectionParams;
use crate::firmware::connection_watch::ConnectionWatchConfig;
use std::time::Duration;

/// Background connector behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// Wait before the first connection attempt of the connector loop
    pub settle_delay: Duration,
    /// Wait between failed attempts
    pub retry_interval: Duration,
    /// Whether a lost connection is re-established automatically
    pub auto_reconnect: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(3000),
            retry_interval: Duration::from_millis(1000),
            auto_reconnect: true,
        }
    }
}

/// Delays between the tool change stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolChangeTiming {
    pub pre: Duration,
    /// Time the device gets before the first poll for the tool select answer
    pub send_settle: Duration,
    pub await_poll: Duration,
    pub feed_state: Duration,
    pub post: Duration,
}

impl Default for ToolChangeTiming {
    fn default() -> Self {
        Self {
            pre: Duration::from_millis(100),
            send_settle: Duration::from_millis(5000),
            await_poll: Duration::from_millis(1000),
            feed_state: Duration::from_millis(200),
            post: Duration::from_millis(100),
        }
    }
}

/// Everything one engine needs to know about its device
#[derive(Debug, Clone, PartialEq)]
pub struct SmuffConfig {
    /// Instance name ("A" or "B"), used in log spans and operator messages
    pub instance: String,
    pub params: ConnectionParams,
    pub command_timeout: Duration,
    pub toolchange_timeout: Duration,
    pub watchdog: ConnectionWatchConfig,
    /// Append the auto-load suffix to tool selects
    pub auto_load: bool,
    pub has_cutter: bool,
    pub has_wiper: bool,
    /// Log raw traffic at info level
    pub raw_dump: bool,
    /// Drop `echo: dbg:` lines without logging them
    pub ignore_debug: bool,
    pub connector: ConnectorConfig,
    pub timing: ToolChangeTiming,
}

impl Default for SmuffConfig {
    fn default() -> Self {
        Self {
            instance: "A".to_string(),
            params: ConnectionParams::default(),
            command_timeout: Duration::from_secs(20),
            toolchange_timeout: Duration::from_secs(90),
            watchdog: ConnectionWatchConfig::default(),
            auto_load: true,
            has_cutter: true,
            has_wiper: false,
            raw_dump: false,
            ignore_debug: true,
            connector: ConnectorConfig::default(),
            timing: ToolChangeTiming::default(),
        }
    }
}

impl SmuffConfig {
    /// Defaults for a device on `port`
    pub fn for_port(port: impl Into<String>) -> Self {
        Self {
            params: ConnectionParams {
                port: port.into(),
                ..ConnectionParams::default()
            },
            ..Self::default()
        }
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Bound for a command: tool selects use the tool change timeout
    pub fn timeout_for(&self, command: &str) -> Duration {
        if super::commands::is_tool_select(command) {
            self.toolchange_timeout
        } else {
            self.command_timeout
        }
    }
}
