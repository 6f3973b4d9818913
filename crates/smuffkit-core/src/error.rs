//! Error handling for SMuFFKit
//!
//! Provides error types for every layer of the driver:
//! - Connection errors (transport open/read/write failures)
//! - Protocol errors (malformed lines or configuration payloads)
//! - Device errors (the controller reported `error:`)
//! - Command errors (timeouts, overlapping commands)
//! - Tool change errors (validation and scheduling)
//!
//! Recoverable conditions never tear the engine down; only settings errors
//! at construction are fatal.

use thiserror::Error;

/// Connection error type
///
/// Represents failures of the physical line to the controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// No open line to the SMuFF
    #[error("SMuFF is not connected")]
    NotConnected,

    /// The SMuFF line is already open
    #[error("SMuFF is already connected")]
    AlreadyConnected,

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// Serial device path.
        port: String,
        /// Message from the serial driver.
        reason: String,
    },

    /// Writing to the port failed
    #[error("Write to port failed: {reason}")]
    WriteFailed {
        /// The reason for the write failure.
        reason: String,
    },

    /// Reading from the port failed
    #[error("Read from port failed: {reason}")]
    ReadFailed {
        /// The reason for the read failure.
        reason: String,
    },

    /// A received line was not valid ASCII
    #[error("Received undecodable data: {reason}")]
    Decode {
        /// The reason decoding failed.
        reason: String,
    },

    /// The transport has been closed
    #[error("Port is closed")]
    Closed,

    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// What the reader saw when the link dropped.
        reason: String,
    },
}

impl ConnectionError {
    /// Whether the error only affects the current line and the link stays usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ConnectionError::Decode { .. })
    }
}

/// Protocol error type
///
/// Raised when a line or a JSON configuration block cannot be interpreted.
/// These never terminate a session; the offending line or block is skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// The line could not be parsed
    #[error("Malformed line '{line}': {reason}")]
    MalformedLine {
        /// The offending line.
        line: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A JSON configuration block could not be parsed
    #[error("Malformed '{category}' block: {reason}")]
    MalformedJson {
        /// The category announced before the block.
        category: String,
        /// The parser's error message.
        reason: String,
    },

    /// A JSON configuration block lacks a required key
    #[error("Missing key '{key}' in '{category}' block")]
    MissingKey {
        /// The category announced before the block.
        category: String,
        /// The missing key.
        key: String,
    },
}

/// Device error type
///
/// The controller answered with an explicit `error:` line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("SMuFF responded with error! [{message}]")]
pub struct DeviceError {
    /// The text following the `error:` prefix.
    pub message: String,
}

impl DeviceError {
    /// Create a device error from the raw message text
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Whether the controller reported it did not understand the command
    pub fn is_unknown_command(&self) -> bool {
        self.message.trim_start().starts_with("Unknown command:")
    }
}

/// Command error type
///
/// Failures of a single command/response exchange.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// No terminal response within the bound
    #[error("Timed out after {timeout_ms}ms waiting for a response to '{command}'")]
    Timeout {
        /// The command that was sent.
        command: String,
        /// The timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The multi-minute tool change bound elapsed
    #[error("Tool change timed out after {timeout_ms}ms")]
    ToolChangeTimeout {
        /// The tool change timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Another command is still awaiting its response
    #[error("Command '{pending}' is still awaiting a response")]
    InFlight {
        /// The command currently outstanding.
        pending: String,
    },

    /// The wait was released because the connection was torn down
    #[error("Command '{command}' was abandoned: connection closed")]
    Abandoned {
        /// The command that was abandoned.
        command: String,
    },

    /// A required parameter was not supplied
    #[error("No parameter specified ({name}='...')")]
    MissingParameter {
        /// The parameter name.
        name: String,
    },

    /// A parameter was outside its valid range
    #[error("Invalid value for {name}: {reason}")]
    InvalidParameter {
        /// The parameter name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Tool change error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolChangeError {
    /// The requested tool exceeds the tools the controller reported
    #[error("Selected tool (T{tool}) exceeds existing tools ({tool_count})")]
    InvalidTool {
        /// The requested tool index.
        tool: i32,
        /// The number of tools on the controller.
        tool_count: u32,
    },

    /// A tool change or load/unload is already being driven
    #[error("Busy with other async task, aborting")]
    Busy,

    /// Load/unload was requested while no tool is selected
    #[error("No tool selected")]
    NoToolSelected,
}

/// Failure reported by a host collaborator (macro run, temperature query)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Main error type for SMuFFKit
///
/// Any failure surfaced by the driver
/// Returned by every fallible operation of the command surface.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Device error
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Command error
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Tool change error
    #[error(transparent)]
    ToolChange(#[from] ToolChangeError),

    /// Host collaborator error
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Free-form error, mostly for operator-facing rejections
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Whether a command or tool change ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Command(CommandError::Timeout { .. })
                | Error::Command(CommandError::ToolChangeTimeout { .. })
        )
    }

    /// Whether the serial line is the problem
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Whether the SMuFF itself reported the failure
    pub fn is_device_error(&self) -> bool {
        matches!(self, Error::Device(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
