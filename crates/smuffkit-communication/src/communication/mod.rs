//! Communication layer
//!
//! A [`Transport`] carries newline-terminated ASCII lines to and from one
//! controller. The device engine reads from one thread while writing from
//! others, so every method takes `&self`.

pub mod mock;
pub mod serial;

use smuffkit_core::ConnectionError;
use std::sync::Arc;
use std::time::Duration;

pub use serial::{list_ports, SerialOpener, SerialPortInfo, SerialTransport};

/// Parameters for opening a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    pub baud_rate: u32,
    /// Bound of a single blocking read
    pub read_timeout: Duration,
}

impl ConnectionParams {
    pub fn new(port: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            read_timeout,
        }
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115200,
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// Line-oriented link to a controller
pub trait Transport: Send + Sync {
    /// Write one line; the terminator is appended
    fn write_line(&self, line: &str) -> Result<(), ConnectionError>;

    /// Read one line without its terminator
    ///
    /// Returns `Ok(None)` when the read timeout elapsed before a complete line
    /// arrived. A partial line is kept and completed by a later call.
    fn read_line(&self) -> Result<Option<String>, ConnectionError>;

    /// Discard everything buffered in either direction
    fn clear_buffers(&self) -> Result<(), ConnectionError>;

    /// Close the link; pending and later calls fail with `Closed`
    fn close(&self);

    fn is_open(&self) -> bool;

    /// Port name, for logging
    fn name(&self) -> String;
}

/// Opens transports; lets the engine reconnect without knowing the medium
pub trait TransportOpener: Send + Sync {
    fn open(&self, params: &ConnectionParams) -> Result<Arc<dyn Transport>, ConnectionError>;
}

/// Decode a received line; the protocol is plain ASCII
pub(crate) fn decode_line(bytes: &[u8]) -> Result<String, ConnectionError> {
    if !bytes.is_ascii() {
        return Err(ConnectionError::Decode {
            reason: format!("{} bytes with non-ASCII content", bytes.len()),
        });
    }
    let text = String::from_utf8_lossy(bytes);
    Ok(text.trim_end_matches(['\r', '\n']).to_string())
}
