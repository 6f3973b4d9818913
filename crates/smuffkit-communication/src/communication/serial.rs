//! Serial port transport
//!
//! Provides the serial link to the controller using the `serialport` crate.
//! The port handle is cloned once so the reader thread and writers never
//! contend for the same lock.

use super::{decode_line, ConnectionParams, Transport, TransportOpener};
use parking_lot::Mutex;
use smuffkit_core::ConnectionError;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A serial port a SMuFF might be attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Device path, e.g. `/dev/ttyUSB0`
    pub port_name: String,

    /// Human readable description, from USB descriptors where available
    pub description: String,
}

/// Serial ports present on this machine, for the operator to pick from
pub fn list_ports() -> Result<Vec<SerialPortInfo>, ConnectionError> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        ConnectionError::FailedToOpen {
            port: "*".to_string(),
            reason: e.to_string(),
        }
    })?;

    Ok(ports
        .into_iter()
        .map(|port| SerialPortInfo {
            description: describe(&port.port_type),
            port_name: port.port_name,
        })
        .collect())
}

fn describe(port_type: &serialport::SerialPortType) -> String {
    match port_type {
        serialport::SerialPortType::UsbPort(usb_info) => format!(
            "USB {} {}",
            usb_info.manufacturer.as_deref().unwrap_or("Device"),
            usb_info.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

struct LineReader {
    reader: BufReader<Box<dyn serialport::SerialPort>>,
    partial: Vec<u8>,
}

/// Serial port transport using the serialport crate
pub struct SerialTransport {
    name: String,
    reader: Mutex<Option<LineReader>>,
    writer: Mutex<Option<Box<dyn serialport::SerialPort>>>,
    open: AtomicBool,
}

impl SerialTransport {
    /// Open the port, clearing anything the device sent before we listened
    pub fn open(params: &ConnectionParams) -> Result<Self, ConnectionError> {
        let failed = |e: serialport::Error| {
            tracing::warn!("Failed to open serial port {}: {}", params.port, e);
            ConnectionError::FailedToOpen {
                port: params.port.clone(),
                reason: e.to_string(),
            }
        };

        let writer = serialport::new(&params.port, params.baud_rate)
            .timeout(params.read_timeout)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(failed)?;
        writer
            .clear(serialport::ClearBuffer::All)
            .map_err(failed)?;
        let reader = writer.try_clone().map_err(failed)?;

        Ok(Self {
            name: params.port.clone(),
            reader: Mutex::new(Some(LineReader {
                reader: BufReader::new(reader),
                partial: Vec::new(),
            })),
            writer: Mutex::new(Some(writer)),
            open: AtomicBool::new(true),
        })
    }
}

impl Transport for SerialTransport {
    fn write_line(&self, line: &str) -> Result<(), ConnectionError> {
        let mut guard = self.writer.lock();
        let port = guard.as_mut().ok_or(ConnectionError::Closed)?;
        port.write_all(format!("{}\n", line).as_bytes())
            .and_then(|_| port.flush())
            .map_err(|e| ConnectionError::WriteFailed {
                reason: e.to_string(),
            })
    }

    fn read_line(&self) -> Result<Option<String>, ConnectionError> {
        let mut guard = self.reader.lock();
        if !self.open.load(Ordering::SeqCst) {
            guard.take();
            return Err(ConnectionError::Closed);
        }
        let line_reader = guard.as_mut().ok_or(ConnectionError::Closed)?;

        match line_reader
            .reader
            .read_until(b'\n', &mut line_reader.partial)
        {
            Ok(0) => Err(ConnectionError::ConnectionLost {
                reason: "end of stream".to_string(),
            }),
            Ok(_) if line_reader.partial.ends_with(b"\n") => {
                let bytes = std::mem::take(&mut line_reader.partial);
                decode_line(&bytes).map(Some)
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(ConnectionError::ReadFailed {
                reason: e.to_string(),
            }),
        }
    }

    fn clear_buffers(&self) -> Result<(), ConnectionError> {
        if let Some(mut reader) = self.reader.try_lock() {
            if let Some(line_reader) = reader.as_mut() {
                line_reader.partial.clear();
            }
        }
        let guard = self.writer.lock();
        let port = guard.as_ref().ok_or(ConnectionError::Closed)?;
        port.clear(serialport::ClearBuffer::All)
            .map_err(|e| ConnectionError::ReadFailed {
                reason: e.to_string(),
            })
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.writer.lock().take();
        if let Some(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Opens [`SerialTransport`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

impl TransportOpener for SerialOpener {
    fn open(&self, params: &ConnectionParams) -> Result<Arc<dyn Transport>, ConnectionError> {
        let transport = SerialTransport::open(params)?;
        tracing::info!("Opened serial port {} @ {} baud", params.port, params.baud_rate);
        Ok(Arc::new(transport))
    }
}
