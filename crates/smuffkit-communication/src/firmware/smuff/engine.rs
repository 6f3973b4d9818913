//! Per-device engine
//!
//! Owns the transport, the reader thread, the watchdog and the connector, and
//! holds the device mirror they update. One engine drives exactly one
//! physical controller; engines share nothing.
//!
//! Threads:
//! - reader: pulls lines off the transport and feeds the demultiplexer
//! - watchdog: expects a periodic state line within the configured interval
//! - connector/reconnect: retries opening the transport until it succeeds
//!
//! Every thread enters the engine's span, so log lines carry the instance.
//!
//! Lock order: `demux` before the synchronizer, `device` before `tables`.

use super::commands;
use super::config::SmuffConfig;
use super::demux::DemuxState;
use super::synchronizer::{CommandOutcome, CommandTicket, Synchronizer};
use crate::communication::{Transport, TransportOpener};
use crate::firmware::connection_watch::ConnectionWatcher;
use parking_lot::{Condvar, Mutex, RwLock};
use smuffkit_core::{
    ConfigTables, ConnectionError, DeviceState, Error, HostServices, Result, ToolChangeStats,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lifecycle of the connection to one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// A lost connection is being re-established in the background
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(text)
    }
}

struct ReaderHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub(crate) struct Engine {
    pub(crate) config: SmuffConfig,
    pub(crate) span: tracing::Span,
    pub(crate) host: HostServices,
    opener: Arc<dyn TransportOpener>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    conn_state: Mutex<ConnectionState>,
    pub(crate) device: RwLock<DeviceState>,
    pub(crate) tables: RwLock<ConfigTables>,
    pub(crate) stats: Mutex<ToolChangeStats>,
    pub(crate) sync: Synchronizer,
    pub(crate) watcher: ConnectionWatcher,
    pub(crate) demux: Mutex<DemuxState>,
    raw_dump: AtomicBool,
    reader: Mutex<Option<ReaderHandle>>,
    /// Single-flight guard shared by the connector and reconnect loops
    connector_active: AtomicBool,
    connector: Mutex<Option<JoinHandle<()>>>,
    stop_requested: Mutex<bool>,
    stop_signal: Condvar,
    /// A tool change session is being driven
    pub(crate) session_active: AtomicBool,
}

impl Engine {
    pub(crate) fn new(
        config: SmuffConfig,
        opener: Arc<dyn TransportOpener>,
        host: HostServices,
    ) -> Arc<Self> {
        let span = tracing::info_span!("smuff", instance = %config.instance);
        let device = DeviceState::with_capabilities(config.has_cutter, config.has_wiper);
        Arc::new(Self {
            span,
            host,
            opener,
            transport: RwLock::new(None),
            conn_state: Mutex::new(ConnectionState::Disconnected),
            device: RwLock::new(device),
            tables: RwLock::new(ConfigTables::default()),
            stats: Mutex::new(ToolChangeStats::default()),
            sync: Synchronizer::new(),
            watcher: ConnectionWatcher::new(config.watchdog),
            demux: Mutex::new(DemuxState::default()),
            raw_dump: AtomicBool::new(config.raw_dump),
            reader: Mutex::new(None),
            connector_active: AtomicBool::new(false),
            connector: Mutex::new(None),
            stop_requested: Mutex::new(false),
            stop_signal: Condvar::new(),
            session_active: AtomicBool::new(false),
            config,
        })
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        *self.conn_state.lock()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected.into())
        }
    }

    pub(crate) fn port(&self) -> &str {
        &self.config.params.port
    }

    pub(crate) fn notify(&self, text: &str) {
        self.host.notifier.respond(text);
    }

    pub(crate) fn toggle_raw_dump(&self) -> bool {
        !self.raw_dump.fetch_xor(true, Ordering::SeqCst)
    }

    fn log_raw(&self, direction: &str, line: &str) {
        if self.raw_dump.load(Ordering::Relaxed) {
            tracing::info!("{} [{}]", direction, line);
        } else {
            tracing::debug!("{} [{}]", direction, line);
        }
    }

    pub(crate) fn log_received(&self, line: &str) {
        self.log_raw("<<", line);
    }

    // ---------------------------------------------------------------------
    // Sending
    // ---------------------------------------------------------------------

    pub(crate) fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().clone()
    }

    /// Write one line to the device, bypassing the synchronizer
    pub(crate) fn write_line(&self, line: &str) -> std::result::Result<(), ConnectionError> {
        let transport = self
            .current_transport()
            .ok_or(ConnectionError::NotConnected)?;
        self.log_raw(">>", line);
        transport.write_line(line).inspect_err(|err| {
            tracing::error!("Failed to send '{}': {}", line, err);
        })
    }

    fn clear_flags(&self) {
        let mut device = self.device.write();
        device.busy = false;
        device.error = false;
    }

    /// Fire and forget
    pub(crate) fn send(&self, command: &str) -> std::result::Result<(), ConnectionError> {
        self.clear_flags();
        let timeout = self.config.timeout_for(command);
        self.sync.send(command, timeout, |line| self.write_line(line))
    }

    /// Write the next queued fire-and-forget command once the slot is free
    pub(crate) fn flush_queue(&self) {
        self.sync.flush(|line| self.write_line(line));
    }

    /// Send and hand back a ticket to poll
    pub(crate) fn send_tracked(&self, command: &str) -> Result<CommandTicket> {
        self.clear_flags();
        let timeout = self.config.timeout_for(command);
        self.sync
            .send_tracked(command, timeout, |line| self.write_line(line))
    }

    /// Send and block the calling thread until the command resolves
    ///
    /// Never call this from the reader thread: the answer is delivered there.
    pub(crate) fn send_and_wait(&self, command: &str) -> Result<String> {
        self.ensure_connected()?;
        self.clear_flags();
        let timeout = self.config.timeout_for(command);
        let tool_select = commands::is_tool_select(command);
        if tool_select {
            self.watcher.set_timeout(self.config.toolchange_timeout);
        }
        self.device.write().processing = true;

        let outcome = self
            .sync
            .send_and_wait(command, timeout, |line| self.write_line(line));

        self.device.write().processing = false;
        if tool_select {
            self.watcher.restore_timeout();
        }
        if outcome == CommandOutcome::TimedOut {
            tracing::warn!("No response on '{}' within {:?}", command, timeout);
        }
        outcome.into_result(command, timeout)
    }

    // ---------------------------------------------------------------------
    // Connection management
    // ---------------------------------------------------------------------

    /// Open the transport and start the reader and the watchdog
    pub(crate) fn connect(self: &Arc<Self>) -> Result<()> {
        let _entered = self.span.enter();
        let previous = {
            let mut state = self.conn_state.lock();
            match *state {
                ConnectionState::Connected => {
                    return Err(ConnectionError::AlreadyConnected.into());
                }
                ConnectionState::Connecting => {
                    return Err(Error::other("Connection attempt already in progress"));
                }
                other => {
                    *state = ConnectionState::Connecting;
                    other
                }
            }
        };

        tracing::info!("Connecting to SMuFF on {}", self.port());
        let transport = match self.opener.open(&self.config.params) {
            Ok(transport) => transport,
            Err(err) => {
                *self.conn_state.lock() = previous;
                tracing::error!("Connecting to SMuFF has failed: {}", err);
                return Err(err.into());
            }
        };

        self.reset_session();
        *self.transport.write() = Some(transport.clone());

        if let Err(err) = self.start_reader(transport.clone()) {
            tracing::error!("Failed to start the serial reader: {}", err);
            self.transport.write().take();
            transport.close();
            *self.conn_state.lock() = previous;
            return Err(err.into());
        }

        let weak = Arc::downgrade(self);
        if let Err(err) = self.watcher.start(move || Self::on_watchdog_expired(&weak)) {
            tracing::error!("Failed to start the watchdog: {}", err);
        }

        *self.conn_state.lock() = ConnectionState::Connected;
        tracing::info!("Connected to SMuFF on {}", transport.name());
        self.notify("Connected to SMuFF.");

        if let Err(err) = self.send(&commands::periodic_states(true)) {
            tracing::warn!("Failed to enable periodic states: {}", err);
        }
        Ok(())
    }

    /// Stop everything, including a running connector loop
    ///
    /// Idempotent: disconnecting a disconnected engine does nothing.
    pub(crate) fn disconnect(&self) {
        let _entered = self.span.enter();
        self.stop_connector();
        if self.teardown() {
            tracing::info!("Disconnected from SMuFF");
            self.notify("Disconnected from SMuFF");
        }
    }

    /// Close the transport and stop the reader and the watchdog
    ///
    /// Returns false when there was nothing to tear down.
    fn teardown(&self) -> bool {
        self.watcher.stop();

        let reader = self.reader.lock().take();
        if let Some(reader) = &reader {
            reader.stop.store(true, Ordering::SeqCst);
        }
        let transport = self.transport.write().take();
        if let Some(transport) = &transport {
            transport.close();
        }
        if let Some(reader) = reader {
            if reader.thread.thread().id() != thread::current().id()
                && reader.thread.join().is_err()
            {
                tracing::error!("Serial reader thread panicked");
            }
        }

        self.sync.abandon();
        {
            let mut device = self.device.write();
            device.busy = false;
            device.processing = false;
            device.periodic_states = false;
        }

        let mut state = self.conn_state.lock();
        let was_active = transport.is_some() || *state != ConnectionState::Disconnected;
        if *state != ConnectionState::Reconnecting {
            *state = ConnectionState::Disconnected;
        }
        was_active
    }

    /// Fresh protocol state for a new session
    fn reset_session(&self) {
        self.sync.abandon();
        self.demux.lock().reset();
        let mut device = self.device.write();
        device.busy = false;
        device.error = false;
        device.processing = false;
        device.periodic_states = false;
    }

    /// Final cleanup when the owning handle goes away
    pub(crate) fn shutdown(&self) {
        self.disconnect();
    }

    // ---------------------------------------------------------------------
    // Connector and reconnect loops
    // ---------------------------------------------------------------------

    /// Keep trying to connect in the background
    ///
    /// Waits the settle delay first, then retries at the configured interval
    /// until connected or disconnected. Returns false when a connector loop
    /// is already running.
    pub(crate) fn start_connector(self: &Arc<Self>) -> bool {
        let settle = self.config.connector.settle_delay;
        self.spawn_connector("smuff-connector", settle, false)
    }

    /// Tear the connection down and re-establish it in the background
    pub(crate) fn trigger_reconnect(self: &Arc<Self>) -> bool {
        self.spawn_connector("smuff-reconnect", Duration::ZERO, true)
    }

    fn spawn_connector(self: &Arc<Self>, name: &str, initial_delay: Duration, reconnect: bool) -> bool {
        if self
            .connector_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Connector already running, skipping");
            return false;
        }
        *self.stop_requested.lock() = false;

        let engine = self.clone();
        let span = self.span.clone();
        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            let _entered = span.enter();
            engine.run_connector(initial_delay, reconnect);
            engine.connector_active.store(false, Ordering::SeqCst);
        });

        match spawned {
            Ok(handle) => {
                *self.connector.lock() = Some(handle);
                true
            }
            Err(err) => {
                tracing::error!("Failed to start the connector: {}", err);
                self.connector_active.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    fn run_connector(self: &Arc<Self>, initial_delay: Duration, reconnect: bool) {
        if reconnect {
            tracing::info!("Trying to reconnect to SMuFF");
            *self.conn_state.lock() = ConnectionState::Reconnecting;
            self.teardown();
        }
        if !initial_delay.is_zero() && self.wait_for_stop(initial_delay) {
            return self.connector_stopped();
        }

        loop {
            if *self.stop_requested.lock() {
                return self.connector_stopped();
            }
            match self.connect() {
                Ok(()) => {
                    tracing::info!("Connector finished");
                    return;
                }
                Err(Error::Connection(ConnectionError::AlreadyConnected)) => return,
                Err(err) => tracing::debug!("Connection attempt failed: {}", err),
            }
            if self.wait_for_stop(self.config.connector.retry_interval) {
                return self.connector_stopped();
            }
        }
    }

    fn connector_stopped(&self) {
        tracing::debug!("Connector stopped");
        let mut state = self.conn_state.lock();
        if *state == ConnectionState::Reconnecting {
            *state = ConnectionState::Disconnected;
        }
    }

    /// Sleep unless a stop is requested first; returns true on stop
    fn wait_for_stop(&self, duration: Duration) -> bool {
        let mut stop = self.stop_requested.lock();
        if !*stop {
            self.stop_signal.wait_for(&mut stop, duration);
        }
        *stop
    }

    fn stop_connector(&self) {
        *self.stop_requested.lock() = true;
        self.stop_signal.notify_all();
        let handle = self.connector.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("Connector thread panicked");
            }
        }
    }

    fn on_watchdog_expired(weak: &Weak<Self>) {
        let Some(engine) = weak.upgrade() else {
            return;
        };
        engine.notify("SMuFF has not reported its state in time. Connection lost?");
        if engine.config.connector.auto_reconnect {
            engine.trigger_reconnect();
        }
    }

    // ---------------------------------------------------------------------
    // Reader loop
    // ---------------------------------------------------------------------

    fn start_reader(self: &Arc<Self>, transport: Arc<dyn Transport>) -> std::io::Result<()> {
        let stop = Arc::new(AtomicBool::new(false));
        let engine = self.clone();
        let span = self.span.clone();
        let thread_stop = stop.clone();
        let thread = thread::Builder::new()
            .name("smuff-reader".to_string())
            .spawn(move || {
                let _entered = span.enter();
                engine.run_reader(transport, &thread_stop);
            })?;
        *self.reader.lock() = Some(ReaderHandle { stop, thread });
        Ok(())
    }

    fn run_reader(self: &Arc<Self>, transport: Arc<dyn Transport>, stop: &AtomicBool) {
        tracing::debug!("Serial reader started on {}", transport.name());
        let failure = loop {
            if stop.load(Ordering::SeqCst) {
                break None;
            }
            match transport.read_line() {
                Ok(Some(line)) => {
                    if !line.trim().is_empty() {
                        self.handle_line(&line);
                    }
                    self.flush_queue();
                }
                Ok(None) => self.flush_queue(),
                Err(err) if err.is_recoverable() => {
                    tracing::warn!("Discarding undecodable line: {}", err);
                    if let Err(err) = transport.clear_buffers() {
                        tracing::warn!("Failed to clear buffers: {}", err);
                    }
                }
                Err(err) => break Some(err),
            }
        };

        match failure {
            Some(err) if !stop.load(Ordering::SeqCst) => self.handle_transport_loss(err),
            _ => tracing::debug!("Serial reader stopped"),
        }
    }

    fn handle_transport_loss(self: &Arc<Self>, err: ConnectionError) {
        tracing::error!("Serial reader has shut down: {}", err);
        self.notify("Serial reader has shut down");
        self.sync.abandon();

        if self.config.connector.auto_reconnect {
            self.trigger_reconnect();
            return;
        }

        self.watcher.stop();
        if let Some(transport) = self.transport.write().take() {
            transport.close();
        }
        *self.conn_state.lock() = ConnectionState::Disconnected;
    }
}
