//! In-memory transport for tests and dry runs
//!
//! [`MockTransport`] records every written line and hands out scripted
//! inbound lines. A responder closure can react to each written command, which
//! is enough to impersonate a device for the engine's integration tests.

use super::{ConnectionParams, Transport, TransportOpener};
use parking_lot::{Condvar, Mutex};
use smuffkit_core::ConnectionError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

/// Scripted transport
pub struct MockTransport {
    name: String,
    inbound: Mutex<VecDeque<Result<String, ConnectionError>>>,
    inbound_ready: Condvar,
    written: Mutex<Vec<String>>,
    written_changed: Condvar,
    responder: Mutex<Option<Responder>>,
    open: AtomicBool,
    read_timeout: Duration,
    clears: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Self::with_read_timeout(Duration::from_millis(20))
    }

    pub fn with_read_timeout(read_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: "mock".to_string(),
            inbound: Mutex::new(VecDeque::new()),
            inbound_ready: Condvar::new(),
            written: Mutex::new(Vec::new()),
            written_changed: Condvar::new(),
            responder: Mutex::new(None),
            open: AtomicBool::new(true),
            read_timeout,
            clears: AtomicUsize::new(0),
        })
    }

    /// Queue a line for the reader
    pub fn push_line(&self, line: impl Into<String>) {
        self.inbound.lock().push_back(Ok(line.into()));
        self.inbound_ready.notify_all();
    }

    pub fn push_lines<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inbound = self.inbound.lock();
        inbound.extend(lines.into_iter().map(|line| Ok(line.into())));
        self.inbound_ready.notify_all();
    }

    /// Queue a read error for the reader
    pub fn push_error(&self, error: ConnectionError) {
        self.inbound.lock().push_back(Err(error));
        self.inbound_ready.notify_all();
    }

    /// React to written lines; the returned lines are queued for the reader
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// Lines written so far
    pub fn written(&self) -> Vec<String> {
        self.written.lock().clone()
    }

    /// Lines written so far, clearing the record
    pub fn take_written(&self) -> Vec<String> {
        std::mem::take(&mut *self.written.lock())
    }

    /// Count of written lines equal to `line`
    pub fn count_written(&self, line: &str) -> usize {
        self.written.lock().iter().filter(|l| *l == line).count()
    }

    /// Block until a written line satisfies `predicate` or `timeout` elapses
    pub fn wait_for_written<P>(&self, timeout: Duration, predicate: P) -> bool
    where
        P: Fn(&str) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut written = self.written.lock();
        loop {
            if written.iter().any(|line| predicate(line)) {
                return true;
            }
            if self
                .written_changed
                .wait_until(&mut written, deadline)
                .timed_out()
            {
                return written.iter().any(|line| predicate(line));
            }
        }
    }

    /// Number of `clear_buffers` calls
    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    /// Make the open transport usable again (used by [`MockOpener`])
    pub fn reopen(&self) {
        self.open.store(true, Ordering::SeqCst);
    }
}

impl Transport for MockTransport {
    fn write_line(&self, line: &str) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        {
            let mut written = self.written.lock();
            written.push(line.to_string());
            self.written_changed.notify_all();
        }
        let replies = match self.responder.lock().as_mut() {
            Some(responder) => responder(line),
            None => Vec::new(),
        };
        if !replies.is_empty() {
            self.push_lines(replies);
        }
        Ok(())
    }

    fn read_line(&self) -> Result<Option<String>, ConnectionError> {
        let deadline = Instant::now() + self.read_timeout;
        let mut inbound = self.inbound.lock();
        loop {
            if !self.is_open() {
                return Err(ConnectionError::Closed);
            }
            if let Some(next) = inbound.pop_front() {
                return next.map(Some);
            }
            if self
                .inbound_ready
                .wait_until(&mut inbound, deadline)
                .timed_out()
            {
                return Ok(None);
            }
        }
    }

    fn clear_buffers(&self) -> Result<(), ConnectionError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.inbound_ready.notify_all();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

type Factory = Box<dyn Fn() -> Arc<MockTransport> + Send + Sync>;

/// Opener handing out mock transports
pub struct MockOpener {
    factory: Factory,
    opened: Mutex<Vec<Arc<MockTransport>>>,
    failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl MockOpener {
    /// Build a fresh transport for every open
    pub fn new<F>(factory: F) -> Arc<Self>
    where
        F: Fn() -> Arc<MockTransport> + Send + Sync + 'static,
    {
        Arc::new(Self {
            factory: Box::new(factory),
            opened: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        })
    }

    /// Hand out the same transport on every open
    pub fn with_transport(transport: Arc<MockTransport>) -> Arc<Self> {
        Self::new(move || transport.clone())
    }

    /// Fail the next `count` open attempts
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of open attempts, failed ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Transports opened so far, oldest first
    pub fn opened(&self) -> Vec<Arc<MockTransport>> {
        self.opened.lock().clone()
    }

    /// The most recently opened transport
    pub fn last(&self) -> Option<Arc<MockTransport>> {
        self.opened.lock().last().cloned()
    }
}

impl TransportOpener for MockOpener {
    fn open(&self, params: &ConnectionParams) -> Result<Arc<dyn Transport>, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ConnectionError::FailedToOpen {
                port: params.port.clone(),
                reason: "scripted failure".to_string(),
            });
        }
        let transport = (self.factory)();
        transport.reopen();
        self.opened.lock().push(transport.clone());
        Ok(transport)
    }
}
