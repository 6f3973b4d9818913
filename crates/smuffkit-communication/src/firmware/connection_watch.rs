//! Connection watchdog
//!
//! Expects a heartbeat (a periodic state line) within a configured interval.
//! When the interval passes in silence the watcher marks the connection lost
//! and invokes its callback, then keeps firing once per interval for as long
//! as the silence lasts.
//!
//! Every watcher runs as a task on one small shared tokio runtime, so the
//! engine does not need to be called from inside a runtime to be watched.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();
static RUNTIME_INIT: Mutex<()> = parking_lot::const_mutex(());

/// The runtime all watchdog tasks run on, built on first use
fn runtime() -> std::io::Result<&'static Runtime> {
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }
    let _guard = RUNTIME_INIT.lock();
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("smuff-watchdog")
        .enable_time()
        .build()?;
    Ok(RUNTIME.get_or_init(|| runtime))
}

/// Watchdog configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionWatchConfig {
    /// Silence after which the connection counts as lost
    pub timeout_ms: u64,
    /// How often the watcher task looks at the clock
    pub check_interval_ms: u64,
}

impl Default for ConnectionWatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            check_interval_ms: 1_000,
        }
    }
}

/// Health as seen by the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionWatchState {
    Healthy,
    Lost,
}

struct Timing {
    last_heartbeat: Instant,
    last_fired: Option<Instant>,
    state: ConnectionWatchState,
}

struct WatchInner {
    timing: Mutex<Timing>,
    timeout_ms: AtomicU64,
    base_timeout_ms: u64,
    check_interval: Duration,
    grace: AtomicBool,
    running: AtomicBool,
}

impl WatchInner {
    fn effective_timeout(&self) -> Duration {
        let timeout = Duration::from_millis(self.timeout_ms.load(Ordering::SeqCst));
        if self.grace.load(Ordering::SeqCst) {
            timeout * 2
        } else {
            timeout
        }
    }

    /// Returns true when the callback should fire now
    fn check(&self, now: Instant) -> bool {
        let timeout = self.effective_timeout();
        let mut timing = self.timing.lock();
        let reference = match timing.last_fired {
            Some(fired) if fired > timing.last_heartbeat => fired,
            _ => timing.last_heartbeat,
        };
        if now.duration_since(reference) < timeout {
            return false;
        }
        timing.state = ConnectionWatchState::Lost;
        timing.last_fired = Some(now);
        self.grace.store(false, Ordering::SeqCst);
        true
    }
}

/// Liveness watchdog for one connection
pub struct ConnectionWatcher {
    inner: Arc<WatchInner>,
    shutdown_signal: Mutex<Option<mpsc::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionWatcher {
    pub fn new(config: ConnectionWatchConfig) -> Self {
        Self {
            inner: Arc::new(WatchInner {
                timing: Mutex::new(Timing {
                    last_heartbeat: Instant::now(),
                    last_fired: None,
                    state: ConnectionWatchState::Healthy,
                }),
                timeout_ms: AtomicU64::new(config.timeout_ms),
                base_timeout_ms: config.timeout_ms,
                check_interval: Duration::from_millis(config.check_interval_ms.max(1)),
                grace: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            shutdown_signal: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Record a liveness signal
    pub fn heartbeat(&self) {
        let mut timing = self.inner.timing.lock();
        timing.last_heartbeat = Instant::now();
        if timing.state == ConnectionWatchState::Lost {
            tracing::info!("Connection is alive again");
        }
        timing.state = ConnectionWatchState::Healthy;
        self.inner.grace.store(false, Ordering::SeqCst);
    }

    /// Milliseconds since the last heartbeat
    pub fn time_since_heartbeat(&self) -> u64 {
        self.inner.timing.lock().last_heartbeat.elapsed().as_millis() as u64
    }

    pub fn state(&self) -> ConnectionWatchState {
        self.inner.timing.lock().state
    }

    /// Replace the timeout, e.g. for the duration of a tool change
    pub fn set_timeout(&self, timeout: Duration) {
        self.inner
            .timeout_ms
            .store(timeout.as_millis() as u64, Ordering::SeqCst);
    }

    /// Go back to the configured timeout
    pub fn restore_timeout(&self) {
        self.inner
            .timeout_ms
            .store(self.inner.base_timeout_ms, Ordering::SeqCst);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.inner.timeout_ms.load(Ordering::SeqCst))
    }

    /// Allow twice the timeout until the next heartbeat or expiry
    ///
    /// Used when the device is about to reboot and stays silent for a while.
    pub fn grant_grace(&self) {
        self.inner.grace.store(true, Ordering::SeqCst);
        let mut timing = self.inner.timing.lock();
        timing.last_heartbeat = Instant::now();
        timing.state = ConnectionWatchState::Healthy;
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start the watcher task
    ///
    /// `on_lost` runs on the blocking pool of the watchdog runtime at each
    /// expiry, so it may block (reconnecting does).
    pub fn start<F>(&self, on_lost: F) -> std::io::Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let runtime = match runtime() {
            Ok(runtime) => runtime,
            Err(err) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };
        self.heartbeat();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_signal.lock() = Some(shutdown_tx);

        let inner = self.inner.clone();
        let on_lost = Arc::new(on_lost);
        let span = tracing::Span::current();
        let handle = runtime.spawn(
            async move {
                tracing::debug!("Watchdog started");
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(inner.check_interval) => {}
                    }
                    if !inner.running.load(Ordering::SeqCst) {
                        break;
                    }
                    if inner.check(Instant::now()) {
                        tracing::warn!(
                            "No heartbeat within {:?}, connection considered lost",
                            inner.effective_timeout()
                        );
                        let callback = on_lost.clone();
                        let watch = inner.clone();
                        let callback_span = tracing::Span::current();
                        tokio::task::spawn_blocking(move || {
                            let _entered = callback_span.enter();
                            if watch.running.load(Ordering::SeqCst) {
                                callback();
                            }
                        });
                    }
                }
                tracing::debug!("Watchdog stopped");
            }
            .instrument(span),
        );
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Stop the watcher task
    ///
    /// No callback starts after this returns. Safe to call from the callback.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(shutdown) = self.shutdown_signal.lock().take() {
            // a full channel already carries a shutdown request
            let _ = shutdown.try_send(());
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for ConnectionWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
