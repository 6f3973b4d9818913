//! Command/response synchronizer
//!
//! The device answers one command at a time, so a connection has a single
//! pending slot. A command occupies the slot from the moment it is written
//! until a terminal line (`ok` or `error:`) resolves it or its deadline
//! passes. Lines received in between are collected as the command's
//! response.
//!
//! Three ways to send:
//! - [`Synchronizer::send`]: fire and forget; written at once when the slot
//!   is free, otherwise queued and written when the slot frees up
//! - [`Synchronizer::send_tracked`]: takes the slot or fails with
//!   [`CommandError::InFlight`], returning a [`CommandTicket`] to poll
//! - [`Synchronizer::send_and_wait`]: queues for the slot, then blocks the
//!   calling thread until the command resolves
//!
//! A command that ends in `error:` is resolved on the spot. The device may or
//! may not follow up with `ok`; a stray `ok` with nothing pending is dropped,
//! and the next command written owns the next terminator.
//!
//! A `busy` report pushes the deadline of the pending command out by one more
//! timeout, once. This goes past the original bound on purpose: the longest
//! possible wait is twice the timeout.

use super::commands::command_token;
use parking_lot::{Condvar, Mutex};
use smuffkit_core::{CommandError, ConnectionError, DeviceError, Error};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// How a command ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Terminated by `ok`; carries the collected response lines
    Response(String),
    /// The device answered with `error:`
    Failed(DeviceError),
    /// No terminal line before the deadline
    TimedOut,
    /// Released without an answer (disconnect, device reset)
    Abandoned,
}

impl CommandOutcome {
    /// Convert into the crate's result type
    pub fn into_result(self, command: &str, timeout: Duration) -> Result<String, Error> {
        match self {
            CommandOutcome::Response(response) => Ok(response),
            CommandOutcome::Failed(err) => Err(err.into()),
            CommandOutcome::TimedOut => Err(CommandError::Timeout {
                command: command.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
            .into()),
            CommandOutcome::Abandoned => Err(CommandError::Abandoned {
                command: command.to_string(),
            }
            .into()),
        }
    }
}

/// Handle on a command sent with [`Synchronizer::send_tracked`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTicket {
    id: u64,
    command: String,
    timeout: Duration,
    sent_at: Instant,
}

impl CommandTicket {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.sent_at.elapsed()
    }
}

#[derive(Debug)]
struct PendingCommand {
    id: u64,
    command: String,
    token: String,
    timeout: Duration,
    deadline: Instant,
    busy: bool,
    extended: bool,
    tracked: bool,
    lines: Vec<String>,
}

/// A fire-and-forget command waiting for the slot
#[derive(Debug)]
struct QueuedCommand {
    command: String,
    timeout: Duration,
}

#[derive(Debug, Default)]
struct SlotState {
    pending: Option<PendingCommand>,
    queue: VecDeque<QueuedCommand>,
    completed: HashMap<u64, CommandOutcome>,
    next_id: u64,
}

impl SlotState {
    fn occupy(&mut self, command: &str, timeout: Duration, tracked: bool) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.pending = Some(PendingCommand {
            id,
            command: command.to_string(),
            token: command_token(command).to_string(),
            timeout,
            deadline: Instant::now() + timeout,
            busy: false,
            extended: false,
            tracked,
            lines: Vec::new(),
        });
        id
    }

    fn resolve(&mut self, outcome: CommandOutcome) -> Option<String> {
        let pending = self.pending.take()?;
        if pending.tracked {
            self.completed.insert(pending.id, outcome);
        }
        Some(pending.command)
    }

    /// Evict the pending command once its deadline has passed
    ///
    /// Returns true when the slot changed.
    fn expire_if_due(&mut self, now: Instant) -> bool {
        let Some(pending) = self.pending.as_mut() else {
            return false;
        };
        if now < pending.deadline {
            return false;
        }
        if pending.busy && !pending.extended {
            pending.extended = true;
            pending.deadline += pending.timeout;
            tracing::debug!(
                "Device is busy, extending wait for '{}' by {:?}",
                pending.command,
                pending.timeout
            );
            return false;
        }
        tracing::warn!(
            "Timed out while waiting for a response on '{}' (timeout {:?})",
            pending.command,
            pending.timeout
        );
        self.resolve(CommandOutcome::TimedOut);
        true
    }

    /// Write queued commands while the slot is free
    ///
    /// Each written command takes the slot, so at most one is written per
    /// call unless a write fails.
    fn pump<W>(&mut self, write: &W)
    where
        W: Fn(&str) -> Result<(), ConnectionError>,
    {
        while self.pending.is_none() {
            let Some(next) = self.queue.pop_front() else {
                break;
            };
            self.occupy(&next.command, next.timeout, false);
            if let Err(err) = write(&next.command) {
                tracing::warn!(
                    "Dropping {} queued command(s), '{}' could not be sent: {}",
                    self.queue.len() + 1,
                    next.command,
                    err
                );
                self.pending = None;
                self.queue.clear();
            }
        }
    }
}

/// Single-slot command correlator for one connection
#[derive(Debug, Default)]
pub struct Synchronizer {
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl Synchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a command without waiting for its answer
    ///
    /// While another command holds the slot the command is queued, so its
    /// `ok` is never mistaken for the answer to the pending one.
    pub fn send<W>(&self, command: &str, timeout: Duration, write: W) -> Result<(), ConnectionError>
    where
        W: Fn(&str) -> Result<(), ConnectionError>,
    {
        let id = {
            let mut state = self.state.lock();
            if state.expire_if_due(Instant::now()) {
                self.changed.notify_all();
            }
            state.pump(&write);
            if state.pending.is_some() {
                tracing::debug!("Queued '{}' behind the pending command", command);
                state.queue.push_back(QueuedCommand {
                    command: command.to_string(),
                    timeout,
                });
                return Ok(());
            }
            state.occupy(command, timeout, false)
        };
        self.write_or_release(command, id, write)
    }

    /// Write a command and return a ticket for polling its outcome
    pub fn send_tracked<W>(
        &self,
        command: &str,
        timeout: Duration,
        write: W,
    ) -> Result<CommandTicket, Error>
    where
        W: Fn(&str) -> Result<(), ConnectionError>,
    {
        let id = {
            let mut state = self.state.lock();
            if state.expire_if_due(Instant::now()) {
                self.changed.notify_all();
            }
            state.pump(&write);
            if let Some(pending) = &state.pending {
                return Err(CommandError::InFlight {
                    pending: pending.command.clone(),
                }
                .into());
            }
            state.occupy(command, timeout, true)
        };
        self.write_or_release(command, id, write)?;
        Ok(CommandTicket {
            id,
            command: command.to_string(),
            timeout,
            sent_at: Instant::now(),
        })
    }

    /// Outcome of a tracked command, or `None` while it is still pending
    pub fn poll(&self, ticket: &CommandTicket) -> Option<CommandOutcome> {
        let mut state = self.state.lock();
        if state.expire_if_due(Instant::now()) {
            self.changed.notify_all();
        }
        if let Some(outcome) = state.completed.remove(&ticket.id) {
            return Some(outcome);
        }
        match &state.pending {
            Some(pending) if pending.id == ticket.id => None,
            _ => Some(CommandOutcome::Abandoned),
        }
    }

    /// Write a command and block until it resolves
    ///
    /// Waits for the slot first when another command is pending or queued;
    /// that wait counts against the same timeout.
    pub fn send_and_wait<W>(&self, command: &str, timeout: Duration, write: W) -> CommandOutcome
    where
        W: Fn(&str) -> Result<(), ConnectionError>,
    {
        let slot_deadline = Instant::now() + timeout;
        let id = {
            let mut state = self.state.lock();
            loop {
                let now = Instant::now();
                if state.expire_if_due(now) {
                    self.changed.notify_all();
                }
                state.pump(&write);
                let Some(pending_deadline) = state.pending.as_ref().map(|p| p.deadline) else {
                    break;
                };
                if now >= slot_deadline {
                    tracing::warn!("Gave up waiting to send '{}', device still occupied", command);
                    return CommandOutcome::TimedOut;
                }
                self.changed
                    .wait_until(&mut state, pending_deadline.min(slot_deadline));
            }
            state.occupy(command, timeout, true)
        };

        if let Err(err) = self.write_or_release(command, id, write) {
            tracing::error!("Failed to send '{}': {}", command, err);
            let mut state = self.state.lock();
            state.completed.remove(&id);
            return CommandOutcome::Abandoned;
        }

        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = state.completed.remove(&id) {
                return outcome;
            }
            let deadline = match &state.pending {
                Some(pending) if pending.id == id => pending.deadline,
                _ => return CommandOutcome::Abandoned,
            };
            if Instant::now() >= deadline {
                if state.expire_if_due(Instant::now()) {
                    self.changed.notify_all();
                }
                continue;
            }
            self.changed.wait_until(&mut state, deadline);
        }
    }

    /// Write the next queued command if the slot has become free
    ///
    /// The reader calls this after each line and on idle ticks, so queued
    /// commands follow a resolved or expired one without another send.
    pub fn flush<W>(&self, write: W)
    where
        W: Fn(&str) -> Result<(), ConnectionError>,
    {
        let mut state = self.state.lock();
        if state.expire_if_due(Instant::now()) {
            self.changed.notify_all();
        }
        state.pump(&write);
    }

    /// Whether a command occupies the slot or waits for it
    pub fn is_pending(&self) -> bool {
        let mut state = self.state.lock();
        if state.expire_if_due(Instant::now()) {
            self.changed.notify_all();
        }
        state.pending.is_some() || !state.queue.is_empty()
    }

    /// Text of the pending command, if any
    pub fn pending_command(&self) -> Option<String> {
        self.state.lock().pending.as_ref().map(|p| p.command.clone())
    }

    /// Number of fire-and-forget commands waiting for the slot
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Collect a response line for the pending command
    pub fn on_line(&self, line: &str) {
        let mut state = self.state.lock();
        match state.pending.as_mut() {
            Some(pending) => pending.lines.push(line.to_string()),
            None => tracing::debug!("Dropping unsolicited line: [{}]", line),
        }
    }

    /// The device reported `busy`
    pub fn on_busy(&self) {
        if let Some(pending) = self.state.lock().pending.as_mut() {
            pending.busy = true;
        }
    }

    /// The device sent `ok`
    ///
    /// Resolves the pending command with every collected line that is not an
    /// echo of the command itself. Returns the resolved command.
    pub fn on_ok(&self) -> Option<String> {
        let mut state = self.state.lock();
        let response = state.pending.as_ref().map(|pending| {
            pending
                .lines
                .iter()
                .filter(|line| line.as_str() != pending.token)
                .cloned()
                .collect::<Vec<_>>()
                .join("\n")
        })?;
        let resolved = state.resolve(CommandOutcome::Response(response));
        self.changed.notify_all();
        resolved
    }

    /// The device sent `error:`
    ///
    /// Fails the pending command right away. Returns the failed command.
    pub fn on_error(&self, message: &str) -> Option<String> {
        let mut state = self.state.lock();
        let resolved = state.resolve(CommandOutcome::Failed(DeviceError::new(message)));
        if resolved.is_some() {
            self.changed.notify_all();
        }
        resolved
    }

    /// Release everything (teardown or device reset)
    ///
    /// Queued commands are dropped with the pending one.
    pub fn abandon(&self) {
        let mut state = self.state.lock();
        if let Some(command) = state.resolve(CommandOutcome::Abandoned) {
            tracing::debug!("Abandoned pending command '{}'", command);
        }
        if !state.queue.is_empty() {
            tracing::debug!("Dropped {} queued command(s)", state.queue.len());
            state.queue.clear();
        }
        self.changed.notify_all();
    }

    fn write_or_release<W>(&self, command: &str, id: u64, write: W) -> Result<(), ConnectionError>
    where
        W: Fn(&str) -> Result<(), ConnectionError>,
    {
        let result = write(command);
        if result.is_err() {
            let mut state = self.state.lock();
            if state.pending.as_ref().is_some_and(|p| p.id == id) {
                state.resolve(CommandOutcome::Abandoned);
                self.changed.notify_all();
            }
        }
        result
    }
}
