//! Tool change state machine
//!
//! A tool change takes anywhere from seconds to minutes, so it is never run
//! as one blocking call. A [`ToolChangeSession`] is advanced one stage at a
//! time by [`ToolChangeSession::step`], which returns the delay after which
//! it wants to run again. Any scheduler can drive it; [`run_async`] uses
//! tokio timers and [`run_blocking`] plain sleeps.
//!
//! Stages: `Pre -> Send -> Await -> QueryFeedState -> Post -> Finalize`.
//! `Send` keeps retrying while an earlier command still holds the line.
//! Failures anywhere jump straight to `Finalize`, which always records the
//! duration and releases the session.
//!
//! [`run_async`]: ToolChangeSession::run_async
//! [`run_blocking`]: ToolChangeSession::run_blocking

use super::commands::{self, ConfigQuery};
use super::engine::Engine;
use super::synchronizer::{CommandOutcome, CommandTicket};
use smuffkit_core::{CommandError, Error, Result, ToolChangeError, NO_TOOL};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where a session currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChangeStage {
    /// Record the start and run the pre macro while printing
    Pre,
    /// Write the tool select command
    Send,
    /// Wait for the tool select to resolve
    Await,
    /// Ask for the per-tool feed states
    QueryFeedState,
    /// Run the post macro while paused
    Post,
    /// Record statistics and release the session
    Finalize,
    Done,
}

/// What the scheduler should do after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Call [`ToolChangeSession::step`] again after the delay
    Continue(Duration),
    Done,
}

/// How a tool change ended
#[derive(Debug, Clone, PartialEq)]
pub enum ToolChangeOutcome {
    Completed {
        previous: i32,
        tool: i32,
        elapsed: Duration,
    },
    Aborted {
        tool: i32,
        reason: String,
        elapsed: Duration,
    },
}

impl ToolChangeOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ToolChangeOutcome::Completed { .. })
    }
}

/// Result of asking for a tool change
#[derive(Debug)]
pub enum ToolChangeStart {
    /// The tool is already selected; nothing was sent
    AlreadyLoaded(i32),
    Started(ToolChangeSession),
}

/// One tool change being driven
pub struct ToolChangeSession {
    engine: Arc<Engine>,
    tool: i32,
    stage: ToolChangeStage,
    previous: i32,
    started: Option<Instant>,
    ticket: Option<CommandTicket>,
    failure: Option<String>,
    outcome: Option<ToolChangeOutcome>,
    released: bool,
}

impl std::fmt::Debug for ToolChangeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolChangeSession")
            .field("tool", &self.tool)
            .field("stage", &self.stage)
            .field("previous", &self.previous)
            .finish_non_exhaustive()
    }
}

/// Validate a tool change request and open a session for it
pub(crate) fn begin(engine: &Arc<Engine>, tool: i32) -> Result<ToolChangeStart> {
    engine.ensure_connected()?;
    if engine.session_active.load(Ordering::SeqCst) {
        return Err(ToolChangeError::Busy.into());
    }

    {
        let mut device = engine.device.write();
        if !device.accepts_tool(tool) {
            device.pending_tool = NO_TOOL;
            return Err(ToolChangeError::InvalidTool {
                tool,
                tool_count: device.tool_count,
            }
            .into());
        }
        if device.current_tool == tool {
            drop(device);
            tracing::info!("No tool change needed, skipping...");
            engine.notify(&format!(
                "Selected tool (T{}) is already loaded. Skipping tool change.",
                tool
            ));
            return Ok(ToolChangeStart::AlreadyLoaded(tool));
        }
    }

    if engine
        .session_active
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(ToolChangeError::Busy.into());
    }

    let previous = {
        let mut device = engine.device.write();
        device.pending_tool = tool;
        device.processing = true;
        device.current_tool
    };
    engine.watcher.set_timeout(engine.config.toolchange_timeout);
    tracing::info!("Tool change T{} -> T{} requested", previous, tool);

    Ok(ToolChangeStart::Started(ToolChangeSession {
        engine: engine.clone(),
        tool,
        stage: ToolChangeStage::Pre,
        previous,
        started: None,
        ticket: None,
        failure: None,
        outcome: None,
        released: false,
    }))
}

impl ToolChangeSession {
    pub fn tool(&self) -> i32 {
        self.tool
    }

    pub fn stage(&self) -> ToolChangeStage {
        self.stage
    }

    /// Outcome, once the session reached `Done`
    pub fn outcome(&self) -> Option<&ToolChangeOutcome> {
        self.outcome.as_ref()
    }

    /// Run the current stage
    pub fn step(&mut self) -> Step {
        let engine = self.engine.clone();
        let _entered = engine.span.enter();
        let timing = engine.config.timing;

        match self.stage {
            ToolChangeStage::Pre => {
                self.started = Some(Instant::now());
                self.previous = engine.device.read().current_tool;
                if engine.host.print_state.is_printing() {
                    if let Err(err) = engine.host.macros.run_pre_toolchange(self.tool) {
                        tracing::error!("Pre tool change macro failed: {}", err);
                        return self.abort(format!("pre tool change macro failed: {}", err));
                    }
                }
                self.stage = ToolChangeStage::Send;
                Step::Continue(timing.pre)
            }
            ToolChangeStage::Send => {
                let command = commands::select_tool(self.tool, engine.config.auto_load);
                match engine.send_tracked(&command) {
                    Ok(ticket) => {
                        self.ticket = Some(ticket);
                        self.stage = ToolChangeStage::Await;
                        Step::Continue(timing.send_settle)
                    }
                    // the device still owes an answer to an earlier command
                    Err(Error::Command(CommandError::InFlight { pending })) => {
                        if self.elapsed() > engine.config.toolchange_timeout {
                            return self.abort_timeout();
                        }
                        tracing::debug!("T{} waits for '{}' to finish", self.tool, pending);
                        Step::Continue(timing.await_poll)
                    }
                    Err(err) => {
                        tracing::error!("Failed to send '{}': {}", command, err);
                        self.abort(err.to_string())
                    }
                }
            }
            ToolChangeStage::Await => self.await_tool_select(),
            ToolChangeStage::QueryFeedState => {
                if let Err(err) = engine.send(&ConfigQuery::FeedState.command()) {
                    tracing::warn!("Failed to query feed states: {}", err);
                }
                self.stage = ToolChangeStage::Post;
                Step::Continue(timing.feed_state)
            }
            ToolChangeStage::Post => {
                if engine.host.print_state.is_paused() {
                    if let Err(err) = engine
                        .host
                        .macros
                        .run_post_toolchange(self.previous, self.tool)
                    {
                        tracing::error!("Post tool change macro failed: {}", err);
                    }
                }
                self.stage = ToolChangeStage::Finalize;
                Step::Continue(timing.post)
            }
            ToolChangeStage::Finalize => {
                self.finalize();
                Step::Done
            }
            ToolChangeStage::Done => Step::Done,
        }
    }

    fn await_tool_select(&mut self) -> Step {
        let engine = self.engine.clone();
        let Some(ticket) = self.ticket.as_ref() else {
            return self.abort("no tool select was sent".to_string());
        };

        match engine.sync.poll(ticket) {
            Some(CommandOutcome::Response(_)) => {
                tracing::debug!("T{} selected", self.tool);
                self.stage = ToolChangeStage::QueryFeedState;
                Step::Continue(Duration::ZERO)
            }
            Some(CommandOutcome::Failed(err)) => {
                tracing::error!("Tool change failed: {}", err);
                self.abort(err.to_string())
            }
            Some(CommandOutcome::TimedOut) => self.abort_timeout(),
            Some(CommandOutcome::Abandoned) => {
                self.abort("tool select was abandoned".to_string())
            }
            None => {
                if self.elapsed() > engine.config.toolchange_timeout {
                    return self.abort_timeout();
                }
                Step::Continue(engine.config.timing.await_poll)
            }
        }
    }

    /// Time since the `Pre` stage ran
    fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    fn abort_timeout(&mut self) -> Step {
        let err = CommandError::ToolChangeTimeout {
            timeout_ms: self.engine.config.toolchange_timeout.as_millis() as u64,
        };
        tracing::error!("{}", err);
        self.abort(err.to_string())
    }

    fn abort(&mut self, reason: String) -> Step {
        self.failure = Some(reason);
        self.stage = ToolChangeStage::Finalize;
        Step::Continue(Duration::ZERO)
    }

    fn finalize(&mut self) {
        let engine = self.engine.clone();
        let elapsed = self.elapsed();
        let average = {
            let mut stats = engine.stats.lock();
            stats.record(elapsed);
            stats.average_secs()
        };
        tracing::info!(
            "Tool change took {:.2}s, average {:.2}s",
            elapsed.as_secs_f64(),
            average
        );

        let outcome = match self.failure.take() {
            None => {
                let mut device = engine.device.write();
                device.previous_tool = self.previous;
                device.current_tool = self.tool;
                ToolChangeOutcome::Completed {
                    previous: self.previous,
                    tool: self.tool,
                    elapsed,
                }
            }
            Some(reason) => {
                engine.notify(&format!("Tool change to T{} aborted: {}", self.tool, reason));
                ToolChangeOutcome::Aborted {
                    tool: self.tool,
                    reason,
                    elapsed,
                }
            }
        };
        self.release();
        self.outcome = Some(outcome);
        self.stage = ToolChangeStage::Done;
    }

    /// Give the engine back: watchdog, pending tool and the session guard
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let engine = &self.engine;
        engine.watcher.restore_timeout();
        {
            let mut device = engine.device.write();
            device.pending_tool = NO_TOOL;
            device.processing = false;
        }
        engine.session_active.store(false, Ordering::SeqCst);
    }

    fn finished(&self) -> ToolChangeOutcome {
        self.outcome.clone().unwrap_or(ToolChangeOutcome::Aborted {
            tool: self.tool,
            reason: "session ended early".to_string(),
            elapsed: Duration::ZERO,
        })
    }

    /// Drive the session to completion on the tokio timer
    pub async fn run_async(mut self) -> ToolChangeOutcome {
        while let Step::Continue(delay) = self.step() {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        self.finished()
    }

    /// Drive the session to completion, sleeping on the calling thread
    pub fn run_blocking(mut self) -> ToolChangeOutcome {
        while let Step::Continue(delay) = self.step() {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
        self.finished()
    }
}

impl Drop for ToolChangeSession {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!("Tool change to T{} dropped before it finished", self.tool);
            self.release();
        }
    }
}
