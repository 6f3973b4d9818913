//! Host collaborator interfaces
//!
//! The driver never reaches into the host directly. Macro execution, print
//! state queries and operator messages go through these traits, which the
//! host implements and hands over bundled as [`HostServices`].

use crate::error::HostError;
use std::sync::Arc;

/// Runs host macros around a tool change
///
/// Implement this trait to hook tool changes into the host's macro facility.
/// Failures are logged by the driver and never treated as fatal.
pub trait MacroRunner: Send + Sync {
    /// Called before the tool select command is sent, only while printing
    fn run_pre_toolchange(&self, _pending_tool: i32) -> Result<(), HostError> {
        Ok(())
    }

    /// Called after a successful tool change, only while the print is paused
    fn run_post_toolchange(&self, _previous_tool: i32, _new_tool: i32) -> Result<(), HostError> {
        Ok(())
    }

    /// Called when the controller itself asks for a tool change
    fn select_tool(&self, _tool: i32) -> Result<(), HostError> {
        Ok(())
    }
}

/// Answers questions about the host's print job
pub trait PrintState: Send + Sync {
    fn is_printing(&self) -> bool {
        false
    }

    fn is_paused(&self) -> bool {
        false
    }

    /// Whether the extruder is hot enough to move filament
    ///
    /// An error means the temperature could not be queried at all.
    fn can_extrude(&self) -> Result<bool, HostError> {
        Ok(true)
    }
}

/// Best-effort text channel to the operator console
pub trait Notifier: Send + Sync {
    fn respond(&self, text: &str);
}

/// Macro runner that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMacros;

impl MacroRunner for NoopMacros {}

/// Print state of a host that is never printing
#[derive(Debug, Default, Clone, Copy)]
pub struct IdlePrinter;

impl PrintState for IdlePrinter {}

/// Notifier that forwards operator messages to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn respond(&self, text: &str) {
        tracing::info!("{}", text);
    }
}

/// Notifier that tags every message with the instance it came from
pub struct PrefixedNotifier {
    prefix: String,
    inner: Arc<dyn Notifier>,
}

impl PrefixedNotifier {
    /// Wrap `inner`, prefixing every message with ` [ {instance} ]  `
    pub fn for_instance(instance: &str, inner: Arc<dyn Notifier>) -> Self {
        Self {
            prefix: format!(" [ {} ]  ", instance),
            inner,
        }
    }
}

impl Notifier for PrefixedNotifier {
    fn respond(&self, text: &str) {
        self.inner.respond(&format!("{}{}", self.prefix, text));
    }
}

/// The host collaborators one engine works with
#[derive(Clone)]
pub struct HostServices {
    pub macros: Arc<dyn MacroRunner>,
    pub print_state: Arc<dyn PrintState>,
    pub notifier: Arc<dyn Notifier>,
}

impl Default for HostServices {
    fn default() -> Self {
        Self {
            macros: Arc::new(NoopMacros),
            print_state: Arc::new(IdlePrinter),
            notifier: Arc::new(LogNotifier),
        }
    }
}

impl HostServices {
    pub fn with_macros(mut self, macros: Arc<dyn MacroRunner>) -> Self {
        self.macros = macros;
        self
    }

    pub fn with_print_state(mut self, print_state: Arc<dyn PrintState>) -> Self {
        self.print_state = print_state;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Same collaborators, with operator messages tagged by instance
    pub fn prefixed(&self, instance: &str) -> Self {
        Self {
            macros: self.macros.clone(),
            print_state: self.print_state.clone(),
            notifier: Arc::new(PrefixedNotifier::for_instance(
                instance,
                self.notifier.clone(),
            )),
        }
    }
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices").finish_non_exhaustive()
    }
}
