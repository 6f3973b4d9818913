//! Host-facing abstractions

pub mod host;

pub use host::{
    HostServices, IdlePrinter, LogNotifier, MacroRunner, NoopMacros, Notifier, PrefixedNotifier,
    PrintState,
};
