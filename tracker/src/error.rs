//! Error types for dispatch tracking.

use snafu::Snafu;

use crate::entry::EntryId;

/// Result type for tracker operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur during dispatch tracking.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Proxy signal creation failed during allocation.
    #[snafu(display("proxy signal setup failed: {source}"))]
    ProxySignal { source: kerntrace_signal::Error },

    /// Completion observer registration failed during allocation.
    #[snafu(display("completion observer registration failed: {source}"))]
    ObserverRegistration { source: kerntrace_signal::Error },

    /// Notifier construction failed.
    #[snafu(display("notifier setup failed: {source}"))]
    NotifierSetup { source: kerntrace_signal::Error },

    /// A handler was already attached to the entry.
    #[snafu(display("entry {id} already has a handler attached"))]
    AlreadyEnabled { id: EntryId },
}
