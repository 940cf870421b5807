//! Error types for signal and observation primitives.

use snafu::Snafu;

use crate::signal::{SignalCondition, SignalValue};

/// Result type for signal operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur in the signal layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A completion signal cannot start below zero.
    #[snafu(display("invalid initial signal value: {value}"))]
    InvalidInitialValue { value: SignalValue },

    /// Blocking wait gave up before the condition held.
    #[snafu(display("signal wait timeout: waited {timeout_ms}ms for value {condition} {threshold}, current {current}"))]
    WaitTimeout { timeout_ms: u64, condition: SignalCondition, threshold: SignalValue, current: SignalValue },

    /// Observer registration against a notifier that has shut down.
    #[snafu(display("notifier has shut down"))]
    NotifierShutDown,

    /// The notifier service thread could not be spawned.
    #[snafu(display("failed to spawn notifier thread: {source}"))]
    NotifierSpawn { source: std::io::Error },

    /// Dispatch timing was queried before the device recorded it.
    #[snafu(display("no dispatch tick window recorded on signal (agent {agent})"))]
    MissingTickWindow { agent: String },
}
