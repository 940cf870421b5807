//! Consumer callback kinds.
//!
//! A completed entry is delivered through one of two closed callback
//! shapes, selected at enable time: a raw signal observer, or a grouped
//! profiling callback that receives the counter-group placeholder. The
//! consumer's context travels as closure captures; both shapes also receive
//! the entry for record and identity access.

use std::fmt;

use kerntrace_signal::SignalValue;

use crate::entry::Entry;

/// Placeholder for a group of performance counters.
///
/// Counter enumeration and decoding live outside this layer; the grouped
/// callback shape still receives the group slot it will be filled from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterGroup {
    /// Index of the group within its profiling context.
    pub index: u32,
}

/// Raw signal-observer callback: `(value, entry) -> continue?`.
pub type RawHandlerFn = Box<dyn Fn(SignalValue, &Entry) -> bool + Send + Sync>;

/// Grouped profiling callback: `(group, entry)`.
pub type GroupedHandlerFn = Box<dyn Fn(CounterGroup, &Entry) + Send + Sync>;

/// Consumer callback attached to an entry.
pub enum Handler {
    /// Generic signal-observer shape.
    Raw(RawHandlerFn),
    /// Grouped profiling shape.
    Grouped(GroupedHandlerFn),
}

impl Handler {
    /// Invoke the callback for a completed entry.
    ///
    /// The raw shape's continue-observing result is discarded: completion
    /// notifications are one-shot.
    pub(crate) fn invoke(&self, value: SignalValue, entry: &Entry) {
        match self {
            Handler::Raw(callback) => {
                callback(value, entry);
            }
            Handler::Grouped(callback) => callback(CounterGroup::default(), entry),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Handler::Raw(_) => "raw",
            Handler::Grouped(_) => "grouped",
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.kind()).finish()
    }
}
