//! Execution agent handle.

use snafu::OptionExt;

use crate::error::{MissingTickWindowSnafu, Result};
use crate::signal::{Signal, TickWindow};

/// Opaque reference to an execution device.
///
/// The tracker passes agents through unchanged; they matter only as the
/// query key for device-side dispatch timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    id: u32,
    name: String,
}

impl Agent {
    /// Create an agent handle.
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }

    /// Device identifier.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Query the device-side begin/end tick window of a completed dispatch.
    ///
    /// The device records the window on the completion signal before
    /// signaling; querying a signal that never had its window recorded is a
    /// driver contract violation and fails.
    pub fn dispatch_time(&self, signal: &Signal) -> Result<TickWindow> {
        signal.tick_window().context(MissingTickWindowSnafu { agent: self.name.clone() })
    }
}
