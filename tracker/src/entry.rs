//! Per-dispatch tracking record.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::thread;

use parking_lot::Mutex;

use kerntrace_signal::{Agent, Signal};

use crate::error::{AlreadyEnabledSnafu, Result};
use crate::handler::Handler;
use crate::record::DispatchRecord;

/// Registry key of an entry; plays the O(1)-removal back-reference role.
pub type EntryId = u64;

/// One in-flight dispatch tracking record.
///
/// The proxy signal is owned exclusively by the entry for its whole
/// lifetime; the caller's original signal, if any, only receives propagated
/// completion data. The handler cell transitions exactly once: `enable`
/// release-publishes it, the completion handler acquires it.
pub struct Entry {
    id: EntryId,
    agent: Arc<Agent>,
    orig: Option<Arc<Signal>>,
    proxy: Arc<Signal>,
    record: Mutex<DispatchRecord>,
    handler: OnceLock<Handler>,
}

impl Entry {
    pub(crate) fn new(
        id: EntryId,
        agent: Arc<Agent>,
        orig: Option<Arc<Signal>>,
        proxy: Arc<Signal>,
        dispatch_ns: u64,
    ) -> Self {
        let record = DispatchRecord { dispatch: dispatch_ns, ..Default::default() };
        Self { id, agent, orig, proxy, record: Mutex::new(record), handler: OnceLock::new() }
    }

    /// Registry key of this entry.
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Execution agent the dispatch was submitted to.
    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Caller-supplied completion signal, if the caller had one.
    pub fn original(&self) -> Option<&Arc<Signal>> {
        self.orig.as_ref()
    }

    /// Proxy completion signal substituted for the caller's signal.
    pub fn proxy(&self) -> &Arc<Signal> {
        &self.proxy
    }

    /// Snapshot of the timing record.
    ///
    /// `begin`, `end` and `complete` are meaningful only once the consumer
    /// callback has been invoked.
    pub fn record(&self) -> DispatchRecord {
        *self.record.lock()
    }

    /// Whether a consumer callback has been attached.
    pub fn is_enabled(&self) -> bool {
        self.handler.get().is_some()
    }

    /// Release-publish the consumer callback. Exactly once per entry.
    pub(crate) fn publish_handler(&self, handler: Handler) -> Result<()> {
        self.handler.set(handler).map_err(|_| AlreadyEnabledSnafu { id: self.id }.build())
    }

    /// Rendezvous with the submitting thread: spin until the callback has
    /// been published. Hardware may complete a dispatch before the
    /// submitter enables it; the handler must not proceed past this point
    /// with no callback attached.
    pub(crate) fn wait_handler(&self) -> &Handler {
        loop {
            if let Some(handler) = self.handler.get() {
                return handler;
            }
            thread::yield_now();
        }
    }

    /// Stamp completion timestamps onto the record.
    pub(crate) fn stamp_completion(&self, begin: u64, end: u64, complete: u64) {
        let mut record = self.record.lock();
        record.begin = begin;
        record.end = end;
        record.complete = complete;
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("agent", &self.agent.name())
            .field("enabled", &self.is_enabled())
            .field("record", &self.record())
            .finish()
    }
}
