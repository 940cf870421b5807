//! In-flight dispatch registry and completion handling.
//!
//! # Design
//!
//! The tracker owns every in-flight [`Entry`] in a mutex-guarded map keyed
//! by entry id. [`Tracker::allocate`] creates the proxy signal, stamps the
//! dispatch timestamp and registers the completion observer; the observer
//! fires on the notifier's service thread once the proxy drops below its
//! pending value and runs the completion handler: rendezvous with enable,
//! timestamp capture, original-signal propagation, consumer callback,
//! entry removal.
//!
//! Dropping the tracker drains: it blocks on every remaining proxy signal
//! reaching completion before releasing the registry, so no driver-visible
//! signal resource is freed while a notification may still reference it. A
//! dispatch that never completes therefore blocks teardown, and an entry
//! whose completion arrives before [`Tracker::enable_raw`] keeps the
//! notification thread spinning until the submitter enables it; both are
//! inherited contracts of the dispatch-interception model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bon::bon;
use parking_lot::Mutex;
use snafu::ResultExt;

use kerntrace_signal::{Agent, Clock, Notifier, Signal, SignalCondition, SignalValue, SystemClock};

use crate::entry::{Entry, EntryId};
use crate::error::{NotifierSetupSnafu, ObserverRegistrationSnafu, ProxySignalSnafu, Result};
use crate::handler::{CounterGroup, Handler};

/// Initial proxy signal value; completion is the drop below it.
const PENDING: SignalValue = 1;

/// Concurrent registry of in-flight dispatches.
///
/// Cheap to share behind `Arc`; all methods take `&self`.
pub struct Tracker {
    inner: Arc<Inner>,
}

struct Inner {
    /// Tracked entries, keyed by entry id.
    entries: Mutex<HashMap<EntryId, Arc<Entry>>>,
    /// Next entry id.
    next_id: AtomicU64,
    /// Outstanding dispatch count, diagnostics only.
    outstanding: AtomicU64,
    /// Clock service for dispatch/complete stamps and tick conversion.
    clock: Arc<dyn Clock>,
    /// Asynchronous notification service.
    notifier: Arc<Notifier>,
    /// Per-entry diagnostic tracing.
    trace: bool,
}

#[bon]
impl Tracker {
    /// Create a tracker.
    ///
    /// `clock` defaults to a nanosecond-domain [`SystemClock`]; `notifier`
    /// defaults to a freshly spawned service. Pass a shared notifier to
    /// service several trackers from one thread.
    #[builder]
    pub fn new(
        clock: Option<Arc<dyn Clock>>,
        notifier: Option<Arc<Notifier>>,
        #[builder(default)] trace: bool,
    ) -> Result<Self> {
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock::default()));
        let notifier = match notifier {
            Some(notifier) => notifier,
            None => Notifier::new().context(NotifierSetupSnafu)?,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                outstanding: AtomicU64::new(0),
                clock,
                notifier,
                trace,
            }),
        })
    }
}

impl Tracker {
    /// Register a dispatch and obtain its tracking entry.
    ///
    /// Creates the proxy signal the dispatch must be issued with (in place
    /// of `orig`), stamps the dispatch timestamp and arms the completion
    /// observer. The returned entry stays registered until its completion
    /// handler has run. All-or-nothing: on error nothing is registered.
    pub fn allocate(&self, agent: Arc<Agent>, orig: Option<Arc<Signal>>) -> Result<Arc<Entry>> {
        let proxy = Signal::new(PENDING).context(ProxySignalSnafu)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(Entry::new(id, agent, orig, proxy, self.inner.clock.now_ns()));

        // The observer owns an entry reference until it fires. It cannot
        // fire before the caller issues the dispatch: the proxy is still at
        // PENDING when it becomes visible outside this call.
        let inner = Arc::downgrade(&self.inner);
        let observed = Arc::clone(&entry);
        self.inner
            .notifier
            .register(Arc::clone(entry.proxy()), SignalCondition::Lt, PENDING, move |value| {
                Inner::on_completion(&inner, &observed, value)
            })
            .context(ObserverRegistrationSnafu)?;

        self.inner.entries.lock().insert(id, Arc::clone(&entry));
        let outstanding = self.inner.outstanding.fetch_add(1, Ordering::Relaxed) + 1;

        if self.inner.trace {
            tracing::debug!(entry.id = id, outstanding, "dispatch registered");
        }
        Ok(entry)
    }

    /// Attach a raw signal-observer callback to an entry.
    ///
    /// Publishing the callback is the single synchronization point that
    /// releases the completion handler, which may already be spinning.
    /// Fails if the entry was already enabled.
    pub fn enable_raw(
        &self,
        entry: &Entry,
        callback: impl Fn(SignalValue, &Entry) -> bool + Send + Sync + 'static,
    ) -> Result<()> {
        self.enable(entry, Handler::Raw(Box::new(callback)))
    }

    /// Attach a grouped profiling callback to an entry.
    pub fn enable_grouped(
        &self,
        entry: &Entry,
        callback: impl Fn(CounterGroup, &Entry) + Send + Sync + 'static,
    ) -> Result<()> {
        self.enable(entry, Handler::Grouped(Box::new(callback)))
    }

    fn enable(&self, entry: &Entry, handler: Handler) -> Result<()> {
        let kind = handler.kind();
        entry.publish_handler(handler)?;

        if self.inner.trace {
            let outstanding = self.inner.outstanding.load(Ordering::Relaxed);
            tracing::debug!(entry.id = entry.id(), kind, outstanding, "handler attached");
        }
        Ok(())
    }

    /// Remove an entry from the registry.
    ///
    /// Idempotent by id. The proxy signal and record memory are released
    /// with the last entry reference.
    pub fn delete(&self, entry: &Entry) {
        self.inner.delete(entry);
    }

    /// Number of entries currently registered.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Whether no entries are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// Outstanding dispatch count. Diagnostics only: racy by design.
    pub fn outstanding(&self) -> u64 {
        self.inner.outstanding.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("entries", &self.len())
            .field("outstanding", &self.outstanding())
            .field("trace", &self.inner.trace)
            .finish()
    }
}

impl Drop for Tracker {
    /// Drain: block until every remaining proxy signal reaches completion,
    /// deleting each entry afterwards. The registry is empty when drop
    /// returns, and no signal the driver may still reference is freed
    /// early.
    fn drop(&mut self) {
        let remaining = self.len();
        if remaining > 0 {
            tracing::debug!(remaining, "tracker teardown with outstanding dispatches");
        }

        loop {
            let entry = { self.inner.entries.lock().values().next().map(Arc::clone) };
            let Some(entry) = entry else { break };

            // Intentionally unbounded: a dispatch that never completes
            // blocks teardown rather than freeing a live signal.
            if let Err(err) = entry.proxy().wait(SignalCondition::Lt, PENDING, 0) {
                tracing::error!(entry.id = entry.id(), %err, "drain wait failed");
            }
            self.inner.delete(&entry);
        }
    }
}

impl Inner {
    /// Completion handler, invoked on the notification thread when a proxy
    /// signal crosses its completion threshold. Returns whether to keep
    /// observing the signal; completion is one-shot.
    fn on_completion(inner: &Weak<Inner>, entry: &Arc<Entry>, value: SignalValue) -> bool {
        // A notification can outlive the tracker only once drain has
        // already retired the entry; nothing is left to do then.
        let Some(inner) = inner.upgrade() else {
            return false;
        };

        // Rendezvous: completion may beat the submitter's enable call.
        let handler = entry.wait_handler();

        inner.complete(entry);
        handler.invoke(value, entry);
        inner.delete(entry);

        false
    }

    /// Capture completion timing and propagate it to the original signal.
    fn complete(&self, entry: &Entry) {
        let window = match entry.agent().dispatch_time(entry.proxy()) {
            Ok(window) => window,
            // One-shot notification: the dispatch window cannot be
            // re-observed, so a failed query is an unrecoverable driver
            // contract violation.
            Err(err) => panic!("dispatch time query failed for entry {}: {err}", entry.id()),
        };

        let begin = self.clock.ticks_to_ns(window.start);
        let end = self.clock.ticks_to_ns(window.end);
        entry.stamp_completion(begin, end, self.clock.now_ns());

        if let Some(orig) = entry.original() {
            // Metadata lands on the original signal no later than the
            // decrement a waiter wakes on.
            orig.copy_tick_window_from(entry.proxy());
            orig.decrement();
        }

        if self.trace {
            let outstanding = self.outstanding.load(Ordering::Relaxed);
            tracing::debug!(entry.id = entry.id(), outstanding, "dispatch complete");
        }
    }

    fn delete(&self, entry: &Entry) {
        let removed = self.entries.lock().remove(&entry.id());
        if removed.is_some() {
            self.outstanding.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
