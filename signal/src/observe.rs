//! Asynchronous signal observation service.
//!
//! A [`Notifier`] owns one background service thread that watches every
//! registered observer and invokes its callback once the observed signal
//! satisfies its threshold condition. This models the driver-internal
//! notification thread of a GPU runtime: callbacks run on a thread the
//! registrant does not control, and one thread services all signals.
//!
//! # Design
//!
//! Observers are level-triggered: the service thread rescans whenever a
//! subscribed signal mutates or an observer is registered, and fires any
//! observer whose condition currently holds. Wakes are serialized through
//! the service mutex, so a completion that lands mid-scan is picked up by
//! the next scan rather than lost.
//!
//! Callbacks run with the service lock released. A callback that returns
//! `true` is re-armed and will fire again while its condition still holds;
//! completion-style observers return `false` to drop the observation.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use snafu::{ResultExt, ensure};

use crate::error::{NotifierShutDownSnafu, NotifierSpawnSnafu, Result};
use crate::signal::{Signal, SignalCondition, SignalValue, Watcher};

/// Callback invoked on the service thread when a condition first holds.
///
/// Returns whether the observation should be re-armed.
pub type ObserverCallback = Box<dyn FnMut(SignalValue) -> bool + Send>;

struct Observer {
    signal: Arc<Signal>,
    condition: SignalCondition,
    threshold: SignalValue,
    callback: ObserverCallback,
}

impl Observer {
    fn satisfied(&self) -> bool {
        self.signal.satisfies(self.condition, self.threshold)
    }
}

#[derive(Default)]
struct State {
    observers: Vec<Observer>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    condvar: Condvar,
}

impl Watcher for Shared {
    fn wake(&self) {
        // Serialize with the service scan: a notify that raced a scan in
        // progress must land after the scan's wait, not before it.
        let _guard = self.state.lock();
        self.condvar.notify_one();
    }
}

/// Asynchronous notification service over completion signals.
pub struct Notifier {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").field("observers", &self.shared.state.lock().observers.len()).finish()
    }
}

impl Notifier {
    /// Create a notifier and spawn its service thread.
    pub fn new() -> Result<Arc<Self>> {
        let shared = Arc::new(Shared { state: Mutex::new(State::default()), condvar: Condvar::new() });

        let service = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("kerntrace-notifier".into())
            .spawn(move || Self::run(service))
            .context(NotifierSpawnSnafu)?;

        Ok(Arc::new(Self { shared, thread: Mutex::new(Some(thread)) }))
    }

    /// Register a one-shot observer on `signal`.
    ///
    /// `callback` is invoked on the service thread once
    /// `condition(value, threshold)` holds; returning `true` re-arms the
    /// observation, `false` drops it. Fails if the notifier has shut down.
    pub fn register(
        &self,
        signal: Arc<Signal>,
        condition: SignalCondition,
        threshold: SignalValue,
        callback: impl FnMut(SignalValue) -> bool + Send + 'static,
    ) -> Result<()> {
        // Subscribe outside the state lock: signal wakeups take the state
        // lock, so the reverse nesting must never occur.
        let watcher: Arc<dyn Watcher> = self.shared.clone();
        signal.subscribe(Arc::downgrade(&watcher));

        let mut state = self.shared.state.lock();
        ensure!(!state.shutdown, NotifierShutDownSnafu);
        state.observers.push(Observer { signal, condition, threshold, callback: Box::new(callback) });

        // The condition may already hold at registration time
        self.shared.condvar.notify_one();
        Ok(())
    }

    /// Number of currently-armed observers.
    pub fn observers(&self) -> usize {
        self.shared.state.lock().observers.len()
    }

    fn run(shared: Arc<Shared>) {
        tracing::debug!("notifier service thread started");
        let mut state = shared.state.lock();
        loop {
            if state.shutdown {
                break;
            }

            let Some(index) = state.observers.iter().position(Observer::satisfied) else {
                shared.condvar.wait(&mut state);
                continue;
            };

            let mut observer = state.observers.swap_remove(index);
            drop(state);

            let value = observer.signal.value();
            let rearm = (observer.callback)(value);

            state = shared.state.lock();
            if rearm && !state.shutdown {
                state.observers.push(observer);
            }
        }
        let discarded = state.observers.len();
        drop(state);
        if discarded > 0 {
            tracing::debug!(discarded, "notifier shut down with unfired observers");
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.condvar.notify_all();
        }

        if let Some(handle) = self.thread.lock().take() {
            // The last notifier reference can be released from a callback on
            // the service thread itself; joining there would deadlock.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
