//! Completion signal primitive.
//!
//! A [`Signal`] is an owned completion primitive with decrementing
//! semantics: it is created at a pending value and the producer publishes
//! completion by storing a lower value. Waiters block on a threshold
//! condition; observer services subscribe to be woken on mutation.
//!
//! # Design
//!
//! - `value` is an `AtomicI64`; loads are relaxed, completion stores are
//!   release so that a waiter woken by the store observes everything
//!   written before it.
//! - Completion metadata (the device-side begin/end tick window) lives on
//!   the signal as an explicit capability rather than as aliased signal
//!   memory: it is written before the completion decrement, so any thread
//!   that observes the decrement can read a fully-formed window.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use snafu::ensure;

use crate::error::{InvalidInitialValueSnafu, Result, WaitTimeoutSnafu};

/// Value carried by a completion signal.
pub type SignalValue = i64;

/// Threshold condition a signal value is tested against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalCondition {
    /// Holds when `value < threshold`.
    Lt,
    /// Holds when `value == threshold`.
    Eq,
}

impl SignalCondition {
    /// Test the condition against a value.
    pub fn holds(&self, value: SignalValue, threshold: SignalValue) -> bool {
        match self {
            SignalCondition::Lt => value < threshold,
            SignalCondition::Eq => value == threshold,
        }
    }
}

impl fmt::Display for SignalCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalCondition::Lt => write!(f, "<"),
            SignalCondition::Eq => write!(f, "=="),
        }
    }
}

/// Device-side begin/end timestamps of a completed dispatch, in device ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickWindow {
    /// Tick at which the dispatch started executing.
    pub start: u64,
    /// Tick at which the dispatch finished executing.
    pub end: u64,
}

/// Woken when a subscribed signal's value changes.
pub(crate) trait Watcher: Send + Sync {
    fn wake(&self);
}

/// Owned completion signal.
///
/// # Thread Safety
///
/// All operations are safe from any thread. A signal typically has one
/// producer (the device or a propagating completion handler) and any number
/// of waiters and observers.
pub struct Signal {
    /// Current signal value.
    value: AtomicI64,
    /// Device-side tick window, recorded before the completion decrement.
    window: Mutex<Option<TickWindow>>,
    /// Mutex for condvar waiting (protects nothing, just for condvar).
    mutex: Mutex<()>,
    /// Condvar for blocking waiters.
    condvar: Condvar,
    /// Observer services to wake on mutation.
    watchers: Mutex<Vec<Weak<dyn Watcher>>>,
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("value", &self.value.load(Ordering::Relaxed))
            .field("window", &*self.window.lock())
            .finish()
    }
}

impl Signal {
    /// Create a new signal at the given pending value.
    ///
    /// Completion signals count down, so a negative initial value is
    /// rejected.
    pub fn new(initial: SignalValue) -> Result<Arc<Self>> {
        ensure!(initial >= 0, InvalidInitialValueSnafu { value: initial });
        Ok(Arc::new(Self {
            value: AtomicI64::new(initial),
            window: Mutex::new(None),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            watchers: Mutex::new(Vec::new()),
        }))
    }

    /// Get the current signal value.
    pub fn value(&self) -> SignalValue {
        self.value.load(Ordering::Relaxed)
    }

    /// Store a new value and wake waiters and observers.
    pub fn store(&self, value: SignalValue) {
        self.value.store(value, Ordering::Release);
        self.wake_all();
    }

    /// Decrement the value by one and wake waiters and observers.
    ///
    /// This is the completion edge: metadata recorded before the decrement
    /// is visible to every thread the decrement wakes.
    pub fn decrement(&self) {
        self.value.fetch_sub(1, Ordering::Release);
        self.wake_all();
    }

    /// Check whether `condition` holds against `threshold` without blocking.
    pub fn satisfies(&self, condition: SignalCondition, threshold: SignalValue) -> bool {
        condition.holds(self.value.load(Ordering::Acquire), threshold)
    }

    /// Block until `condition` holds against `threshold`.
    ///
    /// `timeout_ms == 0` waits forever; otherwise the wait fails with
    /// [`Error::WaitTimeout`](crate::error::Error) once the timeout elapses.
    pub fn wait(&self, condition: SignalCondition, threshold: SignalValue, timeout_ms: u64) -> Result<()> {
        // Fast path: already satisfied
        if self.satisfies(condition, threshold) {
            return Ok(());
        }

        let mut guard = self.mutex.lock();

        if timeout_ms == 0 {
            while !self.satisfies(condition, threshold) {
                self.condvar.wait(&mut guard);
            }
            return Ok(());
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        while !self.satisfies(condition, threshold) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return WaitTimeoutSnafu {
                    timeout_ms,
                    condition,
                    threshold,
                    current: self.value.load(Ordering::Acquire),
                }
                .fail();
            }
            let result = self.condvar.wait_for(&mut guard, remaining);
            if result.timed_out() && !self.satisfies(condition, threshold) {
                return WaitTimeoutSnafu {
                    timeout_ms,
                    condition,
                    threshold,
                    current: self.value.load(Ordering::Acquire),
                }
                .fail();
            }
        }
        Ok(())
    }

    /// Record the device-side tick window of the completed dispatch.
    ///
    /// Must happen before the completion decrement that publishes it.
    pub fn set_tick_window(&self, window: TickWindow) {
        *self.window.lock() = Some(window);
    }

    /// Get the recorded tick window, if the device has recorded one.
    pub fn tick_window(&self) -> Option<TickWindow> {
        *self.window.lock()
    }

    /// Copy completion metadata from another signal.
    ///
    /// Used when completion is propagated from a proxy signal to the
    /// original caller-supplied signal, before the original is decremented.
    pub fn copy_tick_window_from(&self, other: &Signal) {
        *self.window.lock() = other.tick_window();
    }

    /// Subscribe an observer service to mutation wakeups.
    pub(crate) fn subscribe(&self, watcher: Weak<dyn Watcher>) {
        self.watchers.lock().push(watcher);
    }

    fn wake_all(&self) {
        {
            // Serialize with a waiter between its condition check and its
            // wait; an unlocked notify can land in that gap and be lost.
            let _guard = self.mutex.lock();
            self.condvar.notify_all();
        }

        // Collect upgrades first: waking a watcher takes its own lock, which
        // must not nest inside the watcher list lock.
        let watchers: Vec<_> = {
            let mut watchers = self.watchers.lock();
            watchers.retain(|weak| weak.strong_count() > 0);
            watchers.iter().filter_map(Weak::upgrade).collect()
        };
        for watcher in watchers {
            watcher.wake();
        }
    }
}
