//! Asynchronous completion tracking for GPU kernel dispatches.
//!
//! Wraps each dispatch with a proxy completion signal so a profiling layer
//! can capture timing without blocking the submitting thread. The submitter
//! registers a dispatch with [`Tracker::allocate`], hands the proxy signal
//! to the device in place of the caller's own completion signal, and
//! attaches its consumer callback with [`Tracker::enable_raw`] or
//! [`Tracker::enable_grouped`] at its own pace. When the device signals the
//! proxy, a notification-thread handler captures timestamps, propagates
//! completion to the original signal, invokes the callback and retires the
//! entry.
//!
//! # Concurrency
//!
//! Three actors touch an entry: the submitting thread (allocate, enable),
//! the notification thread (completion handler), and the consumer callback
//! it invokes. The only inter-thread ordering beyond the registry mutex is
//! the handler publication: enable release-publishes the callback and the
//! completion handler spins with acquire loads until it appears, bridging
//! the race where hardware completes before the submitter has enabled.

pub mod entry;
pub mod error;
pub mod handler;
pub mod record;
pub mod tracker;


pub use entry::{Entry, EntryId};
pub use error::*;
pub use handler::{CounterGroup, Handler};
pub use record::DispatchRecord;
pub use tracker::Tracker;
