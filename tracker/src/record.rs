//! Dispatch timing record.

/// Timestamps of one tracked dispatch, in wall-clock nanoseconds.
///
/// `dispatch` is stamped when the dispatch is registered; `begin`, `end`
/// and `complete` are stamped by the completion handler. For any completed
/// entry, `dispatch <= begin <= end <= complete`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchRecord {
    /// When the dispatch was registered with the tracker.
    pub dispatch: u64,
    /// Device-side kernel execution begin.
    pub begin: u64,
    /// Device-side kernel execution end.
    pub end: u64,
    /// When the completion handler observed the dispatch as done.
    pub complete: u64,
}
