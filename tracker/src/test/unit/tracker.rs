//! Tracker lifecycle scenario tests.
//!
//! Dispatch completion is driven externally through the proxy signal, the
//! way a device would: tick window first, then the completion decrement.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use kerntrace_signal::{Clock, ManualClock, Signal, SignalCondition, SystemClock, TickWindow};

use crate::error::Error;
use crate::record::DispatchRecord;
use crate::test::{agent, complete_dispatch, wait_until};
use crate::tracker::Tracker;

#[test]
fn raw_callback_runs_once_and_entry_retires() {
    let clock = Arc::new(ManualClock::new(1_000));
    let tracker = Tracker::builder().clock(clock.clone()).build().unwrap();

    let entry = tracker.allocate(agent(), None).unwrap();
    assert_eq!(tracker.len(), 1);
    assert_eq!(tracker.outstanding(), 1);
    assert!(!entry.is_enabled());
    assert_eq!(entry.proxy().value(), 1);
    assert!(entry.original().is_none());

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(None));
    {
        let calls = Arc::clone(&calls);
        let seen = Arc::clone(&seen);
        tracker
            .enable_raw(&entry, move |value, entry| {
                calls.fetch_add(1, Ordering::SeqCst);
                *seen.lock() = Some((value, entry.record()));
                false
            })
            .unwrap();
    }
    assert!(entry.is_enabled());

    clock.set(5_000);
    complete_dispatch(entry.proxy(), 2_000, 3_000);

    wait_until("callback invocation", || calls.load(Ordering::SeqCst) == 1);
    wait_until("entry retirement", || tracker.len() == 0);
    assert_eq!(tracker.outstanding(), 0);

    let (value, record) = seen.lock().take().unwrap();
    assert_eq!(value, 0);
    assert_eq!(record, DispatchRecord { dispatch: 1_000, begin: 2_000, end: 3_000, complete: 5_000 });
}

#[test]
fn completion_before_enable_waits_for_handler() {
    let clock = Arc::new(ManualClock::new(100));
    let tracker = Tracker::builder().clock(clock.clone()).build().unwrap();
    let entry = tracker.allocate(agent(), None).unwrap();

    // Hardware finishes before the submitter attaches its callback
    clock.set(900);
    complete_dispatch(entry.proxy(), 200, 300);

    thread::sleep(Duration::from_millis(30));
    assert_eq!(tracker.len(), 1, "handler must not proceed before enable");

    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        tracker
            .enable_raw(&entry, move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                false
            })
            .unwrap();
    }

    wait_until("callback after late enable", || calls.load(Ordering::SeqCst) == 1);
    wait_until("entry retirement", || tracker.len() == 0);
    assert_eq!(entry.record(), DispatchRecord { dispatch: 100, begin: 200, end: 300, complete: 900 });
}

#[test]
fn grouped_callback_receives_group_placeholder() {
    let tracker = Tracker::builder().clock(Arc::new(ManualClock::new(10))).build().unwrap();
    let entry = tracker.allocate(agent(), None).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        tracker
            .enable_grouped(&entry, move |group, entry| {
                assert_eq!(group.index, 0);
                assert_eq!(entry.record().begin, 20);
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }

    complete_dispatch(entry.proxy(), 20, 30);
    wait_until("grouped callback", || calls.load(Ordering::SeqCst) == 1);
    wait_until("entry retirement", || tracker.len() == 0);
}

#[test]
fn completion_propagates_to_original_signal() {
    let clock = Arc::new(ManualClock::new(1_000));
    let tracker = Tracker::builder().clock(clock.clone()).build().unwrap();

    let orig = Signal::new(1).unwrap();
    let entry = tracker.allocate(agent(), Some(Arc::clone(&orig))).unwrap();
    tracker.enable_raw(&entry, |_, _| false).unwrap();

    clock.set(20_000);
    complete_dispatch(entry.proxy(), 7_000, 8_000);

    // Downstream code waits on the original signal, unaware of the proxy
    orig.wait(SignalCondition::Lt, 1, 5_000).unwrap();
    assert_eq!(orig.value(), 0);

    // Timing metadata was propagated before the decrement
    assert_eq!(orig.tick_window(), Some(TickWindow { start: 7_000, end: 8_000 }));
    assert_eq!(orig.tick_window(), entry.proxy().tick_window());

    wait_until("entry retirement", || tracker.len() == 0);
    let record = entry.record();
    assert_eq!(record.begin, 7_000);
    assert_eq!(record.end, 8_000);
    assert_eq!(record.complete, 20_000);
}

#[test]
fn original_signal_decremented_exactly_once() {
    let tracker = Tracker::builder().clock(Arc::new(ManualClock::new(1))).build().unwrap();

    let orig = Signal::new(2).unwrap();
    let entry = tracker.allocate(agent(), Some(Arc::clone(&orig))).unwrap();
    tracker.enable_raw(&entry, |_, _| false).unwrap();

    complete_dispatch(entry.proxy(), 5, 6);
    wait_until("entry retirement", || tracker.len() == 0);

    assert_eq!(orig.value(), 1);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(orig.value(), 1, "original signal must drop by exactly one");
}

#[test]
fn registry_size_tracks_completions() {
    let tracker = Tracker::builder().clock(Arc::new(ManualClock::new(1))).build().unwrap();

    let entries: Vec<_> = (0..3).map(|_| tracker.allocate(agent(), None).unwrap()).collect();
    for entry in &entries {
        tracker.enable_raw(entry, |_, _| false).unwrap();
    }
    assert_eq!(tracker.len(), 3);
    assert_eq!(tracker.outstanding(), 3);

    complete_dispatch(entries[1].proxy(), 10, 11);
    wait_until("one completion", || tracker.len() == 2);
    assert_eq!(tracker.outstanding(), 2);

    complete_dispatch(entries[0].proxy(), 10, 11);
    complete_dispatch(entries[2].proxy(), 10, 11);
    wait_until("all completions", || tracker.is_empty());
    assert_eq!(tracker.outstanding(), 0);
}

#[test]
fn double_enable_fails() {
    let tracker = Tracker::builder().clock(Arc::new(ManualClock::new(1))).build().unwrap();
    let entry = tracker.allocate(agent(), None).unwrap();

    tracker.enable_raw(&entry, |_, _| false).unwrap();
    let err = tracker.enable_grouped(&entry, |_, _| {}).unwrap_err();
    assert!(matches!(err, Error::AlreadyEnabled { id } if id == entry.id()));

    complete_dispatch(entry.proxy(), 2, 3);
    wait_until("entry retirement", || tracker.len() == 0);
}

#[test]
fn manual_delete_is_idempotent_with_handler_delete() {
    let tracker = Tracker::builder().clock(Arc::new(ManualClock::new(1))).build().unwrap();
    let entry = tracker.allocate(agent(), None).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        tracker
            .enable_raw(&entry, move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                false
            })
            .unwrap();
    }

    tracker.delete(&entry);
    assert_eq!(tracker.len(), 0);
    assert_eq!(tracker.outstanding(), 0);

    // The completion handler's own delete finds the entry gone and must not
    // disturb the counters
    complete_dispatch(entry.proxy(), 2, 3);
    wait_until("callback", || calls.load(Ordering::SeqCst) == 1);
    assert_eq!(tracker.len(), 0);
    assert_eq!(tracker.outstanding(), 0);
}

#[test]
fn teardown_drains_outstanding_entries() {
    let clock = Arc::new(ManualClock::new(1));
    let tracker = Tracker::builder().clock(clock.clone()).build().unwrap();

    let entries: Vec<_> = (0..3).map(|_| tracker.allocate(agent(), None).unwrap()).collect();
    for entry in &entries {
        tracker.enable_raw(entry, |_, _| false).unwrap();
    }

    complete_dispatch(entries[0].proxy(), 10, 11);
    wait_until("first completion", || tracker.len() == 2);

    let pending: Vec<_> = entries[1..].iter().map(|entry| Arc::clone(entry.proxy())).collect();
    let completer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        for proxy in pending {
            complete_dispatch(&proxy, 20, 21);
        }
    });

    let started = Instant::now();
    drop(tracker);
    assert!(
        started.elapsed() >= Duration::from_millis(45),
        "teardown must block until outstanding dispatches complete"
    );
    completer.join().unwrap();

    for entry in &entries {
        assert!(entry.proxy().satisfies(SignalCondition::Lt, 1));
    }
}

#[test]
fn concurrent_allocate_and_complete() {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let tracker = Arc::new(Tracker::builder().clock(clock.clone()).build().unwrap());
    let calls = Arc::new(AtomicUsize::new(0));

    const THREADS: usize = 4;
    const PER_THREAD: usize = 25;

    let submitters: Vec<_> = (0..THREADS)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            let calls = Arc::clone(&calls);
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    let entry = tracker.allocate(agent(), None).unwrap();
                    let calls = Arc::clone(&calls);
                    tracker
                        .enable_raw(&entry, move |_, _| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            false
                        })
                        .unwrap();
                    complete_dispatch(entry.proxy(), 2_000_000, 2_000_100);
                }
            })
        })
        .collect();

    for submitter in submitters {
        submitter.join().unwrap();
    }

    wait_until("all callbacks", || calls.load(Ordering::SeqCst) == THREADS * PER_THREAD);
    wait_until("registry drained", || tracker.is_empty());
    assert_eq!(tracker.outstanding(), 0);
}

#[test]
fn default_clock_preserves_timestamp_ordering() {
    let tracker = Tracker::builder().build().unwrap();
    let clock = SystemClock::default();

    let entry = tracker.allocate(agent(), None).unwrap();
    let seen = Arc::new(Mutex::new(None));
    {
        let seen = Arc::clone(&seen);
        tracker
            .enable_raw(&entry, move |_, entry| {
                *seen.lock() = Some(entry.record());
                false
            })
            .unwrap();
    }

    // The default clock's tick domain is nanoseconds, so a window taken
    // from the same clock stays ordered against dispatch/complete stamps
    let begin = clock.now_ns();
    complete_dispatch(entry.proxy(), begin, begin + 100);

    wait_until("callback", || seen.lock().is_some());
    let record = seen.lock().take().unwrap();
    assert!(record.dispatch <= record.begin, "dispatch {} > begin {}", record.dispatch, record.begin);
    assert!(record.begin <= record.end);
    assert!(record.end <= record.complete, "end {} > complete {}", record.end, record.complete);
}
