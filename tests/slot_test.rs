/*!
 * Wait Slot Tests
 * State machine coverage for the single-waiter suspension primitive
 */

use bytepipe::{CancelCause, CancelReason, CancelSource, FaultSink, SlotError, SlotPoll, WaitSlot};
use futures::task::{waker, ArcWake};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Waker;
use std::thread;

/// Waker that counts how many times it ran.
struct CountingWaker(AtomicUsize);

impl CountingWaker {
    fn new() -> (Arc<Self>, Waker) {
        let this = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let task_waker = waker(Arc::clone(&this));
        (this, task_waker)
    }

    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl ArcWake for CountingWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fault authority double that counts reports.
#[derive(Default)]
struct RecordingSink(AtomicUsize);

impl RecordingSink {
    fn faults(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl FaultSink for RecordingSink {
    fn try_fault(&self, _error: SlotError) -> bool {
        self.0.fetch_add(1, Ordering::SeqCst) == 0
    }
}

#[test]
fn completion_before_wait_resolves_inline() {
    let mut slot = WaitSlot::new(false);
    let sink = RecordingSink::default();
    let (counter, task_waker) = CountingWaker::new();

    assert!(slot.complete().is_none());
    assert!(slot.is_completed());

    // The wait resolves synchronously; the waker is never stored.
    assert!(matches!(slot.poll(&task_waker, &sink), SlotPoll::Ready));
    assert_eq!(counter.count(), 0);
}

#[test]
fn completion_hands_back_the_registered_waker() {
    let mut slot = WaitSlot::new(false);
    let sink = RecordingSink::default();
    let (counter, task_waker) = CountingWaker::new();

    assert!(matches!(slot.poll(&task_waker, &sink), SlotPoll::Pending));

    let handed_back = slot.complete().expect("a waiter was parked");
    assert!(handed_back.will_wake(&task_waker));

    handed_back.wake();
    assert_eq!(counter.count(), 1);

    // Nothing left to hand back.
    assert!(slot.complete().is_none());
    assert_eq!(counter.count(), 1);
}

#[test]
fn second_wait_faults_pipe_and_runs_both_continuations() {
    let mut slot = WaitSlot::new(false);
    let sink = RecordingSink::default();
    let (first_counter, first_waker) = CountingWaker::new();
    let (second_counter, second_waker) = CountingWaker::new();

    assert!(matches!(slot.poll(&first_waker, &sink), SlotPoll::Pending));

    let displaced = match slot.poll(&second_waker, &sink) {
        SlotPoll::Conflict(displaced) => displaced,
        other => panic!("expected conflict, got {:?}", other),
    };

    // The fault authority was invoked exactly once.
    assert_eq!(sink.faults(), 1);
    assert!(slot.is_completed());

    // The displaced waiter is woken by the caller; the offending waiter
    // resumes inline. Both therefore run and observe the fault.
    assert!(displaced.will_wake(&first_waker));
    displaced.wake();
    assert_eq!(first_counter.count(), 1);
    assert_eq!(second_counter.count(), 0);
    assert!(matches!(slot.poll(&second_waker, &sink), SlotPoll::Ready));
}

#[test]
fn reset_rearms_after_plain_completion() {
    let mut slot = WaitSlot::new(false);
    let sink = RecordingSink::default();
    let (_, task_waker) = CountingWaker::new();

    assert!(matches!(slot.poll(&task_waker, &sink), SlotPoll::Pending));
    slot.complete().expect("a waiter was parked").wake();
    assert!(slot.is_completed());

    slot.reset();
    assert!(!slot.is_completed());

    // The slot is reusable without reallocation.
    assert!(matches!(slot.poll(&task_waker, &sink), SlotPoll::Pending));
    assert!(slot.complete().is_some());
}

#[test]
fn cancel_without_waiter_is_reported_later() {
    let mut slot = WaitSlot::new(false);

    assert!(slot.cancel().is_none());

    // A pre-requested cancellation pins the slot completed across resets
    // until it is observed.
    slot.reset();
    assert!(slot.is_completed());

    assert_eq!(slot.observe_cancellation(), Some(CancelCause::Pipe));
    assert_eq!(slot.observe_cancellation(), None);

    slot.reset();
    assert!(!slot.is_completed());
}

#[test]
fn cancel_with_waiter_hands_back_waker_and_reports_cancelled() {
    let mut slot = WaitSlot::new(false);
    let sink = RecordingSink::default();
    let (counter, task_waker) = CountingWaker::new();

    assert!(matches!(slot.poll(&task_waker, &sink), SlotPoll::Pending));

    let handed_back = slot.cancel().expect("a waiter was parked");
    handed_back.wake();
    assert_eq!(counter.count(), 1);

    // A real wait was interrupted, so observing also rearms the slot.
    assert_eq!(slot.observe_cancellation(), Some(CancelCause::Pipe));
    assert!(!slot.is_completed());
}

#[test]
fn observe_propagates_token_cause() {
    let mut slot = WaitSlot::new(false);
    let source = CancelSource::new();

    slot.attach_token(&source.token(), |_| {}).unwrap();
    source.cancel(CancelReason::Timeout);

    slot.cancel();
    assert_eq!(
        slot.observe_cancellation(),
        Some(CancelCause::Token(CancelReason::Timeout))
    );
}

#[test]
fn attaching_cancelled_token_fails_without_registering() {
    let mut slot = WaitSlot::new(false);
    let source = CancelSource::new();
    source.cancel(CancelReason::User);

    let result = slot.attach_token(&source.token(), |_| panic!("must not register"));
    assert_eq!(result, Err(CancelCause::Token(CancelReason::User)));
    assert_eq!(source.listener_count(), 0);
}

#[test]
fn reattaching_identical_token_registers_once() {
    let mut slot = WaitSlot::new(false);
    let source = CancelSource::new();
    let token = source.token();

    slot.attach_token(&token, |_| {}).unwrap();
    slot.attach_token(&token, |_| {}).unwrap();
    assert_eq!(source.listener_count(), 1);

    // A different token disposes the previous registration.
    let other = CancelSource::new();
    slot.attach_token(&other.token(), |_| {}).unwrap();
    assert_eq!(source.listener_count(), 0);
    assert_eq!(other.listener_count(), 1);
}

#[test]
fn racing_wait_and_complete_runs_continuation_exactly_once() {
    for _ in 0..200 {
        let slot = Arc::new(Mutex::new(WaitSlot::new(false)));
        let sink = RecordingSink::default();
        let (counter, task_waker) = CountingWaker::new();

        let completer_slot = Arc::clone(&slot);
        let completer = thread::spawn(move || {
            let handed_back = completer_slot.lock().unwrap().complete();
            if let Some(waker) = handed_back {
                waker.wake();
            }
        });

        let outcome = slot.lock().unwrap().poll(&task_waker, &sink);
        completer.join().unwrap();

        match outcome {
            // Completion won: the waiter resumed inline, the waker never ran.
            SlotPoll::Ready => assert_eq!(counter.count(), 0),
            // Registration won: the completer handed the waker back and ran it.
            SlotPoll::Pending => assert_eq!(counter.count(), 1),
            SlotPoll::Conflict(_) => panic!("single waiter cannot conflict"),
        }
        assert_eq!(sink.faults(), 0);
    }
}

proptest! {
    /// Whatever the operation sequence, a parked waker runs at most once,
    /// and at most one waiter is outstanding at any instant.
    #[test]
    fn op_sequences_never_run_a_waker_twice(ops in proptest::collection::vec(0u8..5, 1..64)) {
        let mut slot = WaitSlot::new(false);
        let sink = RecordingSink::default();
        let mut parked: Vec<Arc<CountingWaker>> = Vec::new();

        for op in ops {
            match op {
                0 => {
                    if let Some(waker) = slot.complete() {
                        waker.wake();
                    }
                }
                1 => {
                    if let Some(waker) = slot.cancel() {
                        waker.wake();
                    }
                }
                2 => {
                    let (counter, task_waker) = CountingWaker::new();
                    match slot.poll(&task_waker, &sink) {
                        SlotPoll::Pending => parked.push(counter),
                        SlotPoll::Ready => {}
                        SlotPoll::Conflict(displaced) => displaced.wake(),
                    }
                }
                3 => {
                    slot.observe_cancellation();
                }
                _ => slot.reset(),
            }

            for counter in &parked {
                prop_assert!(counter.count() <= 1);
            }
            let outstanding = parked.iter().filter(|c| c.count() == 0).count();
            prop_assert!(outstanding <= 1);
        }

        // Completing now must resolve any waiter still outstanding.
        if let Some(waker) = slot.complete() {
            waker.wake();
        }
        for counter in &parked {
            prop_assert!(counter.count() <= 1);
        }
        prop_assert_eq!(parked.iter().filter(|c| c.count() == 0).count(), 0);
    }
}
