/*!
 * Wait Slot
 *
 * Single-waiter suspension record for one pipe direction.
 *
 * # Design
 *
 * The slot tracks two independent axes:
 *
 * - completion: `NotCompleted -> Scheduled(waker) -> Completed`, with a
 *   direct `NotCompleted -> Completed` edge when nobody is parked, rewound
 *   to `NotCompleted` by `reset`
 * - cancellation: `NotCancelled -> {PreRequested | Requested} -> Observed
 *   -> NotCancelled`
 *
 * `complete` and `cancel` never invoke the parked waker; they hand it back
 * to the caller, which dispatches it on whatever execution context it
 * chooses. Together with the read-and-replace in `complete`, that is what
 * makes a parked waker run exactly once no matter how registration and
 * completion interleave.
 *
 * At most one waiter may be parked at a time. A second `poll` while one is
 * parked is a caller bug: the slot reports it through the [`FaultSink`]
 * capability so the whole pipe observes the error, and hands both wakers
 * back so neither waiter hangs.
 */

use super::cancel::{CancelCause, CancelRegistration, CancelToken};
use std::mem;
use std::task::Waker;
use thiserror::Error;

/// Misuse escalated by a [`WaitSlot`] to its owner's fault authority.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    #[error("Invalid operation: no concurrent wait permitted on a pipe direction")]
    ConcurrentWait,
}

/// Capability for recording a terminal fault on the owning pipe.
///
/// Passed to [`WaitSlot::poll`] for the narrow misuse-reporting path only.
/// Implementations record the first fault and make every subsequent
/// operation observe it; the return value is `true` when the call installed
/// the fault.
pub trait FaultSink {
    fn try_fault(&self, error: SlotError) -> bool;
}

/// Completion axis.
enum Completion {
    /// The awaited condition has not occurred and nobody is parked.
    NotCompleted,
    /// The condition occurred (or the wait was cancelled/faulted).
    Completed,
    /// A waiter is parked; `complete`/`cancel` hand this waker back.
    Scheduled(Waker),
}

/// Cancellation axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelState {
    NotCancelled,
    /// Cancellation arrived while no waiter was parked; kept until observed
    /// so it is not lost.
    PreRequested,
    /// Cancellation displaced a parked waiter.
    Requested,
    /// The waiter saw the cancellation; cleared by the next `reset`.
    Observed,
}

/// Outcome of [`WaitSlot::poll`].
#[derive(Debug)]
pub enum SlotPoll {
    /// Waker parked; a later `complete`/`cancel` hands it back.
    Pending,
    /// Already completed; the waiter resumes inline.
    Ready,
    /// A waiter was already parked. The pipe has been faulted through the
    /// [`FaultSink`]; the caller must wake the displaced waker, and the
    /// current waiter resumes inline, so both observe the fault.
    Conflict(Waker),
}

/// Suspension state for one side of a pipe.
///
/// Constructed once per direction, reset between operations, never
/// reallocated. The slot holds no lock; the owner serializes access to it
/// (the pipe keeps both slots under its state mutex).
pub struct WaitSlot {
    completion: Completion,
    cancel: CancelState,
    token: CancelToken,
    registration: Option<CancelRegistration>,
}

impl WaitSlot {
    /// `completed` marks a direction that is satisfiable at birth, e.g. the
    /// writer side of a pipe whose buffer starts empty.
    pub fn new(completed: bool) -> Self {
        Self {
            completion: if completed {
                Completion::Completed
            } else {
                Completion::NotCompleted
            },
            cancel: CancelState::NotCancelled,
            token: CancelToken::none(),
            registration: None,
        }
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        matches!(self.completion, Completion::Completed)
    }

    /// Attach a cancellation token for the upcoming wait.
    ///
    /// Re-attaching the identical token is a no-op. Otherwise the previous
    /// registration is disposed first; an already-cancelled token fails
    /// immediately, before any new registration is created.
    pub fn attach_token<F>(&mut self, token: &CancelToken, on_cancel: F) -> Result<(), CancelCause>
    where
        F: FnOnce(CancelCause) + Send + 'static,
    {
        if self.token.same_token(token) {
            return Ok(());
        }

        self.registration = None;
        self.token = token.clone();

        if token.can_cancel() {
            token.check()?;
            self.registration = Some(token.register(on_cancel));
        }
        Ok(())
    }

    /// Signal that the awaited condition is now true.
    ///
    /// Read-and-replace: whatever was stored becomes `Completed`, and a
    /// parked waker is handed back exactly once for the caller to wake.
    pub fn complete(&mut self) -> Option<Waker> {
        match mem::replace(&mut self.completion, Completion::Completed) {
            Completion::Scheduled(waker) => Some(waker),
            Completion::NotCompleted | Completion::Completed => None,
        }
    }

    /// Park a waiter until `complete`/`cancel` fires.
    ///
    /// See [`SlotPoll`] for the three outcomes. `Conflict` is the
    /// concurrent-wait misuse path: the fault is recorded through `fault`
    /// and the state is forced to `Completed` so no waiter can hang on it.
    pub fn poll(&mut self, waker: &Waker, fault: &dyn FaultSink) -> SlotPoll {
        match mem::replace(&mut self.completion, Completion::Completed) {
            Completion::NotCompleted => {
                self.completion = Completion::Scheduled(waker.clone());
                SlotPoll::Pending
            }
            Completion::Completed => SlotPoll::Ready,
            Completion::Scheduled(displaced) => {
                fault.try_fault(SlotError::ConcurrentWait);
                SlotPoll::Conflict(displaced)
            }
        }
    }

    /// Request cancellation of the current (or next) wait.
    ///
    /// Delegates to [`complete`](Self::complete); a handed-back waker means
    /// a waiter was parked (`Requested`), otherwise the cancellation is
    /// recorded as pre-requested so the next observation still reports it.
    pub fn cancel(&mut self) -> Option<Waker> {
        let waker = self.complete();
        self.cancel = if waker.is_some() {
            CancelState::Requested
        } else {
            CancelState::PreRequested
        };
        waker
    }

    /// Determine whether the waiter resumed because of cancellation.
    ///
    /// Reports each cancellation exactly once: `Some(cause)` on the first
    /// call after `cancel`, `None` afterwards until the next cancel cycle.
    /// A cancellation that displaced a real waiter also rearms the slot,
    /// since the interrupted wait consumed the completion.
    pub fn observe_cancellation(&mut self) -> Option<CancelCause> {
        match self.cancel {
            CancelState::NotCancelled | CancelState::Observed => None,
            CancelState::Requested => {
                self.cancel = CancelState::Observed;
                self.reset();
                Some(self.cause())
            }
            CancelState::PreRequested => {
                // No wait was parked, so there is nothing to rearm yet.
                self.cancel = CancelState::Observed;
                Some(self.cause())
            }
        }
    }

    fn cause(&self) -> CancelCause {
        self.token.cause().unwrap_or(CancelCause::Pipe)
    }

    /// Rearm the slot for the next operation. Idempotent.
    ///
    /// A completed slot is only rewound to `NotCompleted` while no
    /// cancellation is pending unobserved: a requested-but-unobserved
    /// cancellation keeps the slot visibly completed until it is observed.
    pub fn reset(&mut self) {
        let cancellation_pinned = matches!(
            self.cancel,
            CancelState::Requested | CancelState::PreRequested
        );
        if matches!(self.completion, Completion::Completed) && !cancellation_pinned {
            self.completion = Completion::NotCompleted;
        }
        if self.cancel == CancelState::Observed {
            self.cancel = CancelState::NotCancelled;
        }
    }
}

impl std::fmt::Debug for WaitSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let completion = match &self.completion {
            Completion::NotCompleted => "not_completed",
            Completion::Completed => "completed",
            Completion::Scheduled(_) => "scheduled",
        };
        f.debug_struct("WaitSlot")
            .field("completion", &completion)
            .field("cancel", &self.cancel)
            .field("token_attached", &self.token.can_cancel())
            .finish()
    }
}
