/*!
 * Suspension Primitives
 *
 * Single-waiter wait slots and cooperative cancellation for pipe I/O.
 *
 * # Architecture
 *
 * A [`WaitSlot`] records the suspension state of one pipe direction and is
 * round-tripped through many wait/complete/reset cycles without allocating
 * per operation. Cancellation is cooperative: a [`CancelSource`] owns the
 * cancelled flag, [`CancelToken`] handles observe it, and callback
 * registrations are scoped through [`CancelRegistration`] guards.
 *
 * # Concurrency
 *
 * The slot holds no lock of its own. The owner serializes access (the pipe
 * keeps its slots under one mutex); the slot guarantees that a parked waker
 * is handed back exactly once regardless of how registration and completion
 * interleave.
 */

mod cancel;
mod slot;

pub use cancel::{CancelCause, CancelReason, CancelRegistration, CancelSource, CancelToken};
pub use slot::{FaultSink, SlotError, SlotPoll, WaitSlot};
