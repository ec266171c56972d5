/*!
 * BytePipe
 * In-process byte pipe built on single-waiter completion signaling
 */

pub mod pipe;
pub mod sync;

// Re-exports
pub use pipe::{
    pipe, PipeCanceller, PipeCompletion, PipeConfig, PipeError, PipeReader, PipeStats, PipeWriter,
};
pub use sync::{
    CancelCause, CancelReason, CancelRegistration, CancelSource, CancelToken, FaultSink, SlotError,
    SlotPoll, WaitSlot,
};
