/*!
 * Pipe Core
 *
 * Shared pipe state: a heap ring buffer plus one wait slot per direction.
 *
 * All state lives under a single mutex, which provides the serialization
 * the wait slots rely on. Wakers handed back by the slots are always
 * invoked after the lock is released.
 */

use super::completion::PipeCompletion;
use super::types::{PipeConfig, PipeError, PipeStats};
use crate::sync::{CancelToken, SlotError, SlotPoll, WaitSlot};
use log::debug;
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::Arc;
use std::task::{Context, Poll};

/// Which direction an operation acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Side {
    Read,
    Write,
}

pub(super) struct PipeState {
    buffer: HeapRb<u8>,
    /// Readers park here while the ring is empty
    read_slot: WaitSlot,
    /// Writers park here while the ring is full
    write_slot: WaitSlot,
    read_closed: bool,
    write_closed: bool,
    completion: PipeCompletion,
}

pub(super) struct Shared {
    config: PipeConfig,
    state: Mutex<PipeState>,
}

impl Shared {
    pub(super) fn new(config: PipeConfig) -> Arc<Self> {
        debug!(
            "Pipe created (capacity: {}, resume_threshold: {})",
            config.capacity, config.resume_threshold
        );
        Arc::new(Self {
            config,
            state: Mutex::new(PipeState {
                buffer: HeapRb::<u8>::new(config.capacity),
                read_slot: WaitSlot::new(false),
                // Space is available at birth, so the write side starts
                // completed.
                write_slot: WaitSlot::new(true),
                read_closed: false,
                write_closed: false,
                completion: PipeCompletion::new(),
            }),
        })
    }

    pub(super) fn poll_read(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<Result<usize, PipeError>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let mut wake_writer = None;
        let mut wake_displaced = None;

        let result = {
            let mut state = self.state.lock();
            loop {
                if let Some(cause) = state.read_slot.observe_cancellation() {
                    break Err(PipeError::Cancelled(cause));
                }
                if let Err(error) = state.completion.check() {
                    break Err(error);
                }
                if state.read_closed {
                    break Err(PipeError::Closed);
                }

                if state.buffer.occupied_len() > 0 {
                    let n = state.buffer.pop_slice(buf);
                    // Resume a parked writer once enough space is free.
                    if state.buffer.vacant_len() >= self.config.resume_threshold {
                        wake_writer = state.write_slot.complete();
                    }
                    break Ok(n);
                }
                if state.write_closed {
                    break Ok(0); // EOF
                }

                let PipeState {
                    read_slot,
                    completion,
                    ..
                } = &mut *state;
                match read_slot.poll(cx.waker(), completion) {
                    SlotPoll::Pending => return Poll::Pending,
                    SlotPoll::Ready => {
                        // Stale completion from a previous cycle; rearm and
                        // recheck the condition.
                        read_slot.reset();
                    }
                    SlotPoll::Conflict(displaced) => {
                        wake_displaced = Some(displaced);
                        break Err(self.conflict_error(&state));
                    }
                }
            }
        };

        if let Some(waker) = wake_displaced {
            waker.wake();
        }
        if let Some(waker) = wake_writer {
            waker.wake();
        }
        Poll::Ready(result)
    }

    pub(super) fn poll_write(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, PipeError>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let mut wake_reader = None;
        let mut wake_displaced = None;

        let result = {
            let mut state = self.state.lock();
            loop {
                if let Some(cause) = state.write_slot.observe_cancellation() {
                    break Err(PipeError::Cancelled(cause));
                }
                if let Err(error) = state.completion.check() {
                    break Err(error);
                }
                if state.write_closed || state.read_closed {
                    break Err(PipeError::Closed);
                }

                let vacant = state.buffer.vacant_len();
                if vacant > 0 {
                    let n = state.buffer.push_slice(&buf[..buf.len().min(vacant)]);
                    // Data is now available for a parked reader.
                    wake_reader = state.read_slot.complete();
                    break Ok(n);
                }

                let PipeState {
                    write_slot,
                    completion,
                    ..
                } = &mut *state;
                match write_slot.poll(cx.waker(), completion) {
                    SlotPoll::Pending => return Poll::Pending,
                    SlotPoll::Ready => {
                        write_slot.reset();
                    }
                    SlotPoll::Conflict(displaced) => {
                        wake_displaced = Some(displaced);
                        break Err(self.conflict_error(&state));
                    }
                }
            }
        };

        if let Some(waker) = wake_displaced {
            waker.wake();
        }
        if let Some(waker) = wake_reader {
            waker.wake();
        }
        Poll::Ready(result)
    }

    pub(super) fn try_read(&self, buf: &mut [u8]) -> Result<usize, PipeError> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut wake_writer = None;
        let result = {
            let mut state = self.state.lock();
            state.completion.check()?;
            if state.read_closed {
                return Err(PipeError::Closed);
            }

            if state.buffer.occupied_len() > 0 {
                let n = state.buffer.pop_slice(buf);
                if state.buffer.vacant_len() >= self.config.resume_threshold {
                    wake_writer = state.write_slot.complete();
                }
                Ok(n)
            } else if state.write_closed {
                Ok(0)
            } else {
                Err(PipeError::WouldBlock("no data available".to_string()))
            }
        };

        if let Some(waker) = wake_writer {
            waker.wake();
        }
        result
    }

    pub(super) fn try_write(&self, buf: &[u8]) -> Result<usize, PipeError> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut wake_reader = None;
        let result = {
            let mut state = self.state.lock();
            state.completion.check()?;
            if state.write_closed || state.read_closed {
                return Err(PipeError::Closed);
            }

            let vacant = state.buffer.vacant_len();
            if vacant == 0 {
                Err(PipeError::WouldBlock("pipe buffer full".to_string()))
            } else {
                let n = state.buffer.push_slice(&buf[..buf.len().min(vacant)]);
                wake_reader = state.read_slot.complete();
                Ok(n)
            }
        };

        if let Some(waker) = wake_reader {
            waker.wake();
        }
        result
    }

    /// Attach a cancellation token to one side for the upcoming wait.
    ///
    /// The registered callback drives the matching slot's cancel path, so a
    /// firing token wakes the parked waiter (or pre-requests cancellation if
    /// none is parked yet).
    pub(super) fn attach_token(
        self: &Arc<Self>,
        side: Side,
        token: &CancelToken,
    ) -> Result<(), PipeError> {
        // The callback captures a weak handle: a token outliving the pipe
        // must not keep its state alive.
        let shared = Arc::downgrade(self);
        let on_cancel = move |_cause| {
            if let Some(shared) = shared.upgrade() {
                shared.cancel(side);
            }
        };

        let mut state = self.state.lock();
        let slot = match side {
            Side::Read => &mut state.read_slot,
            Side::Write => &mut state.write_slot,
        };
        slot.attach_token(token, on_cancel).map_err(PipeError::Cancelled)
    }

    /// Out-of-band cancellation of the pending (or next) operation on one
    /// side.
    pub(super) fn cancel(&self, side: Side) {
        let waker = {
            let mut state = self.state.lock();
            match side {
                Side::Read => state.read_slot.cancel(),
                Side::Write => state.write_slot.cancel(),
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(super) fn close_write(&self) {
        let waker = {
            let mut state = self.state.lock();
            if state.write_closed {
                None
            } else {
                state.write_closed = true;
                debug!("Pipe write side closed");
                // Wake a reader parked for data; it will observe EOF.
                state.read_slot.complete()
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(super) fn close_read(&self) {
        let waker = {
            let mut state = self.state.lock();
            if state.read_closed {
                None
            } else {
                state.read_closed = true;
                debug!("Pipe read side closed");
                // Wake a writer parked for space; it will observe Closed.
                state.write_slot.complete()
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(super) fn stats(&self) -> PipeStats {
        let state = self.state.lock();
        PipeStats {
            capacity: self.config.capacity,
            buffered: state.buffer.occupied_len(),
            read_closed: state.read_closed,
            write_closed: state.write_closed,
            faulted: state.completion.is_faulted(),
        }
    }

    pub(super) fn buffered(&self) -> usize {
        self.state.lock().buffer.occupied_len()
    }

    fn conflict_error(&self, state: &PipeState) -> PipeError {
        state
            .completion
            .fault()
            .unwrap_or_else(|| PipeError::from(SlotError::ConcurrentWait))
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Pipe")
            .field("capacity", &self.config.capacity)
            .field("buffered", &state.buffer.occupied_len())
            .field("read_closed", &state.read_closed)
            .field("write_closed", &state.write_closed)
            .field("faulted", &state.completion.is_faulted())
            .finish()
    }
}
