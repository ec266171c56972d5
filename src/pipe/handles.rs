/*!
 * Pipe Handles
 * Public reader/writer halves and the out-of-band canceller
 */

use super::pipe::{Shared, Side};
use super::types::{PipeConfig, PipeError, PipeStats};
use crate::sync::CancelToken;
use std::future::poll_fn;
use std::sync::{Arc, Weak};

/// Create a pipe, returning its two halves.
///
/// Single producer, single consumer: each half is owned by exactly one
/// task. Dropping a half closes its side; the counterpart observes EOF
/// (reader) or [`PipeError::Closed`] (writer).
pub fn pipe(config: PipeConfig) -> (PipeWriter, PipeReader) {
    let shared = Shared::new(config.normalized());
    (
        PipeWriter {
            shared: Arc::clone(&shared),
        },
        PipeReader { shared },
    )
}

/// Reading half of a pipe.
pub struct PipeReader {
    pub(super) shared: Arc<Shared>,
}

impl PipeReader {
    /// Read up to `buf.len()` bytes, waiting while the pipe is empty.
    ///
    /// Returns the number of bytes read; 0 means the write side closed and
    /// the pipe is drained (EOF).
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, PipeError> {
        self.read_with(buf, &CancelToken::none()).await
    }

    /// Like [`read`](Self::read), with a cancellation token attached for
    /// the duration of the wait. An already-cancelled token fails
    /// immediately, before any wait is registered.
    pub async fn read_with(
        &mut self,
        buf: &mut [u8],
        token: &CancelToken,
    ) -> Result<usize, PipeError> {
        self.shared.attach_token(Side::Read, token)?;
        poll_fn(|cx| self.shared.poll_read(cx, buf)).await
    }

    /// Non-blocking read; fails with [`PipeError::WouldBlock`] when the
    /// pipe is empty and not at EOF.
    pub fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, PipeError> {
        self.shared.try_read(buf)
    }

    /// Handle for cancelling a pending (or the next) read out-of-band.
    pub fn canceller(&self) -> PipeCanceller {
        PipeCanceller {
            shared: Arc::downgrade(&self.shared),
            side: Side::Read,
        }
    }

    /// Bytes currently buffered in the pipe
    pub fn buffered(&self) -> usize {
        self.shared.buffered()
    }

    pub fn stats(&self) -> PipeStats {
        self.shared.stats()
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.shared.close_read();
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PipeReader").field(&self.shared).finish()
    }
}

/// Writing half of a pipe.
pub struct PipeWriter {
    pub(super) shared: Arc<Shared>,
}

impl PipeWriter {
    /// Write up to `buf.len()` bytes, waiting while the ring is full.
    ///
    /// Returns the number of bytes accepted, which may be less than the
    /// input length; use [`write_all`](Self::write_all) to drain a whole
    /// buffer.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, PipeError> {
        self.write_with(buf, &CancelToken::none()).await
    }

    /// Like [`write`](Self::write), with a cancellation token attached for
    /// the duration of the wait.
    pub async fn write_with(
        &mut self,
        buf: &[u8],
        token: &CancelToken,
    ) -> Result<usize, PipeError> {
        self.shared.attach_token(Side::Write, token)?;
        poll_fn(|cx| self.shared.poll_write(cx, buf)).await
    }

    /// Write the whole buffer, waiting for space as needed.
    pub async fn write_all(&mut self, mut buf: &[u8]) -> Result<(), PipeError> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Non-blocking write; fails with [`PipeError::WouldBlock`] when the
    /// ring is full.
    pub fn try_write(&mut self, buf: &[u8]) -> Result<usize, PipeError> {
        self.shared.try_write(buf)
    }

    /// Handle for cancelling a pending (or the next) write out-of-band.
    pub fn canceller(&self) -> PipeCanceller {
        PipeCanceller {
            shared: Arc::downgrade(&self.shared),
            side: Side::Write,
        }
    }

    /// Close the write side. The reader drains buffered bytes, then
    /// observes EOF. Idempotent; also performed on drop.
    pub fn close(&mut self) {
        self.shared.close_write();
    }

    pub fn stats(&self) -> PipeStats {
        self.shared.stats()
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.shared.close_write();
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PipeWriter").field(&self.shared).finish()
    }
}

/// Out-of-band cancellation handle for one pipe direction.
///
/// Cloneable and `Send`, so it can cancel a wait from outside the task
/// that owns the half. Holds the pipe weakly; cancelling an already-dropped
/// pipe is a no-op. Cancellation arriving while no operation is pending is
/// remembered and reported by the next operation on that side.
#[derive(Debug, Clone)]
pub struct PipeCanceller {
    shared: Weak<Shared>,
    side: Side,
}

impl PipeCanceller {
    pub fn cancel(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.cancel(self.side);
        }
    }
}
