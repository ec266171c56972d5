/*!
 * Pipe Types
 * Common types, constants, and errors for the byte pipe
 */

use crate::sync::{CancelCause, SlotError};
use thiserror::Error;

/// Default ring capacity (64 KiB)
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Upper bound on a single pipe's ring capacity (16 MiB)
pub const MAX_PIPE_CAPACITY: usize = 16 * 1024 * 1024;

/// Pipe error types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipeError {
    #[error("Pipe closed")]
    Closed,

    #[error("Would block: {0}")]
    WouldBlock(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(CancelCause),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<SlotError> for PipeError {
    fn from(err: SlotError) -> Self {
        match err {
            SlotError::ConcurrentWait => {
                PipeError::InvalidOperation("no concurrent operation permitted".to_string())
            }
        }
    }
}

impl From<CancelCause> for PipeError {
    fn from(cause: CancelCause) -> Self {
        PipeError::Cancelled(cause)
    }
}

/// Pipe configuration
///
/// `resume_threshold` controls backpressure hysteresis: a writer parked on a
/// full ring is only resumed once at least that many bytes of space are
/// free, so reader and writer do not ping-pong one byte at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeConfig {
    /// Ring capacity in bytes
    pub capacity: usize,
    /// Free space required before a parked writer resumes
    pub resume_threshold: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_PIPE_CAPACITY,
            resume_threshold: DEFAULT_PIPE_CAPACITY / 2,
        }
    }
}

impl PipeConfig {
    /// Config with the given capacity and a half-capacity resume threshold
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            resume_threshold: capacity / 2,
        }
        .normalized()
    }

    /// Clamp fields into their supported ranges
    pub(crate) fn normalized(self) -> Self {
        let capacity = self.capacity.clamp(1, MAX_PIPE_CAPACITY);
        Self {
            capacity,
            resume_threshold: self.resume_threshold.clamp(1, capacity),
        }
    }
}

/// Pipe statistics snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeStats {
    pub capacity: usize,
    pub buffered: usize,
    pub read_closed: bool,
    pub write_closed: bool,
    pub faulted: bool,
}
