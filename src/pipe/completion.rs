/*!
 * Pipe Completion
 * Terminal fault authority shared by both pipe directions
 */

use super::types::PipeError;
use crate::sync::{FaultSink, SlotError};
use log::warn;
use parking_lot::Mutex;

/// Records a pipe's terminal fault exactly once.
///
/// Every operation on the pipe consults [`check`](Self::check) before
/// touching the ring, so once a fault is installed, all current and future
/// operations observe it.
pub struct PipeCompletion {
    fault: Mutex<Option<PipeError>>,
}

impl PipeCompletion {
    pub fn new() -> Self {
        Self {
            fault: Mutex::new(None),
        }
    }

    /// Record a terminal fault. Only the first call wins; returns `true`
    /// when this call installed the fault.
    pub fn try_fault(&self, error: PipeError) -> bool {
        let mut fault = self.fault.lock();
        if fault.is_some() {
            return false;
        }
        warn!("Pipe faulted: {}", error);
        *fault = Some(error);
        true
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.lock().is_some()
    }

    /// The recorded fault, if any
    pub fn fault(&self) -> Option<PipeError> {
        self.fault.lock().clone()
    }

    /// Fail with the recorded fault, if any
    pub fn check(&self) -> Result<(), PipeError> {
        match &*self.fault.lock() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl Default for PipeCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultSink for PipeCompletion {
    fn try_fault(&self, error: SlotError) -> bool {
        PipeCompletion::try_fault(self, PipeError::from(error))
    }
}

impl std::fmt::Debug for PipeCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeCompletion")
            .field("fault", &*self.fault.lock())
            .finish()
    }
}
