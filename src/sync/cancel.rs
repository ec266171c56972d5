/*!
 * Cooperative Cancellation
 * Reason-carrying cancellation tokens with scoped callback registration
 */

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Why cancellation was requested on a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Explicit caller request
    User,
    /// A deadline elapsed
    Timeout,
    /// The owning component is shutting down
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::User => write!(f, "user request"),
            CancelReason::Timeout => write!(f, "timeout"),
            CancelReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Cause surfaced to a waiter that resumed because of cancellation.
///
/// Distinguishes out-of-band cancellation on the pipe half itself from a
/// cancellation token firing, so callers can tell the reasons apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// Cancelled directly on the pipe half; no token was involved
    Pipe,
    /// The attached token was cancelled with the given reason
    Token(CancelReason),
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Pipe => write!(f, "cancelled on pipe"),
            CancelCause::Token(reason) => write!(f, "token cancelled: {}", reason),
        }
    }
}

type CancelCallback = Box<dyn FnOnce(CancelCause) + Send>;

/// Shared state behind a source and all tokens cloned from it.
struct TokenInner {
    cancelled: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    listeners: Mutex<ListenerTable>,
}

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    entries: Vec<(u64, CancelCallback)>,
}

/// Owner side of a cancellation pair.
///
/// `cancel` transitions to the cancelled state exactly once; registered
/// callbacks run on the cancelling thread, after the internal locks are
/// released.
pub struct CancelSource {
    inner: Arc<TokenInner>,
}

impl CancelSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                reason: Mutex::new(None),
                listeners: Mutex::new(ListenerTable::default()),
            }),
        }
    }

    /// Hand out a token observing this source.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            inner: Some(Arc::clone(&self.inner)),
        }
    }

    /// Request cancellation. Only the first call wins; returns `true` if
    /// this call performed the transition.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        {
            let mut slot = self.inner.reason.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
            self.inner.cancelled.store(true, Ordering::Release);
        }

        // Drain under the listener lock, invoke outside it. Registrations
        // racing with this drain either land in `entries` before the lock is
        // taken or observe the cancelled flag and fire inline.
        let entries = {
            let mut table = self.inner.listeners.lock();
            std::mem::take(&mut table.entries)
        };
        let cause = CancelCause::Token(reason);
        for (_, callback) in entries {
            callback(cause);
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Number of live callback registrations (for diagnostics)
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().entries.len()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSource")
            .field("cancelled", &self.is_cancelled())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Cheap-to-clone handle observing a [`CancelSource`].
///
/// [`CancelToken::none`] builds the token that can never be cancelled; it is
/// what parameter defaults use when the caller has no cancellation concern.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Option<Arc<TokenInner>>,
}

impl CancelToken {
    /// A token that can never be cancelled.
    pub const fn none() -> Self {
        Self { inner: None }
    }

    /// Whether this token can ever transition to cancelled.
    pub fn can_cancel(&self) -> bool {
        self.inner.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.cancelled.load(Ordering::Acquire))
    }

    /// The cancellation cause, if this token has been cancelled.
    pub fn cause(&self) -> Option<CancelCause> {
        let inner = self.inner.as_ref()?;
        if !inner.cancelled.load(Ordering::Acquire) {
            return None;
        }
        (*inner.reason.lock()).map(CancelCause::Token)
    }

    /// Propagate the cancellation cause if this token is already cancelled.
    pub fn check(&self) -> Result<(), CancelCause> {
        match self.cause() {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }

    /// Identity comparison: same shared source, or both `none`.
    pub fn same_token(&self, other: &CancelToken) -> bool {
        match (&self.inner, &other.inner) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Register a callback to run when the token is cancelled.
    ///
    /// The returned guard unregisters the callback on drop. A callback
    /// registered on an already-cancelled token runs inline and the guard
    /// returned is inert.
    pub fn register<F>(&self, callback: F) -> CancelRegistration
    where
        F: FnOnce(CancelCause) + Send + 'static,
    {
        let Some(inner) = self.inner.as_ref() else {
            return CancelRegistration::inert();
        };

        let mut table = inner.listeners.lock();
        if inner.cancelled.load(Ordering::Acquire) {
            drop(table);
            let cause = self.cause().unwrap_or(CancelCause::Token(CancelReason::User));
            callback(cause);
            return CancelRegistration::inert();
        }

        let id = table.next_id;
        table.next_id += 1;
        table.entries.push((id, Box::new(callback)));
        CancelRegistration {
            inner: Arc::downgrade(inner),
            id,
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("can_cancel", &self.can_cancel())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Scoped subscription tying a token to a callback.
///
/// Dropping the guard removes the callback if it has not fired yet.
#[derive(Debug)]
pub struct CancelRegistration {
    inner: Weak<TokenInner>,
    id: u64,
}

impl CancelRegistration {
    fn inert() -> Self {
        Self {
            inner: Weak::new(),
            id: 0,
        }
    }
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}
