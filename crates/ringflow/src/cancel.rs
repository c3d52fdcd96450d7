//! Cancellation tokens.
//!
//! Every blocking call in this crate takes `&dyn CancellationToken`. The
//! trait and its contract are external primitives per the design (assumed
//! to already exist in a real deployment's task/thread runtime); `CancelFlag`
//! is the batteries-included implementation shipped so the crate is usable
//! and testable without bringing your own token type.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Opaque id returned by [`CancellationToken::register`], passed back to
/// [`CancellationToken::unregister`].
pub type HandlerId = u64;

/// A cooperative cancellation / deadline source.
///
/// Implementations must make `is_cancelled` and `deadline` cheap to poll
/// (they are checked on every iteration of every wait loop in this crate)
/// and must make `register`/`unregister` safe to call while the handler
/// itself may be invoked concurrently from another thread.
pub trait CancellationToken: Send + Sync {
    /// Returns `true` once this token has been cancelled.
    fn is_cancelled(&self) -> bool;

    /// An optional absolute deadline. A token whose deadline has passed
    /// behaves, for every blocking call in this crate, identically to one
    /// that has been cancelled.
    fn deadline(&self) -> Option<Instant>;

    /// Cancellable sleep. Returns `true` if the sleep ran to completion,
    /// `false` if it was cut short by cancellation or deadline.
    fn sleep(&self, duration: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < duration {
            if self.is_cancelled() || self.deadline().is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1).min(duration));
        }
        true
    }

    /// Registers a non-blocking handler to be invoked (under the token's
    /// internal lock) when the token is cancelled. Returns an id used to
    /// [`unregister`](CancellationToken::unregister) it later. Must be safe
    /// to call from any thread, including one already inside a wait loop
    /// built on this token.
    fn register(&self, handler: Box<dyn Fn() + Send + Sync>) -> HandlerId;

    /// Deregisters a handler previously returned by `register`. Safe to
    /// call whether or not the handler already fired.
    fn unregister(&self, id: HandlerId);
}

/// Returned by blocking calls that were cut short by cancellation or a
/// deadline. Carries no payload: per spec, the call returns "promptly
/// without committing the operation" and buffer state is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("operation was cancelled")
    }
}

impl std::error::Error for Cancelled {}

struct CancelInner {
    cancelled: AtomicBool,
    deadline: Mutex<Option<Instant>>,
    handlers: Mutex<Vec<(HandlerId, Box<dyn Fn() + Send + Sync>)>>,
    next_id: AtomicU64,
}

/// A simple `Arc`-shared cancellation flag with an optional deadline.
///
/// Cloning a `CancelFlag` shares the same underlying state: cancelling one
/// clone cancels all of them, which is the usual way to hand a token to a
/// worker thread while keeping a handle to cancel it from the owner.
#[derive(Clone)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

impl CancelFlag {
    /// Creates a token that is never cancelled unless [`cancel`](Self::cancel)
    /// is called.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                deadline: Mutex::new(None),
                handlers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a token that cancels itself once `deadline` passes.
    pub fn with_deadline(deadline: Instant) -> Self {
        let token = Self::new();
        *token.inner.deadline.lock().unwrap() = Some(deadline);
        token
    }

    /// Cancels the token, synchronously invoking every registered handler.
    pub fn cancel(&self) {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let handlers = self.inner.handlers.lock().unwrap();
            for (_, handler) in handlers.iter() {
                handler();
            }
        }
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken for CancelFlag {
    fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return true;
        }
        let past_deadline = self
            .inner
            .deadline
            .lock()
            .unwrap()
            .is_some_and(|d| Instant::now() >= d);
        if past_deadline {
            // Deadline fire is observationally identical to cancellation;
            // latch it so future register()s still see a cancelled token.
            self.inner.cancelled.store(true, Ordering::Release);
        }
        past_deadline
    }

    fn deadline(&self) -> Option<Instant> {
        *self.inner.deadline.lock().unwrap()
    }

    fn register(&self, handler: Box<dyn Fn() + Send + Sync>) -> HandlerId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut handlers = self.inner.handlers.lock().unwrap();
        if self.inner.cancelled.load(Ordering::Acquire) {
            // Already cancelled: fire immediately, still register so the
            // caller's unregister() call remains valid.
            handler();
        }
        handlers.push((id, handler));
        id
    }

    fn unregister(&self, id: HandlerId) {
        let mut handlers = self.inner.handlers.lock().unwrap();
        handlers.retain(|(existing, _)| *existing != id);
    }
}

/// A token that can never be cancelled and has no deadline. Useful for
/// call sites that want to opt out of cancellation entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancelled;

impl CancellationToken for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn deadline(&self) -> Option<Instant> {
        None
    }

    fn register(&self, _handler: Box<dyn Fn() + Send + Sync>) -> HandlerId {
        0
    }

    fn unregister(&self, _id: HandlerId) {}
}

/// Blocks on `cvar` while `should_wait` holds, waking early on cancellation.
///
/// Implements the standard race-free pattern from the design notes:
/// register a handler that notifies `cvar`, re-check the predicate, wait,
/// then unregister — the handler's wake is idempotent and unregistering is
/// safe whether or not it already fired.
///
/// # Safety
///
/// `cvar` must outlive this call. Since the handler is unregistered before
/// this function returns, and the caller holds `&self` (hence `cvar`)
/// borrowed for the duration of the call, that's always true for the call
/// sites in this crate.
pub(crate) fn wait_while_cancellable<'a, T, F>(
    mut guard: MutexGuard<'a, T>,
    cvar: &Condvar,
    token: &dyn CancellationToken,
    mut should_wait: F,
) -> Result<MutexGuard<'a, T>, Cancelled>
where
    F: FnMut(&T) -> bool,
{
    if token.is_cancelled() {
        return Err(Cancelled);
    }

    // SAFETY: see function doc comment. The handler only touches `cvar`
    // through a raw pointer because `register` requires a `'static`
    // closure; the pointer is valid for as long as the handler can fire,
    // which ends at `unregister` below, strictly before this function
    // (and therefore `cvar`'s borrow) returns.
    #[derive(Clone, Copy)]
    struct SendPtr(*const Condvar);
    // SAFETY: see function doc comment above; the pointee outlives every use of this pointer.
    unsafe impl Send for SendPtr {}
    unsafe impl Sync for SendPtr {}

    let cvar_ptr = SendPtr(cvar);
    let id = token.register(Box::new(move || {
        let cvar_ptr = cvar_ptr;
        let cvar: &Condvar = unsafe { &*cvar_ptr.0 };
        cvar.notify_all();
    }));

    let poll_interval = Duration::from_millis(20);
    let result = loop {
        if !should_wait(&guard) {
            break Ok(guard);
        }
        if token.is_cancelled() {
            break Err(Cancelled);
        }
        let (next_guard, _timeout) = cvar.wait_timeout(guard, poll_interval).unwrap();
        guard = next_guard;
    };

    token.unregister(id);
    result
}
