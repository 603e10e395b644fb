//! Completion futures and promises (C1).
//!
//! A [`Promise<T>`] is the write side of an asynchronous result; a [`PipelineFuture<T>`] is
//! the (cloneable) read side. Both wrap the same `Arc<Shared<T>>`. State machine:
//!
//! ```text
//! Pending --try_success(v)--> Succeeded(v)
//! Pending --try_failure(e)--> Failed(e)
//! Pending --try_cancel()----> Cancelled
//! ```
//!
//! exactly one of the three `try_*` calls wins; every later call is a no-op returning
//! `false`. Listener notification always runs on the future's bound
//! [`SerialExecutor`](crate::runtime::SerialExecutor) — inline if the calling thread is
//! already that executor's thread, otherwise submitted — so a listener can never observe
//! itself running on a thread the pipeline didn't schedule it onto.
//!
//! Grounded in the teacher workspace's `TaskHandle`/`BoxFuture` vocabulary for "run this on
//! that executor" / "box up an async result", generalized here into a listener-fan-out
//! promise type the teacher itself does not have — this module is authored against Netty's
//! `ChannelPromise`/`DefaultPromise` semantics (§4.1), not against a direct teacher analog.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::runtime::{SerialExecutor, execute_inline_or_submit};
use crate::sealed::Sealed;

type ListenerFn<T> = Box<dyn FnOnce(&Outcome<'_, T>) + Send + 'static>;

/// Token returned by [`PipelineFuture::add_listener`], usable with
/// [`PipelineFuture::remove_listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The terminal result observed by a listener or by `sync()` — a borrowed view over
/// whichever [`Terminal`] value the promise settled on.
#[derive(Debug)]
pub enum Outcome<'a, T> {
    Success(&'a T),
    Failure(&'a PipelineError),
    Cancelled,
}

impl<'a, T> Outcome<'a, T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn cause(&self) -> Option<&PipelineError> {
        match self {
            Outcome::Failure(cause) => Some(cause),
            _ => None,
        }
    }
}

enum Terminal<T> {
    Succeeded(T),
    Failed(PipelineError),
    Cancelled,
}

impl<T> Terminal<T> {
    fn as_outcome(&self) -> Outcome<'_, T> {
        match self {
            Terminal::Succeeded(value) => Outcome::Success(value),
            Terminal::Failed(cause) => Outcome::Failure(cause),
            Terminal::Cancelled => Outcome::Cancelled,
        }
    }
}

struct Shared<T> {
    executor: Arc<dyn SerialExecutor>,
    terminal: OnceLock<Terminal<T>>,
    listeners: Mutex<Vec<(u64, ListenerFn<T>)>>,
    next_listener_id: AtomicU64,
    waiters: std::sync::atomic::AtomicUsize,
    wait_gate: (Mutex<()>, Condvar),
    cancel_hook: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl<T> Sealed for Shared<T> {}

impl<T: Send + 'static> Shared<T> {
    fn new(
        executor: Arc<dyn SerialExecutor>,
        cancel_hook: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
    ) -> Self {
        Self {
            executor,
            terminal: OnceLock::new(),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
            waiters: std::sync::atomic::AtomicUsize::new(0),
            wait_gate: (Mutex::new(()), Condvar::new()),
            cancel_hook,
        }
    }

    fn try_complete(self: &Arc<Self>, terminal: Terminal<T>) -> bool {
        if self.terminal.set(terminal).is_err() {
            return false;
        }
        // Wake blocked waiters before scheduling listener notification; the two are
        // independent consumers of the same terminal state.
        let _guard = self.wait_gate.0.lock().unwrap_or_else(|p| p.into_inner());
        self.wait_gate.1.notify_all();
        drop(_guard);
        self.schedule_notifications();
        true
    }

    fn try_cancel(self: &Arc<Self>) -> bool {
        if self.terminal.get().is_some() {
            return false;
        }
        let permitted = match &self.cancel_hook {
            Some(hook) => hook(),
            None => false,
        };
        if !permitted {
            return false;
        }
        self.try_complete(Terminal::Cancelled)
    }

    fn add_listener(self: &Arc<Self>, listener: ListenerFn<T>) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut guard = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
            guard.push((id, listener));
        }
        if self.terminal.get().is_some() {
            self.schedule_notifications();
        }
        ListenerId(id)
    }

    fn remove_listener(&self, id: ListenerId) {
        let mut guard = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        guard.retain(|(existing, _)| *existing != id.0);
    }

    fn schedule_notifications(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        execute_inline_or_submit(&*Arc::clone(&self.executor), move || {
            shared.drain_and_notify();
        });
    }

    /// Repeatedly drains the listener queue and invokes each entry with the terminal
    /// outcome. Draining (rather than iterating a snapshot) is what gives a listener added
    /// reentrantly during its own notification a fresh pass instead of running recursively:
    /// it lands in a queue that was already emptied for this pass and gets picked up by the
    /// next iteration of the outer loop.
    fn drain_and_notify(self: &Arc<Self>) {
        let terminal = self
            .terminal
            .get()
            .expect("drain_and_notify scheduled before terminal state was set");
        loop {
            let batch = {
                let mut guard = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
                std::mem::take(&mut *guard)
            };
            if batch.is_empty() {
                break;
            }
            let outcome = terminal.as_outcome();
            for (_, listener) in batch {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    listener(&outcome);
                }));
                if result.is_err() {
                    tracing::warn!(
                        executor = self.executor.name(),
                        "completion future listener panicked; skipping remaining effects of this listener"
                    );
                }
            }
        }
    }

    /// Blocks the calling thread until the future reaches a terminal state or `timeout`
    /// elapses (if given). Returns `Ok(true)` once terminal, `Ok(false)` on timeout.
    fn block(self: &Arc<Self>, timeout: Option<Duration>) -> Result<bool> {
        if self.executor.is_current_thread() {
            return Err(PipelineError::DeadlockDetected);
        }
        if self.terminal.get().is_some() {
            return Ok(true);
        }
        self.waiters.fetch_add(1, Ordering::Relaxed);
        let (lock, condvar) = &self.wait_gate;
        let guard = lock.lock().unwrap_or_else(|p| p.into_inner());
        let result = match timeout {
            None => {
                let _unused = condvar
                    .wait_while(guard, |_| self.terminal.get().is_none())
                    .unwrap_or_else(|p| p.into_inner());
                true
            }
            Some(duration) => {
                let (_unused, wait_result) = condvar
                    .wait_timeout_while(guard, duration, |_| self.terminal.get().is_none())
                    .unwrap_or_else(|p| p.into_inner());
                !wait_result.timed_out()
            }
        };
        self.waiters.fetch_sub(1, Ordering::Relaxed);
        Ok(result)
    }
}

/// The write side of a completion future: whoever performs the asynchronous operation holds
/// this and settles it exactly once via `try_success`/`try_failure`/`try_cancel`.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Promise<T> {
    /// Creates a tracked promise bound to `executor`, with no cancellation support (the
    /// common case — §4.1 notes most I/O operations are non-cancellable).
    pub fn new(executor: Arc<dyn SerialExecutor>) -> Self {
        Self {
            shared: Arc::new(Shared::new(executor, None)),
        }
    }

    /// As [`Promise::new`], but `try_cancel` delegates to `cancel_hook` to decide whether
    /// cancellation is permitted for this particular operation.
    pub fn new_cancellable(
        executor: Arc<dyn SerialExecutor>,
        cancel_hook: Arc<dyn Fn() -> bool + Send + Sync>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(executor, Some(cancel_hook))),
        }
    }

    /// A read-only handle to this promise, cloneable and shareable with any number of
    /// observers.
    pub fn future(&self) -> PipelineFuture<T> {
        PipelineFuture {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Settles the promise with success. Returns `false` if it was already terminal.
    pub fn try_success(&self, value: T) -> bool {
        self.shared.try_complete(Terminal::Succeeded(value))
    }

    /// Settles the promise with failure. Returns `false` if it was already terminal.
    pub fn try_failure(&self, cause: PipelineError) -> bool {
        self.shared.try_complete(Terminal::Failed(cause))
    }

    /// Attempts cancellation. Returns `false` if already terminal or the operation does not
    /// permit cancellation.
    pub fn try_cancel(&self) -> bool {
        self.shared.try_cancel()
    }

    pub fn is_done(&self) -> bool {
        self.shared.terminal.get().is_some()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("done", &self.shared.terminal.get().is_some())
            .finish()
    }
}

/// The read side of a completion future. Cheaply cloneable — every clone observes the same
/// underlying terminal state.
pub struct PipelineFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for PipelineFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> PipelineFuture<T> {
    /// A future that is already successfully completed, useful for handler code that wants
    /// to hand back a tracked (non-void) future without an async operation behind it.
    pub fn ready(executor: Arc<dyn SerialExecutor>, value: T) -> Self {
        let promise = Promise::new(executor);
        promise.try_success(value);
        promise.future()
    }

    pub fn is_done(&self) -> bool {
        self.shared.terminal.get().is_some()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.shared.terminal.get(), Some(Terminal::Succeeded(_)))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.shared.terminal.get(), Some(Terminal::Cancelled))
    }

    pub fn cause(&self) -> Option<&PipelineError> {
        match self.shared.terminal.get() {
            Some(Terminal::Failed(cause)) => Some(cause),
            _ => None,
        }
    }

    /// Registers a listener, notified exactly once on this future's bound executor: inline
    /// if the terminal transition (or this call, for an already-terminal future) happens on
    /// the executor's own thread, otherwise enqueued.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: FnOnce(&Outcome<'_, T>) + Send + 'static,
    {
        self.shared.add_listener(Box::new(listener))
    }

    /// Registers every listener in `listeners`, preserving the order they're given in.
    pub fn add_listeners<F, I>(&self, listeners: I) -> Vec<ListenerId>
    where
        F: FnOnce(&Outcome<'_, T>) + Send + 'static,
        I: IntoIterator<Item = F>,
    {
        listeners
            .into_iter()
            .map(|listener| self.add_listener(listener))
            .collect()
    }

    /// Best-effort removal; a no-op if `id` was never registered or already fired.
    pub fn remove_listener(&self, id: ListenerId) {
        self.shared.remove_listener(id);
    }

    pub fn try_cancel(&self) -> bool {
        self.shared.try_cancel()
    }

    /// Blocks until terminal. Returns `Err(DeadlockDetected)` if called from this future's
    /// own executor thread — that thread is the only one that could ever complete it.
    pub fn await_blocking(&self) -> Result<()> {
        self.shared.block(None).map(|_| ())
    }

    /// Blocks until terminal or `timeout` elapses, returning whether it completed in time.
    pub fn await_timeout(&self, timeout: Duration) -> Result<bool> {
        self.shared.block(Some(timeout))
    }

    /// Rust has no cooperative thread-interruption flag to swallow and re-latch the way the
    /// original design's `awaitUninterruptibly` does, so this collapses to
    /// [`await_blocking`](Self::await_blocking) — still deadlock-checked, just with no
    /// distinct interruption behavior to preserve.
    pub fn await_uninterruptibly(&self) -> Result<()> {
        self.await_blocking()
    }

    /// As [`await_blocking`](Self::await_blocking), but re-raises the cause on failure or
    /// cancellation instead of leaving the caller to inspect `cause()`.
    pub fn sync(&self) -> Result<()> {
        self.await_blocking()?;
        match self.shared.terminal.get() {
            Some(Terminal::Succeeded(_)) | None => Ok(()),
            Some(Terminal::Failed(cause)) => Err(cause.clone()),
            Some(Terminal::Cancelled) => Err(PipelineError::Cancelled),
        }
    }
}

impl<T> fmt::Debug for PipelineFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineFuture")
            .field("done", &self.shared.terminal.get().is_some())
            .finish()
    }
}

/// The specialized future handed back when a caller opts out of completion tracking for an
/// outbound write. Every observer/wait operation fails with `IllegalOperationOnVoidFuture`
/// except `is_done`/`is_success`/`cause`, which report "trivially succeeded" per §4.1.
#[derive(Clone, Copy, Debug, Default)]
pub struct VoidFuture;

impl VoidFuture {
    pub fn is_done(&self) -> bool {
        true
    }

    pub fn is_success(&self) -> bool {
        true
    }

    pub fn is_cancelled(&self) -> bool {
        false
    }

    pub fn cause(&self) -> Option<&PipelineError> {
        None
    }

    pub fn add_listener<F>(&self, _listener: F) -> Result<()>
    where
        F: FnOnce(),
    {
        Err(PipelineError::IllegalOperationOnVoidFuture)
    }

    pub fn try_cancel(&self) -> bool {
        false
    }

    pub fn await_blocking(&self) -> Result<()> {
        Err(PipelineError::IllegalOperationOnVoidFuture)
    }

    pub fn await_timeout(&self, _timeout: Duration) -> Result<bool> {
        Err(PipelineError::IllegalOperationOnVoidFuture)
    }

    pub fn await_uninterruptibly(&self) -> Result<()> {
        Err(PipelineError::IllegalOperationOnVoidFuture)
    }

    pub fn sync(&self) -> Result<()> {
        Err(PipelineError::IllegalOperationOnVoidFuture)
    }
}

/// Either a tracked completion future or the void marker — what an outbound invocation
/// returns, matching §4.3's "callers may supply a future (a promise) or request a void one."
pub enum AnyFuture<T> {
    Tracked(PipelineFuture<T>),
    Void(VoidFuture),
}

impl<T> fmt::Debug for AnyFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnyFuture::Tracked(future) => f.debug_tuple("Tracked").field(future).finish(),
            AnyFuture::Void(void) => f.debug_tuple("Void").field(void).finish(),
        }
    }
}

impl<T: Send + 'static> AnyFuture<T> {
    pub fn is_done(&self) -> bool {
        match self {
            AnyFuture::Tracked(f) => f.is_done(),
            AnyFuture::Void(f) => f.is_done(),
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            AnyFuture::Tracked(f) => f.is_success(),
            AnyFuture::Void(f) => f.is_success(),
        }
    }
}

/// Either a tracked promise or the void marker — what an outbound invocation *receives* so
/// the transport/head sentinel has one calling convention regardless of whether the caller
/// wants completion tracking.
pub enum AnyPromise<T> {
    Tracked(Promise<T>),
    Void,
}

impl<T: Send + 'static> AnyPromise<T> {
    pub fn try_success(&self, value: T) -> bool {
        match self {
            AnyPromise::Tracked(promise) => promise.try_success(value),
            AnyPromise::Void => true,
        }
    }

    pub fn try_failure(&self, cause: PipelineError) -> bool {
        match self {
            AnyPromise::Tracked(promise) => promise.try_failure(cause),
            AnyPromise::Void => true,
        }
    }
}
