//! Single-thread-affine execution for pipeline contexts and completion futures.
//!
//! Every [`HandlerContext`](crate::pipeline::context::HandlerContext) and every
//! [`Promise`](crate::future::Promise) is bound to a [`SerialExecutor`] at construction.
//! Dispatch and listener fan-out both follow the same rule: a task destined for executor
//! `E` runs inline if the calling thread is already `E`'s thread, otherwise it is submitted
//! and the caller does not wait for it. This is the inline-vs-submit discipline the pipeline
//! depends on to guarantee strict per-context ordering without taking a lock around user
//! code — grounded in the teacher workspace's `TaskExecutor::spawn_dyn` object-safe
//! submission shape, narrowed here to a `FnOnce()` task instead of a polled `Future`, since
//! this crate's executors are plain run-to-completion callback queues rather than an async
//! runtime.
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;

use crate::sealed::Sealed;

/// A task queue pinned to a single logical thread of execution.
///
/// Implementations must guarantee that tasks submitted via [`execute`](Self::execute) run
/// one at a time, in submission order, on the same OS thread every time — this is what lets
/// [`HandlerContext`](crate::pipeline::context::HandlerContext) treat "my executor" as a
/// serialization point without additional locking.
pub trait SerialExecutor: Send + Sync + Sealed {
    /// Enqueues `task` for later execution on this executor's thread. Never blocks the
    /// caller and never runs `task` inline, even if the caller happens to already be on
    /// the executor's thread — callers that want the inline fast path should check
    /// [`is_current_thread`](Self::is_current_thread) themselves (see
    /// [`execute_inline_or_submit`]).
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>);

    /// Reports whether the calling thread is this executor's own thread. Used both for the
    /// inline-dispatch fast path and for `Promise`/`PipelineFuture`'s deadlock detection.
    fn is_current_thread(&self) -> bool;

    /// A short, stable name used in `tracing` fields and panic/error messages.
    fn name(&self) -> &str {
        "serial-executor"
    }
}

/// Runs `task` inline if the caller is already on `executor`'s thread, otherwise submits it.
/// This is the single dispatch primitive the pipeline and completion-future machinery build
/// on; every `fire_*`/outbound hand-off and every listener notification goes through it.
pub fn execute_inline_or_submit<E>(executor: &E, task: impl FnOnce() + Send + 'static)
where
    E: SerialExecutor + ?Sized,
{
    if executor.is_current_thread() {
        task();
    } else {
        executor.execute(Box::new(task));
    }
}

/// Executes every task inline, on whatever thread submits it. Used by tests and by pipelines
/// that run fully single-threaded with no auxiliary executors — in that mode "inline or
/// submit" collapses to "always inline" because there is only one thread to begin with.
#[derive(Debug, Default)]
pub struct ImmediateExecutor;

impl Sealed for ImmediateExecutor {}

impl SerialExecutor for ImmediateExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        task();
    }

    fn is_current_thread(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "immediate"
    }
}

/// A real single-thread executor: one dedicated OS thread draining a task channel.
///
/// This is the executor an embedder reaches for when a handler needs to run its callbacks
/// off the I/O thread (e.g. a handler doing blocking disk access) while still preserving
/// strict per-handler ordering — Netty's `DefaultEventExecutor` plays the same role.
pub struct DedicatedThreadExecutor {
    sender: mpsc::Sender<Box<dyn FnOnce() + Send + 'static>>,
    thread_id: thread::ThreadId,
    name: String,
}

impl DedicatedThreadExecutor {
    /// Spawns the backing thread and blocks until it has reported its `ThreadId`.
    pub fn spawn(name: impl Into<String>) -> Self {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Box<dyn FnOnce() + Send + 'static>>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let thread_name = name.clone();
        thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let _ = ready_tx.send(thread::current().id());
                while let Ok(task) = receiver.recv() {
                    task();
                }
            })
            .expect("failed to spawn pipeline executor thread");
        let thread_id = ready_rx
            .recv()
            .expect("pipeline executor thread failed to report its id before exiting");
        Self {
            sender,
            thread_id,
            name,
        }
    }
}

impl Sealed for DedicatedThreadExecutor {}

impl SerialExecutor for DedicatedThreadExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        // A disconnected receiver means the thread has exited; dropping the task here is
        // the same "best effort, log at the call site" posture the pipeline takes for any
        // other post-shutdown submission.
        let _ = self.sender.send(task);
    }

    fn is_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for DedicatedThreadExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedicatedThreadExecutor")
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

/// A fixed-size pool of [`SerialExecutor`]s handed out round-robin, for embedders that want
/// to spread many pipelines' handler executors across a bounded set of threads rather than
/// giving every pipeline its own dedicated thread.
///
/// Deliberately minimal relative to the original Netty `EventExecutorGroup`: round-robin
/// selection over a fixed `Vec`, no work-stealing, no dynamic resizing. Reactor/selector
/// loops and load-aware scheduling are out of scope for this crate.
pub struct ExecutorGroup {
    executors: Vec<Arc<dyn SerialExecutor>>,
    next: AtomicUsize,
}

impl ExecutorGroup {
    /// Builds a group from an already-constructed, non-empty set of executors.
    ///
    /// # Panics
    /// Panics if `executors` is empty — a group with no members cannot hand out a next
    /// executor.
    pub fn new(executors: Vec<Arc<dyn SerialExecutor>>) -> Self {
        assert!(
            !executors.is_empty(),
            "ExecutorGroup requires at least one executor"
        );
        Self {
            executors,
            next: AtomicUsize::new(0),
        }
    }

    /// Spawns `size` dedicated-thread executors named `{prefix}-{index}`.
    pub fn dedicated(prefix: &str, size: usize) -> Self {
        let executors = (0..size.max(1))
            .map(|i| {
                Arc::new(DedicatedThreadExecutor::spawn(format!("{prefix}-{i}")))
                    as Arc<dyn SerialExecutor>
            })
            .collect();
        Self::new(executors)
    }

    /// Returns the next executor in round-robin order.
    pub fn next(&self) -> Arc<dyn SerialExecutor> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.executors.len();
        Arc::clone(&self.executors[idx])
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn immediate_executor_runs_inline() {
        let executor = ImmediateExecutor;
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        execute_inline_or_submit(&executor, move || flag.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn dedicated_thread_executor_reports_its_own_thread() {
        let executor = DedicatedThreadExecutor::spawn("test-exec");
        assert!(!executor.is_current_thread());

        let (tx, rx) = mpsc::channel();
        executor.execute(Box::new(move || {
            tx.send(()).ok();
        }));
        rx.recv_timeout(std::time::Duration::from_secs(1))
            .expect("task did not run on dedicated executor");
    }

    #[test]
    fn executor_group_round_robins() {
        let group = ExecutorGroup::dedicated("rr", 3);
        assert_eq!(group.len(), 3);
        let first = group.next().name().to_string();
        let second = group.next().name().to_string();
        let third = group.next().name().to_string();
        let fourth = group.next().name().to_string();
        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(first, fourth);
    }
}
