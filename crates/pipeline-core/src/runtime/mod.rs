//! Executor-binding primitives (C2).
//!
//! A pipeline and every context in it run against a [`SerialExecutor`]: the single
//! abstraction this module exposes. There is no task-handle/join-handle surface here —
//! unlike a general-purpose async runtime, the executors in this crate only ever run
//! fire-and-forget dispatch callbacks and completion-future listener notifications, neither
//! of which the caller waits on via a handle.

mod executor;

pub use executor::{
    DedicatedThreadExecutor, ExecutorGroup, ImmediateExecutor, SerialExecutor,
    execute_inline_or_submit,
};
