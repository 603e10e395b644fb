//! Small value types shared across the pipeline surface: close reasons, deadlines, and
//! cooperative cancellation.
//!
//! Kept deliberately narrow — the wider "call context" machinery (budgets, security
//! snapshots, shutdown state machines) that the teacher workspace's `contract` module
//! carries belongs to the governance/service layers this crate does not implement; see
//! DESIGN.md for the trim rationale.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Why a channel is being closed, attached to `close_graceful` calls so handlers and
/// transports can log or branch on cause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseReason {
    code: &'static str,
    detail: String,
}

impl CloseReason {
    pub fn new(code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// A point in time by which a graceful operation should have completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Self(Instant::now() + duration)
    }

    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn into_instant(self) -> Instant {
        self.0
    }
}

/// A cooperative cancellation flag, cheaply cloneable and shared between whoever
/// requests cancellation and whoever polls for it.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
