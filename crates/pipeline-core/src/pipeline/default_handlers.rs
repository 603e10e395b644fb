//! Built-in behavior for the two ends of the chain: the tail's handling of events nobody
//! consumed, and (via [`super::pipeline::Pipeline`] calling straight through to its
//! [`super::channel::Channel`]) the head's forwarding of outbound operations to the transport.
//!
//! The teacher's own default-handlers module (`ExceptionAutoResponder`, mapping error
//! categories to backoff/close-graceful responses) solved a problem this crate's scope
//! doesn't have — there is no error-category taxonomy here, just the plain tail-discard
//! behavior §4.4 describes. Kept from it: logging unmet events instead of panicking or
//! silently ignoring them.
use crate::buffer::{PipelineMessage, UserEvent};
use crate::error::PipelineError;

/// An inbound message that fell off the end of the chain without being consumed. Logged at
/// WARN and then dropped by `msg` going out of scope — Rust's ownership model gives us
/// "release exactly once" here for free, so there is no explicit `release()` call to make.
pub(crate) fn tail_channel_read(pipeline_name: &str, msg: PipelineMessage) {
    tracing::warn!(
        pipeline = pipeline_name,
        message = ?msg,
        "discarding inbound message unconsumed by any handler"
    );
}

/// A user event nobody observed. Logged at DEBUG rather than WARN: unlike an unconsumed
/// message, an ignored out-of-band signal (e.g. an idle-timeout notification nobody cared
/// about) is a routine occurrence, not a likely-forgotten handler.
pub(crate) fn tail_user_event_triggered(pipeline_name: &str, evt: UserEvent) {
    tracing::debug!(
        pipeline = pipeline_name,
        event = ?evt,
        "discarding user event unconsumed by any handler"
    );
}

/// An exception that propagated past every handler's `exception_caught` override.
pub(crate) fn tail_exception_caught(pipeline_name: &str, cause: &PipelineError) {
    tracing::warn!(
        pipeline = pipeline_name,
        error = %cause,
        "exception reached the end of the pipeline unhandled"
    );
}
