//! The per-(handler, pipeline) event-flow handle (C3).
//!
//! Narrowed from the teacher's broad `Context` trait — which also surfaced buffer pools,
//! cluster membership, service discovery, and a separate `CallContext`/tracing bundle that
//! belong to the teacher's larger runtime, not this crate's scope — down to exactly the
//! surface §4.3/§6 describe: the nine inbound `fire_*` propagation methods, the nine outbound
//! operations, and the small set of accessors (`name`, `executor`, `attributes`) a handler
//! needs to do its job. Kept from the teacher: the `Send + Sync + Sealed` object-safety
//! discipline and the convention of handler methods taking `ctx: &dyn Context`.
use std::net::SocketAddr;

use crate::attributes::AttributeMap;
use crate::buffer::{PipelineMessage, UserEvent};
use crate::error::PipelineError;
use crate::future::AnyPromise;
use crate::runtime::SerialExecutor;
use crate::sealed::Sealed;

use super::channel::WriteSignal;
use super::handler::HandlerCapabilities;

/// The interface a handler uses both to observe what is being propagated to it and to push
/// further along the chain. A concrete implementation is a transient view over one arena slot
/// of a [`super::pipeline::Pipeline`] — constructed fresh for each dispatch call, never held
/// past it.
pub trait Context: Send + Sync + Sealed {
    /// The unique name this context was registered under (see §4.2's name-uniqueness rule).
    fn name(&self) -> &str;

    /// This context's own precomputed capability mask, used by the traversal driver to decide
    /// whether to invoke this context's handler or skip straight past it.
    fn capabilities(&self) -> HandlerCapabilities;

    /// The executor this context's handler callbacks and any futures it originates are bound
    /// to.
    fn executor(&self) -> &dyn SerialExecutor;

    /// The pipeline-wide attribute map (C6).
    fn attributes(&self) -> &AttributeMap;

    // -- inbound propagation: continue toward the tail, skipping non-capable contexts --

    fn fire_channel_registered(&self);
    fn fire_channel_active(&self);
    fn fire_channel_read(&self, msg: PipelineMessage);
    fn fire_channel_read_complete(&self);
    fn fire_user_event_triggered(&self, evt: UserEvent);
    fn fire_channel_writability_changed(&self, is_writable: bool);
    fn fire_exception_caught(&self, cause: PipelineError);
    fn fire_channel_inactive(&self);
    fn fire_channel_unregistered(&self);

    // -- outbound invocation: continue toward the head, skipping non-capable contexts --

    fn bind(&self, local: SocketAddr, promise: AnyPromise<()>);
    fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>, promise: AnyPromise<()>);
    fn disconnect(&self, promise: AnyPromise<()>);
    fn close(&self, promise: AnyPromise<()>);
    fn deregister(&self, promise: AnyPromise<()>);
    fn read(&self);
    fn write(&self, msg: PipelineMessage, promise: AnyPromise<WriteSignal>);
    fn flush(&self);
    fn write_and_flush(&self, msg: PipelineMessage, promise: AnyPromise<WriteSignal>);
}
