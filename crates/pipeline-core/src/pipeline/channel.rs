//! The transport-facing handle the head sentinel delegates outbound operations to.
//!
//! No direct teacher analog survived the trim to this crate's scope (the pipeline-domain
//! subtree kept the handler/context/pipeline trio but not a transport-facing `Channel`
//! abstraction) — authored fresh against §6's "Transport ⇄ Pipeline contract" and general
//! Netty `Channel` domain knowledge, in the documentation register the rest of this module
//! uses. `crates/pipeline-transport-tcp` provides the one concrete implementation.
use std::fmt;
use std::net::SocketAddr;

use crate::buffer::PipelineMessage;
use crate::future::{AnyPromise, PipelineFuture};

/// Where a channel sits in its connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Registered with a pipeline but not yet active (e.g. bound but not connected).
    Initialized,
    /// Open and able to read/write.
    Active,
    /// Closing gracefully: no new writes accepted, in-flight ones still draining.
    Draining,
    /// Fully closed; the pipeline has seen `channel_inactive`/`channel_unregistered`.
    Closed,
}

/// What a successful outbound write accomplished, mirroring what a transport typically
/// needs to tell a handler beyond plain success: whether the write was also flushed, and
/// whether the transport is now applying backpressure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteSignal {
    /// Buffered, not yet flushed to the wire.
    Accepted,
    /// Buffered and immediately flushed.
    AcceptedAndFlushed,
    /// Accepted, but the transport reports it is no longer writable (backpressure).
    FlowControlApplied,
}

/// The head sentinel's view of the transport: the thing `bind`/`connect`/`disconnect`/
/// `close`/`deregister`/`read`/`write`/`flush` ultimately reach.
///
/// Implementations own the real I/O resource (a socket, in `pipeline-transport-tcp`'s
/// case) and are responsible for completing the promise passed to each operation exactly
/// once, per §6's "the transport completes [the promise] with success, failure, or
/// cancellation."
///
/// Not sealed: this is the one trait in the crate meant to be implemented outside it, by
/// whichever transport crate is fronting a particular protocol.
pub trait Channel: Send + Sync {
    fn state(&self) -> ChannelState;

    fn is_writable(&self) -> bool;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn peer_addr(&self) -> Option<SocketAddr>;

    fn bind(&self, local: SocketAddr, promise: AnyPromise<()>);

    fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>, promise: AnyPromise<()>);

    fn disconnect(&self, promise: AnyPromise<()>);

    fn close(&self, promise: AnyPromise<()>);

    fn deregister(&self, promise: AnyPromise<()>);

    /// Requests the transport resume delivering `channel_read` events (used to implement
    /// auto-read-off backpressure strategies in higher layers; this crate does not itself
    /// implement a strategy, only the primitive).
    fn begin_read(&self);

    fn write(&self, msg: PipelineMessage, promise: AnyPromise<WriteSignal>);

    fn flush(&self);

    /// Resolves once the channel has fully closed; convenience over polling `state()`.
    fn closed(&self) -> PipelineFuture<()>;
}

impl fmt::Debug for dyn Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("peer_addr", &self.peer_addr())
            .finish()
    }
}
