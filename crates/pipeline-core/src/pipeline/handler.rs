//! Handler traits and the capability mask (C5).
//!
//! Grounded directly in the teacher workspace's `data_plane::pipeline::handler` module: same
//! `InboundHandler`/`OutboundHandler`/`DuplexHandler` split, same blanket `impl<T> DuplexHandler
//! for T where T: InboundHandler + OutboundHandler`. Generalized to the full nine-event
//! inbound surface and nine-operation outbound surface §4.3/§6 name (the teacher's handler
//! module only exposes a narrow subset), and — per the REDESIGN FLAG on capability-mask
//! computation — given an explicit `capabilities()` method instead of relying on
//! reflection/annotation-processing over which default methods a handler overrides, since
//! Rust has no standard, object-safe equivalent of either.
use std::net::SocketAddr;
use std::ops::{BitOr, BitOrAssign};

use crate::buffer::{PipelineMessage, UserEvent};
use crate::error::PipelineError;
use crate::future::AnyPromise;

use super::channel::WriteSignal;
use super::context::Context;

/// Per-handler bitset recording which inbound/outbound methods a handler actually overrides
/// (as opposed to inheriting the trivial forwarding default). The pipeline computes a
/// context's mask once, from `capabilities()`, when the context is spliced in, and uses it
/// to skip this handler entirely for any event whose bit is unset — the O(1) skip traversal
/// §4.3/§9 call for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandlerCapabilities(u32);

impl HandlerCapabilities {
    pub const CHANNEL_REGISTERED: Self = Self(1 << 0);
    pub const CHANNEL_ACTIVE: Self = Self(1 << 1);
    pub const CHANNEL_READ: Self = Self(1 << 2);
    pub const CHANNEL_READ_COMPLETE: Self = Self(1 << 3);
    pub const USER_EVENT_TRIGGERED: Self = Self(1 << 4);
    pub const WRITABILITY_CHANGED: Self = Self(1 << 5);
    pub const EXCEPTION_CAUGHT: Self = Self(1 << 6);
    pub const CHANNEL_INACTIVE: Self = Self(1 << 7);
    pub const CHANNEL_UNREGISTERED: Self = Self(1 << 8);

    pub const BIND: Self = Self(1 << 9);
    pub const CONNECT: Self = Self(1 << 10);
    pub const DISCONNECT: Self = Self(1 << 11);
    pub const CLOSE: Self = Self(1 << 12);
    pub const DEREGISTER: Self = Self(1 << 13);
    pub const READ: Self = Self(1 << 14);
    pub const WRITE: Self = Self(1 << 15);
    pub const FLUSH: Self = Self(1 << 16);
    pub const WRITE_AND_FLUSH: Self = Self(1 << 17);

    pub const ALL_INBOUND: Self = Self(0x1FF);
    pub const ALL_OUTBOUND: Self = Self(0x1FF << 9);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(Self::ALL_INBOUND.0 | Self::ALL_OUTBOUND.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for HandlerCapabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for HandlerCapabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

/// Shared by both directional handler traits: capability reporting and the two lifecycle
/// callbacks every context fires regardless of which surface(s) its handler implements.
///
/// Deliberately not sealed: unlike [`Context`](super::context::Context), which only the
/// pipeline itself ever implements, handlers are written by whoever is assembling a
/// pipeline — this trait (and [`InboundHandler`]/[`OutboundHandler`]/[`DuplexHandler`]) is
/// the whole extension surface the rest of this crate exists to support.
pub trait HandlerLifecycle: Send + Sync {
    /// Which of this handler's methods are more than a trivial forward. Defaults to empty
    /// (a pure forwarder, skipped entirely during traversal); override alongside any method
    /// you give a real implementation to.
    fn capabilities(&self) -> HandlerCapabilities {
        HandlerCapabilities::empty()
    }

    /// Runs once the context has been spliced into the pipeline, before any other callback
    /// is delivered to it. Raising here causes the context to be immediately removed.
    fn handler_added(&self, _ctx: &dyn Context) {}

    /// Runs once the context has been spliced out of the pipeline. Raising here is logged
    /// and swallowed.
    fn handler_removed(&self, _ctx: &dyn Context) {}

    /// Declares this handler instance safe to add to more than one context (or the same
    /// pipeline twice). Non-shareable handlers must be fresh per context — attempting to add
    /// an already-attached non-shareable handler raises `IllegalState`.
    fn is_shareable(&self) -> bool {
        false
    }
}

/// The nine inbound events, matching §6's transport-to-pipeline contract one for one.
/// Default implementations simply forward via the context, which is what makes a handler
/// that implements none of them a transparent pass-through.
pub trait InboundHandler: HandlerLifecycle {
    fn channel_registered(&self, ctx: &dyn Context) {
        ctx.fire_channel_registered();
    }

    fn channel_active(&self, ctx: &dyn Context) {
        ctx.fire_channel_active();
    }

    fn channel_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        ctx.fire_channel_read(msg);
    }

    fn channel_read_complete(&self, ctx: &dyn Context) {
        ctx.fire_channel_read_complete();
    }

    fn user_event_triggered(&self, ctx: &dyn Context, evt: UserEvent) {
        ctx.fire_user_event_triggered(evt);
    }

    fn channel_writability_changed(&self, ctx: &dyn Context, is_writable: bool) {
        ctx.fire_channel_writability_changed(is_writable);
    }

    fn exception_caught(&self, ctx: &dyn Context, cause: PipelineError) {
        ctx.fire_exception_caught(cause);
    }

    fn channel_inactive(&self, ctx: &dyn Context) {
        ctx.fire_channel_inactive();
    }

    fn channel_unregistered(&self, ctx: &dyn Context) {
        ctx.fire_channel_unregistered();
    }
}

/// The nine outbound operations, matching §4.3/§6. Default implementations forward toward
/// the head by calling the same method on the context.
pub trait OutboundHandler: HandlerLifecycle {
    fn bind(&self, ctx: &dyn Context, local: SocketAddr, promise: AnyPromise<()>) {
        ctx.bind(local, promise);
    }

    fn connect(
        &self,
        ctx: &dyn Context,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        promise: AnyPromise<()>,
    ) {
        ctx.connect(remote, local, promise);
    }

    fn disconnect(&self, ctx: &dyn Context, promise: AnyPromise<()>) {
        ctx.disconnect(promise);
    }

    fn close(&self, ctx: &dyn Context, promise: AnyPromise<()>) {
        ctx.close(promise);
    }

    fn deregister(&self, ctx: &dyn Context, promise: AnyPromise<()>) {
        ctx.deregister(promise);
    }

    fn read(&self, ctx: &dyn Context) {
        ctx.read();
    }

    fn write(&self, ctx: &dyn Context, msg: PipelineMessage, promise: AnyPromise<WriteSignal>) {
        ctx.write(msg, promise);
    }

    fn flush(&self, ctx: &dyn Context) {
        ctx.flush();
    }

    fn write_and_flush(
        &self,
        ctx: &dyn Context,
        msg: PipelineMessage,
        promise: AnyPromise<WriteSignal>,
    ) {
        ctx.write_and_flush(msg, promise);
    }
}

/// A handler implementing both surfaces. Blanket-implemented for any type that implements
/// both traits — there is nothing to add beyond the union of their methods.
pub trait DuplexHandler: InboundHandler + OutboundHandler {}

impl<T> DuplexHandler for T where T: InboundHandler + OutboundHandler {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_union_and_contains() {
        let mask = HandlerCapabilities::CHANNEL_READ | HandlerCapabilities::WRITE;
        assert!(mask.contains(HandlerCapabilities::CHANNEL_READ));
        assert!(mask.contains(HandlerCapabilities::WRITE));
        assert!(!mask.contains(HandlerCapabilities::CLOSE));
        assert!(mask.intersects(HandlerCapabilities::ALL_OUTBOUND));
    }

    #[test]
    fn all_covers_every_named_bit() {
        let all = HandlerCapabilities::all();
        for bit in [
            HandlerCapabilities::CHANNEL_REGISTERED,
            HandlerCapabilities::CHANNEL_ACTIVE,
            HandlerCapabilities::CHANNEL_READ,
            HandlerCapabilities::CHANNEL_READ_COMPLETE,
            HandlerCapabilities::USER_EVENT_TRIGGERED,
            HandlerCapabilities::WRITABILITY_CHANGED,
            HandlerCapabilities::EXCEPTION_CAUGHT,
            HandlerCapabilities::CHANNEL_INACTIVE,
            HandlerCapabilities::CHANNEL_UNREGISTERED,
            HandlerCapabilities::BIND,
            HandlerCapabilities::CONNECT,
            HandlerCapabilities::DISCONNECT,
            HandlerCapabilities::CLOSE,
            HandlerCapabilities::DEREGISTER,
            HandlerCapabilities::READ,
            HandlerCapabilities::WRITE,
            HandlerCapabilities::FLUSH,
            HandlerCapabilities::WRITE_AND_FLUSH,
        ] {
            assert!(all.contains(bit));
        }
    }
}
