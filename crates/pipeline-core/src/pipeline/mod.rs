//! The channel pipeline: handler chain (C3/C4/C5), attribute map hookup, and the
//! transport-facing [`Channel`] trait it dispatches against.
mod channel;
mod context;
mod default_handlers;
mod handler;
mod internal;
#[allow(clippy::module_inception)]
mod pipeline;

pub use channel::{Channel, ChannelState, WriteSignal};
pub use context::Context;
pub use handler::{
    DuplexHandler, HandlerCapabilities, HandlerLifecycle, InboundHandler, OutboundHandler,
};
pub use pipeline::{AnyHandler, ContextId, Pipeline};
