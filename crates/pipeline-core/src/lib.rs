#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = "pipeline-core: the handler-chain and completion-future machinery shared by every"]
#![doc = "transport this workspace fronts — a Netty-style event-driven pipeline, not a full"]
#![doc = "networking stack. See SPEC_FULL.md for the module-by-module contract."]

mod sealed;

pub mod attributes;
pub mod buffer;
pub mod contract;
pub mod error;
pub mod future;
pub mod pipeline;
pub mod runtime;

pub use attributes::{AttributeCell, AttributeKey, AttributeMap};
pub use buffer::{PipelineMessage, UserEvent};
pub use contract::{Cancellation, CloseReason, Deadline};
pub use error::{PipelineError, Result};
pub use future::{
    AnyFuture, AnyPromise, ListenerId, Outcome, PipelineFuture, Promise, VoidFuture,
};
pub use pipeline::{
    AnyHandler, Channel, ChannelState, Context, ContextId, DuplexHandler, HandlerCapabilities,
    HandlerLifecycle, InboundHandler, OutboundHandler, Pipeline, WriteSignal,
};
pub use runtime::{
    DedicatedThreadExecutor, ExecutorGroup, ImmediateExecutor, SerialExecutor,
    execute_inline_or_submit,
};
