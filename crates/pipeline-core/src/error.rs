//! Error kinds surfaced by the pipeline core.
//!
//! # 设计背景（Why）
//! - The pipeline and completion-future machinery only ever fail in a handful of
//!   well-understood ways (§7 of the design): a duplicate handler name, a mutation
//!   referencing something that isn't there, an operation on a future that forgoes
//!   tracking, a deadlocking wait, user handler code raising. `PipelineError` gives each
//!   of those a stable tag instead of letting `anyhow`-style string errors leak the
//!   internal call stack into handler code that has to branch on failure kind.
//!
//! # 契约说明（What）
//! - One variant per tag named in the specification's error-kinds table; no variant is
//!   added for concerns out of scope here (retry budgets, security negotiation, ...).
use std::error::Error as StdError;

/// Unified error type for pipeline mutation, dispatch, and completion-future operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// Attempted insertion with a handler name already present in the pipeline.
    #[error("duplicate handler name: {name}")]
    DuplicateName { name: String },

    /// Mutation referencing a missing handler by name, handle, or type.
    #[error("handler not found: {reference}")]
    NotFound { reference: String },

    /// A required argument was missing or empty where the contract forbids it.
    #[error("null or empty argument: {argument}")]
    NullArgument { argument: &'static str },

    /// Operation attempted on a handler/context/pipeline that is not in a usable state
    /// (already removed, not yet attached, non-shareable handler reused).
    #[error("illegal state: {reason}")]
    IllegalState { reason: String },

    /// `add_listener`/`await*`/`sync*` invoked on a void future.
    #[error("operation not supported on a void future")]
    IllegalOperationOnVoidFuture,

    /// A blocking wait was invoked from the very executor thread that would complete it.
    #[error("blocking wait invoked from the completing executor's own thread")]
    DeadlockDetected,

    /// An interruptible wait observed the calling thread's interruption flag.
    #[error("wait interrupted")]
    Interrupted,

    /// A bounded wait elapsed before the future reached a terminal state.
    #[error("wait timed out")]
    Timeout,

    /// User handler code raised; the original cause is preserved.
    #[error("handler raised an exception")]
    HandlerException {
        #[source]
        cause: Box<dyn StdError + Send + Sync>,
    },

    /// The operation (or its future) was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    pub fn not_found(reference: impl Into<String>) -> Self {
        Self::NotFound {
            reference: reference.into(),
        }
    }

    pub fn illegal_state(reason: impl Into<String>) -> Self {
        Self::IllegalState {
            reason: reason.into(),
        }
    }

    pub fn handler_exception(cause: impl StdError + Send + Sync + 'static) -> Self {
        Self::HandlerException {
            cause: Box::new(cause),
        }
    }
}

/// A promise's terminal state must be readable by every listener and every `sync()` caller,
/// potentially long after the original cause was produced — so `PipelineError` needs to be
/// cheaply cloneable. The one variant that cannot clone its payload verbatim
/// (`HandlerException`, which boxes an arbitrary `dyn Error`) is flattened to its rendered
/// message on clone; callers that need the original concrete error should inspect it via
/// `exception_caught` at the point the failure first occurs, not from a cloned copy.
impl Clone for PipelineError {
    fn clone(&self) -> Self {
        match self {
            Self::DuplicateName { name } => Self::DuplicateName { name: name.clone() },
            Self::NotFound { reference } => Self::NotFound {
                reference: reference.clone(),
            },
            Self::NullArgument { argument } => Self::NullArgument { argument },
            Self::IllegalState { reason } => Self::IllegalState {
                reason: reason.clone(),
            },
            Self::IllegalOperationOnVoidFuture => Self::IllegalOperationOnVoidFuture,
            Self::DeadlockDetected => Self::DeadlockDetected,
            Self::Interrupted => Self::Interrupted,
            Self::Timeout => Self::Timeout,
            Self::HandlerException { cause } => Self::HandlerException {
                cause: Box::new(FlattenedCause(cause.to_string())),
            },
            Self::Cancelled => Self::Cancelled,
        }
    }
}

/// Rendered stand-in for a `HandlerException`'s original cause, used only when a
/// `PipelineError` needs to be cloned (see the `Clone` impl above).
#[derive(Debug)]
struct FlattenedCause(String);

impl std::fmt::Display for FlattenedCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for FlattenedCause {}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
