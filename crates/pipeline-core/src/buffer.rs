//! The message envelope that flows through the pipeline.
//!
//! # 设计背景（Why）
//! - Netty's pipeline moves reference-counted `ByteBuf`s and arbitrary decoded objects
//!   through the same chain, relying on manual `retain`/`release` to avoid leaks. Rust's
//!   ownership model gives us "release exactly once" for free: a [`PipelineMessage`] that
//!   nobody forwards is simply dropped at the end of its owning scope. The tail sentinel's
//!   job degrades from "remember to call release()" to "let the value fall out of scope",
//!   which is exactly what [`super::pipeline::default_handlers`] does.
//! - We still model the two payload shapes the spec cares about — raw bytes arriving from
//!   the transport, and decoded application objects produced by a codec handler further up
//!   the chain — as one envelope type so handler signatures don't need to be generic over
//!   message type.
use std::any::Any;
use std::fmt;

use bytes::Bytes;

/// A message travelling through the pipeline: either a raw byte buffer (as delivered by
/// the transport) or an opaque, type-erased application object (as produced by a codec
/// handler further up the inbound chain, or constructed by application code for the
/// outbound chain).
pub enum PipelineMessage {
    Bytes(Bytes),
    User(Box<dyn Any + Send>),
}

impl PipelineMessage {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::Bytes(bytes.into())
    }

    pub fn from_user<T: Any + Send>(value: T) -> Self {
        Self::User(Box::new(value))
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::User(_) => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::User(boxed) => boxed.downcast_ref::<T>(),
            Self::Bytes(_) => None,
        }
    }

    /// Attempts to recover a concretely-typed user object, handing the message back
    /// unchanged (so the caller can still forward or release it) on type mismatch.
    pub fn try_into_user<T: Any + Send>(self) -> Result<T, Self> {
        match self {
            Self::User(boxed) => match boxed.downcast::<T>() {
                Ok(value) => Ok(*value),
                Err(boxed) => Err(Self::User(boxed)),
            },
            other => Err(other),
        }
    }

    pub fn is_bytes(&self) -> bool {
        matches!(self, Self::Bytes(_))
    }
}

impl fmt::Debug for PipelineMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::User(_) => f.write_str("User(..)"),
        }
    }
}

impl From<Bytes> for PipelineMessage {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for PipelineMessage {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

/// A type-erased out-of-band signal propagated via `user_event_triggered`, distinct from
/// the regular message path: things like "idle timeout elapsed" or "TLS handshake done"
/// that a handler further up the chain raises for its siblings to observe.
pub struct UserEvent(Box<dyn Any + Send>);

impl UserEvent {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn try_into<T: Any + Send>(self) -> Result<T, Self> {
        match self.0.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(boxed) => Err(Self(boxed)),
        }
    }
}

impl fmt::Debug for UserEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UserEvent(..)")
    }
}
