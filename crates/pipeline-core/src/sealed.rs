//! Sealing trait preventing downstream crates from implementing our core traits directly.
//!
//! `Handler`, `Pipeline`, `Context` and friends are meant to be extended by composition
//! (wrapping, adapting) rather than by foreign `impl`s reaching into dispatch internals.

pub trait Sealed {}
