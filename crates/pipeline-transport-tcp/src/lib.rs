//! Tokio-backed `Channel` implementation for `pipeline-core`.
//!
//! This crate is the one concrete transport the rest of the workspace is exercised
//! against: a [`TcpChannel`] that owns a `tokio::net::TcpStream` (or a not-yet-connected
//! `tokio::net::TcpSocket`, for the bind-then-connect path) and drives a pipeline's
//! inbound events off a background read task, plus a [`TcpListener`] that accepts
//! connections and hands each one a freshly attached pipeline.
//!
//! Everything here only ever talks to the rest of the workspace through
//! `pipeline_core::pipeline::Channel` — no handler or pipeline code needs to know this
//! crate exists.
mod channel;
mod listener;

pub use channel::TcpChannel;
pub use listener::TcpListener;
