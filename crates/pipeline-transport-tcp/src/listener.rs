//! Accepts TCP connections and wires each one up with its own [`Pipeline`].
//!
//! Grounded in the teacher's own `TcpListener` (a thin wrapper over
//! `tokio::net::TcpListener::{bind,accept}`); narrowed since this crate's `Channel`
//! contract has no `CallContext`/cancellation threading of its own, and extended to
//! return an attached pipeline rather than a bare channel, since a `Channel` does nothing
//! useful until it has somewhere to fire its events.
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use pipeline_core::pipeline::Pipeline;
use pipeline_core::runtime::SerialExecutor;
use tokio::net::TcpListener as TokioTcpListener;
use tokio::runtime::Handle;

use crate::TcpChannel;

/// A bound TCP socket accepting inbound connections.
pub struct TcpListener {
    inner: TokioTcpListener,
    local_addr: SocketAddr,
}

impl TcpListener {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let inner = TokioTcpListener::bind(addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts the next inbound connection, builds a channel around it, attaches a fresh
    /// pipeline named `pipeline_name`, and returns that pipeline. Every handler added to it
    /// afterwards (via `Pipeline::add_last` and friends) is the caller's responsibility —
    /// this crate has no opinion on what a connection's handler chain should look like.
    pub async fn accept(
        &self,
        pipeline_name: impl Into<String>,
        default_executor: Arc<dyn SerialExecutor>,
    ) -> io::Result<Pipeline> {
        let (stream, _peer) = self.inner.accept().await?;
        let channel = TcpChannel::from_stream(stream, Handle::current(), Arc::clone(&default_executor))?;
        let pipeline = Pipeline::new(pipeline_name, channel.clone(), default_executor);
        channel.attach_pipeline(pipeline.clone());
        Ok(pipeline)
    }
}
