//! [`Channel`] implementation over `tokio::net::TcpStream`.
//!
//! Grounded in the teacher's own `TcpChannel` (connect/read/write/shutdown over a Tokio
//! socket, `tokio::sync::Mutex` serializing writes), narrowed to the new
//! `pipeline_core::pipeline::Channel` contract: every outbound operation takes an
//! `AnyPromise` instead of returning a future directly, and the channel itself is
//! responsible for firing the matching inbound pipeline events (`channel_active`,
//! `channel_read`, `channel_inactive`, ...) once a [`Pipeline`] is attached to it.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use pipeline_core::buffer::PipelineMessage;
use pipeline_core::error::PipelineError;
use pipeline_core::future::{AnyPromise, PipelineFuture, Promise};
use pipeline_core::pipeline::{Channel, ChannelState, Pipeline, WriteSignal};
use pipeline_core::runtime::SerialExecutor;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{Mutex as TokioMutex, Notify};
use tokio::task::JoinHandle;

const READ_BUFFER_SIZE: usize = 64 * 1024;

struct Inner {
    state: StdMutex<ChannelState>,
    local_addr: StdMutex<Option<SocketAddr>>,
    peer_addr: StdMutex<Option<SocketAddr>>,
    /// Present only before a successful `connect`: the bound-but-not-yet-connected socket
    /// `connect` consumes. `None` once the channel is active (or if it was constructed
    /// already connected, via [`TcpChannel::from_stream`]).
    preconnect: StdMutex<Option<TcpSocket>>,
    write_half: TokioMutex<Option<OwnedWriteHalf>>,
    /// Taken by the read task the moment a pipeline is attached; `None` afterwards.
    read_half: StdMutex<Option<OwnedReadHalf>>,
    pipeline: OnceLock<Pipeline>,
    handle: Handle,
    read_task: StdMutex<Option<JoinHandle<()>>>,
    readable: AtomicBool,
    read_gate: Notify,
    inactive_fired: AtomicBool,
    closed: Promise<()>,
}

/// A TCP socket driving a single pipeline's inbound events off a background read task.
pub struct TcpChannel {
    inner: Arc<Inner>,
}

impl Clone for TcpChannel {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl TcpChannel {
    /// Builds a channel with no underlying socket yet — `bind`/`connect` (dispatched
    /// through the pipeline this channel is attached to) create it lazily, matching the
    /// address family of whatever `connect` is eventually called with.
    pub fn unconnected(handle: Handle, default_executor: Arc<dyn SerialExecutor>) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Inner {
                state: StdMutex::new(ChannelState::Initialized),
                local_addr: StdMutex::new(None),
                peer_addr: StdMutex::new(None),
                preconnect: StdMutex::new(None),
                write_half: TokioMutex::new(None),
                read_half: StdMutex::new(None),
                pipeline: OnceLock::new(),
                handle,
                read_task: StdMutex::new(None),
                readable: AtomicBool::new(true),
                read_gate: Notify::new(),
                inactive_fired: AtomicBool::new(false),
                closed: Promise::new(default_executor),
            }),
        })
    }

    /// Builds a channel around an already-connected stream, as produced by
    /// [`crate::TcpListener::accept`].
    pub fn from_stream(
        stream: TcpStream,
        handle: Handle,
        default_executor: Arc<dyn SerialExecutor>,
    ) -> std::io::Result<Arc<Self>> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        Ok(Arc::new(Self {
            inner: Arc::new(Inner {
                state: StdMutex::new(ChannelState::Active),
                local_addr: StdMutex::new(Some(local_addr)),
                peer_addr: StdMutex::new(Some(peer_addr)),
                preconnect: StdMutex::new(None),
                write_half: TokioMutex::new(Some(write_half)),
                read_half: StdMutex::new(Some(read_half)),
                pipeline: OnceLock::new(),
                handle,
                read_task: StdMutex::new(None),
                readable: AtomicBool::new(true),
                read_gate: Notify::new(),
                inactive_fired: AtomicBool::new(false),
                closed: Promise::new(default_executor),
            }),
        }))
    }

    /// Attaches the pipeline this channel fires its inbound events into. Must be called
    /// exactly once, before any operation is dispatched through the pipeline — ordinarily
    /// right after `Pipeline::new(name, channel.clone(), executor)` constructs it.
    ///
    /// Firing `channel_registered` (and, if the stream is already connected,
    /// `channel_active` plus starting the read task) happens here rather than in the
    /// constructors above, since a channel isn't meaningfully "registered" until it has
    /// somewhere to fire events.
    pub fn attach_pipeline(&self, pipeline: Pipeline) {
        if self.inner.pipeline.set(pipeline.clone()).is_err() {
            tracing::warn!("attach_pipeline called more than once; ignoring");
            return;
        }
        pipeline.fire_channel_registered();
        if *self.inner.state.lock().unwrap_or_else(|p| p.into_inner()) == ChannelState::Active {
            pipeline.fire_channel_active();
            self.spawn_read_task(pipeline);
        }
    }

    fn pipeline(&self) -> Option<&Pipeline> {
        self.inner.pipeline.get()
    }

    fn spawn_read_task(&self, pipeline: Pipeline) {
        let Some(read_half) = self.inner.read_half.lock().unwrap_or_else(|p| p.into_inner()).take()
        else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        let task = self.inner.handle.spawn(read_loop(inner, read_half, pipeline));
        *self.inner.read_task.lock().unwrap_or_else(|p| p.into_inner()) = Some(task);
    }

    /// Fires `channel_inactive`/`channel_unregistered` exactly once, however the channel
    /// came to stop (read EOF, read error, or an explicit `close`).
    fn fire_inactive_once(&self) {
        if self
            .inner
            .inactive_fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            *self.inner.state.lock().unwrap_or_else(|p| p.into_inner()) = ChannelState::Closed;
            if let Some(pipeline) = self.pipeline() {
                pipeline.fire_channel_inactive();
                pipeline.fire_channel_unregistered();
            }
            self.inner.closed.try_success(());
        }
    }
}

async fn read_loop(inner: Arc<Inner>, mut read_half: OwnedReadHalf, pipeline: Pipeline) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        if !inner.readable.load(Ordering::Acquire) {
            inner.read_gate.notified().await;
            continue;
        }
        match read_half.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pipeline.fire_channel_read(PipelineMessage::from_bytes(buf[..n].to_vec()));
                pipeline.fire_channel_read_complete();
            }
            Err(err) => {
                pipeline.fire_exception_caught(PipelineError::handler_exception(err));
                break;
            }
        }
    }
    let channel = TcpChannel { inner };
    channel.fire_inactive_once();
}

impl Channel for TcpChannel {
    fn state(&self) -> ChannelState {
        *self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn is_writable(&self) -> bool {
        self.state() == ChannelState::Active
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        *self.inner.peer_addr.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn bind(&self, local: SocketAddr, promise: AnyPromise<()>) {
        let mut slot = self.inner.preconnect.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_some() {
            promise.try_failure(PipelineError::illegal_state(
                "bind called more than once on this channel",
            ));
            return;
        }
        let socket = match local {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        };
        let result = socket.and_then(|socket| {
            socket.set_reuseaddr(true)?;
            socket.bind(local)?;
            Ok(socket)
        });
        match result {
            Ok(socket) => {
                *self.inner.local_addr.lock().unwrap_or_else(|p| p.into_inner()) = Some(local);
                *slot = Some(socket);
                promise.try_success(());
            }
            Err(err) => {
                promise.try_failure(PipelineError::handler_exception(err));
            }
        }
    }

    fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>, promise: AnyPromise<()>) {
        let preconnect = self
            .inner
            .preconnect
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let channel = self.clone();
        self.inner.handle.spawn(async move {
            let socket = match preconnect {
                Some(socket) => socket,
                None => {
                    let fresh = match local.unwrap_or(remote) {
                        SocketAddr::V4(_) => TcpSocket::new_v4(),
                        SocketAddr::V6(_) => TcpSocket::new_v6(),
                    };
                    match fresh {
                        Ok(socket) => socket,
                        Err(err) => {
                            promise.try_failure(PipelineError::handler_exception(err));
                            return;
                        }
                    }
                }
            };
            match socket.connect(remote).await {
                Ok(stream) => {
                    let local_addr = stream.local_addr().ok();
                    let peer_addr = stream.peer_addr().ok();
                    let (read_half, write_half) = stream.into_split();
                    *channel.inner.local_addr.lock().unwrap_or_else(|p| p.into_inner()) =
                        local_addr;
                    *channel.inner.peer_addr.lock().unwrap_or_else(|p| p.into_inner()) =
                        peer_addr;
                    *channel.inner.write_half.lock().await = Some(write_half);
                    *channel.inner.read_half.lock().unwrap_or_else(|p| p.into_inner()) =
                        Some(read_half);
                    *channel.inner.state.lock().unwrap_or_else(|p| p.into_inner()) =
                        ChannelState::Active;
                    if let Some(pipeline) = channel.pipeline() {
                        pipeline.fire_channel_active();
                        channel.spawn_read_task(pipeline.clone());
                    }
                    promise.try_success(());
                }
                Err(err) => {
                    promise.try_failure(PipelineError::handler_exception(err));
                }
            }
        });
    }

    fn disconnect(&self, promise: AnyPromise<()>) {
        // TCP has no connected-but-unbound state to fall back to: disconnecting a
        // connection-oriented socket is indistinguishable from closing it.
        self.close(promise);
    }

    fn close(&self, promise: AnyPromise<()>) {
        *self.inner.state.lock().unwrap_or_else(|p| p.into_inner()) = ChannelState::Draining;
        if let Some(task) = self.inner.read_task.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
        let channel = self.clone();
        self.inner.handle.spawn(async move {
            if let Some(mut write_half) = channel.inner.write_half.lock().await.take() {
                let _ = write_half.shutdown().await;
            }
            channel.fire_inactive_once();
            promise.try_success(());
        });
    }

    fn deregister(&self, promise: AnyPromise<()>) {
        if let Some(pipeline) = self.pipeline() {
            if self.inner.inactive_fired.load(Ordering::Acquire) {
                pipeline.fire_channel_unregistered();
            }
        }
        promise.try_success(());
    }

    fn begin_read(&self) {
        self.inner.readable.store(true, Ordering::Release);
        self.inner.read_gate.notify_waiters();
    }

    fn write(&self, msg: PipelineMessage, promise: AnyPromise<WriteSignal>) {
        let Some(bytes) = msg.as_bytes().cloned() else {
            promise.try_failure(PipelineError::illegal_state(
                "TcpChannel can only write byte payloads",
            ));
            return;
        };
        let channel = self.clone();
        self.inner.handle.spawn(async move {
            let mut guard = channel.inner.write_half.lock().await;
            let Some(write_half) = guard.as_mut() else {
                promise.try_failure(PipelineError::illegal_state(
                    "write called before the channel connected",
                ));
                return;
            };
            match write_half.write_all(&bytes).await {
                Ok(()) => {
                    promise.try_success(WriteSignal::Accepted);
                }
                Err(err) => {
                    promise.try_failure(PipelineError::handler_exception(err));
                }
            }
        });
    }

    fn flush(&self) {
        let channel = self.clone();
        self.inner.handle.spawn(async move {
            let mut guard = channel.inner.write_half.lock().await;
            if let Some(write_half) = guard.as_mut() {
                if let Err(err) = write_half.flush().await {
                    tracing::warn!(error = %err, "flush failed");
                }
            }
        });
    }

    fn closed(&self) -> PipelineFuture<()> {
        self.inner.closed.future()
    }
}
