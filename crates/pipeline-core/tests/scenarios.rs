//! End-to-end scenario tests S1-S6, matching the literal scenarios named in §8.
//!
//! Grounded in the teacher workspace's `spark-transport-udp/tests/tck.rs` shape: one
//! `#[tokio::test]` per named scenario, each a thin setup-then-assert body with the heavy
//! lifting done by `pipeline-core` itself.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pipeline_core::buffer::PipelineMessage;
use pipeline_core::future::{AnyPromise, Promise};
use pipeline_core::pipeline::{
    AnyHandler, Channel, ChannelState, Context, HandlerCapabilities, HandlerLifecycle,
    InboundHandler, OutboundHandler, Pipeline, WriteSignal,
};
use pipeline_core::runtime::{
    DedicatedThreadExecutor, ExecutorGroup, ImmediateExecutor, SerialExecutor,
};
use pipeline_core::{AttributeKey, PipelineError};

struct RecordingChannel {
    writes: Mutex<Vec<String>>,
}

impl RecordingChannel {
    fn new() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
        }
    }
}

impl Channel for RecordingChannel {
    fn state(&self) -> ChannelState {
        ChannelState::Active
    }
    fn is_writable(&self) -> bool {
        true
    }
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
    fn bind(&self, _local: SocketAddr, promise: AnyPromise<()>) {
        promise.try_success(());
    }
    fn connect(&self, _remote: SocketAddr, _local: Option<SocketAddr>, promise: AnyPromise<()>) {
        promise.try_success(());
    }
    fn disconnect(&self, promise: AnyPromise<()>) {
        promise.try_success(());
    }
    fn close(&self, promise: AnyPromise<()>) {
        promise.try_success(());
    }
    fn deregister(&self, promise: AnyPromise<()>) {
        promise.try_success(());
    }
    fn begin_read(&self) {}
    fn write(&self, msg: PipelineMessage, promise: AnyPromise<WriteSignal>) {
        if let Some(bytes) = msg.as_bytes() {
            self.writes
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(bytes).into_owned());
        }
        promise.try_success(WriteSignal::AcceptedAndFlushed);
    }
    fn flush(&self) {}
    fn closed(&self) -> pipeline_core::future::PipelineFuture<()> {
        pipeline_core::future::PipelineFuture::ready(Arc::new(ImmediateExecutor), ())
    }
}

fn pipeline_with(channel: Arc<RecordingChannel>) -> Pipeline {
    Pipeline::new("scenario-pipeline", channel, Arc::new(ImmediateExecutor))
}

struct LoggingInbound {
    tag: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}
impl HandlerLifecycle for LoggingInbound {
    fn capabilities(&self) -> HandlerCapabilities {
        HandlerCapabilities::CHANNEL_READ
    }
}
impl InboundHandler for LoggingInbound {
    fn channel_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        let payload = msg.as_bytes().map(|b| String::from_utf8_lossy(b).into_owned());
        self.log
            .lock()
            .unwrap()
            .push(format!("{}.channel_read({:?})", self.tag, payload));
        ctx.fire_channel_read(msg);
    }
}

struct LoggingOutbound {
    tag: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}
impl HandlerLifecycle for LoggingOutbound {
    fn capabilities(&self) -> HandlerCapabilities {
        HandlerCapabilities::WRITE
    }
}
impl OutboundHandler for LoggingOutbound {
    fn write(&self, ctx: &dyn Context, msg: PipelineMessage, promise: AnyPromise<WriteSignal>) {
        self.log.lock().unwrap().push(format!("{}.write called", self.tag));
        ctx.write(msg, promise);
    }
}

/// S1: pipeline [A-in, B-in, C-out]; fire channel_read("x"). A then B run; tail discards
/// since nothing consumes it; C (outbound-only) is never reached by an inbound event.
#[tokio::test]
async fn s1_inbound_traversal_skips_outbound_only_handler() {
    let channel = Arc::new(RecordingChannel::new());
    let pipeline = pipeline_with(channel);
    let log = Arc::new(Mutex::new(Vec::new()));

    pipeline
        .add_last("A", AnyHandler::inbound(LoggingInbound { tag: "A", log: log.clone() }))
        .unwrap();
    pipeline
        .add_last("B", AnyHandler::inbound(LoggingInbound { tag: "B", log: log.clone() }))
        .unwrap();
    pipeline
        .add_last("C", AnyHandler::outbound(LoggingOutbound { tag: "C", log: log.clone() }))
        .unwrap();

    pipeline.fire_channel_read(PipelineMessage::from_bytes(&b"x"[..]));

    let observed = log.lock().unwrap().clone();
    assert_eq!(
        observed,
        vec![
            "A.channel_read(Some(\"x\"))".to_string(),
            "B.channel_read(Some(\"x\"))".to_string(),
        ]
    );
}

struct DuplexB {
    log: Arc<Mutex<Vec<String>>>,
}
impl HandlerLifecycle for DuplexB {
    fn capabilities(&self) -> HandlerCapabilities {
        HandlerCapabilities::CHANNEL_READ.union(HandlerCapabilities::WRITE)
    }
}
impl InboundHandler for DuplexB {
    fn channel_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        ctx.fire_channel_read(msg);
    }
}
impl OutboundHandler for DuplexB {
    fn write(&self, ctx: &dyn Context, msg: PipelineMessage, promise: AnyPromise<WriteSignal>) {
        let payload = msg.as_bytes().map(|b| String::from_utf8_lossy(b).into_owned());
        self.log.lock().unwrap().push(format!("B.write({payload:?})"));
        ctx.write(msg, promise);
    }
}

/// S2: pipeline [A-in, B-dup]; write("y") originating from B's own context. B.write runs,
/// forwards to the head, the head writes to the transport, and the promise completes
/// successfully once the transport acks.
#[tokio::test]
async fn s2_write_from_a_contexts_own_handler_reaches_transport() {
    let channel = Arc::new(RecordingChannel::new());
    let pipeline = pipeline_with(channel.clone());
    let log = Arc::new(Mutex::new(Vec::new()));

    pipeline
        .add_last("A", AnyHandler::inbound(LoggingInbound { tag: "A", log: log.clone() }))
        .unwrap();
    pipeline
        .add_last("B", AnyHandler::duplex(DuplexB { log: log.clone() }))
        .unwrap();

    let promise = Promise::new(Arc::new(ImmediateExecutor));
    let future = promise.future();
    pipeline.write(PipelineMessage::from_bytes(&b"y"[..]), AnyPromise::Tracked(promise));

    assert_eq!(log.lock().unwrap().clone(), vec!["B.write(Some(\"y\"))".to_string()]);
    assert_eq!(channel.writes.lock().unwrap().clone(), vec!["y".to_string()]);
    assert!(future.is_success());
}

struct ThrowingInbound;
impl HandlerLifecycle for ThrowingInbound {
    fn capabilities(&self) -> HandlerCapabilities {
        HandlerCapabilities::CHANNEL_READ
    }
}
impl InboundHandler for ThrowingInbound {
    fn channel_read(&self, _ctx: &dyn Context, _msg: PipelineMessage) {
        panic!("H1 raised");
    }
}

struct ObservingH2 {
    read_calls: Arc<AtomicUsize>,
    caught: Arc<Mutex<Option<String>>>,
}
impl HandlerLifecycle for ObservingH2 {
    fn capabilities(&self) -> HandlerCapabilities {
        HandlerCapabilities::CHANNEL_READ.union(HandlerCapabilities::EXCEPTION_CAUGHT)
    }
}
impl InboundHandler for ObservingH2 {
    fn channel_read(&self, _ctx: &dyn Context, _msg: PipelineMessage) {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
    }
    fn exception_caught(&self, _ctx: &dyn Context, cause: PipelineError) {
        *self.caught.lock().unwrap() = Some(cause.to_string());
    }
}

/// S3: H1 throws in channel_read; [H1-in, H2-in] fired with a read. H2.channel_read is
/// never reached with the original message; H2.exception_caught receives the raised cause.
#[tokio::test]
async fn s3_panicking_handler_surfaces_to_next_contexts_exception_caught() {
    let channel = Arc::new(RecordingChannel::new());
    let pipeline = pipeline_with(channel);
    let read_calls = Arc::new(AtomicUsize::new(0));
    let caught = Arc::new(Mutex::new(None));

    pipeline.add_last("H1", AnyHandler::inbound(ThrowingInbound)).unwrap();
    pipeline
        .add_last(
            "H2",
            AnyHandler::inbound(ObservingH2 {
                read_calls: read_calls.clone(),
                caught: caught.clone(),
            }),
        )
        .unwrap();

    pipeline.fire_channel_read(PipelineMessage::from_bytes(&b"x"[..]));

    assert_eq!(read_calls.load(Ordering::SeqCst), 0, "H2.channel_read must not run with the message");
    assert!(caught.lock().unwrap().is_some(), "H2.exception_caught must observe the raised cause");
}

struct ExecutorTaggingHandler {
    tag: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}
impl HandlerLifecycle for ExecutorTaggingHandler {
    fn capabilities(&self) -> HandlerCapabilities {
        HandlerCapabilities::CHANNEL_READ
    }
}
impl InboundHandler for ExecutorTaggingHandler {
    fn channel_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        let payload = msg.as_bytes().map(|b| String::from_utf8_lossy(b).into_owned());
        self.log.lock().unwrap().push(format!(
            "{}.channel_read({:?}) on {}",
            self.tag,
            payload,
            ctx.executor().name()
        ));
        ctx.fire_channel_read(msg);
    }
}

/// S4: a handler X pinned to a dedicated executor sits between two reactor-bound handlers
/// L and R; firing two reads preserves per-handler ordering on each side of the executor
/// boundary, and X/R observe the hand-off onto X's executor.
#[tokio::test]
async fn s4_executor_pinned_handler_preserves_ordering_across_the_boundary() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let reactor = Arc::new(ImmediateExecutor);
    let group = ExecutorGroup::dedicated("group2", 1);
    let group_executor = group.next();

    let pipeline = Pipeline::new("s4-pipeline", Arc::new(RecordingChannel::new()), reactor.clone());
    let _ = pipeline.add_last(
        "L",
        AnyHandler::inbound(ExecutorTaggingHandler { tag: "L", log: log.clone() }),
    );
    let _ = pipeline.add_last_with_executor(
        "X",
        AnyHandler::inbound(ExecutorTaggingHandler { tag: "X", log: log.clone() }),
        group_executor,
    );
    let _ = pipeline.add_last(
        "R",
        AnyHandler::inbound(ExecutorTaggingHandler { tag: "R", log: log.clone() }),
    );

    pipeline.fire_channel_read(PipelineMessage::from_bytes(&b"m1"[..]));
    pipeline.fire_channel_read(PipelineMessage::from_bytes(&b"m2"[..]));

    // Give the dedicated executor a moment to drain its queue.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let observed = log.lock().unwrap().clone();
    let l_calls: Vec<_> = observed.iter().filter(|e| e.starts_with("L.")).cloned().collect();
    let x_calls: Vec<_> = observed.iter().filter(|e| e.starts_with("X.")).cloned().collect();
    let r_calls: Vec<_> = observed.iter().filter(|e| e.starts_with("R.")).cloned().collect();

    assert_eq!(l_calls.len(), 2, "L must see both reads on the reactor");
    assert_eq!(x_calls.len(), 2, "X must see both reads on its own group executor");
    assert_eq!(r_calls.len(), 2, "R follows on X's executor");
    assert!(l_calls[0].contains("m1") && l_calls[1].contains("m2"), "L ordering preserved");
    assert!(x_calls[0].contains("m1") && x_calls[1].contains("m2"), "X ordering preserved");
    assert!(x_calls.iter().all(|e| e.contains("group2")), "X runs on the group executor");
}

/// S5: await(100ms) on a pending future from a non-reactor thread returns false (timed out,
/// still pending); from the reactor thread itself it raises DeadlockDetected immediately.
#[tokio::test]
async fn s5_timed_await_behaves_differently_on_and_off_the_reactor_thread() {
    let reactor = Arc::new(DedicatedThreadExecutor::spawn("s5-reactor"));
    let promise: Promise<u32> = Promise::new(reactor.clone());
    let future = promise.future();

    let off_reactor = future.clone();
    let off_reactor_result = tokio::task::spawn_blocking(move || {
        off_reactor.await_timeout(Duration::from_millis(100))
    })
    .await
    .unwrap()
    .unwrap();
    assert!(!off_reactor_result, "await_timeout from a non-reactor thread must time out, not complete");
    assert!(!future.is_done());

    let on_reactor_future = future.clone();
    let (tx, rx) = std::sync::mpsc::channel();
    reactor.execute(Box::new(move || {
        let result = on_reactor_future.await_timeout(Duration::from_millis(100));
        tx.send(result).unwrap();
    }));
    let result = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(matches!(result, Err(PipelineError::DeadlockDetected)));
}

struct NonShareableMarker;
impl HandlerLifecycle for NonShareableMarker {}
impl InboundHandler for NonShareableMarker {}

struct ShareableCounter;
impl HandlerLifecycle for ShareableCounter {
    fn is_shareable(&self) -> bool {
        true
    }
}
impl InboundHandler for ShareableCounter {
    fn channel_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        static COUNTS: AttributeKey<u32> = AttributeKey::new("s6-shareable-counter");
        let cell = ctx.attributes().attr(&COUNTS);
        let next = cell.get().unwrap_or(0) + 1;
        cell.set(next);
        ctx.fire_channel_read(msg);
    }
}

/// S6: a non-shareable handler instance added to two pipelines raises IllegalState on the
/// second addition; a shareable instance succeeds and maintains independent per-context
/// state via attribute keys.
#[tokio::test]
async fn s6_shareable_invariant_is_enforced_across_pipelines() {
    let handler = Arc::new(NonShareableMarker);
    let pipeline_a = pipeline_with(Arc::new(RecordingChannel::new()));
    let pipeline_b = pipeline_with(Arc::new(RecordingChannel::new()));

    pipeline_a.add_last("shared", AnyHandler::Inbound(handler.clone())).unwrap();
    let err = pipeline_b.add_last("shared", AnyHandler::Inbound(handler)).unwrap_err();
    assert!(matches!(err, PipelineError::IllegalState { .. }));

    let shareable = Arc::new(ShareableCounter);
    let pipeline_c = pipeline_with(Arc::new(RecordingChannel::new()));
    let pipeline_d = pipeline_with(Arc::new(RecordingChannel::new()));
    pipeline_c
        .add_last("counter", AnyHandler::Inbound(shareable.clone()))
        .unwrap();
    pipeline_d
        .add_last("counter", AnyHandler::Inbound(shareable))
        .unwrap();

    pipeline_c.fire_channel_read(PipelineMessage::from_bytes(&b"x"[..]));
    pipeline_c.fire_channel_read(PipelineMessage::from_bytes(&b"x"[..]));
    pipeline_d.fire_channel_read(PipelineMessage::from_bytes(&b"x"[..]));

    static COUNTS: AttributeKey<u32> = AttributeKey::new("s6-shareable-counter");
    assert_eq!(
        pipeline_c.attributes().attr(&COUNTS).get(),
        Some(2),
        "pipeline C's context accumulated its own count"
    );
    assert_eq!(
        pipeline_d.attributes().attr(&COUNTS).get(),
        Some(1),
        "pipeline D's context started from zero, independent of pipeline C"
    );
}
