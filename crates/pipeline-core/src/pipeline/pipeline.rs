//! The handler chain itself (C4): an arena of contexts, spliced and traversed.
//!
//! Grounded in the teacher workspace's `HotSwapPipeline`/`PipelineHandleId` design — generation
//! stamped handles, read-copy-update mutation, `HandlerEpochBuffer`-backed hot-swap snapshot —
//! generalized from the teacher's split inbound/outbound handle-id encoding to a single
//! `ContextId` arena holding duplex-capable slots, per the REDESIGN FLAG calling for
//! generation-stamped handles over the original's array-index "channel handler context" model.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use crate::attributes::AttributeMap;
use crate::buffer::{PipelineMessage, UserEvent};
use crate::error::{PipelineError, Result};
use crate::future::AnyPromise;
use crate::runtime::{SerialExecutor, execute_inline_or_submit};
use crate::sealed::Sealed;

use super::channel::{Channel, WriteSignal};
use super::context::Context;
use super::default_handlers;
use super::handler::{HandlerCapabilities, InboundHandler, OutboundHandler};
use super::internal::HandlerEpochBuffer;

/// A generation-stamped reference to one slot in a pipeline's context arena. Stale handles
/// (from a context already removed) are detected rather than silently aliasing a reused slot,
/// per the REDESIGN FLAG preferring this over the original's raw positional handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextId {
    index: u64,
    generation: u64,
}

/// Either or both of the directional handler traits for one context, stored as however many
/// trait-object facets the handler actually implements. Built via [`AnyHandler::inbound`],
/// [`AnyHandler::outbound`], or [`AnyHandler::duplex`].
pub enum AnyHandler {
    Inbound(Arc<dyn InboundHandler>),
    Outbound(Arc<dyn OutboundHandler>),
    Duplex(Arc<dyn InboundHandler>, Arc<dyn OutboundHandler>),
}

impl AnyHandler {
    pub fn inbound<H: InboundHandler + 'static>(handler: H) -> Self {
        Self::Inbound(Arc::new(handler))
    }

    pub fn outbound<H: OutboundHandler + 'static>(handler: H) -> Self {
        Self::Outbound(Arc::new(handler))
    }

    pub fn duplex<H: InboundHandler + OutboundHandler + 'static>(handler: H) -> Self {
        let shared = Arc::new(handler);
        Self::Duplex(shared.clone(), shared)
    }

    fn inbound_facet(&self) -> Option<&Arc<dyn InboundHandler>> {
        match self {
            Self::Inbound(h) | Self::Duplex(h, _) => Some(h),
            Self::Outbound(_) => None,
        }
    }

    fn outbound_facet(&self) -> Option<&Arc<dyn OutboundHandler>> {
        match self {
            Self::Outbound(h) | Self::Duplex(_, h) => Some(h),
            Self::Inbound(_) => None,
        }
    }

    fn capabilities(&self) -> HandlerCapabilities {
        match self {
            Self::Inbound(h) => h.capabilities(),
            Self::Outbound(h) => h.capabilities(),
            Self::Duplex(h, _) => h.capabilities(),
        }
    }

    /// Declares whether the underlying handler instance may legally sit in more than one
    /// context at a time (§3's shareable marker).
    fn is_shareable(&self) -> bool {
        match self {
            Self::Inbound(h) => h.is_shareable(),
            Self::Outbound(h) => h.is_shareable(),
            Self::Duplex(h, _) => h.is_shareable(),
        }
    }

    /// A stable identity for the underlying handler allocation, used only to enforce "a
    /// non-shareable handler appears in at most one context" — not exposed outside this
    /// module. `Inbound`/`Outbound`/`Duplex` all read the data pointer off whichever facet is
    /// present; for `Duplex` both facets were cloned from the same `Arc` at construction
    /// (see [`AnyHandler::duplex`]), so reading either gives the same address.
    fn identity(&self) -> usize {
        match self {
            Self::Inbound(h) => Arc::as_ptr(h) as *const () as usize,
            Self::Outbound(h) => Arc::as_ptr(h) as *const () as usize,
            Self::Duplex(h, _) => Arc::as_ptr(h) as *const () as usize,
        }
    }

    fn call_added(&self, ctx: &dyn Context) {
        match self {
            Self::Inbound(h) => h.handler_added(ctx),
            Self::Outbound(h) => h.handler_added(ctx),
            Self::Duplex(h, _) => h.handler_added(ctx),
        }
    }

    fn call_removed(&self, ctx: &dyn Context) {
        match self {
            Self::Inbound(h) => h.handler_removed(ctx),
            Self::Outbound(h) => h.handler_removed(ctx),
            Self::Duplex(h, _) => h.handler_removed(ctx),
        }
    }
}

/// Process-wide registry of non-shareable handlers currently attached to some context, keyed
/// by [`AnyHandler::identity`]. §3 scopes the "at most one context" invariant across every
/// pipeline in the process, not just the one doing the mutating, so this can't live on
/// `PipelineInner` — it has to be global. Entries are claimed on splice and released on
/// removal (including the removal half of a failed `handler_added` rollback), so a handler's
/// address becomes reusable the moment it actually leaves the chain.
static NON_SHAREABLE_REGISTRY: OnceLock<std::sync::Mutex<HashSet<usize>>> = OnceLock::new();

fn non_shareable_registry() -> &'static std::sync::Mutex<HashSet<usize>> {
    NON_SHAREABLE_REGISTRY.get_or_init(|| std::sync::Mutex::new(HashSet::new()))
}

fn try_claim_non_shareable(identity: usize) -> bool {
    non_shareable_registry()
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .insert(identity)
}

fn release_non_shareable(identity: usize) {
    non_shareable_registry()
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .remove(&identity);
}

struct Slot {
    id: ContextId,
    name: String,
    handler: AnyHandler,
    capabilities: HandlerCapabilities,
    executor: Arc<dyn SerialExecutor>,
}

struct PipelineInner {
    chain: HandlerEpochBuffer<Slot>,
    names: RwLock<HashMap<String, ContextId>>,
    mutation_lock: std::sync::Mutex<()>,
    next_index: AtomicU64,
    next_generation: AtomicU64,
    channel: Arc<dyn Channel>,
    default_executor: Arc<dyn SerialExecutor>,
    attributes: AttributeMap,
    pipeline_name: String,
}

/// The pipeline itself: ownership root for the context arena, the channel it fronts, and the
/// pipeline-wide attribute map.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    pub fn new(
        name: impl Into<String>,
        channel: Arc<dyn Channel>,
        default_executor: Arc<dyn SerialExecutor>,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                chain: HandlerEpochBuffer::new(),
                names: RwLock::new(HashMap::new()),
                mutation_lock: std::sync::Mutex::new(()),
                next_index: AtomicU64::new(0),
                next_generation: AtomicU64::new(0),
                channel,
                default_executor,
                attributes: AttributeMap::new(),
                pipeline_name: name.into(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.pipeline_name
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.inner.attributes
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.inner.channel
    }

    pub fn epoch(&self) -> u64 {
        self.inner.chain.epoch()
    }

    /// Current handler names, in pipeline order (front to back).
    pub fn names(&self) -> Vec<String> {
        self.inner
            .chain
            .load()
            .iter()
            .map(|slot| slot.name.clone())
            .collect()
    }

    /// A snapshot of the chain as `name -> ContextId`, for introspection.
    pub fn to_map(&self) -> HashMap<String, ContextId> {
        self.inner
            .chain
            .load()
            .iter()
            .map(|slot| (slot.name.clone(), slot.id))
            .collect()
    }

    pub fn context_id(&self, name: &str) -> Option<ContextId> {
        self.inner
            .names
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .copied()
    }

    // -- mutation --

    pub fn add_first(&self, name: impl Into<String>, handler: AnyHandler) -> Result<ContextId> {
        self.splice(name.into(), handler, SplicePosition::First, None)
    }

    /// As [`add_first`](Self::add_first), but pins the new context to `executor` instead of
    /// the pipeline's default — e.g. a member drawn from an [`ExecutorGroup`](crate::runtime::ExecutorGroup).
    pub fn add_first_with_executor(
        &self,
        name: impl Into<String>,
        handler: AnyHandler,
        executor: Arc<dyn SerialExecutor>,
    ) -> Result<ContextId> {
        self.splice(name.into(), handler, SplicePosition::First, Some(executor))
    }

    pub fn add_last(&self, name: impl Into<String>, handler: AnyHandler) -> Result<ContextId> {
        self.splice(name.into(), handler, SplicePosition::Last, None)
    }

    pub fn add_last_with_executor(
        &self,
        name: impl Into<String>,
        handler: AnyHandler,
        executor: Arc<dyn SerialExecutor>,
    ) -> Result<ContextId> {
        self.splice(name.into(), handler, SplicePosition::Last, Some(executor))
    }

    pub fn add_before(
        &self,
        anchor: &str,
        name: impl Into<String>,
        handler: AnyHandler,
    ) -> Result<ContextId> {
        self.splice(
            name.into(),
            handler,
            SplicePosition::Before(anchor.to_string()),
            None,
        )
    }

    pub fn add_before_with_executor(
        &self,
        anchor: &str,
        name: impl Into<String>,
        handler: AnyHandler,
        executor: Arc<dyn SerialExecutor>,
    ) -> Result<ContextId> {
        self.splice(
            name.into(),
            handler,
            SplicePosition::Before(anchor.to_string()),
            Some(executor),
        )
    }

    pub fn add_after(
        &self,
        anchor: &str,
        name: impl Into<String>,
        handler: AnyHandler,
    ) -> Result<ContextId> {
        self.splice(
            name.into(),
            handler,
            SplicePosition::After(anchor.to_string()),
            None,
        )
    }

    pub fn add_after_with_executor(
        &self,
        anchor: &str,
        name: impl Into<String>,
        handler: AnyHandler,
        executor: Arc<dyn SerialExecutor>,
    ) -> Result<ContextId> {
        self.splice(
            name.into(),
            handler,
            SplicePosition::After(anchor.to_string()),
            Some(executor),
        )
    }

    fn splice(
        &self,
        name: String,
        handler: AnyHandler,
        position: SplicePosition,
        executor: Option<Arc<dyn SerialExecutor>>,
    ) -> Result<ContextId> {
        let _guard = self
            .inner
            .mutation_lock
            .lock()
            .unwrap_or_else(|p| p.into_inner());

        {
            let names = self.inner.names.read().unwrap_or_else(|p| p.into_inner());
            if names.contains_key(&name) {
                return Err(PipelineError::duplicate_name(name));
            }
        }

        let current = self.inner.chain.load();
        let insert_at = match &position {
            SplicePosition::First => 0,
            SplicePosition::Last => current.len(),
            SplicePosition::Before(anchor) => current
                .iter()
                .position(|s| &s.name == anchor)
                .ok_or_else(|| PipelineError::not_found(anchor.clone()))?,
            SplicePosition::After(anchor) => {
                current
                    .iter()
                    .position(|s| &s.name == anchor)
                    .ok_or_else(|| PipelineError::not_found(anchor.clone()))?
                    + 1
            }
        };

        self.insert_locked(name, handler, &current, insert_at, executor)
    }

    /// Inserts `handler` at `insert_at` in `current` and runs `handler_added`. Assumes the
    /// caller already holds `mutation_lock` — shared by `splice` (fresh insertion) and
    /// `replace` (reinsertion at the replaced handler's old index).
    fn insert_locked(
        &self,
        name: String,
        handler: AnyHandler,
        current: &Arc<Vec<Arc<Slot>>>,
        insert_at: usize,
        executor: Option<Arc<dyn SerialExecutor>>,
    ) -> Result<ContextId> {
        let shareable = handler.is_shareable();
        let identity = handler.identity();
        if !shareable && !try_claim_non_shareable(identity) {
            return Err(PipelineError::illegal_state(format!(
                "handler {name:?} is not shareable and is already attached to a context"
            )));
        }

        let index = self.inner.next_index.fetch_add(1, Ordering::Relaxed);
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let id = ContextId { index, generation };
        let capabilities = handler.capabilities();
        let slot = Arc::new(Slot {
            id,
            name: name.clone(),
            handler,
            capabilities,
            executor: executor.unwrap_or_else(|| Arc::clone(&self.inner.default_executor)),
        });

        let mut next: Vec<Arc<Slot>> = Vec::with_capacity(current.len() + 1);
        next.extend(current[..insert_at].iter().cloned());
        next.push(Arc::clone(&slot));
        next.extend(current[insert_at..].iter().cloned());
        let next = Arc::new(next);

        self.inner.chain.store(Arc::clone(&next));
        self.inner
            .names
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name, id);
        self.inner.chain.bump_epoch();

        // handler_added runs synchronously on the mutation caller's thread rather than being
        // routed through the new context's own executor: the pipeline must guarantee no other
        // event reaches this context before handler_added completes, and running it before
        // add_first/add_last/... ever returns is the simplest way to uphold that without also
        // having to buffer events for a context that technically exists but hasn't finished
        // attaching.
        let position_in_snapshot = next
            .iter()
            .position(|s| s.id == id)
            .expect("just-inserted slot must be present in the snapshot we just stored");
        let ctx = ContextHandle {
            inner: Arc::clone(&self.inner),
            snapshot: Arc::clone(&next),
            position: position_in_snapshot,
        };

        match panic::catch_unwind(AssertUnwindSafe(|| slot.handler.call_added(&ctx))) {
            Ok(()) => Ok(id),
            Err(payload) => {
                let (after_removal, removed) = self.detach_locked(&next, position_in_snapshot);
                let removed_position = position_in_snapshot.min(after_removal.len());
                let removed_ctx = ContextHandle {
                    inner: Arc::clone(&self.inner),
                    snapshot: after_removal,
                    position: removed_position,
                };
                run_handler_removed(&removed_ctx, &removed);
                let cause =
                    PipelineError::handler_exception(HandlerPanic::capture(&removed.name, payload));
                self.fire_exception_caught(cause.clone());
                Err(cause)
            }
        }
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let _guard = self
            .inner
            .mutation_lock
            .lock()
            .unwrap_or_else(|p| p.into_inner());

        let current = self.inner.chain.load();
        let idx = current
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| PipelineError::not_found(name.to_string()))?;

        let (next, removed) = self.detach_locked(&current, idx);
        let position = idx.min(next.len());
        let ctx = ContextHandle {
            inner: Arc::clone(&self.inner),
            snapshot: next,
            position,
        };
        run_handler_removed(&ctx, &removed);

        Ok(())
    }

    /// Removes the slot at `idx` of `current`, updating the chain, the name index, the epoch,
    /// and (for a non-shareable handler) releasing its claim in the shareable registry.
    /// Assumes the caller already holds `mutation_lock`. Returns the post-removal snapshot and
    /// the detached slot; the caller is responsible for running `handler_removed`.
    fn detach_locked(
        &self,
        current: &Arc<Vec<Arc<Slot>>>,
        idx: usize,
    ) -> (Arc<Vec<Arc<Slot>>>, Arc<Slot>) {
        let removed = Arc::clone(&current[idx]);
        let mut next: Vec<Arc<Slot>> = Vec::with_capacity(current.len() - 1);
        next.extend(current[..idx].iter().cloned());
        next.extend(current[idx + 1..].iter().cloned());
        let next = Arc::new(next);

        self.inner.chain.store(Arc::clone(&next));
        self.inner
            .names
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&removed.name);
        self.inner.chain.bump_epoch();

        if !removed.handler.is_shareable() {
            release_non_shareable(removed.handler.identity());
        }

        (next, removed)
    }

    /// Replaces the handler registered under `name` with `handler`, preserving its position in
    /// the chain (§4.4) rather than moving it to the tail. Reuses the replaced context's
    /// executor for the new one unless a future `_with_executor` variant is needed.
    pub fn replace(&self, name: &str, handler: AnyHandler) -> Result<ContextId> {
        let _guard = self
            .inner
            .mutation_lock
            .lock()
            .unwrap_or_else(|p| p.into_inner());

        let current = self.inner.chain.load();
        let idx = current
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| PipelineError::not_found(name.to_string()))?;

        let (next, old_slot) = self.detach_locked(&current, idx);
        let removed_position = idx.min(next.len());
        let removed_ctx = ContextHandle {
            inner: Arc::clone(&self.inner),
            snapshot: Arc::clone(&next),
            position: removed_position,
        };
        run_handler_removed(&removed_ctx, &old_slot);

        self.insert_locked(
            name.to_string(),
            handler,
            &next,
            idx,
            Some(Arc::clone(&old_slot.executor)),
        )
    }

    // -- inbound dispatch entry points (transport-facing) --

    pub fn fire_channel_registered(&self) {
        self.root_context().fire_channel_registered();
    }

    pub fn fire_channel_active(&self) {
        self.root_context().fire_channel_active();
    }

    pub fn fire_channel_read(&self, msg: PipelineMessage) {
        self.root_context().fire_channel_read(msg);
    }

    pub fn fire_channel_read_complete(&self) {
        self.root_context().fire_channel_read_complete();
    }

    pub fn fire_user_event_triggered(&self, evt: UserEvent) {
        self.root_context().fire_user_event_triggered(evt);
    }

    pub fn fire_channel_writability_changed(&self, is_writable: bool) {
        self.root_context()
            .fire_channel_writability_changed(is_writable);
    }

    pub fn fire_exception_caught(&self, cause: PipelineError) {
        self.root_context().fire_exception_caught(cause);
    }

    pub fn fire_channel_inactive(&self) {
        self.root_context().fire_channel_inactive();
    }

    pub fn fire_channel_unregistered(&self) {
        self.root_context().fire_channel_unregistered();
    }

    // -- outbound dispatch entry points (application-facing) --

    pub fn bind(&self, local: SocketAddr, promise: AnyPromise<()>) {
        self.tail_context().bind(local, promise);
    }

    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>, promise: AnyPromise<()>) {
        self.tail_context().connect(remote, local, promise);
    }

    pub fn disconnect(&self, promise: AnyPromise<()>) {
        self.tail_context().disconnect(promise);
    }

    pub fn close(&self, promise: AnyPromise<()>) {
        self.tail_context().close(promise);
    }

    pub fn deregister(&self, promise: AnyPromise<()>) {
        self.tail_context().deregister(promise);
    }

    pub fn read(&self) {
        self.tail_context().read();
    }

    pub fn write(&self, msg: PipelineMessage, promise: AnyPromise<WriteSignal>) {
        self.tail_context().write(msg, promise);
    }

    pub fn flush(&self) {
        self.tail_context().flush();
    }

    pub fn write_and_flush(&self, msg: PipelineMessage, promise: AnyPromise<WriteSignal>) {
        self.tail_context().write_and_flush(msg, promise);
    }

    /// A context handle pinned just before the first slot, for starting inbound traversal.
    fn root_context(&self) -> ContextHandle {
        let snapshot = self.inner.chain.load();
        ContextHandle {
            inner: Arc::clone(&self.inner),
            snapshot,
            position: VIRTUAL_HEAD,
        }
    }

    /// A context handle pinned just past the last slot, for starting outbound traversal.
    fn tail_context(&self) -> ContextHandle {
        let snapshot = self.inner.chain.load();
        let position = snapshot.len();
        ContextHandle {
            inner: Arc::clone(&self.inner),
            snapshot,
            position,
        }
    }
}

const VIRTUAL_HEAD: usize = usize::MAX;

/// Runs `handler_removed`, logging and swallowing a panic rather than letting it propagate —
/// mirroring §7's "errors in handler_removed are logged and swallowed".
fn run_handler_removed(ctx: &ContextHandle, removed: &Arc<Slot>) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| removed.handler.call_removed(ctx)));
    if outcome.is_err() {
        tracing::warn!(
            pipeline = %ctx.inner.pipeline_name,
            handler = %removed.name,
            "handler_removed panicked; logged and swallowed"
        );
    }
}

/// Runs one inbound hop on `executor` (inline if already there, submitted otherwise) and
/// converts a panic inside `call` into an `exception_caught` event starting at this hop's
/// next context, per §4.3's exception-handling contract — rather than letting the unwind
/// cross the executor boundary and take down whatever thread was running it.
fn dispatch_inbound(
    executor: &dyn SerialExecutor,
    ctx: ContextHandle,
    call: impl FnOnce(&ContextHandle) + Send + 'static,
) {
    let context_name = ctx.name().to_string();
    execute_inline_or_submit(executor, move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| call(&ctx)));
        if let Err(payload) = outcome {
            let cause = PipelineError::handler_exception(HandlerPanic::capture(&context_name, payload));
            ctx.fire_exception_caught(cause);
        }
    });
}

/// Runs one outbound hop on `executor`. Unlike [`dispatch_inbound`], a panic here is logged
/// and swallowed rather than turned into an `exception_caught` event: the promise the handler
/// was given has already been moved into the panicking call by the time it unwinds, so there
/// is nothing left to fail on the caller's behalf beyond not hanging it forever.
fn dispatch_outbound(
    executor: &dyn SerialExecutor,
    ctx: ContextHandle,
    call: impl FnOnce(&ContextHandle) + Send + 'static,
) {
    let context_name = ctx.name().to_string();
    execute_inline_or_submit(executor, move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| call(&ctx)));
        if outcome.is_err() {
            tracing::warn!(
                context = %context_name,
                "outbound handler panicked; logged and swallowed"
            );
        }
    });
}

/// A renderable stand-in for a handler panic's payload, the way `error`'s `FlattenedCause`
/// stands in for an already-cloned `PipelineError`.
#[derive(Debug)]
struct HandlerPanic {
    context: String,
    message: String,
}

impl HandlerPanic {
    fn capture(context: &str, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "handler panicked with a non-string payload".to_string());
        Self {
            context: context.to_string(),
            message,
        }
    }
}

impl fmt::Display for HandlerPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler {:?} panicked: {}", self.context, self.message)
    }
}

impl std::error::Error for HandlerPanic {}

/// A transient view over one arena slot (or one of the two virtual anchors), constructed
/// fresh for each hop of a dispatch traversal and pinned to the snapshot that traversal
/// started with — mutating the pipeline mid-dispatch never changes what an in-flight fire
/// call sees.
struct ContextHandle {
    inner: Arc<PipelineInner>,
    snapshot: Arc<Vec<Arc<Slot>>>,
    position: usize,
}

impl Sealed for ContextHandle {}

impl ContextHandle {
    fn slot(&self) -> Option<&Arc<Slot>> {
        if self.position == VIRTUAL_HEAD {
            None
        } else {
            self.snapshot.get(self.position)
        }
    }

    fn next_inbound(&self, bit: HandlerCapabilities) -> Option<(usize, &Arc<Slot>)> {
        let start = if self.position == VIRTUAL_HEAD {
            0
        } else {
            self.position + 1
        };
        self.snapshot[start..]
            .iter()
            .enumerate()
            .find_map(|(offset, slot)| {
                let idx = start + offset;
                if slot.handler.inbound_facet().is_some() && slot.capabilities.contains(bit) {
                    Some((idx, slot))
                } else {
                    None
                }
            })
    }

    fn next_outbound(&self, bit: HandlerCapabilities) -> Option<(usize, &Arc<Slot>)> {
        if self.position == 0 || self.position == VIRTUAL_HEAD && self.snapshot.is_empty() {
            return None;
        }
        let upper = if self.position == VIRTUAL_HEAD {
            self.snapshot.len()
        } else {
            self.position
        };
        self.snapshot[..upper]
            .iter()
            .enumerate()
            .rev()
            .find_map(|(idx, slot)| {
                if slot.handler.outbound_facet().is_some() && slot.capabilities.contains(bit) {
                    Some((idx, slot))
                } else {
                    None
                }
            })
    }

    fn fork(&self, position: usize) -> ContextHandle {
        ContextHandle {
            inner: Arc::clone(&self.inner),
            snapshot: Arc::clone(&self.snapshot),
            position,
        }
    }
}

impl Context for ContextHandle {
    fn name(&self) -> &str {
        self.slot()
            .map(|s| s.name.as_str())
            .unwrap_or(&self.inner.pipeline_name)
    }

    fn capabilities(&self) -> HandlerCapabilities {
        self.slot()
            .map(|s| s.capabilities)
            .unwrap_or_else(HandlerCapabilities::empty)
    }

    fn executor(&self) -> &dyn SerialExecutor {
        self.slot()
            .map(|s| s.executor.as_ref())
            .unwrap_or_else(|| self.inner.default_executor.as_ref())
    }

    fn attributes(&self) -> &AttributeMap {
        &self.inner.attributes
    }

    fn fire_channel_registered(&self) {
        if let Some((idx, slot)) = self.next_inbound(HandlerCapabilities::CHANNEL_REGISTERED) {
            let handler = Arc::clone(
                slot.handler
                    .inbound_facet()
                    .expect("next_inbound only returns slots with an inbound facet"),
            );
            let executor = Arc::clone(&slot.executor);
            let ctx = self.fork(idx);
            dispatch_inbound(executor.as_ref(), ctx, move |ctx| {
                handler.channel_registered(ctx)
            });
        }
    }

    fn fire_channel_active(&self) {
        if let Some((idx, slot)) = self.next_inbound(HandlerCapabilities::CHANNEL_ACTIVE) {
            let handler = Arc::clone(
                slot.handler
                    .inbound_facet()
                    .expect("next_inbound only returns slots with an inbound facet"),
            );
            let executor = Arc::clone(&slot.executor);
            let ctx = self.fork(idx);
            dispatch_inbound(executor.as_ref(), ctx, move |ctx| handler.channel_active(ctx));
        }
    }

    fn fire_channel_read(&self, msg: PipelineMessage) {
        match self.next_inbound(HandlerCapabilities::CHANNEL_READ) {
            Some((idx, slot)) => {
                let handler = Arc::clone(
                    slot.handler
                        .inbound_facet()
                        .expect("next_inbound only returns slots with an inbound facet"),
                );
                let executor = Arc::clone(&slot.executor);
                let ctx = self.fork(idx);
                dispatch_inbound(executor.as_ref(), ctx, move |ctx| {
                    handler.channel_read(ctx, msg)
                });
            }
            None => default_handlers::tail_channel_read(&self.inner.pipeline_name, msg),
        }
    }

    fn fire_channel_read_complete(&self) {
        if let Some((idx, slot)) = self.next_inbound(HandlerCapabilities::CHANNEL_READ_COMPLETE) {
            let handler = Arc::clone(
                slot.handler
                    .inbound_facet()
                    .expect("next_inbound only returns slots with an inbound facet"),
            );
            let executor = Arc::clone(&slot.executor);
            let ctx = self.fork(idx);
            dispatch_inbound(executor.as_ref(), ctx, move |ctx| {
                handler.channel_read_complete(ctx)
            });
        }
    }

    fn fire_user_event_triggered(&self, evt: UserEvent) {
        match self.next_inbound(HandlerCapabilities::USER_EVENT_TRIGGERED) {
            Some((idx, slot)) => {
                let handler = Arc::clone(
                    slot.handler
                        .inbound_facet()
                        .expect("next_inbound only returns slots with an inbound facet"),
                );
                let executor = Arc::clone(&slot.executor);
                let ctx = self.fork(idx);
                dispatch_inbound(executor.as_ref(), ctx, move |ctx| {
                    handler.user_event_triggered(ctx, evt)
                });
            }
            None => default_handlers::tail_user_event_triggered(&self.inner.pipeline_name, evt),
        }
    }

    fn fire_channel_writability_changed(&self, is_writable: bool) {
        if let Some((idx, slot)) = self.next_inbound(HandlerCapabilities::WRITABILITY_CHANGED) {
            let handler = Arc::clone(
                slot.handler
                    .inbound_facet()
                    .expect("next_inbound only returns slots with an inbound facet"),
            );
            let executor = Arc::clone(&slot.executor);
            let ctx = self.fork(idx);
            dispatch_inbound(executor.as_ref(), ctx, move |ctx| {
                handler.channel_writability_changed(ctx, is_writable)
            });
        }
    }

    /// Unlike every other inbound event, a panic raised by `exception_caught` itself is
    /// logged and swallowed rather than re-entering the chain — §7's "failures inside
    /// `exception_caught` itself ... do not re-enter the chain", which also keeps a
    /// perpetually-raising handler from looping forever against its own successors.
    fn fire_exception_caught(&self, cause: PipelineError) {
        match self.next_inbound(HandlerCapabilities::EXCEPTION_CAUGHT) {
            Some((idx, slot)) => {
                let handler = Arc::clone(
                    slot.handler
                        .inbound_facet()
                        .expect("next_inbound only returns slots with an inbound facet"),
                );
                let executor = Arc::clone(&slot.executor);
                let ctx = self.fork(idx);
                let context_name = ctx.name().to_string();
                let pipeline_name = self.inner.pipeline_name.clone();
                execute_inline_or_submit(executor.as_ref(), move || {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        handler.exception_caught(&ctx, cause)
                    }));
                    if outcome.is_err() {
                        tracing::warn!(
                            pipeline = %pipeline_name,
                            context = %context_name,
                            "exception_caught itself panicked; logged and swallowed"
                        );
                    }
                });
            }
            None => default_handlers::tail_exception_caught(&self.inner.pipeline_name, &cause),
        }
    }

    fn fire_channel_inactive(&self) {
        if let Some((idx, slot)) = self.next_inbound(HandlerCapabilities::CHANNEL_INACTIVE) {
            let handler = Arc::clone(
                slot.handler
                    .inbound_facet()
                    .expect("next_inbound only returns slots with an inbound facet"),
            );
            let executor = Arc::clone(&slot.executor);
            let ctx = self.fork(idx);
            dispatch_inbound(executor.as_ref(), ctx, move |ctx| handler.channel_inactive(ctx));
        }
    }

    fn fire_channel_unregistered(&self) {
        if let Some((idx, slot)) = self.next_inbound(HandlerCapabilities::CHANNEL_UNREGISTERED) {
            let handler = Arc::clone(
                slot.handler
                    .inbound_facet()
                    .expect("next_inbound only returns slots with an inbound facet"),
            );
            let executor = Arc::clone(&slot.executor);
            let ctx = self.fork(idx);
            dispatch_inbound(executor.as_ref(), ctx, move |ctx| {
                handler.channel_unregistered(ctx)
            });
        }
    }

    fn bind(&self, local: SocketAddr, promise: AnyPromise<()>) {
        match self.next_outbound(HandlerCapabilities::BIND) {
            Some((idx, slot)) => {
                let handler = Arc::clone(
                    slot.handler
                        .outbound_facet()
                        .expect("next_outbound only returns slots with an outbound facet"),
                );
                let executor = Arc::clone(&slot.executor);
                let ctx = self.fork(idx);
                dispatch_outbound(executor.as_ref(), ctx, move |ctx| {
                    handler.bind(ctx, local, promise)
                });
            }
            None => self.inner.channel.bind(local, promise),
        }
    }

    fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>, promise: AnyPromise<()>) {
        match self.next_outbound(HandlerCapabilities::CONNECT) {
            Some((idx, slot)) => {
                let handler = Arc::clone(
                    slot.handler
                        .outbound_facet()
                        .expect("next_outbound only returns slots with an outbound facet"),
                );
                let executor = Arc::clone(&slot.executor);
                let ctx = self.fork(idx);
                dispatch_outbound(executor.as_ref(), ctx, move |ctx| {
                    handler.connect(ctx, remote, local, promise)
                });
            }
            None => self.inner.channel.connect(remote, local, promise),
        }
    }

    fn disconnect(&self, promise: AnyPromise<()>) {
        match self.next_outbound(HandlerCapabilities::DISCONNECT) {
            Some((idx, slot)) => {
                let handler = Arc::clone(
                    slot.handler
                        .outbound_facet()
                        .expect("next_outbound only returns slots with an outbound facet"),
                );
                let executor = Arc::clone(&slot.executor);
                let ctx = self.fork(idx);
                dispatch_outbound(executor.as_ref(), ctx, move |ctx| {
                    handler.disconnect(ctx, promise)
                });
            }
            None => self.inner.channel.disconnect(promise),
        }
    }

    fn close(&self, promise: AnyPromise<()>) {
        match self.next_outbound(HandlerCapabilities::CLOSE) {
            Some((idx, slot)) => {
                let handler = Arc::clone(
                    slot.handler
                        .outbound_facet()
                        .expect("next_outbound only returns slots with an outbound facet"),
                );
                let executor = Arc::clone(&slot.executor);
                let ctx = self.fork(idx);
                dispatch_outbound(executor.as_ref(), ctx, move |ctx| handler.close(ctx, promise));
            }
            None => self.inner.channel.close(promise),
        }
    }

    fn deregister(&self, promise: AnyPromise<()>) {
        match self.next_outbound(HandlerCapabilities::DEREGISTER) {
            Some((idx, slot)) => {
                let handler = Arc::clone(
                    slot.handler
                        .outbound_facet()
                        .expect("next_outbound only returns slots with an outbound facet"),
                );
                let executor = Arc::clone(&slot.executor);
                let ctx = self.fork(idx);
                dispatch_outbound(executor.as_ref(), ctx, move |ctx| {
                    handler.deregister(ctx, promise)
                });
            }
            None => self.inner.channel.deregister(promise),
        }
    }

    fn read(&self) {
        match self.next_outbound(HandlerCapabilities::READ) {
            Some((idx, slot)) => {
                let handler = Arc::clone(
                    slot.handler
                        .outbound_facet()
                        .expect("next_outbound only returns slots with an outbound facet"),
                );
                let executor = Arc::clone(&slot.executor);
                let ctx = self.fork(idx);
                dispatch_outbound(executor.as_ref(), ctx, move |ctx| handler.read(ctx));
            }
            None => self.inner.channel.begin_read(),
        }
    }

    fn write(&self, msg: PipelineMessage, promise: AnyPromise<WriteSignal>) {
        match self.next_outbound(HandlerCapabilities::WRITE) {
            Some((idx, slot)) => {
                let handler = Arc::clone(
                    slot.handler
                        .outbound_facet()
                        .expect("next_outbound only returns slots with an outbound facet"),
                );
                let executor = Arc::clone(&slot.executor);
                let ctx = self.fork(idx);
                dispatch_outbound(executor.as_ref(), ctx, move |ctx| {
                    handler.write(ctx, msg, promise)
                });
            }
            None => self.inner.channel.write(msg, promise),
        }
    }

    fn flush(&self) {
        match self.next_outbound(HandlerCapabilities::FLUSH) {
            Some((idx, slot)) => {
                let handler = Arc::clone(
                    slot.handler
                        .outbound_facet()
                        .expect("next_outbound only returns slots with an outbound facet"),
                );
                let executor = Arc::clone(&slot.executor);
                let ctx = self.fork(idx);
                dispatch_outbound(executor.as_ref(), ctx, move |ctx| handler.flush(ctx));
            }
            None => self.inner.channel.flush(),
        }
    }

    fn write_and_flush(&self, msg: PipelineMessage, promise: AnyPromise<WriteSignal>) {
        match self.next_outbound(HandlerCapabilities::WRITE_AND_FLUSH) {
            Some((idx, slot)) => {
                let handler = Arc::clone(
                    slot.handler
                        .outbound_facet()
                        .expect("next_outbound only returns slots with an outbound facet"),
                );
                let executor = Arc::clone(&slot.executor);
                let ctx = self.fork(idx);
                dispatch_outbound(executor.as_ref(), ctx, move |ctx| {
                    handler.write_and_flush(ctx, msg, promise)
                });
            }
            None => {
                self.inner.channel.write(msg, promise);
                self.inner.channel.flush();
            }
        }
    }
}

enum SplicePosition {
    First,
    Last,
    Before(String),
    After(String),
}
