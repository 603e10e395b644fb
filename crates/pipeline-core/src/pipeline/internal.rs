//! Internal hot-swap storage for the pipeline's context chain.
//!
//! Grounded in the teacher workspace's `HandlerEpochBuffer` (`data_plane::pipeline::internal`):
//! same `ArcSwap<Vec<Arc<T>>>` snapshot-plus-epoch shape, same read-zero-copy /
//! write-atomic-replace contract, generalized only by widening its element type from the
//! teacher's own handler-registration type to this crate's `ContextId`-addressed arena slot.
//! The teacher's separate `HotSwapRegistry` (an `ArcSwap<Vec<HandlerRegistration>>` used purely
//! to cache an introspection snapshot) has no counterpart here — introspection
//! (`Pipeline::names`/`to_map`) reads directly off the same snapshot `HandlerEpochBuffer`
//! already holds, so a second cached copy would just be duplicated state.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;

/// Holds the pipeline's current ordered list of arena slots behind an atomically-swappable
/// pointer, plus a logical epoch bumped once per structural mutation.
///
/// Readers (dispatch traversal) call [`load`](Self::load) and get a strongly-consistent
/// snapshot with no locking; writers (`add_first`/`add_last`/`remove`/`replace`/...) build a
/// new `Vec`, `store` it, then `bump_epoch` to signal the swap to anything tracking epoch
/// for its own invalidation purposes.
pub(crate) struct HandlerEpochBuffer<T: Send + Sync + 'static> {
    snapshot: ArcSwap<Vec<Arc<T>>>,
    epoch: AtomicU64,
}

impl<T: Send + Sync + 'static> HandlerEpochBuffer<T> {
    pub(crate) fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Vec::new()),
            epoch: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn load(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.load_full()
    }

    #[inline]
    pub(crate) fn store(&self, snapshot: Arc<Vec<Arc<T>>>) {
        self.snapshot.store(snapshot);
    }

    #[inline]
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Call after `store`, once every side effect of the mutation has landed.
    #[inline]
    pub(crate) fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_load_is_visible_and_epoch_advances() {
        let buffer: HandlerEpochBuffer<u32> = HandlerEpochBuffer::new();
        assert_eq!(buffer.epoch(), 0);
        assert!(buffer.load().is_empty());

        buffer.store(Arc::new(vec![Arc::new(1), Arc::new(2)]));
        let bumped = buffer.bump_epoch();

        assert_eq!(bumped, 1);
        assert_eq!(buffer.epoch(), 1);
        let snapshot = buffer.load();
        assert_eq!(snapshot.len(), 2);
    }
}
