//! Typed, keyed per-pipeline storage (C6).
//!
//! Grounded in the teacher workspace's `ExtensionsMap` (`TypeId`-keyed `insert`/`get`/
//! `remove`/`contains_key`), generalized with the richer compare-and-set cell semantics the
//! pipeline spec requires: `get`, `set`, `compare_and_set`, `get_and_set`, `set_if_absent`,
//! none of which the teacher's extensions map offers on its own.
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

/// A typed identity token for a slot in an [`AttributeMap`]. Two keys are the same slot IFF
/// they carry the same `name` — the `T` type parameter is carried only at the type level so
/// `AttributeMap::attr` can hand back a `AttributeCell<T>` without a downcast at the call
/// site, but is not itself part of a key's identity (mirroring the teacher's `TypeId`-keyed
/// map, which keys purely on the stored value's type).
pub struct AttributeKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AttributeKey").field(&self.name).finish()
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for AttributeKey<T> {}

/// A lazily-created, independently thread-safe storage cell for one attribute slot.
pub struct AttributeCell<T> {
    inner: RwLock<Option<T>>,
}

impl<T: Clone> AttributeCell<T> {
    fn empty() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub fn get(&self) -> Option<T> {
        self.inner.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn set(&self, value: T) {
        *self.inner.write().unwrap_or_else(|p| p.into_inner()) = Some(value);
    }

    pub fn clear(&self) -> Option<T> {
        self.inner.write().unwrap_or_else(|p| p.into_inner()).take()
    }

    /// Atomically replaces the current value with `new` only if the current value equals
    /// `expected`, returning whether the swap happened.
    pub fn compare_and_set(&self, expected: Option<&T>, new: Option<T>) -> bool
    where
        T: PartialEq,
    {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        if guard.as_ref() == expected {
            *guard = new;
            true
        } else {
            false
        }
    }

    /// Atomically replaces the current value with `new`, returning what was there before.
    pub fn get_and_set(&self, new: T) -> Option<T> {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        guard.replace(new)
    }

    /// Sets `value` only if the cell is currently empty, returning whether it was set.
    pub fn set_if_absent(&self, value: T) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        if guard.is_none() {
            *guard = Some(value);
            true
        } else {
            false
        }
    }
}

/// A keyed, typed, per-pipeline bag handlers use to stash cross-handler state.
///
/// Cells are created lazily on first [`attr`](Self::attr) call and are, once created, never
/// removed — matching the teacher's add-only `ExtensionsMap` posture, which the spec's §9
/// "the attribute key registry is per-process but add-only" design note calls for at the key
/// level and this extends to the cell level for simplicity.
pub struct AttributeMap {
    cells: RwLock<HashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
}

impl Default for AttributeMap {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeMap {
    pub fn new() -> Self {
        Self {
            cells: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cell for `key`, creating it if this is the first access. Creation is
    /// atomic with respect to concurrent lookups for the same key: two racing callers never
    /// end up with two different cells for one key.
    pub fn attr<T: Clone + Send + Sync + 'static>(&self, key: &AttributeKey<T>) -> Arc<AttributeCell<T>> {
        if let Some(existing) = self.cells.read().unwrap_or_else(|p| p.into_inner()).get(key.name) {
            return existing
                .clone()
                .downcast::<AttributeCell<T>>()
                .expect("attribute key name reused with a different value type");
        }
        let mut guard = self.cells.write().unwrap_or_else(|p| p.into_inner());
        let entry = guard
            .entry(key.name)
            .or_insert_with(|| Arc::new(AttributeCell::<T>::empty()) as Arc<dyn Any + Send + Sync>);
        entry
            .clone()
            .downcast::<AttributeCell<T>>()
            .expect("attribute key name reused with a different value type")
    }

    /// Reports whether a cell has ever been created for `key`, without creating one.
    pub fn has_attr<T: Clone + Send + Sync + 'static>(&self, key: &AttributeKey<T>) -> bool {
        self.cells
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(key.name)
    }

    /// Used only by tests/diagnostics: the count of cells materialized so far.
    pub fn len(&self) -> usize {
        self.cells.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// `TypeId` stays available for any future caller that wants to double-check a key's value
// type defensively; not exercised by the map itself today (name identity is sufficient).
#[allow(dead_code)]
fn _type_id_of<T: 'static>() -> TypeId {
    TypeId::of::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;

    static COUNTER: AttributeKey<i64> = AttributeKey::new("counter");
    static LABEL: AttributeKey<String> = AttributeKey::new("label");

    #[test]
    fn attr_creates_lazily_and_is_stable() {
        let map = AttributeMap::new();
        assert!(!map.has_attr(&COUNTER));
        let cell = map.attr(&COUNTER);
        assert!(map.has_attr(&COUNTER));
        cell.set(42);
        assert_eq!(map.attr(&COUNTER).get(), Some(42));
    }

    #[test]
    fn compare_and_set_only_swaps_on_match() {
        let map = AttributeMap::new();
        let cell = map.attr(&COUNTER);
        cell.set(1);
        assert!(!cell.compare_and_set(Some(&2), Some(3)));
        assert_eq!(cell.get(), Some(1));
        assert!(cell.compare_and_set(Some(&1), Some(3)));
        assert_eq!(cell.get(), Some(3));
    }

    #[test]
    fn set_if_absent_only_sets_once() {
        let map = AttributeMap::new();
        let cell = map.attr(&LABEL);
        assert!(cell.set_if_absent("first".to_string()));
        assert!(!cell.set_if_absent("second".to_string()));
        assert_eq!(cell.get(), Some("first".to_string()));
    }

    #[test]
    fn get_and_set_returns_previous_value() {
        let map = AttributeMap::new();
        let cell = map.attr(&COUNTER);
        cell.set(5);
        assert_eq!(cell.get_and_set(9), Some(5));
        assert_eq!(cell.get(), Some(9));
    }

    #[test]
    fn distinct_keys_are_independent_cells() {
        let map = AttributeMap::new();
        map.attr(&COUNTER).set(1);
        map.attr(&LABEL).set("x".to_string());
        assert_eq!(map.attr(&COUNTER).get(), Some(1));
        assert_eq!(map.attr(&LABEL).get(), Some("x".to_string()));
    }
}
