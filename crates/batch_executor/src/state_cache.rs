//! Tiered State Cache (spec.md §4.1). A stack of read-through/write-local
//! key-value layers over a base state source. Modeled as a linked chain of
//! `Arc`-shared nodes rather than an inheritance hierarchy, per spec.md §9:
//! "Implicit tiered lookup is best realized as an explicit stack of overlays
//! with a read-through method... layers should be cheap to clone by reference."

use std::sync::{Arc, Mutex};

use indexmap::{IndexMap, IndexSet};

pub type Key = Vec<u8>;
pub type Value = Vec<u8>;

/// The result of a cache lookup: a live value, an explicit tombstone (masking
/// whatever a lower layer holds), or simply not present anywhere in the stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheValue {
    Present(Value),
    Deleted,
    Absent,
}

impl CacheValue {
    pub fn as_option(&self) -> Option<&Value> {
        match self {
            CacheValue::Present(v) => Some(v),
            CacheValue::Deleted | CacheValue::Absent => None,
        }
    }
}

/// The writes, deletes, and reads produced by one execution step (spec.md §3).
/// Stored in the order produced: `IndexMap`/`IndexSet` preserve insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateSet {
    pub writes: IndexMap<Key, Value>,
    pub deletes: IndexSet<Key>,
    pub reads: IndexMap<Key, CacheValue>,
}

impl StateSet {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }

    /// Records a write, evicting any pending delete for the same key — the
    /// mutual-exclusion invariant from spec.md §3.
    pub fn record_write(&mut self, key: Key, value: Value) {
        self.deletes.shift_remove(&key);
        self.writes.insert(key, value);
    }

    /// Records a delete, evicting any pending write for the same key.
    pub fn record_delete(&mut self, key: Key) {
        self.writes.shift_remove(&key);
        self.deletes.insert(key);
    }

    pub fn record_read(&mut self, key: Key, value: CacheValue) {
        // First observation wins: a key re-read after being written by this same
        // step should still report what the cache returned at read time, but we
        // don't want a later incidental re-read to clobber an earlier entry.
        self.reads.entry(key).or_insert(value);
    }
}

#[derive(Default)]
struct Layer {
    state: StateSet,
}

struct TscNode {
    parent: Option<TieredStateCache>,
    /// Only meaningful when `parent` is `None`: the L0 base source.
    base: IndexMap<Key, Value>,
    layer: Mutex<Layer>,
}

/// A single overlay in the tiered stack. Cloning is a cheap `Arc` bump, matching
/// spec.md §9's guidance that child executions hold a parent snapshot without
/// copying.
#[derive(Clone)]
pub struct TieredStateCache {
    inner: Arc<TscNode>,
}

impl TieredStateCache {
    /// Builds a root cache (L0) over an optional base source.
    pub fn new(base: IndexMap<Key, Value>) -> Self {
        Self {
            inner: Arc::new(TscNode { parent: None, base, layer: Mutex::new(Layer::default()) }),
        }
    }

    pub fn empty() -> Self {
        Self::new(IndexMap::new())
    }

    /// Returns a new cache whose base is `self`: reads read through to `self`,
    /// writes land only in the child's own top layer. Never mutates `self`.
    pub fn child(&self) -> TieredStateCache {
        TieredStateCache {
            inner: Arc::new(TscNode {
                parent: Some(self.clone()),
                base: IndexMap::new(),
                layer: Mutex::new(Layer::default()),
            }),
        }
    }

    pub fn has_parent(&self) -> bool {
        self.inner.parent.is_some()
    }

    /// Walks the stack top-down; the first write/tombstone found wins. Records
    /// the read in this layer's own `StateSet` regardless of which deeper layer
    /// the value actually resolved from, so it can be surfaced as
    /// `StateAccesses` once this layer's work is materialized.
    pub fn get(&self, key: &[u8]) -> CacheValue {
        let resolved = self.resolve(key);
        self.inner.layer.lock().unwrap().state.record_read(key.to_vec(), resolved.clone());
        resolved
    }

    fn resolve(&self, key: &[u8]) -> CacheValue {
        {
            let layer = self.inner.layer.lock().unwrap();
            if let Some(value) = layer.state.writes.get(key) {
                return CacheValue::Present(value.clone());
            }
            if layer.state.deletes.contains(key) {
                return CacheValue::Deleted;
            }
        }
        match &self.inner.parent {
            Some(parent) => parent.resolve(key),
            None => match self.inner.base.get(key) {
                Some(value) => CacheValue::Present(value.clone()),
                None => CacheValue::Absent,
            },
        }
    }

    /// Folds a sequence of `StateSet`s into the current (top) layer, preserving
    /// the write/delete mutual-exclusion invariant. Reads are not part of an
    /// `update` — they only ever flow from `get`.
    pub fn update(&self, state_sets: &[StateSet]) {
        let mut layer = self.inner.layer.lock().unwrap();
        for state_set in state_sets {
            for (key, value) in &state_set.writes {
                layer.state.record_write(key.clone(), value.clone());
            }
            for key in &state_set.deletes {
                layer.state.record_delete(key.clone());
            }
        }
    }

    /// Snapshot of this layer's own writes/deletes/reads, in the order produced.
    pub fn materialize(&self) -> StateSet {
        self.inner.layer.lock().unwrap().state.clone()
    }
}
