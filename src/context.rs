//! Block context — per-stream persistent state carried between blocks.
//!
//! Holds `last_value`, `last_delta`, and a small ring-buffer value
//! dictionary (capacity 256). `snapshot`/`restore` give the encoder a cheap
//! way to roll back to the pre-block state when the Compression Health
//! Monitor routes a block to QUARANTINE (§3 "Block context", §4.5).

use std::collections::HashMap;

/// Ring-buffer dictionary capacity (§4.5).
pub const DICT_CAPACITY: usize = 256;

/// Small rotating value dictionary used by DICT_VARINT.
///
/// Insertion grows the ring up to `DICT_CAPACITY`, then rotates; on
/// rotation the evicted value is removed from the lookup map *iff* its
/// stored index still equals the evicted slot, guarding against a later
/// re-insertion of the same value shadowing the lookup entry.
#[derive(Debug, Clone, Default)]
pub struct ValueDict {
    slots: Vec<i64>,
    lookup: HashMap<i64, usize>,
    cursor: usize,
}

impl ValueDict {
    pub fn new() -> Self {
        Self { slots: Vec::with_capacity(DICT_CAPACITY), lookup: HashMap::new(), cursor: 0 }
    }

    /// Return the dictionary index for `v`, if present.
    pub fn lookup(&self, v: i64) -> Option<usize> {
        self.lookup.get(&v).copied()
    }

    /// Return the value stored at `idx`, if any.
    pub fn value_at(&self, idx: usize) -> Option<i64> {
        self.slots.get(idx).copied()
    }

    /// Insert `v`, growing the ring until capacity, then rotating.
    pub fn insert(&mut self, v: i64) {
        if self.lookup.contains_key(&v) {
            return;
        }
        if self.slots.len() < DICT_CAPACITY {
            let idx = self.slots.len();
            self.slots.push(v);
            self.lookup.insert(v, idx);
        } else {
            let idx = self.cursor;
            let evicted = self.slots[idx];
            // Only remove the lookup entry for the evicted value if it still
            // points at the slot being overwritten — a later re-insertion of
            // `evicted` elsewhere in the ring must not be clobbered here.
            if self.lookup.get(&evicted) == Some(&idx) {
                self.lookup.remove(&evicted);
            }
            self.slots[idx] = v;
            self.lookup.insert(v, idx);
            self.cursor = (self.cursor + 1) % DICT_CAPACITY;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Deep-copyable snapshot of a [`BlockContext`], used to roll back after a
/// QUARANTINE decision without mutating the live context.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    last_value: Option<i64>,
    last_delta: Option<i64>,
    dict: ValueDict,
}

/// Per-stream persistent state: last value, last delta, and a value
/// dictionary. One `BlockContext` per stream per encoder/decoder instance —
/// never shared across streams or across concurrent encoders (§5, §9).
#[derive(Debug, Clone, Default)]
pub struct BlockContext {
    pub last_value: Option<i64>,
    pub last_delta: Option<i64>,
    pub dict: ValueDict,
}

impl BlockContext {
    pub fn new() -> Self {
        Self { last_value: None, last_delta: None, dict: ValueDict::new() }
    }

    /// Deep-copy all four pieces of state.
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            last_value: self.last_value,
            last_delta: self.last_delta,
            dict: self.dict.clone(),
        }
    }

    /// Restore all four pieces of state from a prior snapshot.
    pub fn restore(&mut self, snap: ContextSnapshot) {
        self.last_value = snap.last_value;
        self.last_delta = snap.last_delta;
        self.dict = snap.dict;
    }

    /// Clone this context wholesale — used by the CHM to build a probe
    /// context that re-encodes speculatively without touching the real one.
    pub fn fork(&self) -> BlockContext {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dict_rotates_past_capacity() {
        let mut d = ValueDict::new();
        for i in 0..(DICT_CAPACITY as i64 + 10) {
            d.insert(i);
        }
        assert_eq!(d.len(), DICT_CAPACITY);
        // Oldest values should have been evicted.
        assert!(d.lookup(0).is_none());
        // Most recent values must still resolve.
        assert!(d.lookup(DICT_CAPACITY as i64 + 9).is_some());
    }

    #[test]
    fn dict_duplicate_insert_is_noop() {
        let mut d = ValueDict::new();
        d.insert(42);
        let idx = d.lookup(42).unwrap();
        d.insert(42);
        assert_eq!(d.lookup(42), Some(idx));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn snapshot_restore_roundtrips() {
        let mut ctx = BlockContext::new();
        ctx.last_value = Some(10);
        ctx.last_delta = Some(5);
        ctx.dict.insert(1);
        ctx.dict.insert(2);

        let snap = ctx.snapshot();

        ctx.last_value = Some(999);
        ctx.last_delta = Some(999);
        ctx.dict.insert(3);

        ctx.restore(snap);
        assert_eq!(ctx.last_value, Some(10));
        assert_eq!(ctx.last_delta, Some(5));
        assert_eq!(ctx.dict.len(), 2);
        assert!(ctx.dict.lookup(3).is_none());
    }

    #[test]
    fn fork_is_independent() {
        let mut ctx = BlockContext::new();
        ctx.last_value = Some(1);
        let mut probe = ctx.fork();
        probe.last_value = Some(2);
        assert_eq!(ctx.last_value, Some(1));
        assert_eq!(probe.last_value, Some(2));
    }
}
