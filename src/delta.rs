//! Modification tracking for one tick's worth of change on a composite
//! time-series value.
//!
//! A delta never owns the value it describes; it's a lightweight,
//! kind-specific view over the slots that changed this tick, grounded on
//! `original_source/.../time_series/delta_view.h`'s "delta as a
//! non-owning, kind-specific view" design. Slot identity for sets and maps
//! is grounded on `original_source/.../time_series/slot_set.h`; that header
//! uses `ankerl::unordered_dense::set<size_t>`, for which there's no
//! idiomatic Rust equivalent in the corpus, so `SetDelta`/`MapDelta` here
//! use `std::collections::HashSet`/`HashMap` of [`SlotHandle`]s instead —
//! a deliberate substitution, not an invented dependency.

use crate::value::{SlotHandle, Value};
use std::collections::{HashMap, HashSet};

/// Added and removed slots for one tick on a `TSS` (set). If a slot was
/// both added and removed within the same tick (e.g. inserted then erased
/// before the next evaluation observed it), the two cancel: the slot
/// appears in neither set, per spec §4.2.
#[derive(Debug, Default, Clone)]
pub struct SetDelta {
    added: HashSet<SlotHandle>,
    removed: HashSet<SlotHandle>,
}

impl SetDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_add(&mut self, slot: SlotHandle) {
        if !self.removed.remove(&slot) {
            self.added.insert(slot);
        }
    }

    pub fn record_remove(&mut self, slot: SlotHandle) {
        if !self.added.remove(&slot) {
            self.removed.insert(slot);
        }
    }

    pub fn added(&self) -> impl Iterator<Item = SlotHandle> + '_ {
        self.added.iter().copied()
    }

    pub fn removed(&self) -> impl Iterator<Item = SlotHandle> + '_ {
        self.removed.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn clear(&mut self) {
        self.added.clear();
        self.removed.clear();
    }
}

/// What happened to a single key of a `TSD` (dict) this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyChange {
    Added(Value),
    Updated(Value),
    /// Carries the removed key's own value (not the nested time-series
    /// value), since by notification time the slot holding it has already
    /// been erased from the underlying `SlotVec` — this is the only
    /// remaining way for an observer (e.g. `nested::MapOverKeys`) to know
    /// which key went away.
    Removed(Value),
}

/// Per-key changes for one tick on a `TSD`. Added, updated, and removed key
/// sets are disjoint by construction: a key transitions through at most one
/// `KeyChange` per tick. If the same key is written more than once in a
/// tick, the later write simply overwrites the recorded `KeyChange` for
/// that key — **last write wins** (Open Question 2, see `DESIGN.md`).
#[derive(Debug, Default, Clone)]
pub struct MapDelta {
    changes: HashMap<SlotHandle, KeyChange>,
}

impl MapDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a write to `slot`. If `slot` already had a `Removed` entry
    /// this tick (erase then re-add under a reused, bumped-generation
    /// handle — a different `SlotHandle` in practice, but kept generic
    /// here), the new write simply replaces it, matching last-write-wins.
    pub fn record_added(&mut self, slot: SlotHandle, value: Value) {
        self.changes.insert(slot, KeyChange::Added(value));
    }

    pub fn record_updated(&mut self, slot: SlotHandle, value: Value) {
        match self.changes.get(&slot) {
            // A key added earlier this same tick stays "added" even if
            // updated again before the tick ends; downstream only cares
            // that it's new.
            Some(KeyChange::Added(_)) => {
                self.changes.insert(slot, KeyChange::Added(value));
            }
            _ => {
                self.changes.insert(slot, KeyChange::Updated(value));
            }
        }
    }

    pub fn record_removed(&mut self, slot: SlotHandle, key: Value) {
        match self.changes.get(&slot) {
            // Added then removed in the same tick: as with SetDelta, the
            // two cancel and downstream never sees the key existed.
            Some(KeyChange::Added(_)) => {
                self.changes.remove(&slot);
            }
            _ => {
                self.changes.insert(slot, KeyChange::Removed(key));
            }
        }
    }

    pub fn changes(&self) -> impl Iterator<Item = (SlotHandle, &KeyChange)> {
        self.changes.iter().map(|(slot, change)| (*slot, change))
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }
}

/// Which fields of a `TSB` (bundle) changed this tick, by field index.
/// Bundle field order is fixed by its `TypeMeta`, so a bitset-style index
/// list is enough; no slot handles are needed since fields are never
/// added or removed.
#[derive(Debug, Default, Clone)]
pub struct BundleDeltaNav {
    changed_fields: HashSet<usize>,
}

impl BundleDeltaNav {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_field(&mut self, index: usize) {
        self.changed_fields.insert(index);
    }

    pub fn changed(&self) -> impl Iterator<Item = usize> + '_ {
        self.changed_fields.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.changed_fields.clear();
    }
}

/// Which indices of a `TSL` (list) changed this tick. Unlike a bundle, a
/// list's length can change; `modified` tracks in-place writes to existing
/// indices while `length_change` records any push/pop/resize.
#[derive(Debug, Default, Clone)]
pub struct ListDeltaNav {
    modified: HashSet<usize>,
    length_change: Option<(usize, usize)>,
}

impl ListDeltaNav {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_modified(&mut self, index: usize) {
        self.modified.insert(index);
    }

    pub fn record_length_change(&mut self, old_len: usize, new_len: usize) {
        let merged = match self.length_change {
            Some((first_old, _)) => (first_old, new_len),
            None => (old_len, new_len),
        };
        self.length_change = Some(merged);
    }

    pub fn modified(&self) -> impl Iterator<Item = usize> + '_ {
        self.modified.iter().copied()
    }

    pub fn length_change(&self) -> Option<(usize, usize)> {
        self.length_change
    }

    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.length_change.is_none()
    }

    pub fn clear(&mut self) {
        self.modified.clear();
        self.length_change = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(index: usize) -> SlotHandle {
        SlotHandle { index, generation: 0 }
    }

    #[test]
    fn set_delta_add_then_remove_same_tick_cancels() {
        let mut d = SetDelta::new();
        d.record_add(handle(1));
        d.record_remove(handle(1));
        assert!(d.is_empty());
    }

    #[test]
    fn set_delta_remove_then_add_is_not_a_cancellation() {
        // A slot removed then a *different* add reusing the same bits
        // (same handle value by coincidence) still records as a genuine
        // remove followed by genuine add, since SlotVec bumps the
        // generation on reuse; here we model two distinct slots.
        let mut d = SetDelta::new();
        d.record_remove(handle(1));
        d.record_add(handle(2));
        assert_eq!(d.removed().collect::<Vec<_>>(), vec![handle(1)]);
        assert_eq!(d.added().collect::<Vec<_>>(), vec![handle(2)]);
    }

    #[test]
    fn map_delta_added_then_removed_cancels() {
        let mut d = MapDelta::new();
        d.record_added(handle(1), Value::Unset);
        d.record_removed(handle(1), Value::Unset);
        assert!(d.is_empty());
    }

    #[test]
    fn map_delta_last_write_wins_within_tick() {
        let mut d = MapDelta::new();
        d.record_updated(handle(1), Value::Scalar(crate::value::Scalar::I64(1)));
        d.record_updated(handle(1), Value::Scalar(crate::value::Scalar::I64(2)));
        let (_, change) = d.changes().next().unwrap();
        assert_eq!(
            *change,
            KeyChange::Updated(Value::Scalar(crate::value::Scalar::I64(2)))
        );
    }

    #[test]
    fn map_delta_changes_are_disjoint_per_key() {
        let mut d = MapDelta::new();
        d.record_added(handle(1), Value::Unset);
        d.record_removed(handle(2), Value::Unset);
        d.record_updated(handle(3), Value::Unset);
        assert_eq!(d.changes().count(), 3);
    }

    #[test]
    fn bundle_delta_nav_tracks_field_indices() {
        let mut d = BundleDeltaNav::new();
        d.record_field(2);
        d.record_field(0);
        let mut fields: Vec<_> = d.changed().collect();
        fields.sort();
        assert_eq!(fields, vec![0, 2]);
    }

    #[test]
    fn list_delta_nav_merges_length_change_range() {
        let mut d = ListDeltaNav::new();
        d.record_length_change(3, 5);
        d.record_length_change(5, 7);
        assert_eq!(d.length_change(), Some((3, 7)));
    }
}
