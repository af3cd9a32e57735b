//! The time-series counterpart of [`crate::value::Value`]: for every kind
//! of time-series node, a [`TSValue`] carries the four parallel trees from
//! spec §3 — value, time (`last_modified`), observer, and delta — as one
//! structure, navigated and mutated through [`TSView`]/[`TSMutableView`].
//!
//! The tree shape has no teacher analogue (the teacher is demand-pull, not
//! delta-push) and is built directly from spec §3/§4.3; `Rc<RefCell<_>>`
//! output handles follow the teacher's own move away from arena-borrowed
//! references once cross-node sharing is involved (see `access.rs`).

use crate::delta::{BundleDeltaNav, ListDeltaNav, MapDelta, SetDelta};
use crate::engine::Time;
use crate::error::{GraphError, Result};
use crate::node::NodeId;
use crate::subscription::{self, NotifyKind, ObserverList};
use crate::value::{SlotHandle, SlotVec, TypeMeta, Value};
use std::collections::VecDeque;
use std::rc::Rc;

/// One change to apply to a set or dict time-series in a single notified
/// batch, so a node that writes several keys in one `eval` schedules its
/// observers once rather than once per key (spec §4.5). Dispatched by
/// [`TSMutableView::apply_delta`].
pub enum DeltaOp {
    SetAdd(Value),
    SetRemove(Value),
    DictSet(Value, TSValue),
    DictRemove(Value),
}

/// One time-series node's four parallel trees, tagged by kind. Composite
/// kinds nest further `TSValue`s as children rather than flattening into a
/// shared `Value` tree, so each level keeps its own time/observer/delta
/// state exactly as spec §3 describes.
pub enum TSValue {
    Scalar(ScalarTs),
    Bundle(BundleTs),
    List(ListTs),
    Set(SetTs),
    Dict(DictTs),
    Window(WindowTs),
    Ref(RefTs),
    Signal(SignalTs),
}

pub struct ScalarTs {
    pub type_meta: Rc<TypeMeta>,
    value: Value,
    last_modified: Option<Time>,
    observers: ObserverList,
}

pub struct BundleTs {
    pub type_meta: Rc<TypeMeta>,
    fields: Vec<TSValue>,
    last_modified: Option<Time>,
    observers: ObserverList,
    delta: BundleDeltaNav,
}

pub struct ListTs {
    pub type_meta: Rc<TypeMeta>,
    items: Vec<TSValue>,
    last_modified: Option<Time>,
    observers: ObserverList,
    delta: ListDeltaNav,
}

pub struct SetTs {
    pub type_meta: Rc<TypeMeta>,
    items: SlotVec<Value>,
    last_modified: Option<Time>,
    observers: ObserverList,
    delta: SetDelta,
}

pub struct DictTs {
    pub type_meta: Rc<TypeMeta>,
    items: SlotVec<(Value, TSValue)>,
    last_modified: Option<Time>,
    observers: ObserverList,
    delta: MapDelta,
}

/// Cyclic-buffer storage: holds `capacity + 1` entries so the value most
/// recently evicted is still visible for one tick, per spec §4.1.
pub struct WindowTs {
    pub type_meta: Rc<TypeMeta>,
    capacity: usize,
    entries: VecDeque<(Time, Value)>,
    last_modified: Option<Time>,
    observers: ObserverList,
}

pub struct RefTs {
    target: Option<NodeId>,
    last_modified: Option<Time>,
    observers: ObserverList,
}

pub struct SignalTs {
    last_modified: Option<Time>,
    observers: ObserverList,
}

impl TSValue {
    pub fn new_scalar(type_meta: Rc<TypeMeta>) -> Self {
        TSValue::Scalar(ScalarTs {
            type_meta,
            value: Value::Unset,
            last_modified: None,
            observers: ObserverList::new(),
        })
    }

    pub fn new_bundle(type_meta: Rc<TypeMeta>, fields: Vec<TSValue>) -> Self {
        TSValue::Bundle(BundleTs {
            type_meta,
            fields,
            last_modified: None,
            observers: ObserverList::new(),
            delta: BundleDeltaNav::new(),
        })
    }

    pub fn new_list(type_meta: Rc<TypeMeta>) -> Self {
        TSValue::List(ListTs {
            type_meta,
            items: Vec::new(),
            last_modified: None,
            observers: ObserverList::new(),
            delta: ListDeltaNav::new(),
        })
    }

    pub fn new_set(type_meta: Rc<TypeMeta>) -> Self {
        TSValue::Set(SetTs {
            type_meta,
            items: SlotVec::new(),
            last_modified: None,
            observers: ObserverList::new(),
            delta: SetDelta::new(),
        })
    }

    pub fn new_dict(type_meta: Rc<TypeMeta>) -> Self {
        TSValue::Dict(DictTs {
            type_meta,
            items: SlotVec::new(),
            last_modified: None,
            observers: ObserverList::new(),
            delta: MapDelta::new(),
        })
    }

    pub fn new_window(type_meta: Rc<TypeMeta>, capacity: usize) -> Self {
        TSValue::Window(WindowTs {
            type_meta,
            capacity,
            entries: VecDeque::with_capacity(capacity + 1),
            last_modified: None,
            observers: ObserverList::new(),
        })
    }

    pub fn new_ref() -> Self {
        TSValue::Ref(RefTs {
            target: None,
            last_modified: None,
            observers: ObserverList::new(),
        })
    }

    pub fn new_signal() -> Self {
        TSValue::Signal(SignalTs {
            last_modified: None,
            observers: ObserverList::new(),
        })
    }

    pub fn last_modified_time(&self) -> Option<Time> {
        match self {
            TSValue::Scalar(s) => s.last_modified,
            TSValue::Bundle(b) => b.last_modified,
            TSValue::List(l) => l.last_modified,
            TSValue::Set(s) => s.last_modified,
            TSValue::Dict(d) => d.last_modified,
            TSValue::Window(w) => w.last_modified,
            TSValue::Ref(r) => r.last_modified,
            TSValue::Signal(s) => s.last_modified,
        }
    }

    /// `time_tree[slot] == t` at the end of a node evaluation for every
    /// slot whose delta is non-empty, per spec §4.2's invariant.
    pub fn modified_at(&self, t: Time) -> bool {
        self.last_modified_time() == Some(t)
    }

    pub fn observers_mut(&mut self) -> &mut ObserverList {
        match self {
            TSValue::Scalar(s) => &mut s.observers,
            TSValue::Bundle(b) => &mut b.observers,
            TSValue::List(l) => &mut l.observers,
            TSValue::Set(s) => &mut s.observers,
            TSValue::Dict(d) => &mut d.observers,
            TSValue::Window(w) => &mut w.observers,
            TSValue::Ref(r) => &mut r.observers,
            TSValue::Signal(s) => &mut s.observers,
        }
    }

    /// Called at the engine's tick boundary (spec §4.2/§4.7): clears every
    /// delta so the next tick starts from empty, independent of
    /// `last_modified`, which persists until overwritten.
    pub fn clear_delta(&mut self) {
        match self {
            TSValue::Bundle(b) => b.delta.clear(),
            TSValue::List(l) => l.delta.clear(),
            TSValue::Set(s) => s.delta.clear(),
            TSValue::Dict(d) => d.delta.clear(),
            _ => {}
        }
    }

    pub fn view(&self) -> TSView<'_> {
        TSView(self)
    }

    pub fn view_mut(&mut self) -> TSMutableView<'_> {
        TSMutableView(self)
    }
}

/// Read-only navigation over a `TSValue`, composing without copying, per
/// spec §3's `View` composition model.
#[derive(Copy, Clone)]
pub struct TSView<'a>(&'a TSValue);

impl<'a> TSView<'a> {
    pub fn last_modified_time(&self) -> Option<Time> {
        self.0.last_modified_time()
    }

    pub fn get_value(&self) -> Option<&'a Value> {
        match self.0 {
            TSValue::Scalar(s) => Some(&s.value),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<TSView<'a>> {
        match self.0 {
            TSValue::Bundle(b) => {
                let index = b.type_meta.fields.iter().position(|(n, _)| n == name)?;
                Some(TSView(&b.fields[index]))
            }
            _ => None,
        }
    }

    pub fn at(&self, index: usize) -> Option<TSView<'a>> {
        match self.0 {
            TSValue::List(l) => l.items.get(index).map(TSView),
            _ => None,
        }
    }

    pub fn size(&self) -> usize {
        match self.0 {
            TSValue::List(l) => l.items.len(),
            TSValue::Set(s) => s.items.len(),
            TSValue::Dict(d) => d.items.len(),
            TSValue::Window(w) => w.entries.len(),
            _ => 0,
        }
    }

    pub fn contains(&self, value: &Value) -> bool {
        match self.0 {
            TSValue::Set(s) => s.items.find(value).is_some(),
            _ => false,
        }
    }

    pub fn added(&self) -> Box<dyn Iterator<Item = SlotHandle> + 'a> {
        match self.0 {
            TSValue::Set(s) => Box::new(s.delta.added()),
            _ => Box::new(std::iter::empty()),
        }
    }

    pub fn removed(&self) -> Box<dyn Iterator<Item = SlotHandle> + 'a> {
        match self.0 {
            TSValue::Set(s) => Box::new(s.delta.removed()),
            _ => Box::new(std::iter::empty()),
        }
    }

    pub fn at_key(&self, key: &Value) -> Option<TSView<'a>> {
        match self.0 {
            TSValue::Dict(d) => d
                .items
                .iter()
                .find(|(_, (k, _))| k == key)
                .map(|(_, (_, ts))| TSView(ts)),
            _ => None,
        }
    }

    pub fn changed_keys(&self) -> Box<dyn Iterator<Item = (SlotHandle, &'a crate::delta::KeyChange)> + 'a> {
        match self.0 {
            TSValue::Dict(d) => Box::new(d.delta.changes()),
            _ => Box::new(std::iter::empty()),
        }
    }

    pub fn added_keys(&self) -> impl Iterator<Item = &'a Value> + 'a {
        self.changed_keys().filter_map(|(_, change)| match change {
            crate::delta::KeyChange::Added(key) => Some(key),
            _ => None,
        })
    }

    pub fn updated_keys(&self) -> impl Iterator<Item = &'a Value> + 'a {
        self.changed_keys().filter_map(|(_, change)| match change {
            crate::delta::KeyChange::Updated(key) => Some(key),
            _ => None,
        })
    }

    pub fn removed_keys(&self) -> impl Iterator<Item = &'a Value> + 'a {
        self.changed_keys().filter_map(|(_, change)| match change {
            crate::delta::KeyChange::Removed(key) => Some(key),
            _ => None,
        })
    }

    pub fn values(&self) -> Box<dyn Iterator<Item = &'a Value> + 'a> {
        match self.0 {
            TSValue::Window(w) => Box::new(w.entries.iter().map(|(_, v)| v)),
            _ => Box::new(std::iter::empty()),
        }
    }

    /// Every live key/value pair of a `TSD`, in slot order. Used by folds
    /// over the whole dict (`nested::Reduce`'s full-recompute path) rather
    /// than just this tick's delta.
    pub fn entries(&self) -> Box<dyn Iterator<Item = (&'a Value, TSView<'a>)> + 'a> {
        match self.0 {
            TSValue::Dict(d) => Box::new(d.items.iter().map(|(_, (k, v))| (k, TSView(v)))),
            _ => Box::new(std::iter::empty()),
        }
    }

    pub fn times(&self) -> Box<dyn Iterator<Item = Time> + 'a> {
        match self.0 {
            TSValue::Window(w) => Box::new(w.entries.iter().map(|(t, _)| *t)),
            _ => Box::new(std::iter::empty()),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        match self.0 {
            TSValue::Window(w) => Some(w.capacity),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<NodeId> {
        match self.0 {
            TSValue::Ref(r) => r.target,
            _ => None,
        }
    }

    /// Indices written in place this tick on a `TSL` (list), excluding
    /// indices only touched by a length change (push/pop/clear), per
    /// `ListDeltaNav`'s split between `modified` and `length_change`.
    pub fn modified_indices(&self) -> Box<dyn Iterator<Item = usize> + 'a> {
        match self.0 {
            TSValue::List(l) => Box::new(l.delta.modified()),
            _ => Box::new(std::iter::empty()),
        }
    }
}

/// Producer-side mutation API. Every mutator takes the current engine
/// time and updates the time tree and relevant delta together, per spec
/// §4.3.
pub struct TSMutableView<'a>(&'a mut TSValue);

impl<'a> TSMutableView<'a> {
    pub fn set_value(&mut self, value: Value, now: Time) -> Result<()> {
        match self.0 {
            TSValue::Scalar(s) => {
                s.value = value;
                s.last_modified = Some(now);
            }
            _ => return Err(GraphError::wiring("set_value on a non-scalar time-series")),
        }
        self.notify(NotifyKind::ValueChanged);
        Ok(())
    }

    pub fn set_field(&mut self, name: &str, value: Value, now: Time) -> Result<()> {
        match self.0 {
            TSValue::Bundle(b) => {
                let index = b
                    .type_meta
                    .fields
                    .iter()
                    .position(|(n, _)| n == name)
                    .ok_or_else(|| GraphError::wiring(format!("no such bundle field: {name}")))?;
                b.fields[index].view_mut().set_value(value, now)?;
                b.delta.record_field(index);
                b.last_modified = Some(now);
            }
            _ => return Err(GraphError::wiring("set_field on a non-bundle time-series")),
        }
        self.notify(NotifyKind::ValueChanged);
        Ok(())
    }

    pub fn field_mut(&mut self, name: &str) -> Option<TSMutableView<'_>> {
        match self.0 {
            TSValue::Bundle(b) => {
                let index = b.type_meta.fields.iter().position(|(n, _)| n == name)?;
                Some(b.fields[index].view_mut())
            }
            _ => None,
        }
    }

    /// Returns a mutable view onto the item at `index`, recording it as
    /// modified at `now` and scheduling this list's observers. Unlike
    /// `field_mut`, a list's element access is itself a write (spec §4.3's
    /// in-place-mutation case), since a list has no `set_value`-style
    /// whole-element setter.
    pub fn at_mut(&mut self, index: usize, now: Time) -> Option<TSMutableView<'_>> {
        match self.0 {
            TSValue::List(l) => {
                l.items.get(index)?;
                l.delta.record_modified(index);
                l.last_modified = Some(now);
                l.observers.notify(NotifyKind::ValueChanged, subscription::queue_wake);
                Some(l.items[index].view_mut())
            }
            _ => None,
        }
    }

    pub fn push_back(&mut self, item: TSValue, now: Time) -> Result<()> {
        match self.0 {
            TSValue::List(l) => {
                let old_len = l.items.len();
                l.items.push(item);
                l.delta.record_length_change(old_len, l.items.len());
                l.last_modified = Some(now);
            }
            _ => return Err(GraphError::wiring("push_back on a non-list time-series")),
        }
        self.notify(NotifyKind::StructureChanged);
        Ok(())
    }

    pub fn insert_set(&mut self, value: Value, now: Time) -> Result<()> {
        match self.0 {
            TSValue::Set(s) => {
                if s.items.find(&value).is_some() {
                    return Ok(());
                }
                let handle = s.items.insert(value);
                s.delta.record_add(handle);
                s.last_modified = Some(now);
            }
            _ => return Err(GraphError::wiring("insert on a non-set time-series")),
        }
        self.notify(NotifyKind::StructureChanged);
        Ok(())
    }

    pub fn erase_set(&mut self, value: &Value, now: Time) -> Result<()> {
        match self.0 {
            TSValue::Set(s) => {
                if let Some(handle) = s.items.find(value) {
                    s.items.erase(handle);
                    s.delta.record_remove(handle);
                    s.last_modified = Some(now);
                } else {
                    return Ok(());
                }
            }
            _ => return Err(GraphError::wiring("erase on a non-set time-series")),
        }
        self.notify(NotifyKind::StructureChanged);
        Ok(())
    }

    /// Writes `key`. If `key` already exists this tick, the new value wins
    /// (Open Question 2, see `DESIGN.md`): the underlying slot's value is
    /// replaced and the delta entry for it is overwritten, not appended.
    pub fn set_key(&mut self, key: Value, nested: TSValue, now: Time) -> Result<()> {
        match self.0 {
            TSValue::Dict(d) => {
                if let Some(handle) = d.items.find_key(&key) {
                    d.items.get_mut(handle).unwrap().1 = nested;
                    d.delta.record_updated(handle, key);
                } else {
                    let handle = d.items.insert((key.clone(), nested));
                    d.delta.record_added(handle, key);
                }
                d.last_modified = Some(now);
            }
            _ => return Err(GraphError::wiring("set_key on a non-dict time-series")),
        }
        self.notify(NotifyKind::StructureChanged);
        Ok(())
    }

    pub fn at_key_mut(&mut self, key: &Value) -> Option<TSMutableView<'_>> {
        match self.0 {
            TSValue::Dict(d) => d
                .items
                .iter_mut()
                .find(|(_, (k, _))| k == key)
                .map(|(_, (_, ts))| ts.view_mut()),
            _ => None,
        }
    }

    pub fn erase_key(&mut self, key: &Value, now: Time) -> Result<()> {
        match self.0 {
            TSValue::Dict(d) => {
                if let Some(handle) = d.items.find_key(key) {
                    d.items.erase(handle);
                    d.delta.record_removed(handle, key.clone());
                    d.last_modified = Some(now);
                } else {
                    return Ok(());
                }
            }
            _ => return Err(GraphError::wiring("erase_key on a non-dict time-series")),
        }
        self.notify(NotifyKind::StructureChanged);
        Ok(())
    }

    /// Applies a batch of set/dict edits as one write, notifying this
    /// slot's observers once at the end rather than once per op — used by
    /// nodes that derive several key changes from a single upstream event
    /// (spec §4.5's batching allowance).
    pub fn apply_delta(&mut self, ops: impl IntoIterator<Item = DeltaOp>, now: Time) -> Result<()> {
        for op in ops {
            match (op, &mut *self.0) {
                (DeltaOp::SetAdd(value), TSValue::Set(s)) => {
                    if s.items.find(&value).is_none() {
                        let handle = s.items.insert(value);
                        s.delta.record_add(handle);
                        s.last_modified = Some(now);
                    }
                }
                (DeltaOp::SetRemove(value), TSValue::Set(s)) => {
                    if let Some(handle) = s.items.find(&value) {
                        s.items.erase(handle);
                        s.delta.record_remove(handle);
                        s.last_modified = Some(now);
                    }
                }
                (DeltaOp::DictSet(key, nested), TSValue::Dict(d)) => {
                    if let Some(handle) = d.items.find_key(&key) {
                        d.items.get_mut(handle).unwrap().1 = nested;
                        d.delta.record_updated(handle, key);
                    } else {
                        let handle = d.items.insert((key.clone(), nested));
                        d.delta.record_added(handle, key);
                    }
                    d.last_modified = Some(now);
                }
                (DeltaOp::DictRemove(key), TSValue::Dict(d)) => {
                    if let Some(handle) = d.items.find_key(&key) {
                        d.items.erase(handle);
                        d.delta.record_removed(handle, key);
                        d.last_modified = Some(now);
                    }
                }
                _ => return Err(GraphError::wiring("apply_delta op does not match this time-series kind")),
            }
        }
        self.notify(NotifyKind::StructureChanged);
        Ok(())
    }

    pub fn clear(&mut self, now: Time) -> Result<()> {
        match self.0 {
            TSValue::List(l) => {
                let old_len = l.items.len();
                l.items.clear();
                l.delta.record_length_change(old_len, 0);
                l.last_modified = Some(now);
            }
            TSValue::Set(s) => {
                let handles: Vec<_> = s.items.iter().map(|(h, _)| h).collect();
                for handle in handles {
                    s.items.erase(handle);
                    s.delta.record_remove(handle);
                }
                s.last_modified = Some(now);
            }
            TSValue::Dict(d) => {
                let handles: Vec<_> = d.items.iter().map(|(h, (k, _))| (h, k.clone())).collect();
                for (handle, key) in handles {
                    d.items.erase(handle);
                    d.delta.record_removed(handle, key);
                }
                d.last_modified = Some(now);
            }
            _ => return Err(GraphError::wiring("clear on a scalar time-series")),
        }
        self.notify(NotifyKind::StructureChanged);
        Ok(())
    }

    /// Appends to a cyclic window, evicting the oldest entry once the
    /// buffer holds more than `capacity + 1` entries (spec §4.1: capacity
    /// + 1 keeps the most recently evicted value visible for one tick).
    pub fn push_window(&mut self, value: Value, now: Time) -> Result<()> {
        match self.0 {
            TSValue::Window(w) => {
                w.entries.push_back((now, value));
                while w.entries.len() > w.capacity + 1 {
                    w.entries.pop_front();
                }
                w.last_modified = Some(now);
            }
            _ => return Err(GraphError::wiring("push_window on a non-window time-series")),
        }
        self.notify(NotifyKind::ValueChanged);
        Ok(())
    }

    /// Rebinds a REF to a new target. Observers of the REF see this as a
    /// structural change (the thing they're watching changed identity),
    /// not merely a value change, so `access.rs`'s `RefObserverAccess`
    /// listens for `NotifyKind::StructureChanged` here.
    pub fn rebind_ref(&mut self, target: Option<NodeId>, now: Time) -> Result<()> {
        match self.0 {
            TSValue::Ref(r) => {
                r.target = target;
                r.last_modified = Some(now);
            }
            _ => return Err(GraphError::wiring("rebind_ref on a non-ref time-series")),
        }
        self.notify(NotifyKind::StructureChanged);
        Ok(())
    }

    /// Marks this slot modified at `now` without changing its value —
    /// used by signal inputs, which carry only a schedule pulse, per spec
    /// §4.5.
    pub fn invalidate(&mut self, now: Time) {
        match self.0 {
            TSValue::Scalar(s) => s.last_modified = Some(now),
            TSValue::Bundle(b) => b.last_modified = Some(now),
            TSValue::List(l) => l.last_modified = Some(now),
            TSValue::Set(s) => s.last_modified = Some(now),
            TSValue::Dict(d) => d.last_modified = Some(now),
            TSValue::Window(w) => w.last_modified = Some(now),
            TSValue::Ref(r) => r.last_modified = Some(now),
            TSValue::Signal(s) => s.last_modified = Some(now),
        }
        self.notify(NotifyKind::ValueChanged);
    }

    /// Schedules every node subscribed to this slot, queuing them on the
    /// thread-local pending-wake list the engine drains at the start of
    /// its next `step` (`subscription::drain_pending_wakes`).
    pub fn notify(&mut self, kind: NotifyKind) {
        self.0.observers_mut().notify(kind, subscription::queue_wake);
    }
}

impl SlotVec<(Value, TSValue)> {
    fn find_key(&self, key: &Value) -> Option<SlotHandle> {
        self.iter().find(|(_, (k, _))| k == key).map(|(h, _)| h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Scalar, TypeRegistry};
    use hifitime::Epoch;

    fn t(seconds: i64) -> Time {
        Epoch::from_unix_seconds(seconds as f64)
    }

    #[test]
    fn scalar_set_value_updates_time_tree() {
        let meta = TypeRegistry::scalar("i64", 8, 8);
        let mut ts = TSValue::new_scalar(meta);
        let now = t(1);
        ts.view_mut().set_value(Value::Scalar(Scalar::I64(42)), now).unwrap();
        assert!(ts.modified_at(now));
        assert_eq!(ts.view().get_value(), Some(&Value::Scalar(Scalar::I64(42))));
    }

    #[test]
    fn set_ts_add_then_remove_same_tick_cancels_delta() {
        let meta = TypeRegistry::scalar("i64", 8, 8);
        let mut ts = TSValue::new_set(meta.clone());
        let now = t(1);
        let v = Value::Scalar(Scalar::I64(7));
        ts.view_mut().insert_set(v.clone(), now).unwrap();
        ts.view_mut().erase_set(&v, now).unwrap();
        assert_eq!(ts.view().added().count(), 0);
        assert_eq!(ts.view().removed().count(), 0);
    }

    #[test]
    fn dict_ts_last_write_wins_within_tick() {
        let meta = TypeRegistry::scalar("i64", 8, 8);
        let mut ts = TSValue::new_dict(meta.clone());
        let now = t(1);
        let key = Value::Scalar(Scalar::I64(1));
        ts.view_mut()
            .set_key(key.clone(), TSValue::new_scalar(meta.clone()), now)
            .unwrap();
        ts.view_mut()
            .set_key(key.clone(), TSValue::new_scalar(meta), now)
            .unwrap();
        assert_eq!(ts.view().size(), 1);
    }

    #[test]
    fn window_keeps_capacity_plus_one_entries() {
        let meta = TypeRegistry::scalar("i64", 8, 8);
        let mut ts = TSValue::new_window(meta, 2);
        for i in 0..5 {
            ts.view_mut()
                .push_window(Value::Scalar(Scalar::I64(i)), t(i))
                .unwrap();
        }
        assert_eq!(ts.view().size(), 3);
    }

    #[test]
    fn clear_delta_leaves_last_modified_untouched() {
        let meta = TypeRegistry::scalar("i64", 8, 8);
        let mut ts = TSValue::new_set(meta);
        let now = t(1);
        ts.view_mut().insert_set(Value::Scalar(Scalar::I64(1)), now).unwrap();
        ts.clear_delta();
        assert_eq!(ts.last_modified_time(), Some(now));
        assert_eq!(ts.view().added().count(), 0);
    }

    #[test]
    fn at_mut_records_modified_index_and_schedules_observer() {
        let meta = TypeRegistry::scalar("i64", 8, 8);
        let mut ts = TSValue::new_list(meta.clone());
        ts.view_mut().push_back(TSValue::new_scalar(meta.clone()), t(0)).unwrap();
        ts.view_mut().push_back(TSValue::new_scalar(meta), t(0)).unwrap();

        let observer = NodeId { index: 9, generation: 0 };
        ts.observers_mut().subscribe(observer, NotifyKind::ValueChanged);
        crate::subscription::drain_pending_wakes();

        let now = t(2);
        ts.view_mut()
            .at_mut(1, now)
            .unwrap()
            .set_value(Value::Scalar(Scalar::I64(5)), now)
            .unwrap();

        assert_eq!(ts.view().modified_indices().collect::<Vec<_>>(), vec![1]);
        assert_eq!(ts.last_modified_time(), Some(now));
        assert_eq!(crate::subscription::drain_pending_wakes(), vec![observer, observer]);
    }

    #[test]
    fn apply_delta_batches_set_edits_into_one_notification() {
        let meta = TypeRegistry::scalar("i64", 8, 8);
        let mut ts = TSValue::new_set(meta);
        let observer = NodeId { index: 3, generation: 0 };
        ts.observers_mut().subscribe(observer, NotifyKind::StructureChanged);
        crate::subscription::drain_pending_wakes();

        let now = t(1);
        ts.view_mut()
            .apply_delta(
                [
                    DeltaOp::SetAdd(Value::Scalar(Scalar::I64(1))),
                    DeltaOp::SetAdd(Value::Scalar(Scalar::I64(2))),
                ],
                now,
            )
            .unwrap();

        assert_eq!(ts.view().added().count(), 2);
        assert_eq!(crate::subscription::drain_pending_wakes(), vec![observer]);
    }

    #[test]
    fn rebind_ref_notifies_structure_changed_not_value_changed() {
        let mut ts = TSValue::new_ref();
        let observer = NodeId { index: 4, generation: 0 };
        ts.observers_mut().subscribe(observer, NotifyKind::StructureChanged);
        crate::subscription::drain_pending_wakes();

        ts.view_mut()
            .rebind_ref(Some(NodeId { index: 1, generation: 0 }), t(1))
            .unwrap();

        assert_eq!(crate::subscription::drain_pending_wakes(), vec![observer]);
    }
}
