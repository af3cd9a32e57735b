//! Observer lists and the push-scheduling rules that drive notification.
//!
//! Grounded on the teacher's `Upstream::register_downstream_early` /
//! `notify_downstreams` / `Downstream::respond` triad
//! (`peregrine/src/operation/mod.rs`), generalized from async
//! continuation-passing (a downstream `respond`s to a request it made
//! earlier) to direct push scheduling: a write marks its output modified
//! and the output's `ObserverList` schedules every subscriber immediately,
//! because spec §5 mandates single-threaded cooperative evaluation with no
//! automatic parallel scheduling. That redesign is recorded in
//! `DESIGN.md`.

use crate::node::NodeId;
use smallvec::SmallVec;
use std::cell::RefCell;

thread_local! {
    /// Nodes a write has scheduled this tick but the engine hasn't drained
    /// yet. `ObserverList::notify` is called from deep inside a `TSValue`
    /// write, with no path back to the `EvaluationEngine` driving the
    /// current tick; queuing here and draining from `EvaluationEngine::step`
    /// closes that loop without threading an engine handle through every
    /// write call, matching the single-threaded cooperative model of §5.
    static PENDING_WAKES: RefCell<Vec<NodeId>> = RefCell::new(Vec::new());
}

/// Queues `node` to be woken at the engine's next drain. Used as the
/// `schedule` callback passed to [`ObserverList::notify`] by every write
/// path in `ts_value.rs` and `access.rs`.
pub fn queue_wake(node: NodeId) {
    PENDING_WAKES.with(|q| q.borrow_mut().push(node));
}

/// Drains every node queued by [`queue_wake`] since the last drain.
pub fn drain_pending_wakes() -> Vec<NodeId> {
    PENDING_WAKES.with(|q| std::mem::take(&mut *q.borrow_mut()))
}

/// What kind of change an observer is notified about. Most observers only
/// care about "the whole value changed"; collection observers additionally
/// care about structural changes (a key appearing/disappearing) versus
/// in-place mutation of an existing child, since e.g. a `Reduce` node folds
/// these differently.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum NotifyKind {
    ValueChanged,
    StructureChanged,
}

/// One subscriber: a node plus the kind of change it wants to hear about
/// from this output. `(node, kind)` pairs are deduplicated on insert, per
/// spec §4.5 — subscribing twice for the same kind is a no-op, matching
/// the teacher's `register_downstream_early` idempotency.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
struct Observer {
    node: NodeId,
    kind: NotifyKind,
}

/// The set of nodes subscribed to one output, in subscription order.
/// Small by construction for almost every output (a handful of
/// downstreams), so a `SmallVec` avoids a heap allocation in the common
/// case, matching the teacher's preference for `smallvec` over `Vec` on
/// hot per-output state.
#[derive(Debug, Default)]
pub struct ObserverList {
    observers: SmallVec<[Observer; 4]>,
    /// Writes that arrived while this list was being iterated (a node's
    /// `eval` unsubscribing or resubscribing itself or a sibling mid-walk).
    /// Applied once the walk completes, per spec §5's explicit
    /// unbind-during-iteration rule.
    deferred: SmallVec<[DeferredEdit; 4]>,
    iterating: bool,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum DeferredEdit {
    Subscribe(Observer),
    Unsubscribe(NodeId, NotifyKind),
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, node: NodeId, kind: NotifyKind) {
        let observer = Observer { node, kind };
        if self.iterating {
            self.deferred.push(DeferredEdit::Subscribe(observer));
            return;
        }
        if !self.observers.iter().any(|o| *o == observer) {
            self.observers.push(observer);
        }
    }

    pub fn unsubscribe(&mut self, node: NodeId, kind: NotifyKind) {
        if self.iterating {
            self.deferred.push(DeferredEdit::Unsubscribe(node, kind));
            return;
        }
        self.observers.retain(|o| !(o.node == node && o.kind == kind));
    }

    /// Calls `schedule` once per distinct subscriber of `kind` (and of
    /// `NotifyKind::ValueChanged`, which every observer implicitly wants,
    /// since a structural change is also a value change). Mid-walk
    /// subscribe/unsubscribe calls are deferred and applied after the walk,
    /// so `schedule` never sees the list mutate underneath it.
    pub fn notify(&mut self, kind: NotifyKind, mut schedule: impl FnMut(NodeId)) {
        self.iterating = true;
        for observer in &self.observers {
            let hears_it = observer.kind == kind
                || (kind == NotifyKind::StructureChanged && observer.kind == NotifyKind::ValueChanged);
            if hears_it {
                schedule(observer.node);
            }
        }
        self.iterating = false;
        self.apply_deferred();
    }

    fn apply_deferred(&mut self) {
        for edit in self.deferred.drain(..) {
            match edit {
                DeferredEdit::Subscribe(o) => {
                    if !self.observers.iter().any(|existing| *existing == o) {
                        self.observers.push(o);
                    }
                }
                DeferredEdit::Unsubscribe(node, kind) => {
                    self.observers.retain(|o| !(o.node == node && o.kind == kind));
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(index: usize) -> NodeId {
        NodeId { index, generation: 0 }
    }

    #[test]
    fn subscribing_twice_is_idempotent() {
        let mut list = ObserverList::new();
        list.subscribe(node(1), NotifyKind::ValueChanged);
        list.subscribe(node(1), NotifyKind::ValueChanged);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn notify_schedules_every_distinct_subscriber_once() {
        let mut list = ObserverList::new();
        list.subscribe(node(1), NotifyKind::ValueChanged);
        list.subscribe(node(2), NotifyKind::StructureChanged);
        let mut scheduled = Vec::new();
        list.notify(NotifyKind::StructureChanged, |n| scheduled.push(n));
        assert_eq!(scheduled, vec![node(1), node(2)]);
    }

    #[test]
    fn unsubscribe_during_notify_is_deferred_until_walk_completes() {
        let mut list = ObserverList::new();
        list.subscribe(node(1), NotifyKind::ValueChanged);
        list.subscribe(node(2), NotifyKind::ValueChanged);
        let mut scheduled = Vec::new();
        list.notify(NotifyKind::ValueChanged, |n| {
            scheduled.push(n);
        });
        list.unsubscribe(node(1), NotifyKind::ValueChanged);
        assert_eq!(scheduled.len(), 2);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn value_changed_subscriber_also_hears_structure_changed() {
        let mut list = ObserverList::new();
        list.subscribe(node(1), NotifyKind::ValueChanged);
        let mut scheduled = Vec::new();
        list.notify(NotifyKind::StructureChanged, |n| scheduled.push(n));
        assert_eq!(scheduled, vec![node(1)]);
    }

    #[test]
    fn structure_changed_subscriber_does_not_hear_plain_value_changed() {
        let mut list = ObserverList::new();
        list.subscribe(node(1), NotifyKind::StructureChanged);
        let mut scheduled = Vec::new();
        list.notify(NotifyKind::ValueChanged, |n| scheduled.push(n));
        assert!(scheduled.is_empty());
    }

    #[test]
    fn pending_wakes_drain_once_and_then_are_empty() {
        drain_pending_wakes();
        queue_wake(node(1));
        queue_wake(node(2));
        queue_wake(node(1));
        assert_eq!(drain_pending_wakes(), vec![node(1), node(2), node(1)]);
        assert!(drain_pending_wakes().is_empty());
    }
}
