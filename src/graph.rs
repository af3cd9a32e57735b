//! The node arena, rank order, and traits map that make up one graph.
//!
//! Grounded on the teacher's `Node` trait (`peregrine/src/operation.rs`)
//! and its `Plan` (`peregrine/src/lib.rs`: `activities: HashMap`, a bump
//! arena, and an `id_counter`), generalized from a flat activity table to
//! a generational node arena per the cyclic-ownership design note in spec
//! §9.

use crate::engine::{PushInput, Time};
use crate::error::{GraphError, Result};
use crate::node::{Node, NodeId, ScheduledWake};
use crate::recordable::RECORDABLE_ID_TRAIT;
use std::collections::HashMap;
use tracing::{debug, instrument};

enum Slot {
    Vacant(u32),
    Occupied(u32, Box<dyn Node>),
}

/// An ordered sequence of nodes (insertion order doubles as topological
/// rank, per spec §3 — builders are responsible for inserting nodes in
/// dependency order), a traits map inherited by nested graphs, and an
/// optional parent node for nested graphs.
pub struct Graph {
    parent: Option<NodeId>,
    traits: HashMap<String, String>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    rank_order: Vec<NodeId>,
}

impl Graph {
    pub fn new(parent: Option<NodeId>) -> Self {
        Graph {
            parent,
            traits: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            rank_order: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn set_trait(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.traits.insert(key.into(), value.into());
    }

    pub fn get_trait(&self, key: &str) -> Option<&str> {
        self.traits.get(key).map(String::as_str)
    }

    pub fn recordable_id(&self) -> Option<&str> {
        self.get_trait(RECORDABLE_ID_TRAIT)
    }

    pub fn rank_order(&self) -> &[NodeId] {
        &self.rank_order
    }

    /// Inserts a node at the end of the current rank order.
    pub fn insert(&mut self, node: Box<dyn Node>) -> NodeId {
        let id = if let Some(index) = self.free.pop() {
            let generation = match self.slots[index] {
                Slot::Vacant(g) => g,
                Slot::Occupied(..) => unreachable!("free list pointed at occupied slot"),
            };
            self.slots[index] = Slot::Occupied(generation, node);
            NodeId { index, generation }
        } else {
            let index = self.slots.len();
            self.slots.push(Slot::Occupied(0, node));
            NodeId { index, generation: 0 }
        };
        self.rank_order.push(id);
        id
    }

    pub fn get(&self, id: NodeId) -> Result<&dyn Node> {
        match self.slots.get(id.index) {
            Some(Slot::Occupied(g, node)) if *g == id.generation => Ok(node.as_ref()),
            _ => Err(GraphError::wiring(format!("node {id:?} no longer exists"))),
        }
    }

    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut dyn Node> {
        match self.slots.get_mut(id.index) {
            Some(Slot::Occupied(g, node)) if *g == id.generation => Ok(node.as_mut()),
            _ => Err(GraphError::wiring(format!("node {id:?} no longer exists"))),
        }
    }

    /// Removes a node permanently. Its `NodeId` slot is recycled with a
    /// bumped generation, so any stale `NodeId` still held by a since-freed
    /// observer resolves to nothing rather than to whatever node now
    /// occupies that slot, per the generational-arena design in spec §9.
    pub fn dispose(&mut self, id: NodeId) -> Result<()> {
        self.get_mut(id)?.dispose()?;
        let index = id.index;
        let next_gen = id.generation.wrapping_add(1);
        self.slots[index] = Slot::Vacant(next_gen);
        self.free.push(index);
        self.rank_order.retain(|n| *n != id);
        Ok(())
    }

    pub fn initialise_all(&mut self) -> Result<()> {
        for id in self.rank_order.clone() {
            self.get_mut(id)?.initialise()?;
        }
        Ok(())
    }

    pub fn start_all(&mut self) -> Result<()> {
        for id in self.rank_order.clone() {
            self.get_mut(id)?.start()?;
        }
        Ok(())
    }

    pub fn stop_all(&mut self) -> Result<()> {
        for id in self.rank_order.clone() {
            self.get_mut(id)?.stop()?;
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    pub fn eval_node(&mut self, id: NodeId, now: Time) -> Result<()> {
        let node = self.get_mut(id)?;
        debug!(path = %node.path(), ?now, "evaluating node");
        node.eval(now)
    }

    pub fn apply_push_input(&mut self, input: PushInput, now: Time) -> Result<()> {
        let node = self.get_mut(input.target)?;
        node.receive_push(input.value, now)
    }

    /// Reads and consumes `id`'s self-reported next wake time, if any, so
    /// the engine can fold it back into the global wake heap.
    pub fn take_reschedule(&mut self, id: NodeId) -> Option<ScheduledWake> {
        let node = self.get_mut(id).ok()?;
        let scheduler = node.scheduler();
        let time = scheduler.wake_time()?;
        scheduler.consume();
        Some(ScheduledWake { time, node: id })
    }

    pub fn len(&self) -> usize {
        self.rank_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rank_order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Scheduler;
    use crate::recordable::NodePath;
    use crate::value::Value;
    use hifitime::Epoch;

    struct CountingNode {
        path: NodePath,
        scheduler: Scheduler,
        evals: usize,
    }

    impl Node for CountingNode {
        fn path(&self) -> &NodePath {
            &self.path
        }
        fn scheduler(&mut self) -> &mut Scheduler {
            &mut self.scheduler
        }
        fn eval(&mut self, now: Time) -> Result<()> {
            self.evals += 1;
            self.scheduler.wake_at(now + crate::engine::min_td(), Some(now));
            Ok(())
        }
    }

    fn node(name: &str) -> Box<CountingNode> {
        Box::new(CountingNode {
            path: NodePath::root().child(name),
            scheduler: Scheduler::new(),
            evals: 0,
        })
    }

    #[test]
    fn insert_assigns_ids_and_rank_order() {
        let mut g = Graph::new(None);
        let a = g.insert(node("a"));
        let b = g.insert(node("b"));
        assert_eq!(g.rank_order(), &[a, b]);
    }

    #[test]
    fn dispose_recycles_slot_with_bumped_generation() {
        let mut g = Graph::new(None);
        let a = g.insert(node("a"));
        g.dispose(a).unwrap();
        assert!(g.get(a).is_err());

        let b = g.insert(node("b"));
        assert_eq!(b.index, a.index);
        assert_ne!(b.generation, a.generation);
        assert!(g.get(a).is_err());
        assert!(g.get(b).is_ok());
    }

    #[test]
    fn eval_node_and_reschedule_round_trip() {
        let mut g = Graph::new(None);
        let a = g.insert(node("a"));
        let now = Epoch::from_unix_seconds(0.0);
        g.eval_node(a, now).unwrap();
        let wake = g.take_reschedule(a).unwrap();
        assert_eq!(wake.node, a);
        assert!(wake.time > now);
        assert!(g.take_reschedule(a).is_none());
    }

    #[test]
    fn push_input_to_node_without_receive_push_is_wiring_error() {
        let mut g = Graph::new(None);
        let a = g.insert(node("a"));
        let err = g
            .apply_push_input(
                PushInput { target: a, value: Value::Unset },
                Epoch::from_unix_seconds(0.0),
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::Wiring { .. }));
    }
}
