//! Maintains one child graph per key of a `TSD` input, adding and removing
//! child graphs as the key set changes.
//!
//! Grounded on `original_source/.../api/python/py_mesh_node.cpp`'s
//! `TsdMapNode<T>` (the base `Mesh` specializes), generalized from the
//! teacher's nested-arena/child-timeline pattern to per-key child graphs.

use crate::access::OutputHandle;
use crate::engine::Time;
use crate::error::Result;
use crate::graph::Graph;
use crate::node::{Node, Scheduler};
use crate::recordable::NodePath;
use crate::value::Value;
use std::collections::HashMap;

/// Builds a fresh child graph for a newly-added key.
pub trait ChildGraphFactory {
    fn build(&self, key: &Value, path: NodePath) -> Graph;
}

impl<F: Fn(&Value, NodePath) -> Graph> ChildGraphFactory for F {
    fn build(&self, key: &Value, path: NodePath) -> Graph {
        self(key, path)
    }
}

/// One entry's child graph plus its own per-key evaluation clock
/// forwarding scheduling to the outer engine (spec §4.8: "each child graph
/// has its own nested evaluation clock forwarding scheduling to the outer
/// engine" — represented here simply as the child graph's own rank order;
/// the outer `MapOverKeys::eval` drives it directly rather than through a
/// separate clock object, since nested graphs only ever run synchronously
/// inside the owning node's `eval`, per spec §5).
struct Child {
    graph: Graph,
}

pub struct MapOverKeys<F> {
    path: NodePath,
    scheduler: Scheduler,
    input: OutputHandle,
    factory: F,
    children: HashMap<Value, Child>,
}

impl<F: ChildGraphFactory> MapOverKeys<F> {
    pub fn new(path: NodePath, input: OutputHandle, factory: F) -> Self {
        MapOverKeys {
            path,
            scheduler: Scheduler::new(),
            input,
            factory,
            children: HashMap::new(),
        }
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn has_child(&self, key: &Value) -> bool {
        self.children.contains_key(key)
    }
}

impl<F: ChildGraphFactory> Node for MapOverKeys<F> {
    fn path(&self) -> &NodePath {
        &self.path
    }

    fn scheduler(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    fn eval(&mut self, now: Time) -> Result<()> {
        let (added, removed): (Vec<Value>, Vec<Value>) = {
            let input = self.input.borrow();
            let view = input.view();
            (
                view.added_keys().cloned().collect(),
                view.removed_keys().cloned().collect(),
            )
        };

        // Removed keys stop and dispose their child graph before this
        // tick's observer notifications fire, per spec §4.8 scenario 5.
        for key in removed {
            if let Some(mut child) = self.children.remove(&key) {
                child.graph.stop_all()?;
            }
        }

        for key in added {
            let child_path = self.path.child(format!("{key:?}"));
            let mut graph = self.factory.build(&key, child_path);
            graph.initialise_all()?;
            graph.start_all()?;
            self.children.insert(key, Child { graph });
        }

        for child in self.children.values_mut() {
            for id in child.graph.rank_order().to_vec() {
                child.graph.eval_node(id, now)?;
            }
        }

        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        for child in self.children.values_mut() {
            child.graph.stop_all()?;
        }
        Ok(())
    }
}
