//! A map-over-keys node with an explicit key-to-key dependency graph,
//! evaluated in dependency order within a tick.
//!
//! Grounded on `api/python/py_mesh_node.cpp`'s `MeshNode<T>: TsdMapNode<T>`
//! with `_add_graph_dependency`/`_remove_graph_dependency`, confirming Mesh
//! is a map-over-keys specialization with an added dependency graph rather
//! than a separate node kind.

use crate::access::OutputHandle;
use crate::engine::Time;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::node::{Node, Scheduler};
use crate::nested::map_over_keys::ChildGraphFactory;
use crate::recordable::NodePath;
use crate::value::Value;
use std::collections::{HashMap, HashSet};

struct Child {
    graph: Graph,
}

/// Maintains one child graph per key (as `MapOverKeys` does) plus a directed
/// dependency graph among keys. Within a tick, a key's child graph is
/// evaluated only after every key it depends on has evaluated, per spec
/// §4.8 scenario 6.
pub struct Mesh<F> {
    path: NodePath,
    scheduler: Scheduler,
    input: OutputHandle,
    factory: F,
    children: HashMap<Value, Child>,
    /// `depends_on[k]` is the set of keys `k` must evaluate after.
    depends_on: HashMap<Value, HashSet<Value>>,
}

impl<F: ChildGraphFactory> Mesh<F> {
    pub fn new(path: NodePath, input: OutputHandle, factory: F) -> Self {
        Mesh {
            path,
            scheduler: Scheduler::new(),
            input,
            factory,
            children: HashMap::new(),
            depends_on: HashMap::new(),
        }
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn has_child(&self, key: &Value) -> bool {
        self.children.contains_key(key)
    }

    /// Registers that `key`'s sub-graph must evaluate strictly after
    /// `depends_on`'s, this tick and every tick after. Adding a dependency
    /// that would close a cycle is a wiring error, not silently accepted
    /// (spec §7's WiringError: "cycle in dependency graph of mesh keys").
    pub fn add_graph_dependency(&mut self, key: Value, depends_on: Value) -> Result<()> {
        self.depends_on.entry(key.clone()).or_default().insert(depends_on.clone());
        if self.topological_order().is_none() {
            self.depends_on.get_mut(&key).unwrap().remove(&depends_on);
            return Err(GraphError::wiring(format!(
                "adding dependency {key:?} -> {depends_on:?} would create a cycle in the mesh key graph"
            )));
        }
        Ok(())
    }

    pub fn remove_graph_dependency(&mut self, key: &Value, depends_on: &Value) {
        if let Some(deps) = self.depends_on.get_mut(key) {
            deps.remove(depends_on);
        }
    }

    /// A valid evaluation order over every currently-live key, respecting
    /// `depends_on`. `None` if the dependency graph contains a cycle.
    fn topological_order(&self) -> Option<Vec<Value>> {
        let mut visited: HashMap<&Value, u8> = HashMap::new(); // 0=unvisited,1=visiting,2=done
        let mut order = Vec::with_capacity(self.children.len());

        fn visit<'a>(
            key: &'a Value,
            depends_on: &'a HashMap<Value, HashSet<Value>>,
            visited: &mut HashMap<&'a Value, u8>,
            order: &mut Vec<Value>,
        ) -> bool {
            match visited.get(key) {
                Some(2) => return true,
                Some(1) => return false,
                _ => {}
            }
            visited.insert(key, 1);
            if let Some(deps) = depends_on.get(key) {
                for dep in deps {
                    if !visit(dep, depends_on, visited, order) {
                        return false;
                    }
                }
            }
            visited.insert(key, 2);
            order.push(key.clone());
            true
        }

        for key in self.children.keys() {
            if !visit(key, &self.depends_on, &mut visited, &mut order) {
                return None;
            }
        }
        Some(order)
    }
}

impl<F: ChildGraphFactory> Node for Mesh<F> {
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

        for key in removed {
            if let Some(mut child) = self.children.remove(&key) {
                child.graph.stop_all()?;
            }
            self.depends_on.remove(&key);
            for deps in self.depends_on.values_mut() {
                deps.remove(&key);
            }
        }

        for key in added {
            let child_path = self.path.child(format!("{key:?}"));
            let mut graph = self.factory.build(&key, child_path);
            graph.initialise_all()?;
            graph.start_all()?;
            self.children.insert(key, Child { graph });
        }

        let order = self
            .topological_order()
            .ok_or_else(|| GraphError::wiring("mesh key dependency graph contains a cycle"))?;

        for key in order {
            if let Some(child) = self.children.get_mut(&key) {
                for id in child.graph.rank_order().to_vec() {
                    child.graph.eval_node(id, now)?;
                }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts_value::TSValue;
    use crate::value::{Scalar, TypeRegistry};
    use hifitime::Epoch;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct RecordingNode {
        path: NodePath,
        scheduler: Scheduler,
        log: Rc<RefCell<Vec<String>>>,
        label: String,
    }
    impl Node for RecordingNode {
        fn path(&self) -> &NodePath {
            &self.path
        }
        fn scheduler(&mut self) -> &mut Scheduler {
            &mut self.scheduler
        }
        fn eval(&mut self, _now: Time) -> Result<()> {
            self.log.borrow_mut().push(self.label.clone());
            Ok(())
        }
    }

    #[test]
    fn dependency_key_evaluates_before_dependent_key() {
        let meta = TypeRegistry::scalar("string", 24, 8);
        let input: OutputHandle = Rc::new(RefCell::new(TSValue::new_dict(meta)));
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_for_factory = log.clone();
        let mut mesh = Mesh::new(NodePath::root().child("mesh"), input.clone(), move |key: &Value, path: NodePath| {
            let mut g = Graph::new(None);
            g.insert(Box::new(RecordingNode {
                path: path.child("inner"),
                scheduler: Scheduler::new(),
                log: log_for_factory.clone(),
                label: format!("{key:?}"),
            }));
            g
        });

        let k1 = Value::Scalar(Scalar::I64(1));
        let k2 = Value::Scalar(Scalar::I64(2));

        let t1 = Epoch::from_unix_seconds(1.0);
        input
            .borrow_mut()
            .view_mut()
            .set_key(k1.clone(), TSValue::new_scalar(TypeRegistry::scalar("i64", 8, 8)), t1)
            .unwrap();
        input
            .borrow_mut()
            .view_mut()
            .set_key(k2.clone(), TSValue::new_scalar(TypeRegistry::scalar("i64", 8, 8)), t1)
            .unwrap();
        mesh.eval(t1).unwrap();
        mesh.add_graph_dependency(k2.clone(), k1.clone()).unwrap();

        log.borrow_mut().clear();
        input.borrow_mut().clear_delta();
        let t2 = Epoch::from_unix_seconds(2.0);
        mesh.eval(t2).unwrap();

        let order = log.borrow().clone();
        let pos1 = order.iter().position(|s| s == &format!("{k1:?}")).unwrap();
        let pos2 = order.iter().position(|s| s == &format!("{k2:?}")).unwrap();
        assert!(pos1 < pos2);
    }

    #[test]
    fn adding_a_cyclic_dependency_is_rejected() {
        let meta = TypeRegistry::scalar("string", 24, 8);
        let input: OutputHandle = Rc::new(RefCell::new(TSValue::new_dict(meta)));
        let mut mesh = Mesh::new(NodePath::root().child("mesh"), input.clone(), |_k: &Value, path: NodePath| {
            let mut g = Graph::new(None);
            g.insert(Box::new(RecordingNode {
                path: path.child("inner"),
                scheduler: Scheduler::new(),
                log: Rc::new(RefCell::new(Vec::new())),
                label: String::new(),
            }));
            g
        });

        let k1 = Value::Scalar(Scalar::I64(1));
        let k2 = Value::Scalar(Scalar::I64(2));
        let t1 = Epoch::from_unix_seconds(1.0);
        input
            .borrow_mut()
            .view_mut()
            .set_key(k1.clone(), TSValue::new_scalar(TypeRegistry::scalar("i64", 8, 8)), t1)
            .unwrap();
        input
            .borrow_mut()
            .view_mut()
            .set_key(k2.clone(), TSValue::new_scalar(TypeRegistry::scalar("i64", 8, 8)), t1)
            .unwrap();
        mesh.eval(t1).unwrap();

        mesh.add_graph_dependency(k2.clone(), k1.clone()).unwrap();
        let err = mesh.add_graph_dependency(k1, k2).unwrap_err();
        assert!(matches!(err, GraphError::Wiring { .. }));
    }
}
