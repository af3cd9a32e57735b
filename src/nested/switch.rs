//! Selects one of a set of named branch sub-graphs based on a key input.
//!
//! Grounded on spec §4.8 ("selects one of a set of named branch sub-graphs
//! based on a key input; swapping branches unbinds the old branch's inputs
//! and binds the new branch") and `access.rs`'s `AccessStrategy::unbind`,
//! which is exactly the teardown a branch swap needs to perform on its
//! bound inputs before the new branch starts.

use crate::access::{AccessStrategy, OutputHandle};
use crate::engine::Time;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::node::{Node, Scheduler};
use crate::recordable::NodePath;
use crate::value::Value;
use std::collections::HashMap;

struct Branch {
    graph: Graph,
    output: OutputHandle,
    /// Inputs this branch's nodes bind through, torn down on swap-out.
    bound_inputs: Vec<AccessStrategy>,
}

/// Every branch is pre-built and registered at construction; `Switch`
/// itself only starts/stops whichever one is currently selected, copying
/// its output to `out`.
pub struct Switch {
    path: NodePath,
    scheduler: Scheduler,
    key: OutputHandle,
    out: OutputHandle,
    branches: HashMap<String, Branch>,
    active: Option<String>,
}

impl Switch {
    pub fn new(path: NodePath, key: OutputHandle, out: OutputHandle) -> Self {
        Switch {
            path,
            scheduler: Scheduler::new(),
            key,
            out,
            branches: HashMap::new(),
            active: None,
        }
    }

    pub fn add_branch(&mut self, name: impl Into<String>, graph: Graph, output: OutputHandle, bound_inputs: Vec<AccessStrategy>) {
        self.branches.insert(
            name.into(),
            Branch {
                graph,
                output,
                bound_inputs,
            },
        );
    }

    pub fn active_branch(&self) -> Option<&str> {
        self.active.as_deref()
    }

    fn branch_name_from_key(&self) -> Option<String> {
        match self.key.borrow().view().get_value() {
            Some(Value::Heap(h)) => h.as_any().downcast_ref::<String>().cloned(),
            _ => None,
        }
    }

    fn swap_to(&mut self, name: Option<&str>, now: Time) -> Result<()> {
        if let Some(old_name) = self.active.take() {
            if let Some(old) = self.branches.get_mut(&old_name) {
                for strategy in old.bound_inputs.iter_mut() {
                    strategy.unbind();
                }
                old.graph.stop_all()?;
            }
        }
        if let Some(name) = name {
            let branch = self
                .branches
                .get_mut(name)
                .ok_or_else(|| GraphError::binding(self.path.clone(), format!("no such switch branch: {name}")))?;
            branch.graph.initialise_all()?;
            branch.graph.start_all()?;
            for id in branch.graph.rank_order().to_vec() {
                branch.graph.eval_node(id, now)?;
            }
            let value = branch.output.borrow().view().get_value().cloned();
            if let Some(value) = value {
                self.out.borrow_mut().view_mut().set_value(value, now)?;
            }
            self.active = Some(name.to_string());
        }
        Ok(())
    }
}

impl Node for Switch {
    fn path(&self) -> &NodePath {
        &self.path
    }

    fn scheduler(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    fn eval(&mut self, now: Time) -> Result<()> {
        let wanted = self.branch_name_from_key();
        if wanted.as_deref() != self.active.as_deref() {
            self.swap_to(wanted.as_deref(), now)?;
        } else if let Some(name) = self.active.clone() {
            let branch = self.branches.get_mut(&name).unwrap();
            for id in branch.graph.rank_order().to_vec() {
                branch.graph.eval_node(id, now)?;
            }
            let value = branch.output.borrow().view().get_value().cloned();
            if let Some(value) = value {
                self.out.borrow_mut().view_mut().set_value(value, now)?;
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(name) = &self.active {
            if let Some(branch) = self.branches.get_mut(name) {
                branch.graph.stop_all()?;
            }
        }
        Ok(())
    }
}
