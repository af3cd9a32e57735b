//! A reusable sub-graph with a stable recordable identity.
//!
//! Grounded on `original_source/.../runtime/record_replay.h`
//! (`RECORDABLE_ID_TRAIT`) and spec §4.8: a `Component`'s fully-qualified
//! recordable id is the dotted concatenation of every ancestor's
//! `recordable_id` trait; absence of any ancestor's id in the outermost
//! scope is a fatal wiring error.

use crate::engine::Time;
use crate::error::Result;
use crate::graph::Graph;
use crate::node::{Node, Scheduler};
use crate::recordable::{fq_recordable_id, NodePath, RecordableId};
use std::fmt;

/// Wraps a nested graph, exposing it under a stable fully-qualified
/// recordable id computed once at construction (ids never change for the
/// lifetime of the component).
pub struct Component {
    path: NodePath,
    scheduler: Scheduler,
    inner: Graph,
    fq_recordable_id: String,
}

impl Component {
    /// `ancestor_ids` is outermost-first, exactly as `fq_recordable_id`
    /// expects; the component's own id is the last element.
    pub fn new(path: NodePath, inner: Graph, ancestor_ids: &[Option<&RecordableId>]) -> Result<Self> {
        let fq_recordable_id = fq_recordable_id(ancestor_ids)?;
        Ok(Component {
            path,
            scheduler: Scheduler::new(),
            inner,
            fq_recordable_id,
        })
    }

    pub fn fq_recordable_id(&self) -> &str {
        &self.fq_recordable_id
    }

    pub fn inner(&self) -> &Graph {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut Graph {
        &mut self.inner
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("path", &self.path)
            .field("fq_recordable_id", &self.fq_recordable_id)
            .finish_non_exhaustive()
    }
}

impl Node for Component {
    fn path(&self) -> &NodePath {
        &self.path
    }

    fn scheduler(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    fn initialise(&mut self) -> Result<()> {
        self.inner.initialise_all()
    }

    fn start(&mut self) -> Result<()> {
        self.inner.start_all()
    }

    fn eval(&mut self, now: Time) -> Result<()> {
        for id in self.inner.rank_order().to_vec() {
            self.inner.eval_node(id, now)?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.inner.stop_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_ancestor_id_fails_component_construction() {
        let outer = RecordableId("outer".into());
        let err = Component::new(NodePath::root(), Graph::new(None), &[Some(&outer), None]).unwrap_err();
        assert!(matches!(err, crate::error::GraphError::Wiring { .. }));
    }

    #[test]
    fn component_concatenates_ancestor_ids() {
        let outer = RecordableId("outer".into());
        let inner = RecordableId("inner".into());
        let component = Component::new(NodePath::root(), Graph::new(None), &[Some(&outer), Some(&inner)]).unwrap();
        assert_eq!(component.fq_recordable_id(), "outer.inner");
    }
}
