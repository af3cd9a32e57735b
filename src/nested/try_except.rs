//! Exception isolation around a nested graph's evaluation.
//!
//! Grounded on `original_source/.../nodes/try_except_node.h`: the inner
//! output stub writes to a *scratch time* instead of the outer `out`
//! field's real time storage, so a failed eval neither marks `out`
//! modified nor leaves it at a stale value observers would misread as
//! fresh.

use crate::access::OutputHandle;
use crate::engine::Time;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::node::{Node, Scheduler};
use crate::recordable::NodePath;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Wraps a nested graph; on a failed inner eval, captures the error into
/// `error` (with the offending node's path and the engine time) and
/// leaves `out`'s `last_modified_time` exactly where it was before this
/// tick — callers observe neither a spurious modification nor silent
/// staleness.
pub struct TryExcept {
    path: NodePath,
    scheduler: Scheduler,
    inner: Graph,
    /// The wrapped node's own output, copied into `out` only on success.
    inner_out: OutputHandle,
    out: OutputHandle,
    error: OutputHandle,
    /// Last engine time the inner graph was *attempted* at, whether or
    /// not it succeeded — the scratch counterpart of `out`'s real time
    /// tree.
    scratch_time: Option<Time>,
}

impl TryExcept {
    pub fn new(path: NodePath, inner: Graph, inner_out: OutputHandle, out: OutputHandle, error: OutputHandle) -> Self {
        TryExcept {
            path,
            scheduler: Scheduler::new(),
            inner,
            inner_out,
            out,
            error,
            scratch_time: None,
        }
    }

    pub fn scratch_time(&self) -> Option<Time> {
        self.scratch_time
    }

    pub fn out(&self) -> &OutputHandle {
        &self.out
    }

    pub fn error(&self) -> &OutputHandle {
        &self.error
    }
}

impl Node for TryExcept {
    fn path(&self) -> &NodePath {
        &self.path
    }

    fn scheduler(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    fn eval(&mut self, now: Time) -> Result<()> {
        self.scratch_time = Some(now);

        let mut failure: Option<GraphError> = None;
        for id in self.inner.rank_order().to_vec() {
            if let Err(err) = self.inner.eval_node(id, now) {
                failure = Some(err);
                break;
            }
        }

        match failure {
            Some(err) => {
                let message = format!("{} at {:?}: {}", self.path, now, err);
                self.error
                    .borrow_mut()
                    .view_mut()
                    .set_value(Value::from_heap(message), now)?;
                // Deliberately do not touch `out`'s time/value: a failed
                // eval must not mark it modified, nor may it leave a value
                // from a half-finished inner write.
                Ok(())
            }
            None => {
                let produced = self.inner_out.borrow().view().get_value().cloned();
                if let Some(value) = produced {
                    self.out.borrow_mut().view_mut().set_value(value, now)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts_value::TSValue;
    use crate::value::{Scalar, TypeRegistry};
    use hifitime::Epoch;

    fn scalar_output() -> OutputHandle {
        let meta = TypeRegistry::scalar("i64", 8, 8);
        Rc::new(RefCell::new(TSValue::new_scalar(meta)))
    }

    struct FailingNode {
        path: NodePath,
        scheduler: Scheduler,
    }
    impl Node for FailingNode {
        fn path(&self) -> &NodePath {
            &self.path
        }
        fn scheduler(&mut self) -> &mut Scheduler {
            &mut self.scheduler
        }
        fn eval(&mut self, now: Time) -> Result<()> {
            Err(GraphError::eval(self.path.clone(), now, anyhow::anyhow!("boom")))
        }
    }

    #[test]
    fn failed_inner_eval_leaves_out_untouched_and_records_error() {
        let mut inner = Graph::new(None);
        inner.insert(Box::new(FailingNode {
            path: NodePath::root().child("inner"),
            scheduler: Scheduler::new(),
        }));

        let inner_out = scalar_output();
        let out = scalar_output();
        let error = scalar_output();

        let t1 = Epoch::from_unix_seconds(1.0);
        out.borrow_mut().view_mut().set_value(Value::Scalar(Scalar::I64(1)), t1).unwrap();

        let mut node = TryExcept::new(NodePath::root().child("try"), inner, inner_out, out.clone(), error.clone());
        let t3 = Epoch::from_unix_seconds(3.0);
        node.eval(t3).unwrap();

        assert_eq!(out.borrow().last_modified_time(), Some(t1));
        assert!(error.borrow().last_modified_time().is_some());
        assert_eq!(node.scratch_time(), Some(t3));
    }
}
