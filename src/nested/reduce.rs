//! Folds a `TSD` input over a binary operator, minimizing recomputation by
//! applying only the tick's delta when the operator allows it.
//!
//! Grounded on spec §4.8 ("folds an input TSD over an associative (or
//! non-associative) operator, minimizing recomputation by applying only
//! the delta") and `ts_value.rs`'s `TSView::added_keys`/`removed_keys`/
//! `updated_keys`, the same delta API `nested::map_over_keys` consumes.

use crate::access::OutputHandle;
use crate::engine::Time;
use crate::error::Result;
use crate::node::{Node, Scheduler};
use crate::recordable::NodePath;
use crate::value::Value;
use std::collections::HashMap;

/// A binary operator over scalar [`Value`]s. `invert` is the operator's
/// inverse, if it has one (e.g. `+`'s inverse is `-`); an operator without
/// one forces a full recompute on every removal or update, since there is
/// no way to back a retired value out of the running accumulator.
pub trait ReduceOp {
    fn identity(&self) -> Value;
    fn combine(&self, acc: &Value, value: &Value) -> Value;
    fn invert(&self, _acc: &Value, _value: &Value) -> Option<Value> {
        None
    }
}

/// Folds assuming `Op` is associative (and, since dict iteration order
/// isn't part of the contract, commutative): new keys fold in directly,
/// and removed/updated keys fold incrementally whenever `Op::invert` is
/// available, falling back to a full recompute otherwise.
pub struct Reduce<Op> {
    path: NodePath,
    scheduler: Scheduler,
    input: OutputHandle,
    out: OutputHandle,
    op: Op,
    last_seen: HashMap<Value, Value>,
}

impl<Op: ReduceOp> Reduce<Op> {
    pub fn new(path: NodePath, input: OutputHandle, out: OutputHandle, op: Op) -> Self {
        Reduce {
            path,
            scheduler: Scheduler::new(),
            input,
            out,
            op,
            last_seen: HashMap::new(),
        }
    }

    fn full_recompute(&mut self) -> Value {
        let input = self.input.borrow();
        let view = input.view();
        let mut acc = self.op.identity();
        self.last_seen.clear();
        for (key, entry) in view.entries() {
            if let Some(value) = entry.get_value() {
                acc = self.op.combine(&acc, value);
                self.last_seen.insert(key.clone(), value.clone());
            }
        }
        acc
    }
}

impl<Op: ReduceOp> Node for Reduce<Op> {
    fn path(&self) -> &NodePath {
        &self.path
    }

    fn scheduler(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    fn eval(&mut self, now: Time) -> Result<()> {
        let current = self.out.borrow().view().get_value().cloned().unwrap_or_else(|| self.op.identity());

        let (added, updated, removed): (Vec<Value>, Vec<Value>, Vec<Value>) = {
            let input = self.input.borrow();
            let view = input.view();
            (
                view.added_keys().cloned().collect(),
                view.updated_keys().cloned().collect(),
                view.removed_keys().cloned().collect(),
            )
        };

        let needs_full_recompute = (!updated.is_empty() || !removed.is_empty())
            && removed.iter().chain(updated.iter()).any(|key| {
                let old = self.last_seen.get(key);
                match old {
                    Some(old) => self.op.invert(&current, old).is_none(),
                    None => false,
                }
            });

        let result = if needs_full_recompute {
            self.full_recompute()
        } else {
            let mut acc = current;
            for key in removed {
                if let Some(old) = self.last_seen.remove(&key) {
                    if let Some(inverted) = self.op.invert(&acc, &old) {
                        acc = inverted;
                    }
                }
            }
            for key in added.iter().chain(updated.iter()) {
                let input = self.input.borrow();
                let view = input.view();
                if let Some(value) = view.at_key(key).and_then(|v| v.get_value().cloned()) {
                    if let Some(old) = self.last_seen.get(key) {
                        if let Some(inverted) = self.op.invert(&acc, old) {
                            acc = inverted;
                        }
                    }
                    acc = self.op.combine(&acc, &value);
                    self.last_seen.insert(key.clone(), value);
                }
            }
            acc
        };

        self.out.borrow_mut().view_mut().set_value(result, now)
    }
}

/// Folds over `Op` with no assumption of associativity: every tick
/// recomputes from scratch, in current slot order, since a non-associative
/// operator forbids reordering or incremental patching.
pub struct NonAssociativeReduce<Op> {
    path: NodePath,
    scheduler: Scheduler,
    input: OutputHandle,
    out: OutputHandle,
    op: Op,
}

impl<Op: ReduceOp> NonAssociativeReduce<Op> {
    pub fn new(path: NodePath, input: OutputHandle, out: OutputHandle, op: Op) -> Self {
        NonAssociativeReduce {
            path,
            scheduler: Scheduler::new(),
            input,
            out,
            op,
        }
    }
}

impl<Op: ReduceOp> Node for NonAssociativeReduce<Op> {
    fn path(&self) -> &NodePath {
        &self.path
    }

    fn scheduler(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    fn eval(&mut self, now: Time) -> Result<()> {
        let result = {
            let input = self.input.borrow();
            let view = input.view();
            let mut acc = self.op.identity();
            for (_, entry) in view.entries() {
                if let Some(value) = entry.get_value() {
                    acc = self.op.combine(&acc, value);
                }
            }
            acc
        };
        self.out.borrow_mut().view_mut().set_value(result, now)
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

    struct Sum;
    impl ReduceOp for Sum {
        fn identity(&self) -> Value {
            Value::Scalar(Scalar::I64(0))
        }
        fn combine(&self, acc: &Value, value: &Value) -> Value {
            match (acc, value) {
                (Value::Scalar(Scalar::I64(a)), Value::Scalar(Scalar::I64(b))) => Value::Scalar(Scalar::I64(a + b)),
                _ => acc.clone(),
            }
        }
        fn invert(&self, acc: &Value, value: &Value) -> Option<Value> {
            match (acc, value) {
                (Value::Scalar(Scalar::I64(a)), Value::Scalar(Scalar::I64(b))) => Some(Value::Scalar(Scalar::I64(a - b))),
                _ => None,
            }
        }
    }

    fn dict_input() -> OutputHandle {
        Rc::new(RefCell::new(TSValue::new_dict(TypeRegistry::scalar("i64", 8, 8))))
    }

    fn scalar_output() -> OutputHandle {
        Rc::new(RefCell::new(TSValue::new_scalar(TypeRegistry::scalar("i64", 8, 8))))
    }

    #[test]
    fn sum_reduce_folds_additions_incrementally() {
        let input = dict_input();
        let out = scalar_output();
        let mut reduce = Reduce::new(NodePath::root().child("sum"), input.clone(), out.clone(), Sum);

        let t1 = Epoch::from_unix_seconds(1.0);
        for (k, v) in [(1, 10), (2, 20)] {
            input
                .borrow_mut()
                .view_mut()
                .set_key(
                    Value::Scalar(Scalar::I64(k)),
                    TSValue::new_scalar(TypeRegistry::scalar("i64", 8, 8)),
                    t1,
                )
                .unwrap();
            input
                .borrow_mut()
                .view_mut()
                .at_key_mut(&Value::Scalar(Scalar::I64(k)))
                .unwrap()
                .set_value(Value::Scalar(Scalar::I64(v)), t1)
                .unwrap();
        }
        reduce.eval(t1).unwrap();
        assert_eq!(out.borrow().view().get_value(), Some(&Value::Scalar(Scalar::I64(30))));

        input.borrow_mut().clear_delta();
        let t2 = Epoch::from_unix_seconds(2.0);
        input.borrow_mut().view_mut().erase_key(&Value::Scalar(Scalar::I64(1)), t2).unwrap();
        reduce.eval(t2).unwrap();
        assert_eq!(out.borrow().view().get_value(), Some(&Value::Scalar(Scalar::I64(20))));
    }

    #[test]
    fn non_associative_reduce_recomputes_every_tick() {
        let input = dict_input();
        let out = scalar_output();
        let mut reduce = NonAssociativeReduce::new(NodePath::root().child("cat"), input.clone(), out.clone(), Sum);

        let t1 = Epoch::from_unix_seconds(1.0);
        input
            .borrow_mut()
            .view_mut()
            .set_key(
                Value::Scalar(Scalar::I64(1)),
                TSValue::new_scalar(TypeRegistry::scalar("i64", 8, 8)),
                t1,
            )
            .unwrap();
        input
            .borrow_mut()
            .view_mut()
            .at_key_mut(&Value::Scalar(Scalar::I64(1)))
            .unwrap()
            .set_value(Value::Scalar(Scalar::I64(5)), t1)
            .unwrap();
        reduce.eval(t1).unwrap();
        assert_eq!(out.borrow().view().get_value(), Some(&Value::Scalar(Scalar::I64(5))));
    }
}
