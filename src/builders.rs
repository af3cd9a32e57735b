//! Declarative node/input/output construction from signatures.
//!
//! The teacher generates this capability through a proc-macro DSL
//! (`impl_activity!`/`model!` in the now-deleted `peregrine_macros`
//! crate). A hand-written `syn`/`quote` proc-macro is the one piece of the
//! teacher that cannot be safely transformed without compiling it — one
//! malformed `quote!` breaks every downstream macro use with no way to
//! verify it here — so this module builds the same *capability* (spec
//! §4.9: declarative factories, footprint reporting, composable
//! collection builders) as plain generic structs instead of macro-generated
//! code. See `DESIGN.md` for the full rationale.

use crate::access::{AccessStrategy, OutputHandle};
use crate::engine::Time;
use crate::error::Result;
use crate::node::{Node, NodeId, Scheduler};
use crate::recordable::NodePath;
use crate::ts_value::TSValue;
use crate::value::{TypeMeta, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A named input or output slot in a node signature, paired with the
/// constructor for the `TSValue` it materialises as. `make` is boxed rather
/// than a bare `fn` pointer because `bundle` and `window` slots need to
/// close over construction arguments (`new_bundle`'s field list,
/// `new_window`'s capacity) that a bare `fn(Rc<TypeMeta>) -> TSValue` can't
/// carry; `Rc` rather than `Box` so a bundle's field slots can be shared
/// into the closure without cloning each builder per field.
pub struct IoSlot {
    pub name: String,
    pub type_meta: Rc<TypeMeta>,
    pub make: Rc<dyn Fn(Rc<TypeMeta>) -> TSValue>,
}

impl IoSlot {
    pub fn scalar(name: impl Into<String>, type_meta: Rc<TypeMeta>) -> Self {
        IoSlot {
            name: name.into(),
            type_meta,
            make: Rc::new(TSValue::new_scalar),
        }
    }

    pub fn list(name: impl Into<String>, type_meta: Rc<TypeMeta>) -> Self {
        IoSlot {
            name: name.into(),
            type_meta,
            make: Rc::new(TSValue::new_list),
        }
    }

    pub fn set(name: impl Into<String>, type_meta: Rc<TypeMeta>) -> Self {
        IoSlot {
            name: name.into(),
            type_meta,
            make: Rc::new(TSValue::new_set),
        }
    }

    pub fn dict(name: impl Into<String>, type_meta: Rc<TypeMeta>) -> Self {
        IoSlot {
            name: name.into(),
            type_meta,
            make: Rc::new(TSValue::new_dict),
        }
    }

    /// A composite slot built from its own field slots, each materialised
    /// fresh (via its own `make`) every time this slot's `make` runs, so
    /// sibling nodes built from the same signature get independent field
    /// `TSValue`s rather than sharing one.
    pub fn bundle(name: impl Into<String>, type_meta: Rc<TypeMeta>, fields: Vec<IoSlot>) -> Self {
        let fields = Rc::new(fields);
        IoSlot {
            name: name.into(),
            type_meta,
            make: Rc::new(move |meta| {
                let built = fields.iter().map(|f| (f.make)(f.type_meta.clone())).collect();
                TSValue::new_bundle(meta, built)
            }),
        }
    }

    pub fn window(name: impl Into<String>, type_meta: Rc<TypeMeta>, capacity: usize) -> Self {
        IoSlot {
            name: name.into(),
            type_meta,
            make: Rc::new(move |meta| TSValue::new_window(meta, capacity)),
        }
    }

    /// A REF slot. `type_meta` names the type being referenced for
    /// diagnostics and footprint accounting only — `TSValue::new_ref`
    /// itself takes no type, so `make` ignores it.
    pub fn ref_(name: impl Into<String>, type_meta: Rc<TypeMeta>) -> Self {
        IoSlot {
            name: name.into(),
            type_meta,
            make: Rc::new(|_meta| TSValue::new_ref()),
        }
    }

    /// A SIGNAL slot, the typeless "something happened" pulse. `type_meta`
    /// is carried only for footprint accounting, same as [`Self::ref_`].
    pub fn signal(name: impl Into<String>, type_meta: Rc<TypeMeta>) -> Self {
        IoSlot {
            name: name.into(),
            type_meta,
            make: Rc::new(|_meta| TSValue::new_signal()),
        }
    }
}

/// Everything a builder needs to materialise one node: its input/output
/// shapes, a scalar bag (compile-time constants baked into this instance),
/// and an optional error-output shape for nodes that participate in a
/// try/except boundary.
pub struct NodeSignature {
    pub inputs: Vec<IoSlot>,
    pub outputs: Vec<IoSlot>,
    pub scalars: HashMap<String, Value>,
    pub error_output: Option<Rc<TypeMeta>>,
}

impl NodeSignature {
    pub fn new() -> Self {
        NodeSignature {
            inputs: Vec::new(),
            outputs: Vec::new(),
            scalars: HashMap::new(),
            error_output: None,
        }
    }

    pub fn with_input(mut self, slot: IoSlot) -> Self {
        self.inputs.push(slot);
        self
    }

    pub fn with_output(mut self, slot: IoSlot) -> Self {
        self.outputs.push(slot);
        self
    }

    pub fn with_scalar(mut self, name: impl Into<String>, value: Value) -> Self {
        self.scalars.insert(name.into(), value);
        self
    }
}

impl Default for NodeSignature {
    fn default() -> Self {
        Self::new()
    }
}

/// A builder's estimated memory footprint, so a graph can arena-allocate
/// its nodes up front rather than growing incrementally, per spec §4.9.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Footprint {
    pub bytes: usize,
}

impl Footprint {
    pub fn of<T>() -> Self {
        Footprint { bytes: std::mem::size_of::<T>() }
    }

    pub fn plus(self, other: Footprint) -> Footprint {
        Footprint { bytes: self.bytes + other.bytes }
    }

    pub fn times(self, n: usize) -> Footprint {
        Footprint { bytes: self.bytes * n }
    }
}

/// A declarative factory: given a signature, produces a node instance plus
/// its wired outputs. Inputs are allocated but left unbound; binding them
/// to upstream outputs is a separate step (`AccessStrategy` construction),
/// since it requires resolving `NodeId`s the builder alone doesn't have.
pub trait NodeBuilder {
    fn signature(&self) -> &NodeSignature;
    fn footprint(&self) -> Footprint;
    fn build(&self, path: NodePath) -> Box<dyn Node>;
}

type EvalFn = dyn FnMut(&[Option<AccessStrategy>], &[OutputHandle], Time) -> Result<()>;

/// A generic node driven by a boxed eval closure over its resolved inputs
/// and owned outputs, replacing the teacher's per-activity generated
/// struct with one reusable shape.
pub struct FunctionNode {
    path: NodePath,
    scheduler: Scheduler,
    inputs: Vec<Option<AccessStrategy>>,
    outputs: Vec<OutputHandle>,
    eval_fn: Box<EvalFn>,
}

impl FunctionNode {
    pub fn outputs(&self) -> &[OutputHandle] {
        &self.outputs
    }

    pub fn bind_input(&mut self, index: usize, strategy: AccessStrategy) {
        self.inputs[index] = Some(strategy);
    }

    pub fn unbind_input(&mut self, index: usize) {
        if let Some(strategy) = self.inputs[index].as_mut() {
            strategy.unbind();
        }
        self.inputs[index] = None;
    }
}

impl Node for FunctionNode {
    fn path(&self) -> &NodePath {
        &self.path
    }

    fn scheduler(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    fn eval(&mut self, now: Time) -> Result<()> {
        (self.eval_fn)(&self.inputs, &self.outputs, now)
    }

    fn dispose(&mut self) -> Result<()> {
        for input in self.inputs.iter_mut().flatten() {
            input.unbind();
        }
        Ok(())
    }
}

/// Builds [`FunctionNode`]s from a signature and an eval-closure factory
/// (one closure instance per built node, so per-node state can be captured
/// without shared mutable state between sibling nodes).
pub struct FunctionNodeBuilder<F> {
    signature: NodeSignature,
    make_eval: F,
}

impl<F> FunctionNodeBuilder<F>
where
    F: Fn() -> Box<EvalFn>,
{
    pub fn new(signature: NodeSignature, make_eval: F) -> Self {
        FunctionNodeBuilder { signature, make_eval }
    }

    /// Builds the concrete `FunctionNode` rather than a boxed trait object,
    /// so a caller that needs to keep an `OutputHandle` of its own (a
    /// nested-graph control node grabbing its wrapped node's output before
    /// handing the node to a `Graph`) can clone it before the node is
    /// erased behind `dyn Node`.
    pub fn build_function_node(&self, path: NodePath) -> FunctionNode {
        let outputs = self
            .signature
            .outputs
            .iter()
            .map(|slot| Rc::new(RefCell::new((slot.make)(slot.type_meta.clone()))) as OutputHandle)
            .collect();
        let inputs = self.signature.inputs.iter().map(|_| None).collect();
        FunctionNode {
            path,
            scheduler: Scheduler::new(),
            inputs,
            outputs,
            eval_fn: (self.make_eval)(),
        }
    }
}

impl<F> NodeBuilder for FunctionNodeBuilder<F>
where
    F: Fn() -> Box<EvalFn>,
{
    fn signature(&self) -> &NodeSignature {
        &self.signature
    }

    fn footprint(&self) -> Footprint {
        Footprint::of::<FunctionNode>()
            .plus(Footprint::of::<OutputHandle>().times(self.signature.outputs.len()))
            .plus(Footprint::of::<Option<AccessStrategy>>().times(self.signature.inputs.len()))
    }

    fn build(&self, path: NodePath) -> Box<dyn Node> {
        Box::new(self.build_function_node(path))
    }
}

/// Wraps an element builder to build `count` structurally identical
/// copies, composing the way spec §4.9 requires ("collection builders
/// take an element builder") without needing a distinct node type per
/// collection size.
pub struct CollectionBuilder<B> {
    element: B,
    count: usize,
}

impl<B: NodeBuilder> CollectionBuilder<B> {
    pub fn new(element: B, count: usize) -> Self {
        CollectionBuilder { element, count }
    }

    pub fn build_all(&self, base_path: &NodePath) -> Vec<(NodeId, Box<dyn Node>)> {
        // NodeId assignment happens on insertion into a Graph, so this
        // only builds the boxed nodes; the caller inserts them and pairs
        // up real NodeIds.
        (0..self.count)
            .map(|i| {
                let path = base_path.child(i.to_string());
                (NodeId { index: 0, generation: 0 }, self.element.build(path))
            })
            .collect()
    }

    pub fn footprint(&self) -> Footprint {
        self.element.footprint().times(self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Scalar, TypeRegistry};

    #[test]
    fn function_node_builder_reports_footprint_scaling_with_outputs() {
        let sig = NodeSignature::new()
            .with_output(IoSlot::scalar("out", TypeRegistry::scalar("i64", 8, 8)));
        let builder = FunctionNodeBuilder::new(sig, || {
            Box::new(|_inputs: &[Option<AccessStrategy>], outputs: &[OutputHandle], now: Time| {
                outputs[0]
                    .borrow_mut()
                    .view_mut()
                    .set_value(Value::Scalar(Scalar::I64(8)), now)?;
                Ok(())
            })
        });
        assert!(builder.footprint().bytes > 0);
    }

    #[test]
    fn built_node_evaluates_through_its_closure() {
        let sig = NodeSignature::new()
            .with_output(IoSlot::scalar("out", TypeRegistry::scalar("i64", 8, 8)));
        let builder = FunctionNodeBuilder::new(sig, || {
            Box::new(|_inputs: &[Option<AccessStrategy>], outputs: &[OutputHandle], now: Time| {
                outputs[0]
                    .borrow_mut()
                    .view_mut()
                    .set_value(Value::Scalar(Scalar::I64(8)), now)?;
                Ok(())
            })
        });
        let mut node = builder.build(NodePath::root().child("n"));
        let now = hifitime::Epoch::from_unix_seconds(1.0);
        node.eval(now).unwrap();
    }

    #[test]
    fn bundle_slot_builds_a_field_accessible_by_name() {
        use crate::value::TypeMeta;
        let field_meta = TypeRegistry::scalar("i64", 8, 8);
        let bundle_meta = TypeMeta::bundle(vec![("a".to_string(), field_meta.clone())]);
        let slot = IoSlot::bundle("pair", bundle_meta, vec![IoSlot::scalar("a", field_meta)]);
        let built = (slot.make)(slot.type_meta.clone());
        assert!(built.view().field("a").is_some());
    }

    #[test]
    fn window_slot_threads_capacity_into_new_window() {
        let slot = IoSlot::window("recent", TypeRegistry::scalar("i64", 8, 8), 3);
        let built = (slot.make)(slot.type_meta.clone());
        assert_eq!(built.view().capacity(), Some(3));
    }

    #[test]
    fn ref_slot_ignores_type_meta_and_builds_a_ref() {
        let slot = IoSlot::ref_("target", TypeRegistry::scalar("i64", 8, 8));
        assert!(matches!((slot.make)(slot.type_meta.clone()), TSValue::Ref(_)));
    }

    #[test]
    fn collection_builder_footprint_scales_with_count() {
        let sig = NodeSignature::new()
            .with_output(IoSlot::scalar("out", TypeRegistry::scalar("i64", 8, 8)));
        let element = FunctionNodeBuilder::new(sig, || {
            Box::new(|_: &[Option<AccessStrategy>], _: &[OutputHandle], _: Time| Ok(()))
        });
        let collection = CollectionBuilder::new(element, 4);
        let single = collection.element.footprint();
        assert_eq!(collection.footprint(), single.times(4));
    }
}
