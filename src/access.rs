//! The access strategy tree: how a bound input resolves the output it
//! reads from, including REF indirection.
//!
//! Grounded on the teacher's `Timeline`/`UngroundedUpstreamResolver`
//! depth-first resolution pattern (`peregrine/src/timeline.rs`,
//! `operation/ungrounded.rs`): there, an input resolves its upstream by
//! walking grounded/ungrounded timeline entries and caching the resolved
//! `Upstream` pointer; here, an input resolves its bound output by walking
//! this tree and caching rebinds only at `RefObserverAccess` nodes. The
//! four-strategy taxonomy itself is named directly in
//! `original_source/.../types/time_series/access_strategy.h`'s doc
//! comment.

use crate::node::NodeId;
use crate::subscription::NotifyKind;
use crate::ts_value::TSValue;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A shared handle to an output's `TSValue`. Single-threaded cooperative
/// evaluation (spec §5) means `RefCell` is enough; nothing here crosses a
/// thread boundary.
pub type OutputHandle = Rc<RefCell<TSValue>>;

/// One step in a bound slot's path from the graph root, used to build an
/// [`FQPath`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathElement {
    Field(String),
    Index(usize),
    Key(String),
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Field(name) => write!(f, ".{name}"),
            PathElement::Index(i) => write!(f, "[{i}]"),
            PathElement::Key(k) => write!(f, "{{{k}}}"),
        }
    }
}

/// The fully-qualified path of a bound slot, used for diagnostics,
/// record/replay keys, and cycle detection, per spec §4.4.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct FQPath(pub Vec<PathElement>);

impl FQPath {
    pub fn root() -> Self {
        FQPath(Vec::new())
    }

    pub fn child(&self, element: PathElement) -> Self {
        let mut path = self.0.clone();
        path.push(element);
        FQPath(path)
    }
}

impl fmt::Display for FQPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.0 {
            write!(f, "{element}")?;
        }
        Ok(())
    }
}

/// A node in the access strategy tree, mirroring the bound input's
/// `TSMeta` shape. Binding performs a depth-first build of this tree,
/// allocating only where a transformation occurs (spec §4.4); a
/// `DirectAccess` leaf is the no-storage fast path.
pub enum AccessStrategy {
    /// Input-side type equals bound output-side type: pass-through, no
    /// storage beyond the handle itself. Still subscribes `observer_node`
    /// to `NotifyKind::ValueChanged` on the output so a write there
    /// schedules the owning node, per spec §4.5.
    Direct {
        output: OutputHandle,
        observer_node: NodeId,
        path: FQPath,
    },

    /// Composite input whose children may each bind differently; holds one
    /// child strategy per element/field. Small by construction for almost
    /// every bound collection, so a `SmallVec` avoids a heap allocation in
    /// the common case, matching `ObserverList`'s choice in `subscription.rs`.
    Collection {
        children: SmallVec<[(PathElement, Box<AccessStrategy>); 4]>,
        path: FQPath,
    },

    /// Input is a plain type bound to a REF output: observes the REF,
    /// and on target change unbinds the old target and rebinds to the
    /// new one, transparent to the owning node.
    RefObserver {
        ref_output: OutputHandle,
        resolved: Option<OutputHandle>,
        observer_node: NodeId,
        path: FQPath,
    },

    /// Input is REF bound to a non-REF output: synthesises a stable
    /// reference value pointing at the underlying output.
    RefWrapper {
        underlying: OutputHandle,
        synthesized: OutputHandle,
        path: FQPath,
    },
}

impl AccessStrategy {
    pub fn path(&self) -> &FQPath {
        match self {
            AccessStrategy::Direct { path, .. }
            | AccessStrategy::Collection { path, .. }
            | AccessStrategy::RefObserver { path, .. }
            | AccessStrategy::RefWrapper { path, .. } => path,
        }
    }

    /// Builds a `Direct` access, subscribing `observer_node` to the
    /// output's `NotifyKind::ValueChanged` notifications.
    pub fn direct(output: OutputHandle, observer_node: NodeId, path: FQPath) -> Self {
        output
            .borrow_mut()
            .observers_mut()
            .subscribe(observer_node, NotifyKind::ValueChanged);
        AccessStrategy::Direct {
            output,
            observer_node,
            path,
        }
    }

    pub fn collection(children: Vec<(PathElement, AccessStrategy)>, path: FQPath) -> Self {
        AccessStrategy::Collection {
            children: children
                .into_iter()
                .map(|(e, s)| (e, Box::new(s)))
                .collect(),
            path,
        }
    }

    /// Builds a `RefObserverAccess`, subscribing `observer_node` to the
    /// REF output's structural-change notifications and resolving the
    /// initial target. `resolve_target` looks up the `OutputHandle` a
    /// `NodeId` target currently refers to; access.rs has no graph-wide
    /// output registry of its own, so the caller (typically `graph.rs` or
    /// a binder in `builders.rs`) supplies it.
    pub fn ref_observer(
        ref_output: OutputHandle,
        observer_node: NodeId,
        path: FQPath,
        resolve_target: impl FnOnce(NodeId) -> Option<OutputHandle>,
    ) -> Self {
        let target = ref_output.borrow().view().target();
        ref_output
            .borrow_mut()
            .observers_mut()
            .subscribe(observer_node, NotifyKind::StructureChanged);
        let resolved = target.and_then(resolve_target);
        AccessStrategy::RefObserver {
            ref_output,
            resolved,
            observer_node,
            path,
        }
    }

    pub fn ref_wrapper(underlying: OutputHandle, synthesized: OutputHandle, path: FQPath) -> Self {
        AccessStrategy::RefWrapper {
            underlying,
            synthesized,
            path,
        }
    }

    /// The output this strategy currently reads from. For `RefObserver`,
    /// this is the *resolved target*, not the REF itself — resolution is
    /// transparent to the owning node, per spec §4.4.
    pub fn resolve(&self) -> Option<&OutputHandle> {
        match self {
            AccessStrategy::Direct { output, .. } => Some(output),
            AccessStrategy::Collection { .. } => None,
            AccessStrategy::RefObserver { resolved, .. } => resolved.as_ref(),
            AccessStrategy::RefWrapper { synthesized, .. } => Some(synthesized),
        }
    }

    pub fn child(&self, element: &PathElement) -> Option<&AccessStrategy> {
        match self {
            AccessStrategy::Collection { children, .. } => children
                .iter()
                .find(|(e, _)| e == element)
                .map(|(_, s)| s.as_ref()),
            _ => None,
        }
    }

    /// Called when a `RefObserver`'s REF output fires a structural change:
    /// unbinds the previously resolved target and rebinds to whatever the
    /// REF points at now.
    pub fn handle_ref_retarget(
        &mut self,
        resolve_target: impl FnOnce(Option<NodeId>) -> Option<OutputHandle>,
    ) {
        if let AccessStrategy::RefObserver {
            ref_output,
            resolved,
            ..
        } = self
        {
            let new_target = ref_output.borrow().view().target();
            *resolved = resolve_target(new_target);
        }
    }

    /// Tears down every subscription this strategy (and its children)
    /// holds. Called on input unbind or owning node dispose.
    pub fn unbind(&mut self) {
        match self {
            AccessStrategy::RefWrapper { .. } => {}
            AccessStrategy::Direct {
                output,
                observer_node,
                ..
            } => {
                output
                    .borrow_mut()
                    .observers_mut()
                    .unsubscribe(*observer_node, NotifyKind::ValueChanged);
            }
            AccessStrategy::Collection { children, .. } => {
                for (_, child) in children.iter_mut() {
                    child.unbind();
                }
            }
            AccessStrategy::RefObserver {
                ref_output,
                observer_node,
                ..
            } => {
                ref_output
                    .borrow_mut()
                    .observers_mut()
                    .unsubscribe(*observer_node, NotifyKind::StructureChanged);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TypeRegistry;

    fn output() -> OutputHandle {
        let meta = TypeRegistry::scalar("i64", 8, 8);
        Rc::new(RefCell::new(TSValue::new_scalar(meta)))
    }

    fn node(index: usize) -> NodeId {
        NodeId { index, generation: 0 }
    }

    #[test]
    fn direct_access_resolves_to_its_output() {
        let out = output();
        let strategy = AccessStrategy::direct(out.clone(), node(0), FQPath::root());
        assert!(Rc::ptr_eq(strategy.resolve().unwrap(), &out));
    }

    #[test]
    fn direct_access_unbind_removes_subscription() {
        let out = output();
        let mut strategy = AccessStrategy::direct(out.clone(), node(0), FQPath::root());
        assert_eq!(out.borrow_mut().observers_mut().len(), 1);
        strategy.unbind();
        assert_eq!(out.borrow_mut().observers_mut().len(), 0);
    }

    #[test]
    fn collection_access_finds_children_by_path_element() {
        let a = AccessStrategy::direct(output(), node(0), FQPath::root().child(PathElement::Field("a".into())));
        let strategy = AccessStrategy::collection(
            vec![(PathElement::Field("a".into()), a)],
            FQPath::root(),
        );
        assert!(strategy.child(&PathElement::Field("a".into())).is_some());
        assert!(strategy.child(&PathElement::Field("b".into())).is_none());
    }

    #[test]
    fn ref_observer_unbind_removes_subscription() {
        let ref_out = Rc::new(RefCell::new(TSValue::new_ref()));
        let observer = node(1);
        let mut strategy = AccessStrategy::ref_observer(ref_out.clone(), observer, FQPath::root(), |_| None);
        assert_eq!(ref_out.borrow_mut().observers_mut().len(), 1);
        strategy.unbind();
        assert_eq!(ref_out.borrow_mut().observers_mut().len(), 0);
    }

    #[test]
    fn fq_path_renders_readable_diagnostic_string() {
        let path = FQPath::root()
            .child(PathElement::Field("outer".into()))
            .child(PathElement::Index(3));
        assert_eq!(path.to_string(), ".outer[3]");
    }
}
