//! Type-erased value storage with small-buffer optimisation, and the
//! immutable [`TypeMeta`] schema descriptors that describe it.
//!
//! Grounded on the teacher's [`Resource`](https://docs.rs/peregrine) trait
//! (the `Read`/`Write` split becomes the inline/heap split here) and on
//! `history.rs`'s `CopyHistory` (small `Copy` values, stored inline) versus
//! `DerefHistory` (heap values with stable identity) — `Value`'s `Scalar`
//! variant is this crate's `CopyHistory` case, its `Heap` variant is the
//! `DerefHistory` case. The vtable shape is grounded on
//! `original_source/.../type_system/value_vtbl.h`.

use foldhash::fast::FixedState;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::rc::Rc;

/// An opaque handle to a value on the foreign side of the embedding
/// boundary (§6). The core never names a specific foreign runtime; it only
/// carries this handle through `to_foreign`/`from_foreign`.
pub type ForeignHandle = Box<dyn Any>;

/// Per-type operations, isolating the one part of the type system that may
/// allocate or touch the foreign boundary (`to_foreign`/`from_foreign`).
/// Every other operation here is pure, per spec §4.1.
pub struct ValueVTable {
    pub copy: fn(&Value) -> Value,
    pub equal: fn(&Value, &Value) -> bool,
    pub hash: fn(&Value, &mut dyn Hasher),
    pub to_foreign: fn(&Value) -> ForeignHandle,
    pub from_foreign: fn(ForeignHandle) -> Value,
}

fn default_to_foreign(_v: &Value) -> ForeignHandle {
    Box::new(())
}
fn default_from_foreign(_h: ForeignHandle) -> Value {
    Value::Unset
}

impl Default for ValueVTable {
    fn default() -> Self {
        ValueVTable {
            copy: |v| v.clone(),
            equal: |a, b| a == b,
            hash: |v, state| v.hash_into(state),
            to_foreign: default_to_foreign,
            from_foreign: default_from_foreign,
        }
    }
}

/// Immutable descriptor of a scalar value type, interned by name so equal
/// structures share one `Rc` — `Rc::ptr_eq` is a valid fast-path equality
/// check wherever two `TypeMeta`s are compared. A bundle's `TSValue` tags
/// its own field schema via `fields` on the `TypeMeta` of the field it
/// names, rather than through a separate composite descriptor.
pub struct TypeMeta {
    pub size: usize,
    pub align: usize,
    /// Bundle field order is fixed here; indexed access into a bundle's
    /// `type_meta.fields` is O(1) by construction.
    pub fields: Vec<(String, Rc<TypeMeta>)>,
    pub vtable: ValueVTable,
    structural_id: u64,
}

impl fmt::Debug for TypeMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMeta")
            .field("fields", &self.fields.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("structural_id", &self.structural_id)
            .finish()
    }
}

impl PartialEq for TypeMeta {
    fn eq(&self, other: &Self) -> bool {
        self.structural_id == other.structural_id
    }
}
impl Eq for TypeMeta {}

fn structural_hash(fields: &[(String, Rc<TypeMeta>)]) -> u64 {
    let hasher_builder = FixedState::default();
    let mut h = hasher_builder.build_hasher();
    for (name, ty) in fields {
        name.hash(&mut h);
        ty.structural_id.hash(&mut h);
    }
    h.finish()
}

/// Interner for scalar [`TypeMeta`]s, keyed by name. Evaluation is
/// single-threaded per graph (§5), so a thread-local table gives the same
/// sharing guarantee a process-wide one would without needing `TypeMeta`'s
/// `Rc`-based fields to be `Send`/`Sync`.
pub struct TypeRegistry {
    scalars: HashMap<&'static str, Rc<TypeMeta>>,
}

thread_local! {
    static REGISTRY: RefCell<TypeRegistry> = RefCell::new(TypeRegistry {
        scalars: HashMap::new(),
    });
}

impl TypeRegistry {
    /// Interns a scalar `TypeMeta` by name (e.g. "i64", "bool", "string").
    /// Repeated calls with the same name return the same `Rc`.
    pub fn scalar(name: &'static str, size: usize, align: usize) -> Rc<TypeMeta> {
        REGISTRY.with(|r| {
            r.borrow_mut()
                .scalars
                .entry(name)
                .or_insert_with(|| {
                    Rc::new(TypeMeta {
                        size,
                        align,
                        fields: Vec::new(),
                        vtable: ValueVTable::default(),
                        structural_id: structural_hash(&[]) ^ name_hash(name),
                    })
                })
                .clone()
        })
    }
}

impl TypeMeta {
    /// A bundle's `TypeMeta`: its field order fixed by `fields`. Not
    /// interned — unlike scalars there's no stable name to key on, and a
    /// bundle's structural identity already lives in `structural_id`, so
    /// `Rc::ptr_eq` between two independently-built bundle metas of the
    /// same shape correctly returns `false` while `==` still holds.
    pub fn bundle(fields: Vec<(String, Rc<TypeMeta>)>) -> Rc<TypeMeta> {
        let structural_id = structural_hash(&fields);
        Rc::new(TypeMeta {
            size: 0,
            align: 1,
            fields,
            vtable: ValueVTable::default(),
            structural_id,
        })
    }
}

fn name_hash(name: &str) -> u64 {
    let mut h = FixedState::default().build_hasher();
    name.hash(&mut h);
    h.finish()
}

/// A leaf value small enough (<= 24 bytes, alignment <= 8) to store inline,
/// matching the teacher's `CopyHistory` boundary.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Scalar {
    Unit,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Scalar::Unit => 0u8.hash(state),
            Scalar::Bool(b) => (1u8, b).hash(state),
            Scalar::I64(i) => (2u8, i).hash(state),
            Scalar::U64(u) => (3u8, u).hash(state),
            Scalar::F64(f) => (4u8, f.to_bits()).hash(state),
        }
    }
}

/// A heap-stored leaf value with a stable address for the lifetime of the
/// `Rc`, matching the teacher's `DerefHistory` boundary. Non-`Copy` or
/// oversized scalars (strings, user blobs) live here behind a small vtable
/// rather than `dyn Any` directly, so `Value` can still implement
/// `Clone`/`PartialEq`/`Hash` without knowing the concrete type.
pub trait ErasedValue: Any {
    fn clone_boxed(&self) -> Rc<dyn ErasedValue>;
    fn eq_erased(&self, other: &dyn ErasedValue) -> bool;
    fn hash_erased(&self, state: &mut dyn Hasher);
    fn fmt_erased(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
    fn as_any(&self) -> &dyn Any;
}

impl<T> ErasedValue for T
where
    T: Clone + PartialEq + Hash + fmt::Debug + 'static,
{
    fn clone_boxed(&self) -> Rc<dyn ErasedValue> {
        Rc::new(self.clone())
    }
    fn eq_erased(&self, other: &dyn ErasedValue) -> bool {
        match other.as_any().downcast_ref::<T>() {
            Some(o) => self == o,
            None => false,
        }
    }
    fn hash_erased(&self, state: &mut dyn Hasher) {
        // Hasher is a trait object here; std::hash::Hash requires a sized
        // Hasher, so we adapt through a thin wrapper.
        struct Adapter<'a>(&'a mut dyn Hasher);
        impl Hasher for Adapter<'_> {
            fn finish(&self) -> u64 {
                self.0.finish()
            }
            fn write(&mut self, bytes: &[u8]) {
                self.0.write(bytes)
            }
        }
        self.hash(&mut Adapter(state));
    }
    fn fmt_erased(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for dyn ErasedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_erased(f)
    }
}

/// Type-erased owning container, nullable (the `Unset` variant), with
/// small-buffer optimisation for scalars. This is the leaf value a
/// time-series cell holds; the composite shapes (bundle, list, set, dict,
/// window) live one level up as [`TSValue`](crate::ts_value::TSValue)
/// variants, each storing `Value` leaves in its own element container.
#[derive(Clone, Debug)]
pub enum Value {
    Unset,
    Scalar(Scalar),
    Heap(Rc<dyn ErasedValue>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unset, Value::Unset) => true,
            (Value::Scalar(a), Value::Scalar(b)) => a == b,
            (Value::Heap(a), Value::Heap(b)) => a.eq_erased(b.as_ref()),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_into(state);
    }
}

impl Value {
    fn hash_into(&self, state: &mut dyn Hasher) {
        match self {
            Value::Unset => 0u8.hash_adapter(state),
            Value::Scalar(s) => {
                1u8.hash_adapter(state);
                s.hash_adapter(state);
            }
            Value::Heap(h) => {
                2u8.hash_adapter(state);
                h.hash_erased(state);
            }
        }
    }

    pub fn has_value(&self) -> bool {
        !matches!(self, Value::Unset)
    }

    pub fn reset(&mut self) {
        *self = Value::Unset;
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Value::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_heap<T: 'static>(&self) -> Option<&T> {
        match self {
            Value::Heap(h) => h.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn from_heap<T>(value: T) -> Self
    where
        T: Clone + PartialEq + Hash + fmt::Debug + 'static,
    {
        Value::Heap(Rc::new(value))
    }
}

// Small helper trait so `Hash::hash` can be called against a `&mut dyn
// Hasher` without requiring `Sized` gymnastics at every call site above.
trait HashAdapter {
    fn hash_adapter(&self, state: &mut dyn Hasher);
}
impl<T: Hash> HashAdapter for T {
    fn hash_adapter(&self, state: &mut dyn Hasher) {
        struct Adapter<'a>(&'a mut dyn Hasher);
        impl Hasher for Adapter<'_> {
            fn finish(&self) -> u64 {
                self.0.finish()
            }
            fn write(&mut self, bytes: &[u8]) {
                self.0.write(bytes)
            }
        }
        self.hash(&mut Adapter(state));
    }
}

/// A generational slot vector. Each live slot carries a generation counter;
/// a [`SlotHandle`] carries the generation it was issued with and is
/// invalidated by erase-then-reuse without needing to scan the container,
/// per spec §4.1 and the cyclic-ownership design note in §9.
#[derive(Debug, Default)]
pub struct SlotVec<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
}

#[derive(Debug)]
enum Slot<T> {
    Vacant(u32),
    Occupied(u32, T),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct SlotHandle {
    pub index: usize,
    pub generation: u32,
}

impl<T> SlotVec<T> {
    pub fn new() -> Self {
        SlotVec {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, value: T) -> SlotHandle {
        if let Some(index) = self.free.pop() {
            let generation = match self.slots[index] {
                Slot::Vacant(g) => g,
                Slot::Occupied(..) => unreachable!("free list pointed at occupied slot"),
            };
            self.slots[index] = Slot::Occupied(generation, value);
            SlotHandle { index, generation }
        } else {
            let index = self.slots.len();
            self.slots.push(Slot::Occupied(0, value));
            SlotHandle { index, generation: 0 }
        }
    }

    pub fn erase(&mut self, handle: SlotHandle) -> Option<T> {
        match self.slots.get_mut(handle.index) {
            Some(Slot::Occupied(g, _)) if *g == handle.generation => {
                let next_gen = g.wrapping_add(1);
                let prev = std::mem::replace(&mut self.slots[handle.index], Slot::Vacant(next_gen));
                self.free.push(handle.index);
                match prev {
                    Slot::Occupied(_, v) => Some(v),
                    Slot::Vacant(_) => None,
                }
            }
            _ => None,
        }
    }

    pub fn get(&self, handle: SlotHandle) -> Option<&T> {
        match self.slots.get(handle.index) {
            Some(Slot::Occupied(g, v)) if *g == handle.generation => Some(v),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut T> {
        match self.slots.get_mut(handle.index) {
            Some(Slot::Occupied(g, v)) if *g == handle.generation => Some(v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied(g, v) => Some((
                SlotHandle {
                    index,
                    generation: *g,
                },
                v,
            )),
            Slot::Vacant(_) => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotHandle, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied(g, v) => Some((
                SlotHandle {
                    index,
                    generation: *g,
                },
                v,
            )),
            Slot::Vacant(_) => None,
        })
    }
}

impl<T: PartialEq> SlotVec<T> {
    /// Linear-scan membership lookup by value. Adequate for the small
    /// collections time-series graphs typically carry; callers needing
    /// O(1) membership should keep their own index alongside (see
    /// `delta::SetDelta`'s caller in `ts_value.rs`).
    pub fn find(&self, value: &T) -> Option<SlotHandle> {
        self.iter().find(|(_, v)| *v == value).map(|(h, _)| h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_has_no_value() {
        assert!(!Value::Unset.has_value());
        assert!(Value::Scalar(Scalar::I64(7)).has_value());
    }

    #[test]
    fn slot_handle_invalidated_after_erase_and_reuse() {
        let mut v: SlotVec<i32> = SlotVec::new();
        let h1 = v.insert(10);
        assert_eq!(v.erase(h1), Some(10));
        assert_eq!(v.get(h1), None);

        let h2 = v.insert(20);
        assert_eq!(h2.index, h1.index);
        assert_ne!(h2.generation, h1.generation);
        assert_eq!(v.get(h1), None);
        assert_eq!(v.get(h2), Some(&20));
    }

    #[test]
    fn scalar_type_meta_interning_returns_same_rc_for_same_name() {
        let a = TypeRegistry::scalar("i64", 8, 8);
        let b = TypeRegistry::scalar("i64", 8, 8);
        assert!(Rc::ptr_eq(&a, &b));

        let c = TypeRegistry::scalar("f64", 8, 8);
        assert!(!Rc::ptr_eq(&a, &c));
    }

    #[test]
    fn heap_values_compare_by_content() {
        let a = Value::from_heap("hello".to_string());
        let b = Value::from_heap("hello".to_string());
        let c = Value::from_heap("world".to_string());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn round_trip_to_from_foreign_default_vtable() {
        let vt = ValueVTable::default();
        let v = Value::Scalar(Scalar::I64(42));
        let handle = (vt.to_foreign)(&v);
        // The default vtable has no real foreign runtime to round-trip
        // through; it exists only to define the boundary shape. A
        // type-specific vtable (built alongside its TypeMeta) is
        // responsible for a genuine round trip.
        let _ = handle;
    }
}
