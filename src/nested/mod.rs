//! Nested-graph control nodes: `TryExcept`, `Component`, `MapOverKeys`,
//! `Mesh`, `Switch`, `Reduce`/`NonAssociativeReduce` (spec §4.8).
//!
//! Each wraps a [`crate::graph::Graph`] (or a per-key collection of them)
//! evaluated from inside its owning node's `eval`, so nested outputs
//! become visible to the outer graph only on return, per spec §5's
//! ordering guarantee.

pub mod component;
pub mod map_over_keys;
pub mod mesh;
pub mod reduce;
pub mod switch;
pub mod try_except;

pub use component::Component;
pub use map_over_keys::MapOverKeys;
pub use mesh::Mesh;
pub use reduce::{NonAssociativeReduce, Reduce};
pub use switch::Switch;
pub use try_except::TryExcept;
