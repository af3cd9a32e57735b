//! # tsgraph
//!
//! A reactive time-series dataflow engine: a graph of nodes connected by
//! typed time-series edges, evaluated by a logical clock.
//!
//! tsgraph models computation as a directed graph of [`Node`](node::Node)s
//! whose outputs are typed time-series values rather than plain scalars.
//! Every output tracks, alongside its current value, *when* it was last
//! modified and *what* changed about it this tick — a scalar knows it was
//! overwritten, a set knows which elements were added or removed, a dict
//! knows which keys changed. Writing to an output schedules every node
//! subscribed to it; the [`EvaluationEngine`](engine::EvaluationEngine)
//! drains that schedule one logical tick at a time, in the graph's
//! topological rank order, until nothing is left to do.
//!
//! ## Concepts
//!
//! ### Time-series values
//!
//! [`TSValue`](ts_value::TSValue) is the polymorphic value model: scalar,
//! bundle, list, set, dict, window, reference, and signal all share the
//! same shape — a value tree, a time tree (`last_modified`), an observer
//! tree, and a delta tree — navigated through
//! [`TSView`](ts_value::TSView) (read) and
//! [`TSMutableView`](ts_value::TSMutableView) (write). Deltas reset every
//! tick; `last_modified` persists until the next write.
//!
//! ### Binding and references
//!
//! An input doesn't hold its upstream output directly; it holds an
//! [`AccessStrategy`](access::AccessStrategy), a small tree that mirrors
//! the input's shape and resolves indirection through `REF` outputs
//! transparently. Rebinding a `REF` looks, to the observing node, exactly
//! like its upstream output changed identity — because it did.
//!
//! ### Nodes and graphs
//!
//! A [`Graph`](graph::Graph) is a generational arena of
//! [`Node`](node::Node) trait objects plus their evaluation order. Nodes
//! pass through five lifecycle phases (constructed, initialised, started,
//! stopped, disposed) and are driven one tick at a time by
//! [`EvaluationEngine::step`](engine::EvaluationEngine::step), which drains
//! pushed external inputs, advances to the next scheduled wake time, and
//! evaluates every node due at that instant.
//!
//! ### Nested graphs
//!
//! The [`nested`] module holds the control-flow nodes that each wrap one
//! or more child [`Graph`]s: `TryExcept` isolates a failing sub-graph's
//! output from its outer scope, `Component` gives a sub-graph a stable
//! record/replay identity, `MapOverKeys` and `Mesh` maintain a child graph
//! per dict key (`Mesh` additionally ordering evaluation by a declared
//! key dependency graph), `Switch` swaps between pre-built branch
//! sub-graphs, and `Reduce`/`NonAssociativeReduce` fold a dict's values
//! into one accumulator.
//!
//! ## Error handling
//!
//! Every fallible operation returns [`error::Result`], an alias for
//! `std::result::Result<T, GraphError>`.
//! [`GraphError`](error::GraphError) is a closed taxonomy of five kinds —
//! wiring, binding, eval, resource, and clock errors — each optionally
//! chaining an [`anyhow::Error`] cause, so embedders match on one type
//! regardless of where a failure originated.
//!
//! ## Logging
//!
//! Graph evaluation emits [`tracing`] spans and events (`debug`-level
//! per-node eval spans, `warn` on dropped schedule requests, `error` on
//! uncaught eval failures); wire up a subscriber such as
//! `tracing_subscriber::fmt` to see them.

pub mod access;
pub mod builders;
pub mod delta;
pub mod engine;
pub mod error;
pub mod graph;
pub mod nested;
pub mod node;
pub mod recordable;
pub mod subscription;
pub mod ts_value;
pub mod value;

pub use engine::{Clock, EngineConfig, EvaluationEngine, Time};
pub use error::{GraphError, Result};
pub use graph::Graph;
pub use node::{Node, NodeId, Phase, Scheduler};
pub use ts_value::{TSMutableView, TSValue, TSView};
pub use value::Value;
