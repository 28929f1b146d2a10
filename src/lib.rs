//! opgraph is the graph representation and rewriting core of a neural network
//! compiler.
//!
//! A model is represented as a [`Graph`] of typed operations. Each operation
//! infers the element type and shape of its outputs from its inputs when it
//! is added, and shapes may be partially known (see [`PartialShape`]).
//!
//! # Building graphs
//!
//! ```
//! use opgraph::ops::{Add, Relu};
//! use opgraph::{pshape, ElementType, Graph};
//!
//! let mut graph = Graph::new();
//! let a = graph.add_parameter(Some("a"), ElementType::F32, pshape![2, ?, 3]).unwrap();
//! let b = graph.add_parameter(Some("b"), ElementType::F32, pshape![2, ?, 3]).unwrap();
//! let sum = graph.add_simple_op(None, Add::default(), &[a, b]).unwrap();
//! let out = graph.add_simple_op(None, Relu, &[sum]).unwrap();
//! graph.set_results(&[out]).unwrap();
//!
//! assert_eq!(graph.value_type(out).unwrap().shape, pshape![2, ?, 3]);
//! ```
//!
//! Adding an operation whose inputs it cannot accept fails with a
//! [`ValidationError`] and leaves the graph unchanged.
//!
//! # Matching and rewriting
//!
//! The [`pattern`] module describes subgraphs to search for, and
//! [`rewrite`] applies rules which replace matched subgraphs. Rewrites keep
//! the graph acyclic and its cached types up to date.
//!
//! # Configuration
//!
//! The defaults for [`rewrite::PassOptions`] can be changed using
//! environment variables:
//!
//! - `OPGRAPH_MAX_REWRITE_ITERATIONS` sets the maximum number of sweeps a
//!   pass makes before giving up.
//! - `OPGRAPH_VERIFY_REWRITES` checks the graph's structural invariants
//!   after every rewrite.

mod element_type;
mod env;
mod graph;
mod op_registry;
mod shape;

pub mod ops;
pub mod pattern;
pub mod rewrite;

pub use element_type::{ElementType, ElementTypeOf};
pub use graph::{Graph, GraphError, Node, NodeId, Use, ValidationError, Value, ValueId};
pub use op_registry::{OpInfo, OpRegistry};
pub use opgraph_base::F16;
pub use shape::{resolve_axis, Dimension, MergeError, PartialShape};
