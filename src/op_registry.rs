use std::fmt;
use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;

use crate::ops::{Arity, OpType};

/// Metadata about an operation accepted by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpInfo {
    pub name: &'static str,
    pub arity: Arity,

    /// True if the operation is binary and its operands can be swapped.
    pub commutative: bool,
}

impl OpInfo {
    fn for_op(op_type: OpType) -> OpInfo {
        OpInfo {
            name: op_type.name(),
            arity: op_type.arity(),
            commutative: op_type.is_commutative(),
        }
    }
}

/// Table of operations which a [`Graph`](crate::Graph) accepts.
///
/// New registries have no operations registered. To create a registry with
/// every built-in operation, use [`OpRegistry::with_default_ops`].
/// Alternatively create an empty registry and register the operations a
/// target supports using [`OpRegistry::register`]. Graphs built with a
/// restricted registry reject nodes of other types.
///
/// Registries are immutable once shared with a graph, so they are usually
/// wrapped in an `Arc` and passed to [`Graph::with_registry`](crate::Graph::with_registry).
#[derive(Clone, Default)]
pub struct OpRegistry {
    ops: FxHashMap<OpType, OpInfo>,
}

impl OpRegistry {
    /// Create a new empty registry.
    pub fn new() -> OpRegistry {
        OpRegistry::default()
    }

    /// Create a registry with every operation in the catalog registered.
    pub fn with_default_ops() -> OpRegistry {
        let mut reg = OpRegistry::new();
        for &op_type in OpType::ALL {
            reg.register(op_type);
        }
        reg
    }

    /// Return the registry of every built-in operation.
    ///
    /// The registry is built on first use and shared by every caller.
    pub fn shared_default() -> Arc<OpRegistry> {
        static DEFAULT_REGISTRY: OnceLock<Arc<OpRegistry>> = OnceLock::new();
        DEFAULT_REGISTRY
            .get_or_init(|| Arc::new(OpRegistry::with_default_ops()))
            .clone()
    }

    /// Register an operation.
    pub fn register(&mut self, op_type: OpType) {
        self.ops.insert(op_type, OpInfo::for_op(op_type));
    }

    /// Look up the metadata for an operation.
    pub fn get(&self, op_type: OpType) -> Option<&OpInfo> {
        self.ops.get(&op_type)
    }

    pub fn contains(&self, op_type: OpType) -> bool {
        self.ops.contains_key(&op_type)
    }

    /// Return true if `op_type` is registered and commutative.
    pub fn is_commutative(&self, op_type: OpType) -> bool {
        self.get(op_type).is_some_and(|info| info.commutative)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.ops.values().map(|info| info.name).collect();
        names.sort_unstable();
        f.debug_struct("OpRegistry").field("ops", &names).finish()
    }
}
