use smallvec::SmallVec;

use super::{NodeId, ValueId};
use crate::ops::{OpKind, OpType, TensorType};

/// An operation instance in a graph.
///
/// A node owns its output values and references the values it consumes.
#[derive(Clone, Debug)]
pub struct Node {
    pub(super) name: Option<String>,
    pub(super) op: OpKind,
    pub(super) inputs: SmallVec<[ValueId; 4]>,
    pub(super) outputs: SmallVec<[ValueId; 1]>,
}

impl Node {
    /// Return the debug name of this node.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn op(&self) -> &OpKind {
        &self.op
    }

    pub fn op_type(&self) -> OpType {
        self.op.op_type()
    }

    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    /// Return the first output of this node.
    pub fn output(&self) -> ValueId {
        // Every node has at least one output.
        self.outputs[0]
    }
}

/// An edge from a value to the input of a consuming node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Use {
    pub node: NodeId,

    /// Index of the input within the consumer's input list.
    pub input: usize,
}

/// A typed output of a node.
#[derive(Clone, Debug)]
pub struct Value {
    pub(super) producer: NodeId,
    pub(super) index: usize,
    pub(super) ty: TensorType,
    pub(super) uses: SmallVec<[Use; 2]>,
}

impl Value {
    /// Return the node which produces this value.
    pub fn producer(&self) -> NodeId {
        self.producer
    }

    /// Return the index of this value among its producer's outputs.
    pub fn output_index(&self) -> usize {
        self.index
    }

    /// Return the cached result of type inference.
    pub fn ty(&self) -> &TensorType {
        &self.ty
    }

    /// Return the edges which consume this value.
    ///
    /// A node which uses the value more than once appears once per input.
    pub fn uses(&self) -> &[Use] {
        &self.uses
    }

    /// Return the number of distinct nodes which consume this value.
    pub fn consumer_count(&self) -> usize {
        let mut nodes: SmallVec<[NodeId; 4]> = self.uses.iter().map(|u| u.node).collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes.len()
    }
}
