//! Graph of typed operations.
//!
//! A [`Graph`] is an arena of [`Node`]s and [`Value`]s. Nodes and values are
//! referenced by [`NodeId`] and [`ValueId`]. Each value is produced by exactly
//! one node and records the edges which consume it, so the graph can be
//! traversed in both directions.
//!
//! Output types are inferred when a node is added. After a node's attributes
//! or inputs change, [`Graph::revalidate`] re-runs inference for the node and
//! the downstream nodes whose types may have changed.

use std::collections::BTreeSet;
use std::iter::zip;
use std::sync::Arc;

// Hash keys in this module are IDs which we allocate ourselves, so DOS
// resistance is not a concern.
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use thiserror::Error;

use crate::element_type::ElementType;
use crate::op_registry::OpRegistry;
use crate::ops::{Constant, ConstantData, InferError, OpKind, OpType, Parameter, TensorType};
use crate::shape::PartialShape;

mod node;
mod node_id;

pub use node::{Node, Use, Value};
pub use node_id::{NodeId, ValueId};

/// Errors that occur when adding or revalidating a node.
///
/// A node whose validation fails is not added to the graph.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ValidationError {
    #[error("value {0} is not in the graph")]
    InvalidValue(ValueId),

    #[error("node {0} is not in the graph")]
    InvalidNode(NodeId),

    /// An operation rejected its inputs or attributes.
    #[error("{op}: {error}")]
    Op {
        op: OpType,

        /// ID of the node, if it was already in the graph.
        node: Option<NodeId>,
        error: InferError,
    },
}

impl ValidationError {
    /// Return the underlying inference error, if this error came from an
    /// operation.
    pub fn infer_error(&self) -> Option<&InferError> {
        match self {
            ValidationError::Op { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Structural problems reported by [`Graph::verify`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("graph contains a cycle through node {0}")]
    Cycle(NodeId),

    #[error("value {0} has no producer")]
    MissingProducer(ValueId),

    #[error("input {input} of node {node} refers to missing value {value}")]
    MissingInput {
        node: NodeId,
        input: usize,
        value: ValueId,
    },

    #[error("consumer edges of value {0} do not match node inputs")]
    InconsistentUses(ValueId),
}

/// Record of edges moved by [`Graph::redirect_uses`], used to undo the move.
#[derive(Debug)]
pub(crate) struct Redirect {
    old: ValueId,
    new: ValueId,
    uses: SmallVec<[Use; 2]>,
    results: SmallVec<[usize; 1]>,
}

impl Redirect {
    /// Return the nodes whose inputs were redirected.
    pub fn consumers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.uses.iter().map(|u| u.node)
    }
}

/// Result of a depth-first traversal in dependency order.
struct TopoSort {
    order: Vec<NodeId>,

    /// A node found on a cycle, if any.
    cycle: Option<NodeId>,
}

/// A directed acyclic graph of operations.
#[derive(Clone, Debug)]
pub struct Graph {
    name: Option<String>,
    registry: Arc<OpRegistry>,
    nodes: Vec<Option<Node>>,
    values: Vec<Option<Value>>,
    parameters: Vec<ValueId>,
    results: Vec<ValueId>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Create an empty graph which accepts every built-in operation.
    pub fn new() -> Graph {
        Self::with_registry(OpRegistry::shared_default())
    }

    /// Create an empty graph which accepts only operations in `registry`.
    pub fn with_registry(registry: Arc<OpRegistry>) -> Graph {
        Graph {
            name: None,
            registry,
            nodes: Vec::new(),
            values: Vec::new(),
            parameters: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<&str>) {
        self.name = name.map(|s| s.to_string());
    }

    pub fn registry(&self) -> &OpRegistry {
        &self.registry
    }

    /// Add a graph input with a declared type.
    pub fn add_parameter(
        &mut self,
        name: Option<&str>,
        element_type: ElementType,
        shape: impl Into<PartialShape>,
    ) -> Result<ValueId, ValidationError> {
        let op = Parameter {
            element_type,
            shape: shape.into(),
        };
        let value = self.add_simple_op(name, op, &[])?;
        self.parameters.push(value);
        Ok(value)
    }

    /// Add a constant and return its value.
    pub fn add_constant(
        &mut self,
        name: Option<&str>,
        constant: Constant,
    ) -> Result<ValueId, ValidationError> {
        self.add_simple_op(name, constant, &[])
    }

    /// Add an operation node and infer the types of its outputs.
    ///
    /// If the operation is not registered, or rejects its inputs, the graph
    /// is left unchanged.
    pub fn add_op(
        &mut self,
        name: Option<&str>,
        op: impl Into<OpKind>,
        inputs: &[ValueId],
    ) -> Result<NodeId, ValidationError> {
        self.insert_node(name, op.into(), inputs)
            .map(|(node_id, _)| node_id)
    }

    /// Add an operation node and return its first output.
    pub fn add_simple_op(
        &mut self,
        name: Option<&str>,
        op: impl Into<OpKind>,
        inputs: &[ValueId],
    ) -> Result<ValueId, ValidationError> {
        self.insert_node(name, op.into(), inputs)
            .map(|(_, output)| output)
    }

    fn insert_node(
        &mut self,
        name: Option<&str>,
        op: OpKind,
        inputs: &[ValueId],
    ) -> Result<(NodeId, ValueId), ValidationError> {
        let op_type = op.op_type();
        let op_err = |error| ValidationError::Op {
            op: op_type,
            node: None,
            error,
        };

        if !self.registry.contains(op_type) {
            return Err(op_err(InferError::UnsupportedOp(op_type)));
        }

        let input_types = inputs
            .iter()
            .enumerate()
            .map(|(index, &id)| {
                self.value_type(id)
                    .cloned()
                    .ok_or(InferError::InvalidInput { index })
            })
            .collect::<Result<SmallVec<[TensorType; 4]>, _>>()
            .map_err(op_err)?;
        let input_values: SmallVec<[Option<ConstantData>; 4]> = inputs
            .iter()
            .map(|&id| self.known_value(id, &FxHashMap::default()))
            .collect();
        let output_types = op
            .validate_and_infer_types_with_values(&input_types, &input_values)
            .map_err(op_err)?;
        if output_types.is_empty() {
            return Err(op_err(InferError::OutputCountMismatch {
                expected: 1,
                actual: 0,
            }));
        }

        let node_id = NodeId::from_usize(self.nodes.len());
        let mut outputs = SmallVec::new();
        for (index, ty) in output_types.into_iter().enumerate() {
            let value_id = ValueId::from_usize(self.values.len());
            self.values.push(Some(Value {
                producer: node_id,
                index,
                ty,
                uses: SmallVec::new(),
            }));
            outputs.push(value_id);
        }

        for (input, &value_id) in inputs.iter().enumerate() {
            if let Some(value) = self.value_mut(value_id) {
                value.uses.push(Use {
                    node: node_id,
                    input,
                });
            }
        }

        let first_output = outputs[0];
        self.nodes.push(Some(Node {
            name: name.map(|s| s.to_string()),
            op,
            inputs: inputs.into(),
            outputs,
        }));

        Ok((node_id, first_output))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_usize())?.as_ref()
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.as_usize())?.as_mut()
    }

    pub fn value(&self, id: ValueId) -> Option<&Value> {
        self.values.get(id.as_usize())?.as_ref()
    }

    fn value_mut(&mut self, id: ValueId) -> Option<&mut Value> {
        self.values.get_mut(id.as_usize())?.as_mut()
    }

    /// Return the number of node IDs allocated, including removed nodes.
    pub(crate) fn node_slots(&self) -> usize {
        self.nodes.len()
    }

    /// Return the number of value IDs allocated, including removed values.
    pub(crate) fn value_slots(&self) -> usize {
        self.values.len()
    }

    /// Return the inferred type of a value.
    pub fn value_type(&self, id: ValueId) -> Option<&TensorType> {
        self.value(id).map(|v| v.ty())
    }

    /// Return the node which produces a value.
    pub fn producer(&self, id: ValueId) -> Option<&Node> {
        self.value(id).and_then(|v| self.node(v.producer))
    }

    /// Return the number of distinct nodes which consume a value.
    pub fn consumer_count(&self, id: ValueId) -> usize {
        self.value(id).map(|v| v.consumer_count()).unwrap_or(0)
    }

    /// Iterate over nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| node.as_ref().map(|n| (NodeId::from_usize(i), n)))
    }

    /// Return the number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Return the IDs of the graph inputs, in the order they were added.
    pub fn parameters(&self) -> &[ValueId] {
        &self.parameters
    }

    /// Return the IDs of the graph outputs.
    pub fn results(&self) -> &[ValueId] {
        &self.results
    }

    /// Set the values which the graph outputs.
    pub fn set_results(&mut self, results: &[ValueId]) -> Result<(), ValidationError> {
        if let Some(&missing) = results.iter().find(|&&id| self.value(id).is_none()) {
            return Err(ValidationError::InvalidValue(missing));
        }
        self.results = results.to_vec();
        Ok(())
    }

    pub fn is_result(&self, id: ValueId) -> bool {
        self.results.contains(&id)
    }

    /// Return a mutable reference to a node's operation.
    ///
    /// After changing attributes, call [`Graph::revalidate`] to update the
    /// cached types of the node's outputs and their consumers.
    pub fn op_mut(&mut self, id: NodeId) -> Option<&mut OpKind> {
        self.node_mut(id).map(|node| &mut node.op)
    }

    /// Re-run type inference for a node and propagate changes downstream.
    ///
    /// If any affected node fails validation, no cached types are changed.
    pub fn revalidate(&mut self, id: NodeId) -> Result<(), ValidationError> {
        if self.node(id).is_none() {
            return Err(ValidationError::InvalidNode(id));
        }
        self.propagate(&[id])
    }

    /// Re-run type inference for every node in dependency order.
    pub fn infer_all(&mut self) -> Result<(), ValidationError> {
        let all: Vec<NodeId> = self.nodes().map(|(id, _)| id).collect();
        self.propagate(&all)
    }

    /// Return the value of `id` if it can be known when the graph is built.
    ///
    /// Types in `staged` take precedence over those stored in the graph.
    fn known_value(
        &self,
        id: ValueId,
        staged: &FxHashMap<ValueId, TensorType>,
    ) -> Option<ConstantData> {
        let producer = self.node(self.value(id)?.producer)?;
        match &producer.op {
            OpKind::Constant(constant) => Some(constant.data.clone()),
            OpKind::ShapeOf(shape_of) => {
                let input = *producer.inputs.first()?;
                let ty = staged.get(&input).or_else(|| self.value_type(input))?;
                shape_of.value(ty)
            }
            _ => None,
        }
    }

    /// Re-run inference for `seeds` and, transitively, for the consumers of
    /// any output whose type changed.
    ///
    /// Nodes are visited in dependency order, so each is inferred at most
    /// once. New types are staged and only written to the graph if every
    /// visited node passes validation.
    pub(crate) fn propagate(&mut self, seeds: &[NodeId]) -> Result<(), ValidationError> {
        let rank: FxHashMap<NodeId, usize> = self
            .topo_sort()
            .order
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();

        let mut queue: BTreeSet<(usize, NodeId)> = seeds
            .iter()
            .filter_map(|id| rank.get(id).map(|&r| (r, *id)))
            .collect();
        let mut staged: FxHashMap<ValueId, TensorType> = FxHashMap::default();

        while let Some((_, node_id)) = queue.pop_first() {
            let Some(node) = self.node(node_id) else {
                continue;
            };
            let op_err = |error| ValidationError::Op {
                op: node.op_type(),
                node: Some(node_id),
                error,
            };

            let input_types = node
                .inputs
                .iter()
                .enumerate()
                .map(|(index, id)| {
                    staged
                        .get(id)
                        .or_else(|| self.value_type(*id))
                        .cloned()
                        .ok_or(InferError::InvalidInput { index })
                })
                .collect::<Result<SmallVec<[TensorType; 4]>, _>>()
                .map_err(op_err)?;
            let input_values: SmallVec<[Option<ConstantData>; 4]> = node
                .inputs
                .iter()
                .map(|&id| self.known_value(id, &staged))
                .collect();
            let output_types = node
                .op
                .validate_and_infer_types_with_values(&input_types, &input_values)
                .map_err(op_err)?;
            if output_types.len() != node.outputs.len() {
                return Err(op_err(InferError::OutputCountMismatch {
                    expected: node.outputs.len(),
                    actual: output_types.len(),
                }));
            }

            // Consumers of a known value are revisited even if its type is
            // unchanged, since the value itself may have changed.
            let has_known_value = node.op.has_known_value();
            for (&value_id, ty) in zip(&node.outputs, output_types) {
                let current = staged.get(&value_id).or_else(|| self.value_type(value_id));
                if current == Some(&ty) && !has_known_value {
                    continue;
                }
                tracing::trace!(node = %node_id, value = %value_id, ty = %ty, "output updated");
                if let Some(value) = self.value(value_id) {
                    queue.extend(
                        value
                            .uses
                            .iter()
                            .filter_map(|u| rank.get(&u.node).map(|&r| (r, u.node))),
                    );
                }
                staged.insert(value_id, ty);
            }
        }

        for (value_id, ty) in staged {
            if let Some(value) = self.value_mut(value_id) {
                value.ty = ty;
            }
        }
        Ok(())
    }

    /// Order nodes so that every node comes after the producers of its
    /// inputs.
    ///
    /// Returns an error if the graph contains a cycle.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let sorted = self.topo_sort();
        match sorted.cycle {
            Some(node) => Err(GraphError::Cycle(node)),
            None => Ok(sorted.order),
        }
    }

    fn topo_sort(&self) -> TopoSort {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut cycle = None;

        // Explicit stack of (node, next input to visit), to avoid recursion
        // depth limits on deep graphs.
        let mut stack: Vec<(NodeId, usize)> = Vec::new();
        for (root, _) in self.nodes() {
            if marks[root.as_usize()] != Mark::Unvisited {
                continue;
            }
            marks[root.as_usize()] = Mark::InProgress;
            stack.push((root, 0));

            while let Some((node_id, next_input)) = stack.last_mut() {
                let node_id = *node_id;
                let inputs = self.node(node_id).map(|n| n.inputs()).unwrap_or(&[]);
                let Some(&input) = inputs.get(*next_input) else {
                    marks[node_id.as_usize()] = Mark::Done;
                    order.push(node_id);
                    stack.pop();
                    continue;
                };
                *next_input += 1;

                let Some(producer) = self.value(input).map(|v| v.producer) else {
                    continue;
                };
                match marks[producer.as_usize()] {
                    Mark::Unvisited => {
                        marks[producer.as_usize()] = Mark::InProgress;
                        stack.push((producer, 0));
                    }
                    Mark::InProgress => {
                        cycle.get_or_insert(producer);
                    }
                    Mark::Done => {}
                }
            }
        }

        TopoSort { order, cycle }
    }

    /// Check the structural invariants of the graph.
    ///
    /// The graph must be acyclic, every node input must refer to a live
    /// value, and the consumer edges recorded on each value must agree with
    /// the node inputs.
    pub fn verify(&self) -> Result<(), GraphError> {
        let mut expected_uses: FxHashMap<ValueId, Vec<Use>> = FxHashMap::default();
        for (node_id, node) in self.nodes() {
            for (input, &value) in node.inputs.iter().enumerate() {
                if self.value(value).is_none() {
                    return Err(GraphError::MissingInput {
                        node: node_id,
                        input,
                        value,
                    });
                }
                expected_uses.entry(value).or_default().push(Use {
                    node: node_id,
                    input,
                });
            }
        }

        for (i, value) in self.values.iter().enumerate() {
            let Some(value) = value else {
                continue;
            };
            let value_id = ValueId::from_usize(i);
            let produced = self
                .node(value.producer)
                .is_some_and(|n| n.outputs.get(value.index) == Some(&value_id));
            if !produced {
                return Err(GraphError::MissingProducer(value_id));
            }

            let mut actual: Vec<Use> = value.uses.to_vec();
            let mut expected = expected_uses.remove(&value_id).unwrap_or_default();
            let key = |u: &Use| (u.node, u.input);
            actual.sort_by_key(key);
            expected.sort_by_key(key);
            if actual != expected {
                return Err(GraphError::InconsistentUses(value_id));
            }
        }

        for &id in self.results.iter().chain(&self.parameters) {
            if self.value(id).is_none() {
                return Err(GraphError::MissingProducer(id));
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Point every use of `old` at `new`, except uses by nodes in `exclude`.
    ///
    /// Graph results which refer to `old` are updated as well.
    pub(crate) fn redirect_uses(
        &mut self,
        old: ValueId,
        new: ValueId,
        exclude: &FxHashSet<NodeId>,
    ) -> Redirect {
        let uses: SmallVec<[Use; 2]> = self
            .value(old)
            .map(|v| {
                v.uses
                    .iter()
                    .filter(|u| !exclude.contains(&u.node))
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        self.move_uses(old, new, &uses);

        let results: SmallVec<[usize; 1]> = self
            .results
            .iter()
            .enumerate()
            .filter(|(_, id)| **id == old)
            .map(|(i, _)| i)
            .collect();
        for &i in &results {
            self.results[i] = new;
        }

        Redirect {
            old,
            new,
            uses,
            results,
        }
    }

    /// Reverse a redirection made by [`Graph::redirect_uses`].
    pub(crate) fn undo_redirect(&mut self, redirect: Redirect) {
        let Redirect {
            old,
            new,
            uses,
            results,
        } = redirect;
        self.move_uses(new, old, &uses);
        for i in results {
            self.results[i] = old;
        }
    }

    fn move_uses(&mut self, from: ValueId, to: ValueId, uses: &[Use]) {
        for u in uses {
            if let Some(node) = self.node_mut(u.node) {
                node.inputs[u.input] = to;
            }
        }
        if let Some(value) = self.value_mut(from) {
            value.uses.retain(|u| !uses.contains(u));
        }
        if let Some(value) = self.value_mut(to) {
            value.uses.extend(uses.iter().copied());
        }
    }

    /// Return true if `value` depends, directly or transitively, on any of
    /// `nodes`.
    pub(crate) fn depends_on_any(&self, value: ValueId, nodes: &FxHashSet<NodeId>) -> bool {
        let mut visited = FxHashSet::default();
        let mut stack: Vec<NodeId> = self.value(value).map(|v| v.producer).into_iter().collect();
        while let Some(node_id) = stack.pop() {
            if nodes.contains(&node_id) {
                return true;
            }
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.node(node_id) {
                stack.extend(
                    node.inputs
                        .iter()
                        .filter_map(|&input| self.value(input).map(|v| v.producer)),
                );
            }
        }
        false
    }

    /// Return true if a node can be removed without affecting the graph's
    /// results.
    fn is_dead(&self, node: &Node) -> bool {
        node.op_type() != OpType::Parameter
            && node.outputs.iter().all(|&id| {
                !self.is_result(id) && self.value(id).is_some_and(|v| v.uses.is_empty())
            })
    }

    /// Remove a node and its outputs.
    ///
    /// Returns false and leaves the graph unchanged if any output is still
    /// consumed.
    pub(crate) fn remove_node(&mut self, id: NodeId) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        let in_use = node.outputs.iter().any(|&out| {
            self.is_result(out) || self.value(out).is_some_and(|v| !v.uses.is_empty())
        });
        if in_use {
            return false;
        }

        let Some(node) = self.nodes[id.as_usize()].take() else {
            return false;
        };
        for &input in &node.inputs {
            if let Some(value) = self.value_mut(input) {
                value.uses.retain(|u| u.node != id);
            }
        }
        for &output in &node.outputs {
            self.values[output.as_usize()] = None;
        }
        self.parameters.retain(|p| !node.outputs.contains(p));
        true
    }

    /// Remove nodes in `candidates` which have no consumers and are not
    /// results, then repeat for the producers of their inputs.
    ///
    /// Returns the IDs of removed nodes.
    pub(crate) fn remove_dead_nodes(
        &mut self,
        candidates: impl IntoIterator<Item = NodeId>,
    ) -> Vec<NodeId> {
        let mut stack: Vec<NodeId> = candidates.into_iter().collect();
        let mut removed = Vec::new();
        while let Some(node_id) = stack.pop() {
            let Some(node) = self.node(node_id) else {
                continue;
            };
            if !self.is_dead(node) {
                continue;
            }
            let producers: SmallVec<[NodeId; 4]> = node
                .inputs
                .iter()
                .filter_map(|&input| self.value(input).map(|v| v.producer))
                .collect();
            if self.remove_node(node_id) {
                removed.push(node_id);
                stack.extend(producers);
            }
        }
        removed
    }

    /// Remove every node which the graph's results do not depend on.
    ///
    /// Parameters are kept. Returns the number of nodes removed.
    pub fn prune(&mut self) -> usize {
        let mut live = FxHashSet::default();
        let mut stack: Vec<NodeId> = self
            .results
            .iter()
            .filter_map(|&id| self.value(id).map(|v| v.producer))
            .collect();
        while let Some(node_id) = stack.pop() {
            if !live.insert(node_id) {
                continue;
            }
            if let Some(node) = self.node(node_id) {
                stack.extend(
                    node.inputs
                        .iter()
                        .filter_map(|&input| self.value(input).map(|v| v.producer)),
                );
            }
        }

        // Remove consumers before producers.
        let mut dead: Vec<NodeId> = self
            .nodes()
            .filter(|(id, node)| !live.contains(id) && node.op_type() != OpType::Parameter)
            .map(|(id, _)| id)
            .collect();
        if let Ok(order) = self.topological_order() {
            let rank: FxHashMap<NodeId, usize> =
                order.into_iter().enumerate().map(|(i, id)| (id, i)).collect();
            dead.sort_by_key(|id| std::cmp::Reverse(rank.get(id).copied()));
        }

        dead.into_iter().filter(|&id| self.remove_node(id)).count()
    }
}

#[cfg(test)]
mod tests;
