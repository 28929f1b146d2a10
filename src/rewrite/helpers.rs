//! Building blocks for rules which legalize a graph for a specific backend.

use std::iter::zip;

use smallvec::SmallVec;

use super::RewriteContext;
use crate::graph::{Graph, Node, NodeId, ValidationError, ValueId};
use crate::ops::{OpKind, StridedSlice};
use crate::pattern::Predicate;

/// Take columns `offset..offset + size` of a 2D value, keeping every row.
pub fn flat_crop(
    ctx: &mut RewriteContext,
    input: ValueId,
    offset: usize,
    size: usize,
) -> Result<ValueId, ValidationError> {
    let offset = offset as i64;
    let slice = StridedSlice {
        begin: SmallVec::from_slice(&[0, offset]),
        end: SmallVec::from_slice(&[0, offset + size as i64]),
        strides: SmallVec::from_slice(&[1, 1]),
        begin_mask: SmallVec::from_slice(&[true, false]),
        end_mask: SmallVec::from_slice(&[true, false]),
    };
    ctx.add_simple_op(None, slice, &[input])
}

/// Value has exactly `count` consumers and known rank `rank`.
pub fn consumers_and_rank(count: usize, rank: usize) -> Predicate {
    Predicate::consumers(count).and(Predicate::rank_equals(rank))
}

/// Return true if `node` is a transpose which applies the permutation
/// `order`.
///
/// A transpose without an explicit permutation matches the reversed order
/// when its input has a known rank. A permutation input matches only if it
/// is produced by a constant.
pub fn transpose_order_matches(graph: &Graph, node: NodeId, order: &[usize]) -> bool {
    let Some(node) = graph.node(node) else {
        return false;
    };
    let OpKind::Transpose(transpose) = node.op() else {
        return false;
    };
    let reverses = || order.iter().copied().eq((0..order.len()).rev());

    if let Some(&order_input) = node.inputs().get(1) {
        let Some(OpKind::Constant(constant)) = graph.producer(order_input).map(|p| p.op()) else {
            return false;
        };
        let Some(axes) = constant.data.to_i64() else {
            return false;
        };
        if axes.is_empty() {
            return input_rank(graph, node) == Some(order.len()) && reverses();
        }
        return axes.len() == order.len()
            && zip(&axes, order).all(|(&axis, &expected)| usize::try_from(axis) == Ok(expected));
    }

    match &transpose.perm {
        Some(perm) => perm.as_slice() == order,
        None => input_rank(graph, node) == Some(order.len()) && reverses(),
    }
}

fn input_rank(graph: &Graph, node: &Node) -> Option<usize> {
    node.inputs()
        .first()
        .and_then(|&input| graph.value_type(input))
        .and_then(|ty| ty.rank())
}

#[cfg(test)]
mod tests {
    use super::{consumers_and_rank, flat_crop, transpose_order_matches};
    use crate::element_type::ElementType;
    use crate::graph::Graph;
    use crate::ops::{Constant, Relu, TensorType, Transpose};
    use crate::pshape;
    use crate::rewrite::RewriteContext;
    use crate::shape::PartialShape;

    #[test]
    fn test_flat_crop() {
        let mut graph = Graph::new();
        let x = graph
            .add_parameter(None, ElementType::F32, pshape![?, 16])
            .unwrap();

        let mut ctx = RewriteContext::new(&mut graph);
        let cropped = flat_crop(&mut ctx, x, 4, 8).unwrap();
        assert_eq!(
            graph.value_type(cropped),
            Some(&TensorType::new(ElementType::F32, pshape![?, 8]))
        );

        let mut ctx = RewriteContext::new(&mut graph);
        let past_end = flat_crop(&mut ctx, x, 12, 8).unwrap();
        assert_eq!(
            graph.value_type(past_end).map(|ty| ty.shape.clone()),
            Some(pshape![?, 4])
        );
    }

    #[test]
    fn test_flat_crop_rejects_1d_input() {
        let mut graph = Graph::new();
        let x = graph
            .add_parameter(None, ElementType::F32, pshape![16])
            .unwrap();
        let mut ctx = RewriteContext::new(&mut graph);
        assert!(flat_crop(&mut ctx, x, 0, 4).is_err());
    }

    #[test]
    fn test_consumers_and_rank() {
        let mut graph = Graph::new();
        let x = graph
            .add_parameter(None, ElementType::F32, pshape![2, 3])
            .unwrap();
        let y = graph
            .add_parameter(None, ElementType::F32, PartialShape::dynamic())
            .unwrap();
        graph.add_simple_op(None, Relu, &[x]).unwrap();
        graph.add_simple_op(None, Relu, &[y]).unwrap();

        let predicate = consumers_and_rank(1, 2);
        assert!(predicate.test(&graph, x));
        assert!(!predicate.test(&graph, y));

        graph.add_simple_op(None, Relu, &[x]).unwrap();
        assert!(!predicate.test(&graph, x));
    }

    #[test]
    fn test_transpose_order_matches() {
        let mut graph = Graph::new();
        let x = graph
            .add_parameter(None, ElementType::F32, pshape![2, 3, 4])
            .unwrap();
        let explicit = graph
            .add_op(None, Transpose::with_perm(&[0, 2, 1]), &[x])
            .unwrap();
        let reversed = graph.add_op(None, Transpose::default(), &[x]).unwrap();
        let relu = graph.add_op(None, Relu, &[x]).unwrap();

        assert!(transpose_order_matches(&graph, explicit, &[0, 2, 1]));
        assert!(!transpose_order_matches(&graph, explicit, &[2, 1, 0]));
        assert!(transpose_order_matches(&graph, reversed, &[2, 1, 0]));
        assert!(!transpose_order_matches(&graph, reversed, &[1, 0]));
        assert!(!transpose_order_matches(&graph, relu, &[0, 1, 2]));
    }

    #[test]
    fn test_transpose_order_input_matches() {
        let mut graph = Graph::new();
        let x = graph
            .add_parameter(None, ElementType::F32, pshape![2, 3, 4])
            .unwrap();
        let order = graph
            .add_constant(None, Constant::new(vec![1i64, 0, 2], &[3]))
            .unwrap();
        let empty = graph
            .add_constant(None, Constant::new(Vec::<i64>::new(), &[0]))
            .unwrap();
        let unknown = graph
            .add_parameter(None, ElementType::I64, pshape![3])
            .unwrap();

        let from_constant = graph
            .add_op(None, Transpose::default(), &[x, order])
            .unwrap();
        let reversed = graph
            .add_op(None, Transpose::default(), &[x, empty])
            .unwrap();
        let from_parameter = graph
            .add_op(None, Transpose::default(), &[x, unknown])
            .unwrap();

        assert!(transpose_order_matches(&graph, from_constant, &[1, 0, 2]));
        assert!(!transpose_order_matches(&graph, from_constant, &[0, 1, 2]));
        assert!(transpose_order_matches(&graph, reversed, &[2, 1, 0]));
        assert!(!transpose_order_matches(&graph, from_parameter, &[0, 1, 2]));
    }
}
