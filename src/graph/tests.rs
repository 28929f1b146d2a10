use std::sync::Arc;

use rustc_hash::FxHashSet;

use super::{Graph, GraphError, NodeId, Use, ValidationError};
use crate::element_type::ElementType;
use crate::op_registry::OpRegistry;
use crate::ops::{
    Add, Constant, Flatten, InferError, MatMul, Multiply, OpKind, OpType, Parameter, Relu,
    Reshape, ShapeOf, Split, TensorType,
};
use crate::pshape;
use crate::shape::PartialShape;

fn f32_type(shape: PartialShape) -> TensorType {
    TensorType::new(ElementType::F32, shape)
}

#[test]
fn test_add_with_dynamic_dims() {
    let mut graph = Graph::new();
    let a = graph
        .add_parameter(Some("a"), ElementType::F32, pshape![2, ?, 3])
        .unwrap();
    let b = graph
        .add_parameter(Some("b"), ElementType::F32, pshape![2, ?, 3])
        .unwrap();
    let sum = graph.add_simple_op(Some("sum"), Add::default(), &[a, b]).unwrap();

    assert_eq!(graph.value_type(sum), Some(&f32_type(pshape![2, ?, 3])));
    assert_eq!(graph.producer(sum).unwrap().name(), Some("sum"));
    assert_eq!(graph.parameters(), &[a, b]);
}

#[test]
fn test_add_with_incompatible_shapes() {
    let mut graph = Graph::new();
    let a = graph
        .add_parameter(None, ElementType::F32, pshape![2, 3])
        .unwrap();
    let b = graph
        .add_parameter(None, ElementType::F32, pshape![2, 4])
        .unwrap();
    let node_count = graph.node_count();

    let err = graph.add_simple_op(None, Add::default(), &[a, b]).unwrap_err();

    assert_eq!(
        err,
        ValidationError::Op {
            op: OpType::Add,
            node: None,
            error: InferError::IncompatibleShapes {
                lhs: pshape![2, 3],
                rhs: pshape![2, 4],
            },
        }
    );
    assert_eq!(err.to_string(), "Add: incompatible shapes {2,3} and {2,4}");

    // The failed node is not added and inputs gain no consumers.
    assert_eq!(graph.node_count(), node_count);
    assert_eq!(graph.consumer_count(a), 0);
    assert!(graph.verify().is_ok());
}

#[test]
fn test_add_op_errors() {
    let mut registry = OpRegistry::new();
    registry.register(OpType::Parameter);
    registry.register(OpType::Relu);
    let mut graph = Graph::with_registry(Arc::new(registry));

    let x = graph
        .add_parameter(None, ElementType::F32, pshape![4])
        .unwrap();
    assert!(graph.add_simple_op(None, Relu, &[x]).is_ok());

    let err = graph.add_simple_op(None, Add::default(), &[x, x]).unwrap_err();
    assert_eq!(
        err.infer_error(),
        Some(&InferError::UnsupportedOp(OpType::Add))
    );

    let mut graph = Graph::new();
    let x = graph
        .add_parameter(None, ElementType::F32, pshape![4])
        .unwrap();
    let mut other = Graph::new();
    other
        .add_parameter(None, ElementType::F32, pshape![4])
        .unwrap();
    let missing = other
        .add_parameter(None, ElementType::F32, pshape![4])
        .unwrap();
    let err = graph.add_simple_op(None, Add::default(), &[x, missing]).unwrap_err();
    assert_eq!(err.infer_error(), Some(&InferError::InvalidInput { index: 1 }));

    assert_eq!(
        graph.set_results(&[missing]),
        Err(ValidationError::InvalidValue(missing))
    );
}

#[test]
fn test_add_op_with_overflowing_size() {
    let huge = 1usize << (usize::BITS / 2 + 1);
    let mut graph = Graph::new();
    let x = graph
        .add_parameter(None, ElementType::F32, pshape![huge, huge])
        .unwrap();
    let node_count = graph.node_count();

    let err = graph
        .add_simple_op(None, Flatten { axis: 0 }, &[x])
        .unwrap_err();
    assert!(matches!(
        err.infer_error(),
        Some(InferError::SizeOverflow { .. })
    ));
    assert_eq!(graph.node_count(), node_count);
}

#[test]
fn test_consumer_edges() {
    let mut graph = Graph::new();
    let x = graph
        .add_parameter(None, ElementType::F32, pshape![4])
        .unwrap();
    let square = graph.add_op(None, Multiply::default(), &[x, x]).unwrap();
    let relu = graph.add_op(None, Relu, &[x]).unwrap();

    let value = graph.value(x).unwrap();
    assert_eq!(
        value.uses(),
        &[
            Use {
                node: square,
                input: 0
            },
            Use {
                node: square,
                input: 1
            },
            Use {
                node: relu,
                input: 0
            },
        ]
    );
    assert_eq!(graph.consumer_count(x), 2);
    assert_eq!(value.output_index(), 0);

    let names: Vec<_> = graph.nodes().map(|(_, n)| n.op_type()).collect();
    assert_eq!(names, [OpType::Parameter, OpType::Multiply, OpType::Relu]);
}

#[test]
fn test_multiple_outputs() {
    let mut graph = Graph::new();
    let x = graph
        .add_parameter(None, ElementType::F16, pshape![?, 6])
        .unwrap();
    let split = graph
        .add_op(
            None,
            Split {
                axis: -1,
                num_splits: 3,
            },
            &[x],
        )
        .unwrap();

    let outputs = graph.node(split).unwrap().outputs().to_vec();
    assert_eq!(outputs.len(), 3);
    for (i, &output) in outputs.iter().enumerate() {
        let value = graph.value(output).unwrap();
        assert_eq!(value.producer(), split);
        assert_eq!(value.output_index(), i);
        assert_eq!(
            value.ty(),
            &TensorType::new(ElementType::F16, pshape![?, 2])
        );
    }
}

#[test]
fn test_revalidate_propagates_changes() {
    let mut graph = Graph::new();
    let x = graph
        .add_parameter(None, ElementType::F32, pshape![?, 4])
        .unwrap();
    let w = graph
        .add_constant(None, Constant::new(vec![0.5f32; 8], &[4, 2]))
        .unwrap();
    let y = graph.add_simple_op(None, MatMul::default(), &[x, w]).unwrap();
    let z = graph.add_simple_op(None, Relu, &[y]).unwrap();
    graph.set_results(&[z]).unwrap();

    let param = graph.value(x).unwrap().producer();
    *graph.op_mut(param).unwrap() = Parameter {
        element_type: ElementType::F32,
        shape: pshape![3, 4],
    }
    .into();
    graph.revalidate(param).unwrap();

    assert_eq!(graph.value_type(y), Some(&f32_type(pshape![3, 2])));
    assert_eq!(graph.value_type(z), Some(&f32_type(pshape![3, 2])));
}

#[test]
fn test_revalidate_failure_leaves_types_unchanged() {
    let mut graph = Graph::new();
    let x = graph
        .add_parameter(None, ElementType::F32, pshape![?, 4])
        .unwrap();
    let y = graph.add_simple_op(None, Relu, &[x]).unwrap();
    let z = graph
        .add_simple_op(None, Reshape::new(&[2, -1], false), &[y])
        .unwrap();

    let param = graph.value(x).unwrap().producer();
    *graph.op_mut(param).unwrap() = OpKind::Parameter(Parameter {
        element_type: ElementType::F32,
        shape: pshape![3, 3],
    });
    let err = graph.revalidate(param).unwrap_err();

    assert!(matches!(
        err,
        ValidationError::Op {
            op: OpType::Reshape,
            node: Some(_),
            ..
        }
    ));
    assert_eq!(graph.value_type(x), Some(&f32_type(pshape![?, 4])));
    assert_eq!(graph.value_type(y), Some(&f32_type(pshape![?, 4])));
    assert_eq!(graph.value_type(z), Some(&f32_type(pshape![2, ?])));

    assert_eq!(
        graph.revalidate(NodeId::from_u32(100)),
        Err(ValidationError::InvalidNode(NodeId::from_u32(100)))
    );
}

#[test]
fn test_infer_all_is_idempotent() {
    let mut graph = Graph::new();
    let x = graph
        .add_parameter(None, ElementType::F32, pshape![2, ?, 3])
        .unwrap();
    let y = graph.add_simple_op(None, Relu, &[x]).unwrap();
    let z = graph.add_simple_op(None, Add::default(), &[x, y]).unwrap();

    let types_before: Vec<_> = [x, y, z]
        .iter()
        .map(|&id| graph.value_type(id).cloned())
        .collect();
    graph.infer_all().unwrap();
    graph.infer_all().unwrap();
    let types_after: Vec<_> = [x, y, z]
        .iter()
        .map(|&id| graph.value_type(id).cloned())
        .collect();
    assert_eq!(types_before, types_after);
}

#[test]
fn test_redirect_and_undo() {
    let mut graph = Graph::new();
    let x = graph
        .add_parameter(None, ElementType::F32, pshape![4])
        .unwrap();
    let a = graph.add_simple_op(None, Relu, &[x]).unwrap();
    let b = graph.add_simple_op(None, Relu, &[x]).unwrap();
    let out = graph.add_simple_op(None, Add::default(), &[a, a]).unwrap();
    graph.set_results(&[a, out]).unwrap();

    let redirect = graph.redirect_uses(a, b, &FxHashSet::default());
    assert_eq!(redirect.consumers().count(), 2);
    assert_eq!(graph.producer(out).unwrap().inputs(), &[b, b]);
    assert_eq!(graph.results(), &[b, out]);
    assert_eq!(graph.consumer_count(a), 0);
    assert!(graph.verify().is_ok());

    graph.undo_redirect(redirect);
    assert_eq!(graph.producer(out).unwrap().inputs(), &[a, a]);
    assert_eq!(graph.results(), &[a, out]);
    assert_eq!(graph.consumer_count(b), 0);
    assert!(graph.verify().is_ok());
}

#[test]
fn test_verify_detects_cycle() {
    let mut graph = Graph::new();
    let x = graph
        .add_parameter(None, ElementType::F32, pshape![4])
        .unwrap();
    let a = graph.add_simple_op(None, Relu, &[x]).unwrap();
    let b = graph.add_simple_op(None, Relu, &[a]).unwrap();

    // Point `a`'s producer at `b`, which depends on `a`.
    let a_node = graph.value(a).unwrap().producer();
    let consumers_of_a: FxHashSet<NodeId> = graph
        .value(a)
        .unwrap()
        .uses()
        .iter()
        .map(|u| u.node)
        .collect();
    assert!(graph.depends_on_any(b, &consumers_of_a));
    graph.redirect_uses(x, b, &FxHashSet::default());

    assert!(matches!(graph.verify(), Err(GraphError::Cycle(_))));
    assert!(graph.topological_order().is_err());
    let a_nodes: FxHashSet<NodeId> = [a_node].into_iter().collect();
    assert!(graph.depends_on_any(b, &a_nodes));
}

#[test]
fn test_topological_order() {
    let mut graph = Graph::new();
    let x = graph
        .add_parameter(None, ElementType::F32, pshape![4])
        .unwrap();
    let late = graph.add_simple_op(None, Relu, &[x]).unwrap();
    let early = graph.add_simple_op(None, Relu, &[x]).unwrap();
    let last = graph.add_simple_op(None, Relu, &[late]).unwrap();

    // Make `late` consume a value created after it.
    let exclude: FxHashSet<NodeId> = [graph.value(early).unwrap().producer()]
        .into_iter()
        .collect();
    graph.redirect_uses(x, early, &exclude);

    let order = graph.topological_order().unwrap();
    let position = |value| {
        let node = graph.value(value).unwrap().producer();
        order.iter().position(|&id| id == node).unwrap()
    };
    assert!(position(early) < position(late));
    assert!(position(late) < position(last));
}

#[test]
fn test_remove_dead_nodes() {
    let mut graph = Graph::new();
    let x = graph
        .add_parameter(None, ElementType::F32, pshape![4])
        .unwrap();
    let a = graph.add_simple_op(None, Relu, &[x]).unwrap();
    let b = graph.add_simple_op(None, Relu, &[a]).unwrap();
    let kept = graph.add_simple_op(None, Relu, &[x]).unwrap();
    graph.set_results(&[kept]).unwrap();

    let b_node = graph.value(b).unwrap().producer();
    let removed = graph.remove_dead_nodes([b_node]);

    assert_eq!(removed.len(), 2);
    assert!(graph.value(a).is_none());
    assert!(graph.value(b).is_none());
    assert!(graph.value(x).is_some());
    assert_eq!(graph.consumer_count(x), 1);
    assert!(graph.verify().is_ok());

    // Results and parameters are never removed.
    let kept_node = graph.value(kept).unwrap().producer();
    assert!(graph.remove_dead_nodes([kept_node]).is_empty());
    let param = graph.value(x).unwrap().producer();
    assert!(!graph.remove_node(param));
}

#[test]
fn test_prune() {
    let mut graph = Graph::new();
    let x = graph
        .add_parameter(None, ElementType::F32, pshape![4])
        .unwrap();
    let unused_param = graph
        .add_parameter(None, ElementType::F32, pshape![4])
        .unwrap();
    let a = graph.add_simple_op(None, Relu, &[x]).unwrap();
    let b = graph.add_simple_op(None, Relu, &[a]).unwrap();
    let c = graph.add_simple_op(None, Relu, &[b]).unwrap();
    graph.set_results(&[a]).unwrap();

    assert_eq!(graph.prune(), 2);
    assert!(graph.value(b).is_none());
    assert!(graph.value(c).is_none());
    assert!(graph.value(unused_param).is_some());
    assert_eq!(graph.node_count(), 3);
    assert!(graph.verify().is_ok());
}

#[test]
fn test_graph_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<Graph>();
}

#[test]
fn test_infer_with_known_input_values() {
    let mut graph = Graph::new();
    let x = graph
        .add_parameter(None, ElementType::F32, pshape![2, 3, 4])
        .unwrap();
    let y = graph
        .add_parameter(None, ElementType::F32, pshape![6, 4])
        .unwrap();
    let z = graph
        .add_parameter(None, ElementType::F32, pshape![?, 4])
        .unwrap();

    let shape = graph
        .add_constant(None, Constant::new(vec![4i64, -1], &[2]))
        .unwrap();
    let from_constant = graph
        .add_simple_op(None, Reshape::default(), &[x, shape])
        .unwrap();
    assert_eq!(graph.value_type(from_constant).unwrap().shape, pshape![4, 6]);

    let y_shape = graph.add_simple_op(None, ShapeOf::default(), &[y]).unwrap();
    let from_shape_of = graph
        .add_simple_op(None, Reshape::default(), &[x, y_shape])
        .unwrap();
    assert_eq!(
        graph.value_type(from_shape_of).unwrap().shape,
        pshape![6, 4]
    );

    // The shape of `z` is not static, so only the output rank is known.
    let z_shape = graph.add_simple_op(None, ShapeOf::default(), &[z]).unwrap();
    let from_dynamic = graph
        .add_simple_op(None, Reshape::default(), &[x, z_shape])
        .unwrap();
    assert_eq!(graph.value_type(from_dynamic).unwrap().shape, pshape![?, ?]);

    let mismatch = graph
        .add_constant(None, Constant::new(vec![5i64, 5], &[2]))
        .unwrap();
    let err = graph
        .add_simple_op(None, Reshape::default(), &[x, mismatch])
        .unwrap_err();
    assert!(matches!(
        err,
        ValidationError::Op {
            op: OpType::Reshape,
            node: None,
            ..
        }
    ));
}

#[test]
fn test_revalidate_after_constant_value_changes() {
    let mut graph = Graph::new();
    let x = graph
        .add_parameter(None, ElementType::F32, pshape![2, 3, 4])
        .unwrap();
    let shape = graph
        .add_constant(None, Constant::new(vec![4i64, -1], &[2]))
        .unwrap();
    let reshaped = graph
        .add_simple_op(None, Reshape::default(), &[x, shape])
        .unwrap();
    let relu = graph.add_simple_op(None, Relu, &[reshaped]).unwrap();

    // The new value has the same type as the old one.
    let constant = graph.value(shape).unwrap().producer();
    *graph.op_mut(constant).unwrap() = Constant::new(vec![-1i64, 2], &[2]).into();
    graph.revalidate(constant).unwrap();

    assert_eq!(graph.value_type(reshaped).unwrap().shape, pshape![12, 2]);
    assert_eq!(graph.value_type(relu).unwrap().shape, pshape![12, 2]);

    // A value which does not fit leaves the graph unchanged.
    *graph.op_mut(constant).unwrap() = Constant::new(vec![5i64, 5], &[2]).into();
    assert!(graph.revalidate(constant).is_err());
    assert_eq!(graph.value_type(relu).unwrap().shape, pshape![12, 2]);
}
