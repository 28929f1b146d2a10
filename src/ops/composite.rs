use super::binary::infer_elementwise;
use super::{
    exact_inputs, merge_element_types, single, Add, Arity, AutoBroadcast, Constant, ConstantData,
    InferError, InferTypes, Maximum, Minimum, Multiply, OpType, OutputTypes, TensorType,
};
use crate::graph::{Graph, ValidationError, ValueId};

/// Operations which are defined as a fixed expansion into simpler ones.
///
/// The output type inferred for the composite operation is authoritative.
/// The expansion must produce a value of the same type.
pub trait Decompose {
    /// Add the expansion of this operation to `graph`, with `inputs` as the
    /// operation's inputs, and return the value that replaces its output.
    fn decompose(&self, graph: &mut Graph, inputs: &[ValueId]) -> Result<ValueId, ValidationError>;
}

fn input_count_error(op: OpType, inputs: &[ValueId]) -> ValidationError {
    ValidationError::Op {
        op,
        node: None,
        error: InferError::IncorrectInputCount {
            expected: Arity::Exact(3),
            actual: inputs.len(),
        },
    }
}

/// Piecewise linear approximation of the sigmoid function.
///
/// Computes `min(max(alpha * x + beta, 0), 1)` where `alpha` and `beta` are
/// scalar inputs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HardSigmoid;

impl InferTypes for HardSigmoid {
    fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
        let [data, alpha, beta] = exact_inputs(inputs)?;

        let element_type = merge_element_types(inputs)?;
        if !(element_type.is_float() || element_type.is_dynamic()) {
            return Err(InferError::UnsupportedElementType {
                index: 0,
                element_type,
            });
        }

        for (index, param) in [(1, alpha), (2, beta)] {
            if let Some(rank) = param.rank() {
                if rank != 0 {
                    return Err(InferError::IncorrectRank { index, rank });
                }
            }
        }

        single(TensorType::new(element_type, data.shape.clone()))
    }
}

impl Decompose for HardSigmoid {
    fn decompose(&self, graph: &mut Graph, inputs: &[ValueId]) -> Result<ValueId, ValidationError> {
        let &[x, alpha, beta] = inputs else {
            return Err(input_count_error(OpType::HardSigmoid, inputs));
        };

        let element_type = graph
            .value_type(x)
            .ok_or(ValidationError::InvalidValue(x))?
            .element_type;
        let splat = |value: f64| {
            ConstantData::splat(element_type, value)
                .map(|data| Constant::new(data, &[]))
                .ok_or(ValidationError::Op {
                    op: OpType::HardSigmoid,
                    node: None,
                    error: InferError::UnsupportedElementType {
                        index: 0,
                        element_type,
                    },
                })
        };
        let zero = graph.add_constant(None, splat(0.)?)?;
        let one = graph.add_constant(None, splat(1.)?)?;

        let scaled = graph.add_simple_op(None, Multiply::default(), &[alpha, x])?;
        let shifted = graph.add_simple_op(None, Add::default(), &[scaled, beta])?;
        let lower = graph.add_simple_op(None, Maximum::default(), &[shifted, zero])?;
        graph.add_simple_op(None, Minimum::default(), &[lower, one])
    }
}

/// Computes `a * b + c` with NumPy broadcasting.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FusedMultiplyAdd;

impl InferTypes for FusedMultiplyAdd {
    fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
        let [a, b, c] = exact_inputs(inputs)?;
        let product = infer_elementwise(&[a.clone(), b.clone()], AutoBroadcast::Numpy, None)?;
        infer_elementwise(&[product, c.clone()], AutoBroadcast::Numpy, None).and_then(single)
    }
}

impl Decompose for FusedMultiplyAdd {
    fn decompose(&self, graph: &mut Graph, inputs: &[ValueId]) -> Result<ValueId, ValidationError> {
        let &[a, b, c] = inputs else {
            return Err(input_count_error(OpType::FusedMultiplyAdd, inputs));
        };
        let product = graph.add_simple_op(None, Multiply::default(), &[a, b])?;
        graph.add_simple_op(None, Add::default(), &[product, c])
    }
}
