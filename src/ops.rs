//! The catalog of operations and their type inference rules.
//!
//! Each operation is a struct carrying only its attributes. The structs are
//! gathered into the closed [`OpKind`] enum, which is what graph nodes store.
//! Every operation implements [`InferTypes`], which validates the element
//! types and shapes of its inputs and computes the types of its outputs.

use std::fmt;

use smallvec::SmallVec;
use thiserror::Error;

use crate::element_type::ElementType;
use crate::shape::{resolve_axis, Dimension, MergeError, PartialShape};

mod binary;
mod composite;
mod constant;
mod layout;
mod matmul;
mod pooling;
mod reduce;
mod sequence;
mod slice;
mod unary;

pub use binary::{
    Add, AutoBroadcast, Divide, Equal, Greater, Less, Maximum, Minimum, Multiply, Power, Subtract,
};
pub use composite::{Decompose, FusedMultiplyAdd, HardSigmoid};
pub use constant::{Constant, ConstantData, Parameter};
pub use layout::{Concat, Flatten, Reshape, ShapeOf, Split, Transpose};
pub use matmul::MatMul;
pub use pooling::{AvgPool, MaxPool, PoolAttrs, RoundingType};
pub use reduce::{ReduceMean, ReduceProd, ReduceSum};
pub use sequence::ReverseSequence;
pub use slice::StridedSlice;
pub use unary::{Abs, Convert, Erf, Exp, Floor, Negative, Relu, Sigmoid, Softmax, Sqrt, Tanh};

/// Element type and shape of a value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub element_type: ElementType,
    pub shape: PartialShape,
}

impl TensorType {
    pub fn new(element_type: ElementType, shape: impl Into<PartialShape>) -> TensorType {
        TensorType {
            element_type,
            shape: shape.into(),
        }
    }

    /// Type about which nothing is known.
    pub fn dynamic() -> TensorType {
        TensorType {
            element_type: ElementType::Dynamic,
            shape: PartialShape::dynamic(),
        }
    }

    /// Return true if values of type `self` and `other` could be the same at
    /// runtime.
    pub fn compatible(&self, other: &TensorType) -> bool {
        self.element_type.is_compatible(other.element_type) && self.shape.compatible(&other.shape)
    }

    /// Return true if `self` carries no more information than `other`.
    pub fn relaxes(&self, other: &TensorType) -> bool {
        (self.element_type.is_dynamic() || self.element_type == other.element_type)
            && self.shape.relaxes(&other.shape)
    }

    /// Return the rank of the shape, if known.
    pub fn rank(&self) -> Option<usize> {
        self.shape.rank()
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.element_type, self.shape)
    }
}

/// Output types computed by type inference. Most operations have one output.
pub type OutputTypes = SmallVec<[TensorType; 1]>;

/// Number of inputs an operation accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),

    /// Between `min` and `max` inputs inclusive.
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Range(min, max) => (min..=max).contains(&count),
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
            Arity::Range(min, max) => write!(f, "{} to {}", min, max),
        }
    }
}

/// Errors that occur when an operation's inputs or attributes violate its
/// contract.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum InferError {
    #[error("expected {expected} inputs but got {actual}")]
    IncorrectInputCount { expected: Arity, actual: usize },

    #[error("input {index} is not a value in the graph")]
    InvalidInput { index: usize },

    #[error("incompatible shapes {lhs} and {rhs}")]
    IncompatibleShapes {
        lhs: PartialShape,
        rhs: PartialShape,
    },

    #[error("incompatible element types {lhs} and {rhs}")]
    IncompatibleElementTypes { lhs: ElementType, rhs: ElementType },

    #[error("input {index} has unsupported element type {element_type}")]
    UnsupportedElementType {
        index: usize,
        element_type: ElementType,
    },

    #[error("input {index} has unsupported rank {rank}")]
    IncorrectRank { index: usize, rank: usize },

    #[error("invalid value for attribute \"{name}\": {reason}")]
    InvalidAttribute { name: &'static str, reason: String },

    #[error("axis {axis} is out of range for rank {rank}")]
    AxisOutOfRange { axis: i64, rank: usize },

    #[error("negative axis {axis} cannot be resolved for an input of unknown rank")]
    DynamicRank { axis: i64 },

    #[error("operation produced {actual} outputs but the node has {expected}")]
    OutputCountMismatch { expected: usize, actual: usize },

    #[error("operation {0} is not in the registry")]
    UnsupportedOp(OpType),

    #[error("size of {shape} overflows usize")]
    SizeOverflow { shape: PartialShape },
}

impl InferError {
    pub(crate) fn invalid_attribute(name: &'static str, reason: impl Into<String>) -> InferError {
        InferError::InvalidAttribute {
            name,
            reason: reason.into(),
        }
    }

    /// Convert a shape merge failure between `lhs` and `rhs`.
    pub(crate) fn shapes(lhs: &PartialShape, rhs: &PartialShape) -> InferError {
        InferError::IncompatibleShapes {
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        }
    }
}

/// Merge the element types of several inputs.
pub(crate) fn merge_element_types<'a>(
    inputs: impl IntoIterator<Item = &'a TensorType>,
) -> Result<ElementType, InferError> {
    inputs
        .into_iter()
        .try_fold(ElementType::Dynamic, |acc, input| {
            acc.merge(input.element_type)
        })
        .map_err(|err| match err {
            MergeError::ElementType { lhs, rhs } => {
                InferError::IncompatibleElementTypes { lhs, rhs }
            }
            // Element type merges only fail with `MergeError::ElementType`.
            _ => InferError::invalid_attribute("element_type", err.to_string()),
        })
}

/// Resolve a possibly negative axis against the rank of an input.
///
/// If the rank is unknown, non-negative axes are returned unchanged and
/// negative axes fail with [`InferError::DynamicRank`].
pub fn normalize_axis(axis: i64, rank: Option<usize>) -> Result<usize, InferError> {
    match rank {
        Some(rank) => resolve_axis(rank, axis).ok_or(InferError::AxisOutOfRange { axis, rank }),
        None if axis >= 0 => Ok(axis as usize),
        None => Err(InferError::DynamicRank { axis }),
    }
}

/// Resolve a list of axes against a known rank, removing duplicates.
///
/// The result is sorted in ascending order.
pub(crate) fn normalize_axes(axes: &[i64], rank: usize) -> Result<SmallVec<[usize; 4]>, InferError> {
    let mut resolved = axes
        .iter()
        .map(|&axis| normalize_axis(axis, Some(rank)))
        .collect::<Result<SmallVec<[usize; 4]>, _>>()?;
    resolved.sort_unstable();
    resolved.dedup();
    Ok(resolved)
}

/// Product of a sequence of dimensions.
pub(crate) fn dims_product(dims: &[Dimension]) -> Result<Dimension, InferError> {
    dims.iter()
        .try_fold(Dimension::Fixed(1), |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| InferError::SizeOverflow {
            shape: PartialShape::from_dims(dims),
        })
}

/// Validate input types and infer the output types of an operation.
pub trait InferTypes {
    /// Compute the output types given the input types.
    ///
    /// The number of inputs has already been checked against the operation's
    /// [`Arity`]. Implementations must be monotonic: giving inputs with more
    /// information must not produce outputs with less.
    fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError>;

    /// Compute the output types given the input types and the values of
    /// inputs which are known when the graph is built.
    ///
    /// `values[i]` holds the value of input `i` if it is known. `values` may
    /// be shorter than `inputs`. Operations which read shapes or axes from
    /// their inputs override this. Others ignore the values.
    fn infer_types_with_values(
        &self,
        inputs: &[TensorType],
        values: &[Option<ConstantData>],
    ) -> Result<OutputTypes, InferError> {
        let _ = values;
        self.infer_types(inputs)
    }
}

/// Return the value of input `index` as a list of integers, if it is known
/// and has an integer element type.
pub(crate) fn int_values(values: &[Option<ConstantData>], index: usize) -> Option<SmallVec<[i64; 4]>> {
    values.get(index)?.as_ref()?.to_i64()
}

/// Check that an input which holds a list of integers, such as a shape or
/// permutation, is a vector of integers.
pub(crate) fn check_int_vector(input: &TensorType, index: usize) -> Result<(), InferError> {
    if !(input.element_type.is_integral() || input.element_type.is_dynamic()) {
        return Err(InferError::UnsupportedElementType {
            index,
            element_type: input.element_type,
        });
    }
    match input.rank() {
        Some(rank) if rank != 1 => Err(InferError::IncorrectRank { index, rank }),
        _ => Ok(()),
    }
}

/// Destructure a fixed number of inputs.
pub(crate) fn exact_inputs<const N: usize>(
    inputs: &[TensorType],
) -> Result<&[TensorType; N], InferError> {
    inputs
        .try_into()
        .map_err(|_| InferError::IncorrectInputCount {
            expected: Arity::Exact(N),
            actual: inputs.len(),
        })
}

/// Shorthand for the common case of a single output.
pub(crate) fn single(ty: TensorType) -> Result<OutputTypes, InferError> {
    Ok(SmallVec::from_buf([ty]))
}

macro_rules! op_catalog {
    ($($op:ident: $arity:expr, commutative=$commutative:literal;)*) => {
        /// Identifies the kind of an operation without its attributes.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum OpType {
            $($op),*
        }

        impl OpType {
            /// Every operation in the catalog.
            pub const ALL: &'static [OpType] = &[$(OpType::$op),*];

            pub fn name(self) -> &'static str {
                match self {
                    $(OpType::$op => stringify!($op)),*
                }
            }

            /// Return the number of inputs this operation accepts.
            pub fn arity(self) -> Arity {
                match self {
                    $(OpType::$op => $arity),*
                }
            }

            /// Return true if this is a binary operation whose operands can
            /// be swapped without changing the result.
            pub fn is_commutative(self) -> bool {
                match self {
                    $(OpType::$op => $commutative),*
                }
            }
        }

        /// An operation and its attributes.
        #[derive(Clone, Debug, PartialEq)]
        pub enum OpKind {
            $($op($op)),*
        }

        impl OpKind {
            pub fn op_type(&self) -> OpType {
                match self {
                    $(OpKind::$op(_) => OpType::$op),*
                }
            }
        }

        impl InferTypes for OpKind {
            fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
                match self {
                    $(OpKind::$op(op) => op.infer_types(inputs)),*
                }
            }

            fn infer_types_with_values(
                &self,
                inputs: &[TensorType],
                values: &[Option<ConstantData>],
            ) -> Result<OutputTypes, InferError> {
                match self {
                    $(OpKind::$op(op) => op.infer_types_with_values(inputs, values)),*
                }
            }
        }

        $(
            impl From<$op> for OpKind {
                fn from(op: $op) -> OpKind {
                    OpKind::$op(op)
                }
            }
        )*
    };
}

op_catalog! {
    Parameter: Arity::Exact(0), commutative=false;
    Constant: Arity::Exact(0), commutative=false;

    Abs: Arity::Exact(1), commutative=false;
    Erf: Arity::Exact(1), commutative=false;
    Exp: Arity::Exact(1), commutative=false;
    Floor: Arity::Exact(1), commutative=false;
    Negative: Arity::Exact(1), commutative=false;
    Relu: Arity::Exact(1), commutative=false;
    Sigmoid: Arity::Exact(1), commutative=false;
    Sqrt: Arity::Exact(1), commutative=false;
    Tanh: Arity::Exact(1), commutative=false;
    Convert: Arity::Exact(1), commutative=false;
    Softmax: Arity::Exact(1), commutative=false;

    Add: Arity::Exact(2), commutative=true;
    Subtract: Arity::Exact(2), commutative=false;
    Multiply: Arity::Exact(2), commutative=true;
    Divide: Arity::Exact(2), commutative=false;
    Maximum: Arity::Exact(2), commutative=true;
    Minimum: Arity::Exact(2), commutative=true;
    Power: Arity::Exact(2), commutative=false;
    Equal: Arity::Exact(2), commutative=true;
    Less: Arity::Exact(2), commutative=false;
    Greater: Arity::Exact(2), commutative=false;

    MatMul: Arity::Exact(2), commutative=false;
    ReduceSum: Arity::Exact(1), commutative=false;
    ReduceMean: Arity::Exact(1), commutative=false;
    ReduceProd: Arity::Exact(1), commutative=false;

    ShapeOf: Arity::Exact(1), commutative=false;
    Transpose: Arity::Range(1, 2), commutative=false;
    Reshape: Arity::Range(1, 2), commutative=false;
    Flatten: Arity::Exact(1), commutative=false;
    Concat: Arity::AtLeast(1), commutative=false;
    Split: Arity::Exact(1), commutative=false;
    StridedSlice: Arity::Exact(1), commutative=false;
    ReverseSequence: Arity::Exact(2), commutative=false;
    MaxPool: Arity::Exact(1), commutative=false;
    AvgPool: Arity::Exact(1), commutative=false;

    HardSigmoid: Arity::Exact(3), commutative=false;
    FusedMultiplyAdd: Arity::Exact(3), commutative=false;
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        self.op_type().name()
    }

    /// Return the expansion of this operation into simpler ones, if it is a
    /// composite operation.
    pub fn as_composite(&self) -> Option<&dyn Decompose> {
        match self {
            OpKind::HardSigmoid(op) => Some(op),
            OpKind::FusedMultiplyAdd(op) => Some(op),
            _ => None,
        }
    }

    /// Check the number of inputs and infer output types.
    pub fn validate_and_infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
        self.validate_and_infer_types_with_values(inputs, &[])
    }

    /// Check the number of inputs and infer output types, using the values
    /// of inputs which are known.
    pub fn validate_and_infer_types_with_values(
        &self,
        inputs: &[TensorType],
        values: &[Option<ConstantData>],
    ) -> Result<OutputTypes, InferError> {
        let arity = self.op_type().arity();
        if !arity.accepts(inputs.len()) {
            return Err(InferError::IncorrectInputCount {
                expected: arity,
                actual: inputs.len(),
            });
        }
        self.infer_types_with_values(inputs, values)
    }

    /// Return true if the value of this operation's output can be known
    /// when the graph is built.
    pub(crate) fn has_known_value(&self) -> bool {
        matches!(self, OpKind::Constant(_) | OpKind::ShapeOf(_))
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
