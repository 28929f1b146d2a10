use super::{exact_inputs, merge_element_types, single, InferError, InferTypes, OutputTypes, TensorType};
use crate::element_type::ElementType;
use crate::shape::PartialShape;

/// Specifies how the shapes of binary operation inputs are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AutoBroadcast {
    /// Input shapes must be equal.
    None,

    /// Input shapes are broadcast following NumPy rules.
    #[default]
    Numpy,
}

impl AutoBroadcast {
    /// Combine the shapes of two inputs.
    pub fn combine(self, lhs: &PartialShape, rhs: &PartialShape) -> Result<PartialShape, InferError> {
        let merged = match self {
            AutoBroadcast::None => lhs.merge(rhs),
            AutoBroadcast::Numpy => lhs.broadcast_merge(rhs),
        };
        merged.map_err(|_| InferError::shapes(lhs, rhs))
    }
}

/// Infer the output type of an elementwise binary operation.
///
/// If `output_type` is set, it replaces the merged input element type.
pub(crate) fn infer_elementwise(
    inputs: &[TensorType],
    broadcast: AutoBroadcast,
    output_type: Option<ElementType>,
) -> Result<TensorType, InferError> {
    let [lhs, rhs] = exact_inputs(inputs)?;
    let element_type = merge_element_types([lhs, rhs])?;
    let shape = broadcast.combine(&lhs.shape, &rhs.shape)?;
    Ok(TensorType::new(output_type.unwrap_or(element_type), shape))
}

macro_rules! binary_op {
    ($(#[$meta:meta])* $name:ident, output=$output:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq)]
        pub struct $name {
            pub broadcast: AutoBroadcast,
        }

        impl $name {
            pub fn with_broadcast(broadcast: AutoBroadcast) -> $name {
                $name { broadcast }
            }
        }

        impl InferTypes for $name {
            fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
                single(infer_elementwise(inputs, self.broadcast, $output)?)
            }
        }
    };
}

binary_op!(Add, output = None);
binary_op!(Subtract, output = None);
binary_op!(Multiply, output = None);
binary_op!(Divide, output = None);
binary_op!(Maximum, output = None);
binary_op!(Minimum, output = None);
binary_op!(
    /// Raise the first input to the power of the second.
    Power,
    output = None
);
binary_op!(Equal, output = Some(ElementType::Boolean));
binary_op!(Less, output = Some(ElementType::Boolean));
binary_op!(Greater, output = Some(ElementType::Boolean));
