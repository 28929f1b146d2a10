use super::{exact_inputs, normalize_axis, single, InferError, InferTypes, OutputTypes, TensorType};
use crate::element_type::ElementType;

/// Check the element type of the input to a unary elementwise op.
///
/// Booleans are never accepted. If `float_only` is set, integers are rejected
/// too.
fn check_unary_input(input: &TensorType, float_only: bool) -> Result<(), InferError> {
    let ty = input.element_type;
    let supported = match ty {
        ElementType::Dynamic => true,
        ElementType::Boolean => false,
        _ => !float_only || ty.is_float(),
    };
    if supported {
        Ok(())
    } else {
        Err(InferError::UnsupportedElementType {
            index: 0,
            element_type: ty,
        })
    }
}

macro_rules! unary_op {
    ($(#[$meta:meta])* $name:ident, float_only=$float_only:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq)]
        pub struct $name;

        impl InferTypes for $name {
            fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
                let [input] = exact_inputs(inputs)?;
                check_unary_input(input, $float_only)?;
                single(input.clone())
            }
        }
    };
}

unary_op!(Abs, float_only = false);
unary_op!(Erf, float_only = true);
unary_op!(Exp, float_only = true);
unary_op!(
    /// Round down. This is the identity for integers.
    Floor,
    float_only = false
);
unary_op!(Negative, float_only = false);
unary_op!(Relu, float_only = false);
unary_op!(Sigmoid, float_only = true);
unary_op!(Sqrt, float_only = true);
unary_op!(Tanh, float_only = true);

/// Convert elements to a different type.
#[derive(Clone, Debug, PartialEq)]
pub struct Convert {
    pub to: ElementType,
}

impl InferTypes for Convert {
    fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
        let [input] = exact_inputs(inputs)?;
        if self.to.is_dynamic() {
            return Err(InferError::invalid_attribute(
                "to",
                "target type must be known",
            ));
        }
        single(TensorType::new(self.to, input.shape.clone()))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Softmax {
    pub axis: i64,
}

impl InferTypes for Softmax {
    fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
        let [input] = exact_inputs(inputs)?;
        check_unary_input(input, true)?;

        // The axis doesn't affect the output shape, so it is only checked
        // once the rank is known.
        if let Some(rank) = input.rank() {
            normalize_axis(self.axis, Some(rank))?;
        }
        single(input.clone())
    }
}
