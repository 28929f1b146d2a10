use smallvec::SmallVec;

use super::{exact_inputs, normalize_axes, single, InferError, InferTypes, OutputTypes, TensorType};
use crate::element_type::ElementType;
use crate::shape::{Dimension, PartialShape};

/// Infer the output shape of a reduction over `axes`.
///
/// An empty axis list reduces over every axis.
fn infer_reduce(input: &TensorType, axes: &[i64], keep_dims: bool) -> Result<TensorType, InferError> {
    if input.element_type == ElementType::Boolean {
        return Err(InferError::UnsupportedElementType {
            index: 0,
            element_type: input.element_type,
        });
    }

    let Some(dims) = input.shape.dims() else {
        return Ok(TensorType::new(input.element_type, PartialShape::dynamic()));
    };

    let axes = if axes.is_empty() {
        (0..dims.len()).collect()
    } else {
        normalize_axes(axes, dims.len())?
    };

    let out_dims: SmallVec<[Dimension; 4]> = dims
        .iter()
        .enumerate()
        .filter_map(|(i, &dim)| match (axes.contains(&i), keep_dims) {
            (false, _) => Some(dim),
            (true, true) => Some(Dimension::Fixed(1)),
            (true, false) => None,
        })
        .collect();

    Ok(TensorType::new(
        input.element_type,
        PartialShape::from_dims(&out_dims),
    ))
}

macro_rules! reduce_op {
    ($name:ident) => {
        #[derive(Clone, Debug, Default, PartialEq)]
        pub struct $name {
            pub axes: SmallVec<[i64; 4]>,
            pub keep_dims: bool,
        }

        impl $name {
            pub fn new(axes: &[i64], keep_dims: bool) -> $name {
                $name {
                    axes: axes.into(),
                    keep_dims,
                }
            }
        }

        impl InferTypes for $name {
            fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
                let [input] = exact_inputs(inputs)?;
                single(infer_reduce(input, &self.axes, self.keep_dims)?)
            }
        }
    };
}

reduce_op!(ReduceSum);
reduce_op!(ReduceMean);
reduce_op!(ReduceProd);
