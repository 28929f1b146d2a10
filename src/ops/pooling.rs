use smallvec::SmallVec;

use super::{exact_inputs, single, InferError, InferTypes, OutputTypes, TensorType};
use crate::element_type::ElementType;
use crate::shape::{Dimension, PartialShape};

/// Specifies how the size of a pooling output is rounded when the window
/// does not evenly cover the padded input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RoundingType {
    #[default]
    Floor,
    Ceil,
}

/// Attributes shared by pooling operations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoolAttrs {
    pub kernel: SmallVec<[usize; 2]>,
    pub strides: SmallVec<[usize; 2]>,
    pub pads_begin: SmallVec<[usize; 2]>,
    pub pads_end: SmallVec<[usize; 2]>,
    pub rounding: RoundingType,
}

impl PoolAttrs {
    pub fn new(kernel: &[usize], strides: &[usize]) -> PoolAttrs {
        PoolAttrs {
            kernel: kernel.into(),
            strides: strides.into(),
            pads_begin: SmallVec::from_elem(0, kernel.len()),
            pads_end: SmallVec::from_elem(0, kernel.len()),
            rounding: RoundingType::Floor,
        }
    }

    fn validate(&self) -> Result<(), InferError> {
        let spatial = self.kernel.len();
        if spatial == 0 {
            return Err(InferError::invalid_attribute("kernel", "must not be empty"));
        }
        for (name, values) in [
            ("strides", &self.strides),
            ("pads_begin", &self.pads_begin),
            ("pads_end", &self.pads_end),
        ] {
            if values.len() != spatial {
                return Err(InferError::invalid_attribute(
                    name,
                    format!("expected {} values but got {}", spatial, values.len()),
                ));
            }
        }
        if self.kernel.contains(&0) {
            return Err(InferError::invalid_attribute("kernel", "size cannot be 0"));
        }
        if self.strides.contains(&0) {
            return Err(InferError::invalid_attribute("strides", "stride cannot be 0"));
        }
        Ok(())
    }

    /// Return the output size of spatial dimension `i` given the input size.
    fn output_size(&self, i: usize, in_size: usize) -> Result<usize, InferError> {
        let padded = in_size
            .checked_add(self.pads_begin[i])
            .and_then(|size| size.checked_add(self.pads_end[i]))
            .ok_or_else(|| {
                InferError::invalid_attribute("pads", "padded input size overflows usize")
            })?;
        let kernel = self.kernel[i];
        let stride = self.strides[i];
        if padded < kernel {
            return Err(InferError::invalid_attribute(
                "kernel",
                format!("kernel size {} exceeds padded input size {}", kernel, padded),
            ));
        }
        let span = padded - kernel;
        let steps = match self.rounding {
            RoundingType::Floor => span / stride,
            RoundingType::Ceil => span.div_ceil(stride),
        };
        Ok(steps + 1)
    }

    /// Infer the output type of a pooling op with input `NC + spatial dims`.
    fn infer(&self, input: &TensorType) -> Result<TensorType, InferError> {
        self.validate()?;

        if input.element_type == ElementType::Boolean {
            return Err(InferError::UnsupportedElementType {
                index: 0,
                element_type: input.element_type,
            });
        }

        let rank = self.kernel.len() + 2;
        let Some(dims) = input.shape.dims() else {
            return Ok(TensorType::new(
                input.element_type,
                PartialShape::with_dynamic_dims(rank),
            ));
        };
        if dims.len() != rank {
            return Err(InferError::IncorrectRank {
                index: 0,
                rank: dims.len(),
            });
        }

        let mut out_dims: SmallVec<[Dimension; 4]> = dims[..2].into();
        for (i, &dim) in dims[2..].iter().enumerate() {
            let out_dim = match dim {
                Dimension::Fixed(size) => Dimension::Fixed(self.output_size(i, size)?),
                Dimension::Dynamic => Dimension::Dynamic,
            };
            out_dims.push(out_dim);
        }

        Ok(TensorType::new(
            input.element_type,
            PartialShape::from_dims(&out_dims),
        ))
    }
}

macro_rules! pool_op {
    ($name:ident) => {
        #[derive(Clone, Debug, Default, PartialEq)]
        pub struct $name {
            pub attrs: PoolAttrs,
        }

        impl InferTypes for $name {
            fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
                let [input] = exact_inputs(inputs)?;
                single(self.attrs.infer(input)?)
            }
        }
    };
}

pool_op!(MaxPool);
pool_op!(AvgPool);
