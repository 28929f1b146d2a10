use std::sync::Arc;

use opgraph_base::F16;
use smallvec::SmallVec;

use super::{single, InferError, InferTypes, OutputTypes, TensorType};
use crate::element_type::ElementType;
use crate::shape::PartialShape;

/// Graph input with a declared type.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub element_type: ElementType,
    pub shape: PartialShape,
}

impl InferTypes for Parameter {
    fn infer_types(&self, _inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
        single(TensorType::new(self.element_type, self.shape.clone()))
    }
}

/// Element data of a [`Constant`].
///
/// Data is reference counted so that cloning graphs and ops is cheap.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstantData {
    Bool(Arc<[bool]>),
    F16(Arc<[F16]>),
    F32(Arc<[f32]>),
    F64(Arc<[f64]>),
    I32(Arc<[i32]>),
    I64(Arc<[i64]>),
}

impl ConstantData {
    pub fn len(&self) -> usize {
        match self {
            ConstantData::Bool(data) => data.len(),
            ConstantData::F16(data) => data.len(),
            ConstantData::F32(data) => data.len(),
            ConstantData::F64(data) => data.len(),
            ConstantData::I32(data) => data.len(),
            ConstantData::I64(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            ConstantData::Bool(_) => ElementType::Boolean,
            ConstantData::F16(_) => ElementType::F16,
            ConstantData::F32(_) => ElementType::F32,
            ConstantData::F64(_) => ElementType::F64,
            ConstantData::I32(_) => ElementType::I32,
            ConstantData::I64(_) => ElementType::I64,
        }
    }

    /// Create a single-element constant of a given element type.
    ///
    /// Returns `None` if there is no data representation for `element_type`.
    pub fn splat(element_type: ElementType, value: f64) -> Option<ConstantData> {
        let data = match element_type {
            ElementType::F16 => ConstantData::F16([F16::from_f32(value as f32)].into()),
            ElementType::F32 => ConstantData::F32([value as f32].into()),
            ElementType::F64 => ConstantData::F64([value].into()),
            ElementType::I32 => ConstantData::I32([value as i32].into()),
            ElementType::I64 => ConstantData::I64([value as i64].into()),
            ElementType::Boolean => ConstantData::Bool([value != 0.].into()),
            _ => return None,
        };
        Some(data)
    }

    /// Return the elements as integers, if the data has an integer type.
    pub fn to_i64(&self) -> Option<SmallVec<[i64; 4]>> {
        match self {
            ConstantData::I32(data) => Some(data.iter().map(|&x| x as i64).collect()),
            ConstantData::I64(data) => Some(SmallVec::from_slice(data)),
            _ => None,
        }
    }

    /// Return the element at `index` converted to `f64`.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        match self {
            ConstantData::Bool(data) => data.get(index).map(|&x| if x { 1. } else { 0. }),
            ConstantData::F16(data) => data.get(index).map(|&x| f64::from(x)),
            ConstantData::F32(data) => data.get(index).map(|&x| x as f64),
            ConstantData::F64(data) => data.get(index).copied(),
            ConstantData::I32(data) => data.get(index).map(|&x| x as f64),
            ConstantData::I64(data) => data.get(index).map(|&x| x as f64),
        }
    }
}

macro_rules! impl_constant_data_from {
    ($type:ty, $variant:ident) => {
        impl From<Vec<$type>> for ConstantData {
            fn from(data: Vec<$type>) -> ConstantData {
                ConstantData::$variant(data.into())
            }
        }

        impl From<&[$type]> for ConstantData {
            fn from(data: &[$type]) -> ConstantData {
                ConstantData::$variant(data.into())
            }
        }

        impl From<$type> for ConstantData {
            fn from(value: $type) -> ConstantData {
                ConstantData::$variant([value].into())
            }
        }
    };
}

impl_constant_data_from!(bool, Bool);
impl_constant_data_from!(F16, F16);
impl_constant_data_from!(f32, F32);
impl_constant_data_from!(f64, F64);
impl_constant_data_from!(i32, I32);
impl_constant_data_from!(i64, I64);

/// Tensor whose value is known when the graph is built.
#[derive(Clone, Debug, PartialEq)]
pub struct Constant {
    pub data: ConstantData,
    pub shape: SmallVec<[usize; 4]>,
}

impl Constant {
    pub fn new(data: impl Into<ConstantData>, shape: &[usize]) -> Constant {
        Constant {
            data: data.into(),
            shape: shape.into(),
        }
    }

    /// Create a rank-0 constant.
    pub fn scalar(value: impl Into<ConstantData>) -> Constant {
        Constant::new(value, &[])
    }

    /// Return the value of this constant if it has exactly one element.
    pub fn as_scalar_f64(&self) -> Option<f64> {
        if self.data.len() == 1 {
            self.data.get_f64(0)
        } else {
            None
        }
    }
}

impl InferTypes for Constant {
    fn infer_types(&self, _inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
        let shape = PartialShape::from_static(&self.shape);
        let Some(expected_len) = shape.num_elements() else {
            return Err(InferError::SizeOverflow { shape });
        };
        if self.data.len() != expected_len {
            return Err(InferError::invalid_attribute(
                "data",
                format!(
                    "{} elements do not fill shape {:?}",
                    self.data.len(),
                    self.shape.as_slice()
                ),
            ));
        }
        single(TensorType::new(self.data.element_type(), shape))
    }
}
