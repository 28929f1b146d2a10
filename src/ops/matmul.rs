use smallvec::SmallVec;

use super::{exact_inputs, merge_element_types, single, InferError, InferTypes, OutputTypes, TensorType};
use crate::shape::{Dimension, PartialShape};

/// Matrix product following NumPy `matmul` semantics.
///
/// 1-D inputs are promoted to matrices by inserting a unit dimension, which
/// is removed from the output. Leading batch dimensions are broadcast.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatMul {
    pub transpose_a: bool,
    pub transpose_b: bool,
}

impl InferTypes for MatMul {
    fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
        let [a, b] = exact_inputs(inputs)?;
        let element_type = merge_element_types([a, b])?;

        let (Some(a_dims), Some(b_dims)) = (a.shape.dims(), b.shape.dims()) else {
            return single(TensorType::new(element_type, PartialShape::dynamic()));
        };

        if a_dims.is_empty() {
            return Err(InferError::IncorrectRank { index: 0, rank: 0 });
        }
        if b_dims.is_empty() {
            return Err(InferError::IncorrectRank { index: 1, rank: 0 });
        }

        let a_vector = a_dims.len() == 1;
        let b_vector = b_dims.len() == 1;

        let mut a_mat: SmallVec<[Dimension; 4]> = a_dims.into();
        let mut b_mat: SmallVec<[Dimension; 4]> = b_dims.into();
        if a_vector {
            a_mat.insert(0, Dimension::Fixed(1));
        } else if self.transpose_a {
            let n = a_mat.len();
            a_mat.swap(n - 2, n - 1);
        }
        if b_vector {
            b_mat.push(Dimension::Fixed(1));
        } else if self.transpose_b {
            let n = b_mat.len();
            b_mat.swap(n - 2, n - 1);
        }

        let (a_batch, a_rows) = a_mat.split_at(a_mat.len() - 2);
        let (b_batch, b_rows) = b_mat.split_at(b_mat.len() - 2);
        let [m, k_a] = [a_rows[0], a_rows[1]];
        let [k_b, n] = [b_rows[0], b_rows[1]];

        k_a.merge(k_b)
            .map_err(|_| InferError::shapes(&a.shape, &b.shape))?;

        let batch = PartialShape::from_dims(a_batch)
            .broadcast_merge(&PartialShape::from_dims(b_batch))
            .map_err(|_| InferError::shapes(&a.shape, &b.shape))?;

        let mut out_dims: SmallVec<[Dimension; 4]> = batch.dims().unwrap_or_default().into();
        if !a_vector {
            out_dims.push(m);
        }
        if !b_vector {
            out_dims.push(n);
        }

        single(TensorType::new(
            element_type,
            PartialShape::from_dims(&out_dims),
        ))
    }
}
