use super::{exact_inputs, normalize_axis, single, InferError, InferTypes, OutputTypes, TensorType};
use crate::shape::PartialShape;

/// Reverse variable-length prefixes of sequences in a batch.
///
/// The second input holds one sequence length per batch item, so its size
/// must agree with the batch dimension of the data.
#[derive(Clone, Debug, PartialEq)]
pub struct ReverseSequence {
    pub batch_axis: i64,
    pub seq_axis: i64,
}

impl Default for ReverseSequence {
    fn default() -> Self {
        ReverseSequence {
            batch_axis: 0,
            seq_axis: 1,
        }
    }
}

impl InferTypes for ReverseSequence {
    fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
        let [data, seq_lengths] = exact_inputs(inputs)?;

        let rank = data.rank();
        let batch_axis = normalize_axis(self.batch_axis, rank)?;
        normalize_axis(self.seq_axis, rank)?;

        let lengths_type = seq_lengths.element_type;
        if !(lengths_type.is_integral() || lengths_type.is_dynamic()) {
            return Err(InferError::UnsupportedElementType {
                index: 1,
                element_type: lengths_type,
            });
        }

        let mut shape = data.shape.clone();
        if let Some(lengths_dims) = seq_lengths.shape.dims() {
            let [length] = lengths_dims else {
                return Err(InferError::IncorrectRank {
                    index: 1,
                    rank: lengths_dims.len(),
                });
            };

            if let Some(data_dims) = data.shape.dims() {
                let merged = data_dims[batch_axis]
                    .merge(*length)
                    .map_err(|_| InferError::shapes(&data.shape, &seq_lengths.shape))?;
                let mut out_dims = data_dims.to_vec();
                out_dims[batch_axis] = merged;
                shape = PartialShape::from_dims(&out_dims);
            }
        }

        single(TensorType::new(data.element_type, shape))
    }
}
