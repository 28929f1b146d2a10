use smallvec::SmallVec;

use super::{exact_inputs, single, InferError, InferTypes, OutputTypes, TensorType};
use crate::shape::{Dimension, PartialShape};

/// Extract a strided slice of a tensor.
///
/// Each of `begin`, `end` and `strides` has one entry per sliced axis, starting
/// from the first. Axes beyond these are kept whole. Where `begin_mask` or
/// `end_mask` is set for an axis, the corresponding bound is ignored and the
/// slice extends to the start or end of the axis.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StridedSlice {
    pub begin: SmallVec<[i64; 4]>,
    pub end: SmallVec<[i64; 4]>,
    pub strides: SmallVec<[i64; 4]>,
    pub begin_mask: SmallVec<[bool; 4]>,
    pub end_mask: SmallVec<[bool; 4]>,
}

/// Compute the length of `start..end` with step `stride` over an axis of
/// size `size`, with out-of-range bounds clamped like Python slices.
fn slice_len(
    size: usize,
    begin: Option<i64>,
    end: Option<i64>,
    stride: i64,
) -> usize {
    let size = i64::try_from(size).unwrap_or(i64::MAX);
    let resolve = |index: i64| if index < 0 { index + size } else { index };

    let step = stride.unsigned_abs();
    let count = |span: i64| (span as u64 - 1) / step + 1;

    if stride > 0 {
        let start = begin.map(|b| resolve(b).clamp(0, size)).unwrap_or(0);
        let stop = end.map(|e| resolve(e).clamp(0, size)).unwrap_or(size);
        if stop > start {
            count(stop - start) as usize
        } else {
            0
        }
    } else {
        let start = begin
            .map(|b| resolve(b).clamp(-1, size - 1))
            .unwrap_or(size - 1);
        let stop = end.map(|e| resolve(e).clamp(-1, size - 1)).unwrap_or(-1);
        if start > stop {
            count(start - stop) as usize
        } else {
            0
        }
    }
}

impl InferTypes for StridedSlice {
    fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
        let [input] = exact_inputs(inputs)?;

        let sliced = self.begin.len();
        if self.end.len() != sliced || self.strides.len() != sliced {
            return Err(InferError::invalid_attribute(
                "strides",
                "begin, end and strides must have the same length",
            ));
        }
        if self.strides.contains(&0) {
            return Err(InferError::invalid_attribute("strides", "stride cannot be 0"));
        }

        let Some(dims) = input.shape.dims() else {
            return single(TensorType::new(input.element_type, PartialShape::dynamic()));
        };
        if sliced > dims.len() {
            return Err(InferError::IncorrectRank {
                index: 0,
                rank: dims.len(),
            });
        }

        let out_dims: SmallVec<[Dimension; 4]> = dims
            .iter()
            .enumerate()
            .map(|(axis, &dim)| {
                if axis >= sliced {
                    return dim;
                }
                let Dimension::Fixed(size) = dim else {
                    return Dimension::Dynamic;
                };
                let masked = |mask: &[bool]| mask.get(axis).copied().unwrap_or(false);
                let begin = (!masked(&self.begin_mask)).then_some(self.begin[axis]);
                let end = (!masked(&self.end_mask)).then_some(self.end[axis]);
                Dimension::Fixed(slice_len(size, begin, end, self.strides[axis]))
            })
            .collect();

        single(TensorType::new(
            input.element_type,
            PartialShape::from_dims(&out_dims),
        ))
    }
}
