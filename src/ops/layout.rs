use smallvec::SmallVec;

use super::{
    check_int_vector, dims_product, exact_inputs, int_values, merge_element_types, normalize_axis,
    single, Arity, ConstantData, InferError, InferTypes, OutputTypes, TensorType,
};
use crate::element_type::ElementType;
use crate::shape::{Dimension, PartialShape};

/// Split the inputs of an op which takes a data input and an optional second
/// input.
fn data_and_optional(inputs: &[TensorType]) -> Result<(&TensorType, Option<&TensorType>), InferError> {
    match inputs {
        [data] => Ok((data, None)),
        [data, extra] => Ok((data, Some(extra))),
        _ => Err(InferError::IncorrectInputCount {
            expected: Arity::Range(1, 2),
            actual: inputs.len(),
        }),
    }
}

/// Return the length of a vector input, if known.
fn vector_len(input: &TensorType) -> Option<usize> {
    match input.shape.dims()? {
        [len] => len.fixed(),
        _ => None,
    }
}

/// Permute the dimensions of a tensor.
///
/// The permutation is either the `perm` attribute or an optional second
/// input holding a vector of axes. An empty permutation input reverses the
/// dimensions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transpose {
    /// New order of dimensions. If `None`, the order is reversed.
    pub perm: Option<SmallVec<[usize; 4]>>,
}

impl Transpose {
    pub fn with_perm(perm: &[usize]) -> Transpose {
        Transpose {
            perm: Some(perm.into()),
        }
    }

    /// Return true if this transpose leaves an input of rank `rank`
    /// unchanged.
    ///
    /// This only considers the `perm` attribute.
    pub fn is_identity(&self, rank: usize) -> bool {
        match &self.perm {
            Some(perm) => perm.iter().copied().eq(0..rank),
            None => rank <= 1,
        }
    }
}

/// Apply a permutation, or reverse the dimensions if `perm` is `None`.
fn permute(input: &TensorType, perm: Option<&[usize]>) -> Result<TensorType, InferError> {
    let Some(perm) = perm else {
        let shape = match input.shape.dims() {
            Some(dims) => {
                let reversed: SmallVec<[Dimension; 4]> = dims.iter().rev().copied().collect();
                PartialShape::from_dims(&reversed)
            }
            None => PartialShape::dynamic(),
        };
        return Ok(TensorType::new(input.element_type, shape));
    };

    let mut seen: SmallVec<[bool; 4]> = SmallVec::from_elem(false, perm.len());
    for &axis in perm {
        match seen.get_mut(axis) {
            Some(seen) if !*seen => *seen = true,
            _ => {
                return Err(InferError::invalid_attribute(
                    "perm",
                    format!("{:?} is not a permutation", perm),
                ))
            }
        }
    }

    let shape = match input.shape.dims() {
        Some(dims) if dims.len() != perm.len() => {
            return Err(InferError::IncorrectRank {
                index: 0,
                rank: dims.len(),
            })
        }
        Some(dims) => {
            let permuted: SmallVec<[Dimension; 4]> = perm.iter().map(|&i| dims[i]).collect();
            PartialShape::from_dims(&permuted)
        }
        None => PartialShape::with_dynamic_dims(perm.len()),
    };
    Ok(TensorType::new(input.element_type, shape))
}

impl InferTypes for Transpose {
    fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
        self.infer_types_with_values(inputs, &[])
    }

    fn infer_types_with_values(
        &self,
        inputs: &[TensorType],
        values: &[Option<ConstantData>],
    ) -> Result<OutputTypes, InferError> {
        let (input, order) = data_and_optional(inputs)?;
        let Some(order) = order else {
            return single(permute(input, self.perm.as_deref())?);
        };

        if self.perm.is_some() {
            return Err(InferError::invalid_attribute(
                "perm",
                "cannot be combined with a permutation input",
            ));
        }
        check_int_vector(order, 1)?;

        match int_values(values, 1) {
            Some(axes) if axes.is_empty() => single(permute(input, None)?),
            Some(axes) => {
                let perm = axes
                    .iter()
                    .map(|&axis| usize::try_from(axis))
                    .collect::<Result<SmallVec<[usize; 4]>, _>>()
                    .map_err(|_| {
                        InferError::invalid_attribute(
                            "perm",
                            format!("{:?} is not a permutation", axes.as_slice()),
                        )
                    })?;
                single(permute(input, Some(&perm))?)
            }
            None => {
                // Only the rank of the output is known.
                let rank = input.rank().or_else(|| vector_len(order).filter(|&len| len > 0));
                let shape = match rank {
                    Some(rank) => PartialShape::with_dynamic_dims(rank),
                    None => PartialShape::dynamic(),
                };
                single(TensorType::new(input.element_type, shape))
            }
        }
    }
}

/// Change the shape of a tensor without changing its elements.
///
/// The target shape is either the `shape` attribute or an optional second
/// input holding a vector of sizes. When the second input is given, the
/// attribute is ignored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reshape {
    /// Target shape. `-1` infers the size of one dimension from the element
    /// count.
    pub shape: SmallVec<[i64; 4]>,

    /// If true, `0` copies the corresponding input dimension. Otherwise `0`
    /// means a zero-sized dimension.
    pub special_zero: bool,
}

impl Reshape {
    pub fn new(shape: &[i64], special_zero: bool) -> Reshape {
        Reshape {
            shape: shape.into(),
            special_zero,
        }
    }
}

impl Reshape {
    /// Infer the output type of reshaping `input` to `target`.
    fn reshape_to(&self, input: &TensorType, target: &[i64]) -> Result<TensorType, InferError> {
        let mut inferred_index = None;
        let mut out_dims: SmallVec<[Dimension; 4]> = SmallVec::with_capacity(target.len());

        for (i, &size) in target.iter().enumerate() {
            let dim = match size {
                -1 => {
                    if inferred_index.replace(i).is_some() {
                        return Err(InferError::invalid_attribute(
                            "shape",
                            "at most one dimension can be -1",
                        ));
                    }
                    Dimension::Dynamic
                }
                0 if self.special_zero => match input.shape.dims() {
                    Some(dims) => *dims.get(i).ok_or_else(|| {
                        InferError::invalid_attribute(
                            "shape",
                            format!("cannot copy dimension {} of a rank {} input", i, dims.len()),
                        )
                    })?,
                    None => Dimension::Dynamic,
                },
                size if size >= 0 => Dimension::Fixed(size as usize),
                size => {
                    return Err(InferError::invalid_attribute(
                        "shape",
                        format!("invalid size {}", size),
                    ))
                }
            };
            out_dims.push(dim);
        }

        let in_count = input.shape.num_elements();

        if let Some(index) = inferred_index {
            let others: SmallVec<[Dimension; 4]> = out_dims
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, dim)| *dim)
                .collect();
            let other_count = dims_product(&others)?.fixed();

            if let (Some(in_count), Some(other_count)) = (in_count, other_count) {
                if other_count != 0 {
                    if in_count % other_count != 0 {
                        return Err(InferError::shapes(
                            &input.shape,
                            &PartialShape::from_dims(&out_dims),
                        ));
                    }
                    out_dims[index] = Dimension::Fixed(in_count / other_count);
                }
            }
        }

        let out_shape = PartialShape::from_dims(&out_dims);
        let out_count = dims_product(&out_dims)?.fixed();
        if let (Some(in_count), Some(out_count)) = (in_count, out_count) {
            if in_count != out_count {
                return Err(InferError::shapes(&input.shape, &out_shape));
            }
        }

        Ok(TensorType::new(input.element_type, out_shape))
    }
}

impl InferTypes for Reshape {
    fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
        self.infer_types_with_values(inputs, &[])
    }

    fn infer_types_with_values(
        &self,
        inputs: &[TensorType],
        values: &[Option<ConstantData>],
    ) -> Result<OutputTypes, InferError> {
        let (input, target) = data_and_optional(inputs)?;
        let Some(target) = target else {
            return single(self.reshape_to(input, &self.shape)?);
        };

        check_int_vector(target, 1)?;
        if let Some(sizes) = int_values(values, 1) {
            return single(self.reshape_to(input, &sizes)?);
        }

        // The output rank is the length of the target shape.
        let shape = match vector_len(target) {
            Some(rank) => PartialShape::with_dynamic_dims(rank),
            None => PartialShape::dynamic(),
        };
        single(TensorType::new(input.element_type, shape))
    }
}

/// Return the shape of a tensor as a vector.
#[derive(Clone, Debug, PartialEq)]
pub struct ShapeOf {
    /// Element type of the output. Either `I32` or `I64`.
    pub output_type: ElementType,
}

impl Default for ShapeOf {
    fn default() -> Self {
        ShapeOf {
            output_type: ElementType::I64,
        }
    }
}

impl ShapeOf {
    /// Return the value of the output for an input of type `input`, if the
    /// input's shape is static.
    pub fn value(&self, input: &TensorType) -> Option<ConstantData> {
        let dims = input.shape.to_static()?;
        match self.output_type {
            ElementType::I32 => dims
                .iter()
                .map(|&size| i32::try_from(size).ok())
                .collect::<Option<Vec<_>>>()
                .map(ConstantData::from),
            _ => dims
                .iter()
                .map(|&size| i64::try_from(size).ok())
                .collect::<Option<Vec<_>>>()
                .map(ConstantData::from),
        }
    }
}

impl InferTypes for ShapeOf {
    fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
        let [input] = exact_inputs(inputs)?;
        if !matches!(self.output_type, ElementType::I32 | ElementType::I64) {
            return Err(InferError::invalid_attribute(
                "output_type",
                format!("{} is not I32 or I64", self.output_type),
            ));
        }
        let len = match input.rank() {
            Some(rank) => Dimension::Fixed(rank),
            None => Dimension::Dynamic,
        };
        single(TensorType::new(self.output_type, PartialShape::from_dims(&[len])))
    }
}

/// Flatten a tensor into a matrix.
///
/// Dimensions before `axis` are combined into the first output dimension and
/// the remaining dimensions into the second.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Flatten {
    /// Axis in the range `[-rank, rank]`.
    pub axis: i64,
}

impl InferTypes for Flatten {
    fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
        let [input] = exact_inputs(inputs)?;

        let Some(dims) = input.shape.dims() else {
            return single(TensorType::new(
                input.element_type,
                PartialShape::with_dynamic_dims(2),
            ));
        };

        // Unlike most ops, `axis == rank` is valid.
        let rank = dims.len() as i64;
        let axis = if self.axis < 0 {
            self.axis + rank
        } else {
            self.axis
        };
        if !(0..=rank).contains(&axis) {
            return Err(InferError::AxisOutOfRange {
                axis: self.axis,
                rank: dims.len(),
            });
        }

        let (outer, inner) = dims.split_at(axis as usize);
        single(TensorType::new(
            input.element_type,
            PartialShape::from_dims(&[dims_product(outer)?, dims_product(inner)?]),
        ))
    }
}

/// Join tensors along an axis.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Concat {
    pub axis: i64,
}

impl InferTypes for Concat {
    fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
        if inputs.is_empty() {
            return Err(InferError::IncorrectInputCount {
                expected: super::Arity::AtLeast(1),
                actual: 0,
            });
        }
        let element_type = merge_element_types(inputs)?;

        // The output rank comes from the first input whose rank is known.
        let Some(first) = inputs.iter().find(|input| input.shape.is_rank_static()) else {
            return single(TensorType::new(element_type, PartialShape::dynamic()));
        };
        let rank = first.shape.rank().unwrap_or(0);
        let axis = normalize_axis(self.axis, Some(rank))?;

        let mut out_dims: SmallVec<[Dimension; 4]> = SmallVec::from_elem(Dimension::Dynamic, rank);
        out_dims[axis] = Dimension::Fixed(0);

        for input in inputs {
            let Some(dims) = input.shape.dims() else {
                out_dims[axis] = Dimension::Dynamic;
                continue;
            };
            if dims.len() != rank {
                return Err(InferError::shapes(&first.shape, &input.shape));
            }
            for (i, &dim) in dims.iter().enumerate() {
                if i == axis {
                    out_dims[i] = out_dims[i].checked_add(dim).ok_or_else(|| {
                        InferError::SizeOverflow {
                            shape: input.shape.clone(),
                        }
                    })?;
                } else {
                    out_dims[i] = out_dims[i]
                        .merge(dim)
                        .map_err(|_| InferError::shapes(&first.shape, &input.shape))?;
                }
            }
        }

        single(TensorType::new(
            element_type,
            PartialShape::from_dims(&out_dims),
        ))
    }
}

/// Split a tensor into equal parts along an axis.
#[derive(Clone, Debug, PartialEq)]
pub struct Split {
    pub axis: i64,
    pub num_splits: usize,
}

impl InferTypes for Split {
    fn infer_types(&self, inputs: &[TensorType]) -> Result<OutputTypes, InferError> {
        let [input] = exact_inputs(inputs)?;
        if self.num_splits == 0 {
            return Err(InferError::invalid_attribute(
                "num_splits",
                "must be at least 1",
            ));
        }

        let shape = match input.shape.dims() {
            Some(dims) => {
                let axis = normalize_axis(self.axis, Some(dims.len()))?;
                let mut out_dims: SmallVec<[Dimension; 4]> = dims.into();
                if let Dimension::Fixed(size) = dims[axis] {
                    if size % self.num_splits != 0 {
                        return Err(InferError::invalid_attribute(
                            "num_splits",
                            format!("dimension of size {} cannot be split into {} parts", size, self.num_splits),
                        ));
                    }
                    out_dims[axis] = Dimension::Fixed(size / self.num_splits);
                }
                PartialShape::from_dims(&out_dims)
            }
            None => PartialShape::dynamic(),
        };

        let output = TensorType::new(input.element_type, shape);
        Ok(SmallVec::from_elem(output, self.num_splits))
    }
}

#[cfg(test)]
mod tests {
    use opgraph_testing::TestCases;

    use super::{Concat, Flatten, Reshape, ShapeOf, Split, Transpose};
    use crate::element_type::ElementType;
    use crate::ops::{ConstantData, InferError, InferTypes, TensorType};
    use crate::pshape;
    use crate::shape::PartialShape;

    fn f32_type(shape: PartialShape) -> TensorType {
        TensorType::new(ElementType::F32, shape)
    }

    #[test]
    fn test_transpose() {
        let input = f32_type(pshape![2, ?, 4]);

        let out = Transpose::default().infer_types(&[input.clone()]).unwrap();
        assert_eq!(out[0].shape, pshape![4, ?, 2]);

        let out = Transpose::with_perm(&[1, 2, 0])
            .infer_types(&[input.clone()])
            .unwrap();
        assert_eq!(out[0].shape, pshape![?, 4, 2]);

        assert!(Transpose::with_perm(&[0, 0, 1])
            .infer_types(&[input.clone()])
            .is_err());
        assert_eq!(
            Transpose::with_perm(&[1, 0]).infer_types(&[input]),
            Err(InferError::IncorrectRank { index: 0, rank: 3 })
        );

        let out = Transpose::with_perm(&[1, 0])
            .infer_types(&[f32_type(PartialShape::dynamic())])
            .unwrap();
        assert_eq!(out[0].shape, pshape![?, ?]);

        assert!(Transpose::with_perm(&[0, 1, 2]).is_identity(3));
        assert!(!Transpose::with_perm(&[1, 0]).is_identity(2));
    }

    #[test]
    fn test_reshape() {
        #[derive(Debug)]
        struct Case {
            input: PartialShape,
            shape: Vec<i64>,
            special_zero: bool,
            expected: Option<PartialShape>,
        }

        let cases = [
            Case {
                input: pshape![2, 3, 4],
                shape: vec![6, -1],
                special_zero: false,
                expected: Some(pshape![6, 4]),
            },
            Case {
                input: pshape![2, 3, 4],
                shape: vec![0, -1],
                special_zero: true,
                expected: Some(pshape![2, 12]),
            },
            Case {
                input: pshape![?, 3, 4],
                shape: vec![0, 12],
                special_zero: true,
                expected: Some(pshape![?, 12]),
            },
            Case {
                input: pshape![?, 3, 4],
                shape: vec![-1, 12],
                special_zero: false,
                expected: Some(pshape![?, 12]),
            },
            Case {
                input: pshape![2, 3],
                shape: vec![7],
                special_zero: false,
                expected: None,
            },
            Case {
                input: pshape![2, 3],
                shape: vec![-1, -1],
                special_zero: false,
                expected: None,
            },
            Case {
                input: pshape![2, 3],
                shape: vec![4, -1],
                special_zero: false,
                expected: None,
            },
        ];

        cases.test_each(|case| {
            let op = Reshape::new(&case.shape, case.special_zero);
            let result = op
                .infer_types(&[f32_type(case.input.clone())])
                .ok()
                .map(|out| out[0].shape.clone());
            assert_eq!(result, case.expected);
        })
    }

    #[test]
    fn test_flatten() {
        let input = f32_type(pshape![2, 3, ?, 5]);
        let flatten = |axis| {
            Flatten { axis }
                .infer_types(&[input.clone()])
                .map(|out| out[0].shape.clone())
        };
        assert_eq!(flatten(1), Ok(pshape![2, ?]));
        assert_eq!(flatten(-2), Ok(pshape![6, ?]));
        assert_eq!(flatten(0), Ok(pshape![1, ?]));
        assert_eq!(flatten(4), Ok(pshape![?, 1]));
        assert!(flatten(5).is_err());

        let input = f32_type(pshape![2, 3, 0, 5]);
        let out = Flatten { axis: 3 }.infer_types(&[input]).unwrap();
        assert_eq!(out[0].shape, pshape![0, 5]);
    }

    #[test]
    fn test_concat() {
        let op = Concat { axis: -1 };
        let out = op
            .infer_types(&[f32_type(pshape![2, 3]), f32_type(pshape![?, 4])])
            .unwrap();
        assert_eq!(out[0].shape, pshape![2, 7]);

        let out = op
            .infer_types(&[f32_type(pshape![2, 3]), f32_type(pshape![2, ?])])
            .unwrap();
        assert_eq!(out[0].shape, pshape![2, ?]);

        let out = op
            .infer_types(&[f32_type(PartialShape::dynamic()), f32_type(pshape![2, 3])])
            .unwrap();
        assert_eq!(out[0].shape, pshape![2, ?]);

        assert!(op
            .infer_types(&[f32_type(pshape![2, 3]), f32_type(pshape![3, 3])])
            .is_err());
        assert!(op
            .infer_types(&[f32_type(pshape![2, 3]), f32_type(pshape![2])])
            .is_err());
    }

    #[test]
    fn test_split() {
        let op = Split {
            axis: 1,
            num_splits: 3,
        };
        let out = op.infer_types(&[f32_type(pshape![?, 6])]).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|ty| ty.shape == pshape![?, 2]));

        assert!(op.infer_types(&[f32_type(pshape![2, 4])]).is_err());
    }

    #[test]
    fn test_transpose_with_order_input() {
        let input = f32_type(pshape![2, ?, 4]);
        let order = TensorType::new(ElementType::I64, pshape![3]);
        let inputs = [input.clone(), order.clone()];
        let transpose = Transpose::default();

        let known = [None, Some(ConstantData::from(vec![2i64, 0, 1]))];
        let out = transpose.infer_types_with_values(&inputs, &known).unwrap();
        assert_eq!(out[0].shape, pshape![4, 2, ?]);

        // An empty order reverses the dimensions.
        let empty_order = TensorType::new(ElementType::I64, pshape![0]);
        let empty = [None, Some(ConstantData::from(Vec::<i64>::new()))];
        let out = transpose
            .infer_types_with_values(&[input.clone(), empty_order], &empty)
            .unwrap();
        assert_eq!(out[0].shape, pshape![4, ?, 2]);

        // Without a known order, only the rank is known.
        let out = transpose.infer_types(&inputs).unwrap();
        assert_eq!(out[0].shape, pshape![?, ?, ?]);
        let out = transpose
            .infer_types(&[f32_type(PartialShape::dynamic()), order.clone()])
            .unwrap();
        assert_eq!(out[0].shape, pshape![?, ?, ?]);

        let invalid = [None, Some(ConstantData::from(vec![-1i64, 0, 1]))];
        assert!(transpose.infer_types_with_values(&inputs, &invalid).is_err());
        assert!(Transpose::with_perm(&[0, 1, 2]).infer_types(&inputs).is_err());
        assert_eq!(
            transpose.infer_types(&[input, f32_type(pshape![3])]),
            Err(InferError::UnsupportedElementType {
                index: 1,
                element_type: ElementType::F32,
            })
        );
    }

    #[test]
    fn test_reshape_with_shape_input() {
        let input = f32_type(pshape![2, 3, 4]);
        let shape = TensorType::new(ElementType::I32, pshape![2]);
        let inputs = [input.clone(), shape];
        let reshape = Reshape::default();

        let known = [None, Some(ConstantData::from(vec![-1i32, 4]))];
        let out = reshape.infer_types_with_values(&inputs, &known).unwrap();
        assert_eq!(out[0].shape, pshape![6, 4]);

        let out = reshape.infer_types(&inputs).unwrap();
        assert_eq!(out[0].shape, pshape![?, ?]);

        let unknown_len = TensorType::new(ElementType::I64, pshape![?]);
        let out = reshape.infer_types(&[input.clone(), unknown_len]).unwrap();
        assert_eq!(out[0].shape, PartialShape::dynamic());

        let wrong_count = [None, Some(ConstantData::from(vec![5i64]))];
        let shape = TensorType::new(ElementType::I64, pshape![1]);
        assert!(reshape
            .infer_types_with_values(&[input.clone(), shape], &wrong_count)
            .is_err());

        let matrix = TensorType::new(ElementType::I64, pshape![1, 2]);
        assert_eq!(
            reshape.infer_types(&[input, matrix]),
            Err(InferError::IncorrectRank { index: 1, rank: 2 })
        );
    }

    #[test]
    fn test_shape_of() {
        let shape_of = ShapeOf::default();
        let out = shape_of.infer_types(&[f32_type(pshape![2, ?, 4])]).unwrap();
        assert_eq!(out[0], TensorType::new(ElementType::I64, pshape![3]));

        let out = shape_of
            .infer_types(&[f32_type(PartialShape::dynamic())])
            .unwrap();
        assert_eq!(out[0].shape, pshape![?]);

        assert_eq!(shape_of.value(&f32_type(pshape![2, ?])), None);
        assert_eq!(
            shape_of.value(&f32_type(pshape![2, 3])),
            Some(ConstantData::from(vec![2i64, 3]))
        );

        let shape_of_i32 = ShapeOf {
            output_type: ElementType::I32,
        };
        assert_eq!(
            shape_of_i32.value(&f32_type(pshape![5])),
            Some(ConstantData::from(vec![5i32]))
        );

        let invalid = ShapeOf {
            output_type: ElementType::F32,
        };
        assert!(invalid.infer_types(&[f32_type(pshape![2])]).is_err());
    }
}
