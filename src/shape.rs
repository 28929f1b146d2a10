//! Dimensions and partially-known tensor shapes.

use std::fmt;

use smallvec::SmallVec;
use thiserror::Error;

use crate::element_type::ElementType;

/// Error returned when two sources of shape or type information disagree.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum MergeError {
    #[error("dimensions {lhs} and {rhs} are not equal")]
    Dimension { lhs: usize, rhs: usize },

    #[error("dimensions {lhs} and {rhs} cannot be broadcast together")]
    Broadcast { lhs: usize, rhs: usize },

    #[error("ranks {lhs} and {rhs} are not equal")]
    Rank { lhs: usize, rhs: usize },

    #[error("element types {lhs} and {rhs} are not compatible")]
    ElementType { lhs: ElementType, rhs: ElementType },
}

/// Size of a single tensor dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Dimension {
    /// A dimension whose size is known.
    Fixed(usize),

    /// A dimension whose size is not known until the graph is executed.
    Dynamic,
}

impl Dimension {
    pub fn is_static(self) -> bool {
        matches!(self, Dimension::Fixed(_))
    }

    pub fn is_dynamic(self) -> bool {
        matches!(self, Dimension::Dynamic)
    }

    /// Return the size of this dimension, if known.
    pub fn fixed(self) -> Option<usize> {
        match self {
            Dimension::Fixed(size) => Some(size),
            Dimension::Dynamic => None,
        }
    }

    /// Combine two sources of information about the same dimension.
    ///
    /// If both dimensions are fixed they must be equal. A dynamic dimension
    /// merges to the other operand.
    pub fn merge(self, other: Dimension) -> Result<Dimension, MergeError> {
        match (self, other) {
            (Dimension::Fixed(a), Dimension::Fixed(b)) if a != b => {
                Err(MergeError::Dimension { lhs: a, rhs: b })
            }
            (Dimension::Dynamic, dim) | (dim, Dimension::Dynamic) => Ok(dim),
            (dim, _) => Ok(dim),
        }
    }

    /// Combine two dimensions following NumPy broadcasting rules.
    ///
    /// A fixed size of 1 stretches to match the other dimension. A dynamic
    /// dimension broadcast against a fixed size other than 1 must have that
    /// size at runtime, so the result is the fixed size.
    pub fn broadcast_merge(self, other: Dimension) -> Result<Dimension, MergeError> {
        match (self, other) {
            (Dimension::Fixed(a), Dimension::Fixed(b)) if a == b => Ok(Dimension::Fixed(a)),
            (Dimension::Fixed(1), dim) | (dim, Dimension::Fixed(1)) => Ok(dim),
            (Dimension::Fixed(a), Dimension::Fixed(b)) => {
                Err(MergeError::Broadcast { lhs: a, rhs: b })
            }
            (Dimension::Fixed(size), Dimension::Dynamic)
            | (Dimension::Dynamic, Dimension::Fixed(size)) => Ok(Dimension::Fixed(size)),
            (Dimension::Dynamic, Dimension::Dynamic) => Ok(Dimension::Dynamic),
        }
    }

    /// Return true if `self` and `other` can describe the same runtime size.
    pub fn compatible(self, other: Dimension) -> bool {
        self.merge(other).is_ok()
    }

    /// Return true if `self` carries no more information than `other`.
    ///
    /// A dynamic dimension relaxes every dimension. A fixed dimension only
    /// relaxes itself.
    pub fn relaxes(self, other: Dimension) -> bool {
        match self {
            Dimension::Dynamic => true,
            Dimension::Fixed(_) => self == other,
        }
    }

    /// Sum of two dimensions, or `None` if the size overflows.
    pub fn checked_add(self, rhs: Dimension) -> Option<Dimension> {
        match (self, rhs) {
            (Dimension::Fixed(a), Dimension::Fixed(b)) => a.checked_add(b).map(Dimension::Fixed),
            _ => Some(Dimension::Dynamic),
        }
    }

    /// Product of two dimensions, or `None` if the size overflows.
    pub fn checked_mul(self, rhs: Dimension) -> Option<Dimension> {
        match (self, rhs) {
            // A zero-sized dimension makes the product zero regardless of the
            // other operand.
            (Dimension::Fixed(0), _) | (_, Dimension::Fixed(0)) => Some(Dimension::Fixed(0)),
            (Dimension::Fixed(a), Dimension::Fixed(b)) => a.checked_mul(b).map(Dimension::Fixed),
            _ => Some(Dimension::Dynamic),
        }
    }
}

impl From<usize> for Dimension {
    fn from(size: usize) -> Dimension {
        Dimension::Fixed(size)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Fixed(size) => write!(f, "{}", size),
            Dimension::Dynamic => write!(f, "?"),
        }
    }
}

type Dims = SmallVec<[Dimension; 4]>;

/// Shape of a tensor whose rank and dimension sizes may be only partially
/// known.
///
/// A shape either has a known rank, in which case each dimension is a
/// [`Dimension`], or an unknown rank.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartialShape {
    dims: Option<Dims>,
}

impl PartialShape {
    /// Create a shape with unknown rank.
    pub fn dynamic() -> PartialShape {
        PartialShape { dims: None }
    }

    /// Create a shape with a known rank but unknown dimension sizes.
    pub fn with_dynamic_dims(rank: usize) -> PartialShape {
        PartialShape {
            dims: Some(SmallVec::from_elem(Dimension::Dynamic, rank)),
        }
    }

    /// Create a shape with known rank from a list of dimensions.
    pub fn from_dims(dims: &[Dimension]) -> PartialShape {
        PartialShape {
            dims: Some(dims.into()),
        }
    }

    /// Create a fully static shape.
    pub fn from_static(shape: &[usize]) -> PartialShape {
        PartialShape {
            dims: Some(shape.iter().copied().map(Dimension::Fixed).collect()),
        }
    }

    /// Create the shape of a scalar (rank 0).
    pub fn scalar() -> PartialShape {
        PartialShape {
            dims: Some(SmallVec::new()),
        }
    }

    /// Return the rank of this shape, if known.
    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(|dims| dims.len())
    }

    /// Return the dimensions of this shape, if the rank is known.
    pub fn dims(&self) -> Option<&[Dimension]> {
        self.dims.as_deref()
    }

    /// Return the dimension at `index`, if the rank is known and `index` is
    /// in bounds.
    pub fn dim(&self, index: usize) -> Option<Dimension> {
        self.dims.as_ref().and_then(|dims| dims.get(index).copied())
    }

    pub fn is_rank_static(&self) -> bool {
        self.dims.is_some()
    }

    /// Return true if the rank and every dimension size are known.
    pub fn is_static(&self) -> bool {
        self.dims
            .as_ref()
            .is_some_and(|dims| dims.iter().all(|d| d.is_static()))
    }

    /// Return the dimension sizes if this shape is static.
    pub fn to_static(&self) -> Option<Vec<usize>> {
        self.dims.as_ref()?.iter().map(|d| d.fixed()).collect()
    }

    /// Return the number of elements in a tensor of this shape, if known.
    ///
    /// A shape with a zero-sized dimension has zero elements even if other
    /// dimensions are dynamic. Returns `None` if the count overflows `usize`.
    pub fn num_elements(&self) -> Option<usize> {
        let dims = self.dims.as_ref()?;
        if dims.contains(&Dimension::Fixed(0)) {
            return Some(0);
        }
        dims.iter()
            .try_fold(Dimension::Fixed(1), |acc, &dim| acc.checked_mul(dim))?
            .fixed()
    }

    /// Combine two sources of information about the same shape.
    ///
    /// Shapes of known rank merge element-wise and must have equal rank. A
    /// shape of unknown rank merges to the other operand.
    pub fn merge(&self, other: &PartialShape) -> Result<PartialShape, MergeError> {
        let (lhs, rhs) = match (&self.dims, &other.dims) {
            (None, _) => return Ok(other.clone()),
            (_, None) => return Ok(self.clone()),
            (Some(lhs), Some(rhs)) => (lhs, rhs),
        };
        if lhs.len() != rhs.len() {
            return Err(MergeError::Rank {
                lhs: lhs.len(),
                rhs: rhs.len(),
            });
        }
        let dims = lhs
            .iter()
            .zip(rhs.iter())
            .map(|(a, b)| a.merge(*b))
            .collect::<Result<Dims, _>>()?;
        Ok(PartialShape { dims: Some(dims) })
    }

    /// Combine two shapes following NumPy broadcasting rules.
    ///
    /// The shapes are aligned at their last dimension and the shorter shape
    /// is padded with 1s. If either rank is unknown, so is the rank of the
    /// result.
    pub fn broadcast_merge(&self, other: &PartialShape) -> Result<PartialShape, MergeError> {
        let (Some(lhs), Some(rhs)) = (&self.dims, &other.dims) else {
            return Ok(PartialShape::dynamic());
        };

        let out_rank = lhs.len().max(rhs.len());
        let lhs_pad = out_rank - lhs.len();
        let rhs_pad = out_rank - rhs.len();

        let lhs_iter = std::iter::repeat(Dimension::Fixed(1)).take(lhs_pad).chain(lhs.iter().copied());
        let rhs_iter = std::iter::repeat(Dimension::Fixed(1)).take(rhs_pad).chain(rhs.iter().copied());

        let dims = lhs_iter
            .zip(rhs_iter)
            .map(|(a, b)| a.broadcast_merge(b))
            .collect::<Result<Dims, _>>()?;
        Ok(PartialShape { dims: Some(dims) })
    }

    /// Return true if `self` and `other` can describe the same runtime shape.
    pub fn compatible(&self, other: &PartialShape) -> bool {
        self.merge(other).is_ok()
    }

    /// Return true if `self` carries no more information than `other`.
    ///
    /// This is the "at most as specific as" ordering used to check that
    /// inference is monotonic.
    pub fn relaxes(&self, other: &PartialShape) -> bool {
        match (&self.dims, &other.dims) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(lhs), Some(rhs)) => {
                lhs.len() == rhs.len() && lhs.iter().zip(rhs.iter()).all(|(a, b)| a.relaxes(*b))
            }
        }
    }
}

impl From<&[usize]> for PartialShape {
    fn from(shape: &[usize]) -> PartialShape {
        PartialShape::from_static(shape)
    }
}

impl<const N: usize> From<[usize; N]> for PartialShape {
    fn from(shape: [usize; N]) -> PartialShape {
        PartialShape::from_static(&shape)
    }
}

impl<const N: usize> From<[Dimension; N]> for PartialShape {
    fn from(dims: [Dimension; N]) -> PartialShape {
        PartialShape::from_dims(&dims)
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(dims) = &self.dims else {
            return write!(f, "?");
        };
        write!(f, "{{")?;
        for (i, dim) in dims.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", dim)?;
        }
        write!(f, "}}")
    }
}

/// Create a [`PartialShape`] of known rank.
///
/// Dimensions are written as sizes, or `?` for a dynamic dimension. For
/// example `pshape![2, ?, 3]` is a rank-3 shape whose middle dimension is
/// dynamic, and `pshape![]` is the shape of a scalar.
#[macro_export]
macro_rules! pshape {
    (@dim ?) => {
        $crate::Dimension::Dynamic
    };
    (@dim $size:tt) => {
        $crate::Dimension::Fixed($size)
    };
    () => {
        $crate::PartialShape::scalar()
    };
    ($($dim:tt),+ $(,)?) => {
        $crate::PartialShape::from_dims(&[$($crate::pshape!(@dim $dim)),+])
    };
}

/// Resolve an axis given as a value in `[-rank, rank - 1]` to a zero-based
/// dimension index.
///
/// Negative values count backwards from the last dimension. Returns `None`
/// if the axis is out of range.
pub fn resolve_axis(rank: usize, axis: i64) -> Option<usize> {
    let rank = rank as i64;
    let resolved = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&resolved).then_some(resolved as usize)
}

#[cfg(test)]
mod tests {
    use opgraph_testing::TestCases;

    use super::{resolve_axis, Dimension, MergeError, PartialShape};

    const DYN: Dimension = Dimension::Dynamic;

    fn fixed(size: usize) -> Dimension {
        Dimension::Fixed(size)
    }

    #[test]
    fn test_dimension_merge() {
        #[derive(Debug)]
        struct Case {
            a: Dimension,
            b: Dimension,
            expected: Result<Dimension, MergeError>,
        }

        let cases = [
            Case {
                a: fixed(3),
                b: fixed(3),
                expected: Ok(fixed(3)),
            },
            Case {
                a: fixed(3),
                b: DYN,
                expected: Ok(fixed(3)),
            },
            Case {
                a: DYN,
                b: DYN,
                expected: Ok(DYN),
            },
            Case {
                a: fixed(2),
                b: fixed(5),
                expected: Err(MergeError::Dimension { lhs: 2, rhs: 5 }),
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.a.merge(case.b), case.expected);
        })
    }

    #[test]
    fn test_dimension_merge_laws() {
        let dims = [DYN, fixed(0), fixed(1), fixed(2), fixed(7)];
        for a in dims {
            // Dynamic is the identity.
            assert_eq!(a.merge(DYN), Ok(a));
            assert_eq!(DYN.merge(a), Ok(a));

            for b in dims {
                // Commutative, including the error case.
                assert_eq!(a.merge(b).is_ok(), b.merge(a).is_ok());
                if let (Ok(ab), Ok(ba)) = (a.merge(b), b.merge(a)) {
                    assert_eq!(ab, ba);
                }

                // Fixed dimensions fail to merge iff they differ.
                if let (Some(x), Some(y)) = (a.fixed(), b.fixed()) {
                    assert_eq!(a.merge(b).is_err(), x != y);
                }
            }
        }
    }

    #[test]
    fn test_dimension_broadcast_merge() {
        assert_eq!(fixed(1).broadcast_merge(fixed(4)), Ok(fixed(4)));
        assert_eq!(fixed(4).broadcast_merge(fixed(1)), Ok(fixed(4)));
        assert_eq!(DYN.broadcast_merge(fixed(4)), Ok(fixed(4)));
        assert_eq!(DYN.broadcast_merge(fixed(1)), Ok(DYN));
        assert_eq!(DYN.broadcast_merge(DYN), Ok(DYN));
        assert_eq!(
            fixed(3).broadcast_merge(fixed(4)),
            Err(MergeError::Broadcast { lhs: 3, rhs: 4 })
        );
    }

    #[test]
    fn test_shape_merge() {
        let a = pshape![2, ?, 3];
        let b = pshape![?, 5, 3];
        assert_eq!(a.merge(&b), Ok(pshape![2, 5, 3]));
        assert_eq!(a.merge(&PartialShape::dynamic()), Ok(a.clone()));
        assert_eq!(PartialShape::dynamic().merge(&a), Ok(a.clone()));
        assert_eq!(
            a.merge(&pshape![2, 3]),
            Err(MergeError::Rank { lhs: 3, rhs: 2 })
        );
        assert_eq!(
            a.merge(&pshape![4, ?, 3]),
            Err(MergeError::Dimension { lhs: 2, rhs: 4 })
        );
    }

    #[test]
    fn test_shape_broadcast_merge() {
        #[derive(Debug)]
        struct Case {
            a: PartialShape,
            b: PartialShape,
            expected: Option<PartialShape>,
        }

        let cases = [
            Case {
                a: pshape![2, ?, 3],
                b: pshape![2, ?, 3],
                expected: Some(pshape![2, ?, 3]),
            },
            Case {
                a: pshape![4, 1, 3],
                b: pshape![5, 1],
                expected: Some(pshape![4, 5, 3]),
            },
            Case {
                a: pshape![],
                b: pshape![2, 2],
                expected: Some(pshape![2, 2]),
            },
            Case {
                a: PartialShape::dynamic(),
                b: pshape![2, 2],
                expected: Some(PartialShape::dynamic()),
            },
            Case {
                a: pshape![2, 3],
                b: pshape![2, 4],
                expected: None,
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.a.broadcast_merge(&case.b).ok(), case.expected);
        })
    }

    #[test]
    fn test_shape_queries() {
        let shape = pshape![2, ?, 3];
        assert_eq!(shape.rank(), Some(3));
        assert!(!shape.is_static());
        assert!(shape.is_rank_static());
        assert_eq!(shape.to_static(), None);
        assert_eq!(shape.num_elements(), None);
        assert_eq!(shape.to_string(), "{2,?,3}");

        let shape = PartialShape::from([2, 3]);
        assert!(shape.is_static());
        assert_eq!(shape.to_static(), Some(vec![2, 3]));
        assert_eq!(shape.num_elements(), Some(6));

        assert_eq!(pshape![0, ?].num_elements(), Some(0));
        assert_eq!(PartialShape::dynamic().rank(), None);
        assert_eq!(PartialShape::dynamic().to_string(), "?");
        assert_eq!(pshape![].num_elements(), Some(1));

        let huge = 1usize << (usize::BITS / 2 + 1);
        assert_eq!(pshape![huge, huge].num_elements(), None);
        assert_eq!(pshape![huge, huge, 0].num_elements(), Some(0));
    }

    #[test]
    fn test_dimension_checked_arithmetic() {
        assert_eq!(fixed(2).checked_add(fixed(3)), Some(fixed(5)));
        assert_eq!(fixed(2).checked_add(DYN), Some(DYN));
        assert_eq!(fixed(usize::MAX).checked_add(fixed(1)), None);

        assert_eq!(fixed(2).checked_mul(fixed(3)), Some(fixed(6)));
        assert_eq!(fixed(0).checked_mul(DYN), Some(fixed(0)));
        assert_eq!(DYN.checked_mul(fixed(3)), Some(DYN));
        assert_eq!(fixed(usize::MAX).checked_mul(fixed(2)), None);
    }

    #[test]
    fn test_relaxes() {
        assert!(PartialShape::dynamic().relaxes(&pshape![2, 3]));
        assert!(pshape![?, 3].relaxes(&pshape![2, 3]));
        assert!(!pshape![2, 3].relaxes(&pshape![?, 3]));
        assert!(!pshape![2].relaxes(&pshape![2, 3]));
        assert!(!pshape![2].relaxes(&PartialShape::dynamic()));
    }

    #[test]
    fn test_resolve_axis() {
        assert_eq!(resolve_axis(4, -1), Some(3));
        assert_eq!(resolve_axis(4, -4), Some(0));
        assert_eq!(resolve_axis(4, 3), Some(3));
        assert_eq!(resolve_axis(4, 4), None);
        assert_eq!(resolve_axis(4, -5), None);
        assert_eq!(resolve_axis(0, 0), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_round_trip() {
        let shape = pshape![2, ?, 3];
        let json = serde_json::to_string(&shape).unwrap();
        let parsed: PartialShape = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, shape);
    }
}
