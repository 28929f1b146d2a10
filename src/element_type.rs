use std::fmt;

use opgraph_base::F16;

use crate::shape::MergeError;

/// Enum specifying the element type of a tensor value.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ElementType {
    /// Element type that is not yet known.
    ///
    /// This is compatible with every other type.
    Dynamic,
    Boolean,
    F16,
    BF16,
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl ElementType {
    /// Return the size of elements of this type in bits, or `None` for
    /// [`ElementType::Dynamic`].
    pub fn bit_width(self) -> Option<u32> {
        let width = match self {
            ElementType::Dynamic => return None,
            ElementType::Boolean | ElementType::I8 | ElementType::U8 => 8,
            ElementType::F16 | ElementType::BF16 | ElementType::I16 | ElementType::U16 => 16,
            ElementType::F32 | ElementType::I32 | ElementType::U32 => 32,
            ElementType::F64 | ElementType::I64 | ElementType::U64 => 64,
        };
        Some(width)
    }

    pub fn is_dynamic(self) -> bool {
        self == ElementType::Dynamic
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            ElementType::F16 | ElementType::BF16 | ElementType::F32 | ElementType::F64
        )
    }

    /// Return true if this is a signed type. Floats are signed.
    pub fn is_signed(self) -> bool {
        self.is_float()
            || matches!(
                self,
                ElementType::I8 | ElementType::I16 | ElementType::I32 | ElementType::I64
            )
    }

    /// Return true if this is an integer type. Booleans are not integers.
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            ElementType::I8
                | ElementType::I16
                | ElementType::I32
                | ElementType::I64
                | ElementType::U8
                | ElementType::U16
                | ElementType::U32
                | ElementType::U64
        )
    }

    /// Return true if values of type `self` and `other` can be combined by an
    /// elementwise operation.
    ///
    /// Types are compatible if they are equal or either is dynamic.
    pub fn is_compatible(self, other: ElementType) -> bool {
        self == other || self.is_dynamic() || other.is_dynamic()
    }

    /// Combine two sources of information about the same element type.
    pub fn merge(self, other: ElementType) -> Result<ElementType, MergeError> {
        match (self, other) {
            (ElementType::Dynamic, ty) | (ty, ElementType::Dynamic) => Ok(ty),
            (lhs, rhs) if lhs == rhs => Ok(lhs),
            (lhs, rhs) => Err(MergeError::ElementType { lhs, rhs }),
        }
    }
}

impl fmt::Display for ElementType {
    /// Format this enum value in the style of the corresponding Rust type (eg.
    /// "i32" for `ElementType::I32`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Dynamic => "dynamic",
            ElementType::Boolean => "bool",
            ElementType::F16 => "f16",
            ElementType::BF16 => "bf16",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::I8 => "i8",
            ElementType::I16 => "i16",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::U8 => "u8",
            ElementType::U16 => "u16",
            ElementType::U32 => "u32",
            ElementType::U64 => "u64",
        };
        write!(f, "{}", name)
    }
}

/// Get the [`ElementType`] that corresponds to a given Rust type.
pub trait ElementTypeOf {
    fn element_type_of() -> ElementType;
}

macro_rules! impl_element_type_of {
    ($type:ty, $ty:ident) => {
        impl ElementTypeOf for $type {
            fn element_type_of() -> ElementType {
                ElementType::$ty
            }
        }
    };
}

impl_element_type_of!(bool, Boolean);
impl_element_type_of!(F16, F16);
impl_element_type_of!(f32, F32);
impl_element_type_of!(f64, F64);
impl_element_type_of!(i8, I8);
impl_element_type_of!(i16, I16);
impl_element_type_of!(i32, I32);
impl_element_type_of!(i64, I64);
impl_element_type_of!(u8, U8);
impl_element_type_of!(u16, U16);
impl_element_type_of!(u32, U32);
impl_element_type_of!(u64, U64);
