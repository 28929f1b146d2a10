//! IEEE 754 binary16 ("half precision") floating point values.
//!
//! [`F16`] stores the raw bits and performs arithmetic and comparisons by
//! widening to `f32`. Conversions from `f32` round to the nearest
//! representable value, with ties rounding to even.
//!
//! This can be replaced with `f16` from the Rust standard library when that is
//! stabilized. See <https://github.com/rust-lang/rust/issues/116909>.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

const SIGN_MASK: u16 = 0x8000;
const EXPONENT_MASK: u16 = 0x7C00;
const FRACTION_MASK: u16 = 0x03FF;
const QUIET_BIT: u16 = 0x0200;

/// A 16-bit float with 1 sign bit, 5 exponent bits and 10 fraction bits.
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct F16(u16);

impl F16 {
    /// Number of explicitly stored fraction bits.
    pub const FRACTION_BITS: u32 = 10;

    /// Number of exponent bits.
    pub const EXPONENT_BITS: u32 = 5;

    /// Bias subtracted from the stored exponent.
    pub const EXPONENT_BIAS: i32 = 15;

    pub const ZERO: F16 = F16(0x0000);
    pub const NEG_ZERO: F16 = F16(0x8000);
    pub const ONE: F16 = F16(0x3C00);
    pub const INFINITY: F16 = F16(0x7C00);
    pub const NEG_INFINITY: F16 = F16(0xFC00);

    /// Canonical quiet NaN.
    pub const NAN: F16 = F16(0x7E00);

    /// Largest finite value (65504).
    pub const MAX: F16 = F16(0x7BFF);

    /// Smallest finite value (-65504).
    pub const MIN: F16 = F16(0xFBFF);

    /// Smallest positive normal value (2^-14).
    pub const MIN_POSITIVE: F16 = F16(0x0400);

    /// Smallest positive subnormal value (2^-24).
    pub const MIN_POSITIVE_SUBNORMAL: F16 = F16(0x0001);

    /// Difference between 1.0 and the next larger representable value.
    pub const EPSILON: F16 = F16(0x1400);

    /// Create a value from its raw bit pattern.
    pub const fn from_bits(bits: u16) -> F16 {
        F16(bits)
    }

    /// Return the raw bit pattern.
    pub const fn to_bits(self) -> u16 {
        self.0
    }

    /// Assemble a value from sign, biased exponent and fraction fields.
    ///
    /// Bits outside the width of each field are ignored.
    pub const fn from_parts(sign: u16, biased_exponent: u16, fraction: u16) -> F16 {
        F16(((sign & 0x1) << 15) | ((biased_exponent & 0x1F) << 10) | (fraction & FRACTION_MASK))
    }

    pub const fn sign(self) -> u16 {
        self.0 >> 15
    }

    pub const fn biased_exponent(self) -> u16 {
        (self.0 & EXPONENT_MASK) >> 10
    }

    pub const fn fraction(self) -> u16 {
        self.0 & FRACTION_MASK
    }

    pub const fn is_nan(self) -> bool {
        self.0 & EXPONENT_MASK == EXPONENT_MASK && self.0 & FRACTION_MASK != 0
    }

    /// Return true if this is a NaN with the quiet bit clear.
    pub const fn is_signaling_nan(self) -> bool {
        self.is_nan() && self.0 & QUIET_BIT == 0
    }

    pub const fn is_infinite(self) -> bool {
        self.0 & !SIGN_MASK == EXPONENT_MASK
    }

    pub const fn is_finite(self) -> bool {
        self.0 & EXPONENT_MASK != EXPONENT_MASK
    }

    /// Return true if this value is non-zero and has a zero exponent field.
    pub const fn is_subnormal(self) -> bool {
        self.0 & EXPONENT_MASK == 0 && self.0 & FRACTION_MASK != 0
    }

    pub const fn is_sign_negative(self) -> bool {
        self.0 & SIGN_MASK != 0
    }

    /// Convert an `f32` to the nearest `F16`, rounding ties to even.
    ///
    /// Values too large to represent become infinities, values too small
    /// become (signed) zero. NaN inputs produce a quiet NaN which keeps the
    /// upper payload bits.
    ///
    /// The bit manipulation follows the `half` crate -
    /// <https://github.com/VoidStarKat/half-rs>.
    pub fn from_f32(value: f32) -> F16 {
        let x: u32 = value.to_bits();

        let sign = x & 0x8000_0000u32;
        let exp = x & 0x7F80_0000u32;
        let man = x & 0x007F_FFFFu32;

        // All exponent bits set: infinity or NaN.
        if exp == 0x7F80_0000u32 {
            let nan_bit = if man == 0 { 0 } else { QUIET_BIT as u32 };
            return F16(((sign >> 16) | 0x7C00u32 | nan_bit | (man >> 13)) as u16);
        }

        let half_sign = sign >> 16;
        let unbiased_exp = ((exp >> 23) as i32) - 127;
        let half_exp = unbiased_exp + Self::EXPONENT_BIAS;

        if half_exp >= 0x1F {
            return F16((half_sign | 0x7C00u32) as u16);
        }

        if half_exp <= 0 {
            if 14 - half_exp > 24 {
                // Too small to round up to the smallest subnormal.
                return F16(half_sign as u16);
            }
            // Subnormal result. Restore the implicit leading mantissa bit.
            let man = man | 0x0080_0000u32;
            let mut half_man = man >> (14 - half_exp);
            let round_bit = 1 << (13 - half_exp);
            if (man & round_bit) != 0 && (man & (3 * round_bit - 1)) != 0 {
                half_man += 1;
            }
            return F16((half_sign | half_man) as u16);
        }

        let half_exp = (half_exp as u32) << 10;
        let half_man = man >> 13;

        // Round up if the first dropped bit is set and either a later dropped
        // bit or the lowest kept bit is set. A carry out of the fraction
        // correctly increments the exponent, and can produce infinity.
        let round_bit = 0x0000_1000u32;
        if (man & round_bit) != 0 && (man & (3 * round_bit - 1)) != 0 {
            F16(((half_sign | half_exp | half_man) + 1) as u16)
        } else {
            F16((half_sign | half_exp | half_man) as u16)
        }
    }

    /// Convert to `f32`. This conversion is exact.
    pub fn to_f32(self) -> f32 {
        let i = self.0;

        // Signed zero
        if i & 0x7FFFu16 == 0 {
            return f32::from_bits((i as u32) << 16);
        }

        let half_sign = (i & SIGN_MASK) as u32;
        let half_exp = (i & EXPONENT_MASK) as u32;
        let half_man = (i & FRACTION_MASK) as u32;

        if half_exp == EXPONENT_MASK as u32 {
            if half_man == 0 {
                return f32::from_bits((half_sign << 16) | 0x7F80_0000u32);
            } else {
                return f32::from_bits((half_sign << 16) | 0x7FC0_0000u32 | (half_man << 13));
            }
        }

        let sign = half_sign << 16;
        let unbiased_exp = ((half_exp as i32) >> 10) - Self::EXPONENT_BIAS;

        // Subnormals are normalized by shifting the mantissa and adjusting
        // the exponent.
        if half_exp == 0 {
            let e = (half_man as u16).leading_zeros() - 6;
            let exp = (127 - 15 - e) << 23;
            let man = (half_man << (14 + e)) & 0x7F_FF_FFu32;
            return f32::from_bits(sign | exp | man);
        }

        let exp = ((unbiased_exp + 127) as u32) << 23;
        let man = (half_man & FRACTION_MASK as u32) << 13;
        f32::from_bits(sign | exp | man)
    }
}

impl From<f32> for F16 {
    fn from(value: f32) -> F16 {
        F16::from_f32(value)
    }
}

impl From<F16> for f32 {
    fn from(value: F16) -> f32 {
        value.to_f32()
    }
}

impl From<F16> for f64 {
    fn from(value: F16) -> f64 {
        value.to_f32() as f64
    }
}

impl PartialEq for F16 {
    fn eq(&self, other: &F16) -> bool {
        self.to_f32() == other.to_f32()
    }
}

impl PartialOrd for F16 {
    fn partial_cmp(&self, other: &F16) -> Option<Ordering> {
        self.to_f32().partial_cmp(&other.to_f32())
    }
}

macro_rules! impl_f16_binop {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait for F16 {
            type Output = F16;

            fn $method(self, rhs: F16) -> F16 {
                F16::from_f32(self.to_f32() $op rhs.to_f32())
            }
        }
    };
}

impl_f16_binop!(Add, add, +);
impl_f16_binop!(Sub, sub, -);
impl_f16_binop!(Mul, mul, *);
impl_f16_binop!(Div, div, /);

impl Neg for F16 {
    type Output = F16;

    fn neg(self) -> F16 {
        F16(self.0 ^ SIGN_MASK)
    }
}

impl fmt::Display for F16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_f32().fmt(f)
    }
}

impl fmt::Debug for F16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F16({})", self.to_f32())
    }
}
