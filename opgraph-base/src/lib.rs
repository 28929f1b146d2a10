//! Common numeric types used by other opgraph crates.
//!
//! This is an internal crate. Its main export is [`F16`], the 16-bit float
//! element type that graph constants can hold.

pub mod half;

pub use half::F16;
