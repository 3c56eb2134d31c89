//! Ones-complement word arithmetic and floating point, as implemented by
//! the 6000/Cyber central processor's subtractive adder and floating point
//! unit.
//!
//! All integers here are ones-complement: `-x = !x` within the operand
//! width, and there are distinct positive and negative representations of
//! zero. Every arithmetic primitive preserves that, per the end-around-carry
//! hardware behavior rather than ordinary two's-complement wraparound.

pub mod arith;
pub mod float;

pub use arith::{
    add18, add24, add60, mask, normalize, pack, shift_left_circular, shift_right_arithmetic,
    sub18, sub24, sub60, unpack,
};
pub use float::{float_add, float_divide, float_multiply};
