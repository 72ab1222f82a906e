//! Manual half-precision encoding for control scalars.
//!
//! Several segment inputs (the attention mask and the rotary position factor)
//! are single-element binary16 tensors. Hosts are not assumed to have native
//! f16 arithmetic, so every update happens in the integer domain and the value
//! is re-encoded into a raw bit pattern right before the segment call.
//!
//! The conversions in [`binary16`] are total: every `i64` has an encoding and
//! every bit pattern has a decoding, so the crate exposes no error type.

pub mod binary16;
pub mod scalar;

pub use binary16::{
    half_to_int, int_to_half, is_infinite, EXACT_INTEGER_LIMIT, HALF_LOWEST, HALF_MAX,
    HALF_NEG_INFINITY, HALF_POS_INFINITY, HALF_ZERO,
};
pub use scalar::HalfScalar;
