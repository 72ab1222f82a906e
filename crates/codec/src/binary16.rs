//! Integer ↔ IEEE 754 binary16 bit-pattern conversion.
//!
//! Layout: 1 sign bit, 5 exponent bits biased by 15, 10 mantissa bits. The
//! conversions work purely on integers so no half-precision arithmetic is
//! ever required from the host.

/// Bit pattern of `+0.0`.
pub const HALF_ZERO: u16 = 0x0000;
/// Bit pattern of `+inf`; saturation target for large positive integers.
pub const HALF_POS_INFINITY: u16 = 0x7c00;
/// Bit pattern of `-inf`; saturation target for large negative integers.
pub const HALF_NEG_INFINITY: u16 = 0xfc00;
/// Largest finite value, `65504`.
pub const HALF_MAX: u16 = 0x7bff;
/// Lowest finite value, `-65504`.
pub const HALF_LOWEST: u16 = 0xfbff;

/// Every integer with magnitude up to this bound survives a round trip.
pub const EXACT_INTEGER_LIMIT: i64 = 2048;

const SIGN_MASK: u16 = 0x8000;
const EXPONENT_MASK: u16 = 0x7c00;
const MANTISSA_MASK: u16 = 0x03ff;
const MANTISSA_BITS: i32 = 10;
const EXPONENT_BIAS: i32 = 15;
const EXPONENT_ALL_ONES: i32 = 0x1f;

/// Encodes a signed integer as the nearest binary16 bit pattern.
///
/// Zero maps to [`HALF_ZERO`]. Every other integer has magnitude at least 1,
/// so the result is never subnormal. Magnitudes whose biased exponent reaches
/// 31 (including those that round up into it) saturate to the signed infinity
/// pattern.
pub fn int_to_half(value: i64) -> u16 {
    if value == 0 {
        return HALF_ZERO;
    }
    let sign = if value < 0 { SIGN_MASK } else { 0 };
    let magnitude = value.unsigned_abs();
    let exponent = (u64::BITS - 1 - magnitude.leading_zeros()) as i32;
    let mut biased = exponent + EXPONENT_BIAS;
    if biased >= EXPONENT_ALL_ONES {
        return sign | EXPONENT_MASK;
    }

    let fraction = magnitude - (1u64 << exponent);
    let mut mantissa = if exponent > MANTISSA_BITS {
        round_shift(fraction, (exponent - MANTISSA_BITS) as u32)
    } else {
        fraction << (MANTISSA_BITS - exponent)
    };
    if mantissa > u64::from(MANTISSA_MASK) {
        mantissa = 0;
        biased += 1;
        if biased >= EXPONENT_ALL_ONES {
            return sign | EXPONENT_MASK;
        }
    }

    sign | ((biased as u16) << MANTISSA_BITS) | mantissa as u16
}

/// Decodes a binary16 bit pattern to the nearest integer.
///
/// Ties round away from zero. Both zero patterns decode to `0`, subnormals
/// (all below `2^-14`) round to `0`, and any all-ones exponent (infinity or
/// NaN) saturates to `i64::MAX` / `i64::MIN` according to the sign bit.
pub fn half_to_int(bits: u16) -> i64 {
    let negative = bits & SIGN_MASK != 0;
    let exponent = i32::from((bits & EXPONENT_MASK) >> MANTISSA_BITS);
    let mantissa = u64::from(bits & MANTISSA_MASK);

    if exponent == 0 && mantissa == 0 {
        return 0;
    }
    if exponent == EXPONENT_ALL_ONES {
        return if negative { i64::MIN } else { i64::MAX };
    }
    if exponent == 0 {
        return 0;
    }

    let significand = mantissa | (1u64 << MANTISSA_BITS);
    let shift = exponent - EXPONENT_BIAS - MANTISSA_BITS;
    let magnitude = if shift >= 0 {
        significand << shift
    } else {
        round_shift(significand, (-shift) as u32)
    } as i64;

    if negative {
        -magnitude
    } else {
        magnitude
    }
}

/// Returns `true` when `bits` encodes positive or negative infinity.
pub fn is_infinite(bits: u16) -> bool {
    bits & !SIGN_MASK == HALF_POS_INFINITY
}

fn round_shift(value: u64, shift: u32) -> u64 {
    if shift == 0 {
        value
    } else {
        (value + (1u64 << (shift - 1))) >> shift
    }
}
