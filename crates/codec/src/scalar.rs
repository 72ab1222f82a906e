//! Single-element f16 control scalars.

use candle_core::{DType, Device, Tensor};
use half::f16;

use crate::binary16::{half_to_int, int_to_half, HALF_LOWEST, HALF_ZERO};

/// A binary16 bit pattern carried as a control input.
///
/// Arithmetic is never performed on the half value itself. Callers step the
/// scalar through [`HalfScalar::offset`], which decodes, adds in `i64`, and
/// re-encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HalfScalar(u16);

impl HalfScalar {
    pub const ZERO: HalfScalar = HalfScalar(HALF_ZERO);
    pub const LOWEST: HalfScalar = HalfScalar(HALF_LOWEST);

    pub fn from_int(value: i64) -> Self {
        Self(int_to_half(value))
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub fn to_int(self) -> i64 {
        half_to_int(self.0)
    }

    /// Returns the scalar encoding `decode(self) + delta`.
    pub fn offset(self, delta: i64) -> Self {
        Self::from_int(self.to_int().saturating_add(delta))
    }

    /// Builds a `[1]` f16 tensor whose only element has exactly these bits.
    pub fn to_tensor(self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_vec(vec![f16::from_bits(self.0)], 1, device)
    }

    /// Reads the first element of an f16 tensor back as a raw bit pattern.
    pub fn from_tensor(tensor: &Tensor) -> candle_core::Result<Self> {
        if tensor.dtype() != DType::F16 {
            return Err(candle_core::Error::Msg(format!(
                "expected an f16 control scalar, found {:?}",
                tensor.dtype()
            )));
        }
        let values = tensor.flatten_all()?.to_vec1::<f16>()?;
        match values.first() {
            Some(value) => Ok(Self(value.to_bits())),
            None => Err(candle_core::Error::Msg(
                "control scalar tensor is empty".to_string(),
            )),
        }
    }
}

impl From<i64> for HalfScalar {
    fn from(value: i64) -> Self {
        Self::from_int(value)
    }
}
