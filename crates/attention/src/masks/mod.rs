//! Attention-mask control values for the decoder segment.
//!
//! The decoder takes a single f16 scalar instead of a full additive mask. The
//! prefill call uses the lowest finite half value so padded positions are
//! suppressed; every later call passes zero.

use candle_core::{Device, Tensor};
use codec::HalfScalar;

/// Mask state fed to the decoder alongside each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionMask {
    /// Prefill: lowest finite half (`-65504`).
    Closed,
    /// Decode steps: zero.
    Open,
}

impl AttentionMask {
    pub fn scalar(self) -> HalfScalar {
        match self {
            AttentionMask::Closed => HalfScalar::LOWEST,
            AttentionMask::Open => HalfScalar::from_int(0),
        }
    }

    pub fn to_tensor(self, device: &Device) -> candle_core::Result<Tensor> {
        self.scalar().to_tensor(device)
    }
}
