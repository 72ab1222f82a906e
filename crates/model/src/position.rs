//! Decode position bookkeeping.
//!
//! The decoder needs four control values per call: how many positions are
//! already cached (`history_len`), how many new positions this call writes
//! (`ids_len`), the rotary position factor, and the attention-mask scalar.
//! The first call is the prefill over the whole prompt; every later call
//! writes exactly one token.

use attention::AttentionMask;
use candle_core::{Device, Tensor};
use codec::HalfScalar;

use crate::config::VisionGrid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prefill,
    Decode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionTracker {
    phase: Phase,
    history_len: usize,
    ids_len: usize,
    pos_factor: HalfScalar,
    mask: AttentionMask,
    base_offset: i64,
}

impl PositionTracker {
    /// Tracker for a text-only prompt of `ids_len` tokens.
    pub fn text(ids_len: usize) -> Self {
        Self::with_offset(ids_len, 0)
    }

    /// Tracker for a merged prompt of `ids_len` positions, image included.
    pub fn vision(ids_len: usize, grid: &VisionGrid) -> Self {
        Self::with_offset(ids_len, grid.position_offset())
    }

    fn with_offset(ids_len: usize, base_offset: i64) -> Self {
        Self {
            phase: Phase::Prefill,
            history_len: 0,
            ids_len,
            pos_factor: HalfScalar::from_int(0),
            mask: AttentionMask::Closed,
            base_offset,
        }
    }

    /// Moves past a completed decoder call.
    pub fn advance(&mut self) {
        self.history_len += self.ids_len;
        match self.phase {
            Phase::Prefill => {
                self.pos_factor = HalfScalar::from_int(self.base_offset + self.ids_len as i64);
                self.ids_len = 1;
                self.mask = AttentionMask::Open;
                self.phase = Phase::Decode;
            }
            Phase::Decode => {
                self.pos_factor = self.pos_factor.offset(1);
            }
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn history_len(&self) -> usize {
        self.history_len
    }

    pub fn ids_len(&self) -> usize {
        self.ids_len
    }

    pub fn pos_factor(&self) -> HalfScalar {
        self.pos_factor
    }

    pub fn mask(&self) -> AttentionMask {
        self.mask
    }

    pub fn history_len_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        int_scalar(self.history_len, device)
    }

    pub fn ids_len_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        int_scalar(self.ids_len, device)
    }

    pub fn pos_factor_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        self.pos_factor.to_tensor(device)
    }

    pub fn mask_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        self.mask.to_tensor(device)
    }
}

/// `[1]` i64 tensor holding `value`.
pub(crate) fn int_scalar(value: usize, device: &Device) -> candle_core::Result<Tensor> {
    signed_scalar(value as i64, device)
}

pub(crate) fn signed_scalar(value: i64, device: &Device) -> candle_core::Result<Tensor> {
    Tensor::from_vec(vec![value], 1, device)
}
