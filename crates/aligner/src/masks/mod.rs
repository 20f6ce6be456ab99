//! Validity masks shared by the alignment passes.
//!
//! Boolean masks are `U8` tensors (`1` keep, `0` drop). Log-domain kernels
//! turn dropped cells into [`LOG_EPS`](crate::core::LOG_EPS) rather than
//! `-inf`, so masked entries can still flow through log-sum-exp.

pub mod band;
pub mod lengths;

use candle_core::DType;

/// Dtype shared by all boolean masks.
pub const MASK_DTYPE: DType = DType::U8;

pub use band::{BandMask, MaskBuilder};
pub use lengths::{lengths_from_mask, SequenceLengths};
