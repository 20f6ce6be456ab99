//! Conditional boundary distributions in band coordinates.

use candle_core::{Result, Tensor, D};
use candle_nn::ops::log_softmax;

use crate::core::LOG_EPS;
use crate::masks::BandMask;
use crate::ops::LogSpaceExt;

/// Floor for the per-row maximum of rows without a valid cell.
const VALID_FLOOR: f64 = -1e30;

/// Gathers the diagonal band of a `[batch, rows, frames]` energy matrix.
///
/// `out[b, i, w] = energy[b, i, i + w]`; offsets running past the last frame
/// are clamped and must be masked by the caller.
pub fn band_energy(energy: &Tensor, band_width: usize) -> Result<Tensor> {
    let (batch, rows, frames) = energy.dims3()?;
    let last = frames.saturating_sub(1);
    let mut index = Vec::with_capacity(batch * rows * band_width);
    for _ in 0..batch {
        for i in 0..rows {
            index.extend((0..band_width).map(|w| (i + w).min(last) as u32));
        }
    }
    let index = Tensor::from_vec(index, (batch, rows, band_width), energy.device())?;
    energy.contiguous()?.gather(&index, 2)
}

/// `P(B_i = j | start)` and its suffix `P(B_i >= j | start)`, both
/// `[batch, rows, W(u), W(w)]` in the log domain with `LOG_EPS` outside the
/// band mask.
#[derive(Debug, Clone)]
pub struct ConditionalDistribution {
    pub log_prob: Tensor,
    pub log_prob_geq: Tensor,
}

impl ConditionalDistribution {
    pub fn compute(energy: &Tensor, mask: &BandMask) -> Result<Self> {
        let device = energy.device();
        let (batch, rows, _) = energy.dims3()?;
        let width = mask.band_width();

        let transition = mask.transition_mask(device)?;
        let band = band_energy(energy, width)?
            .unsqueeze(2)?
            .broadcast_as((batch, rows, width, width))?
            .contiguous()?;
        // Shift every row so its best valid logit is 0; the `LOG_EPS` fill
        // then stays below any valid cell whatever the energy scale.
        let row_max = band
            .masked_fill(&transition, f32::MIN)?
            .max_keepdim(D::Minus1)?
            .maximum(VALID_FLOOR)?
            .detach();
        let logits = band
            .broadcast_sub(&row_max)?
            .masked_fill(&transition, LOG_EPS)?;
        // Rows without a valid cell normalise to a uniform spread over
        // sentinels and are cleared again below.
        let log_prob = log_softmax(&logits, D::Minus1)?.masked_fill(&transition, LOG_EPS)?;
        let log_prob_geq = log_prob
            .reverse_log_cumsum_exp()?
            .masked_fill(&mask.suffix_mask(device)?, LOG_EPS)?;

        Ok(Self {
            log_prob,
            log_prob_geq,
        })
    }
}
