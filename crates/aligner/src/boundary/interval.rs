//! Interval probabilities `P(B_{i-1} < j <= B_i)` and the band to dense
//! scatter.

use candle_core::{Device, Result, Tensor};

use crate::core::LOG_EPS;
use crate::ops::LogSpaceExt;

/// `out[b, i, v] = logsumexp_u(start[b, i, u] + suffix[b, i, u, v])`: the
/// log-probability that frame `i + v` belongs to token `i`.
pub fn interval_log_prob(start: &Tensor, suffix: &Tensor) -> Result<Tensor> {
    start
        .unsqueeze(3)?
        .broadcast_add(suffix)?
        .log_sum_exp_keepdim(2)?
        .squeeze(2)
}

/// Scatters `[batch, rows, W]` band values to `[batch, rows, frames]`,
/// writing `LOG_EPS` outside the band.
pub fn band_to_dense(band: &Tensor, frames: usize) -> Result<Tensor> {
    let (batch, rows, width) = band.dims3()?;
    let pad = Tensor::full(LOG_EPS, (batch, rows, 1), band.device())?.to_dtype(band.dtype())?;
    // `gather` needs a contiguous source; `cat` with a filled column is not.
    let padded = Tensor::cat(&[band, &pad], 2)?.contiguous()?;

    let mut index = Vec::with_capacity(batch * rows * frames);
    for _ in 0..batch {
        for i in 0..rows {
            index.extend((0..frames).map(|j| match j.checked_sub(i) {
                Some(v) if v < width => v as u32,
                _ => width as u32,
            }));
        }
    }
    let index = Tensor::from_vec(index, (batch, rows, frames), band.device())?;
    padded.gather(&index, 2)
}

/// `[batch, rows, W, W]` suffix of a boundary known to lie past every frame:
/// `0` on `u <= v`, `LOG_EPS` below the diagonal.
pub fn unit_suffix(batch: usize, rows: usize, width: usize, device: &Device) -> Result<Tensor> {
    let mut plane = vec![LOG_EPS; width * width];
    for u in 0..width {
        plane[u * width + u..(u + 1) * width].fill(0.0);
    }
    Tensor::from_vec(plane, (1, 1, width, width), device)?
        .broadcast_as((batch, rows, width, width))?
        .contiguous()
}
