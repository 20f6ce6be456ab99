//! Per-token durations derived from soft and hard alignments.

use candle_core::{DType, Result, Tensor, D};

use crate::masks::SequenceLengths;

/// Frames owned by each token of a `[batch, tokens, frames]` hard path,
/// as `[batch, tokens]` `U32`.
pub fn durations(hard: &Tensor) -> Result<Tensor> {
    hard.to_dtype(DType::U32)?.sum(D::Minus1)
}

/// Expected number of frames per token under a log-domain soft alignment,
/// `[batch, tokens]` `F32`. Rows sum to the valid frame count.
pub fn expected_durations(soft: &Tensor) -> Result<Tensor> {
    soft.to_dtype(DType::F32)?.exp()?.sum(D::Minus1)
}

/// Rounds fractional durations to whole frames.
///
/// Each valid token gets at least one frame and each row sums to its mel
/// length. Boundaries are the rounded running totals of the durations
/// rescaled to the row's frame count, clamped so that every later token
/// keeps a frame. Padded tokens get zero.
pub fn integer_durations(expected: &Tensor, lengths: &SequenceLengths) -> Result<Tensor> {
    let (batch, tokens) = expected.dims2()?;
    if batch != lengths.batch() || tokens != lengths.text_capacity() {
        candle_core::bail!(
            "durations [{batch}, {tokens}] do not match lengths [{}, {}]",
            lengths.batch(),
            lengths.text_capacity()
        )
    }
    let rows = expected.to_dtype(DType::F64)?.to_vec2::<f64>()?;
    let mut out = vec![0u32; batch * tokens];
    for (b, row) in rows.iter().enumerate() {
        let (count, frames) = (lengths.text()[b], lengths.mel()[b]);
        if count == 0 || count > frames {
            continue;
        }
        let total: f64 = row[..count].iter().map(|d| d.max(0.0)).sum();
        let scale = if total > 0.0 { frames as f64 / total } else { 0.0 };
        let mut running = 0.0;
        let mut previous = 0usize;
        for (i, duration) in row[..count].iter().enumerate() {
            running += if scale > 0.0 {
                duration.max(0.0) * scale
            } else {
                frames as f64 / count as f64
            };
            let earliest = previous + 1;
            let latest = frames - (count - 1 - i);
            let end = if i + 1 == count {
                frames
            } else {
                (running.round() as usize).clamp(earliest, latest)
            };
            out[b * tokens + i] = (end - previous) as u32;
            previous = end;
        }
    }
    Tensor::from_vec(out, (batch, tokens), expected.device())
}
