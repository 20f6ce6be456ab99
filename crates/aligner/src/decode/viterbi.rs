//! Maximum-weight monotonic path search.

use candle_core::{DType, Tensor};
use rayon::prelude::*;

use super::PathDecoder;
use crate::core::AlignmentError;
use crate::masks::SequenceLengths;

/// Cumulative-max dynamic programme over `(token, frame)` followed by a
/// backtrace from the last valid cell.
///
/// Frame `j` of a row with `t` tokens and `m` frames can only belong to
/// tokens `max(0, t - m + j) ..= min(t - 1, j)`, so every path starts on
/// token 0, ends on the last token and skips none. When staying on a token
/// and advancing from the previous one score the same, the backtrace stays,
/// which places every token transition on its earliest frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicViterbi;

impl MonotonicViterbi {
    /// Decodes one row of `[tokens][frames]` scores into a flat `U8` path.
    fn decode_row(scores: &[Vec<f64>], tokens: usize, frames: usize, rows: usize, cols: usize) -> Vec<u8> {
        let mut path = vec![0u8; rows * cols];
        if tokens == 0 || tokens > frames {
            return path;
        }
        let lowest = |j: usize| (j + tokens).saturating_sub(frames);
        let highest = |j: usize| (tokens - 1).min(j);

        let mut value = vec![vec![f64::NEG_INFINITY; frames]; tokens];
        value[0][0] = scores[0][0];
        for j in 1..frames {
            for i in lowest(j)..=highest(j) {
                let stay = value[i][j - 1];
                let advance = if i > 0 { value[i - 1][j - 1] } else { f64::NEG_INFINITY };
                value[i][j] = scores[i][j] + stay.max(advance);
            }
        }

        let mut i = tokens - 1;
        for j in (1..frames).rev() {
            path[i * cols + j] = 1;
            if i > 0 && (i == j || value[i - 1][j - 1] > value[i][j - 1]) {
                i -= 1;
            }
        }
        path[i * cols] = 1;
        path
    }
}

impl PathDecoder for MonotonicViterbi {
    fn decode(&self, log_probs: &Tensor, lengths: &SequenceLengths) -> Result<Tensor, AlignmentError> {
        let (batch, rows, cols) = log_probs
            .dims3()
            .map_err(|_| AlignmentError::shape("path scores must be [batch, tokens, frames]"))?;
        if batch != lengths.batch() || rows != lengths.text_capacity() || cols != lengths.mel_capacity() {
            return Err(AlignmentError::shape(format!(
                "path scores [{batch}, {rows}, {cols}] do not match lengths [{}, {}, {}]",
                lengths.batch(),
                lengths.text_capacity(),
                lengths.mel_capacity()
            )));
        }
        let scores = log_probs.detach().to_dtype(DType::F64)?.to_vec3::<f64>()?;
        let paths: Vec<Vec<u8>> = scores
            .into_par_iter()
            .enumerate()
            .map(|(b, row)| Self::decode_row(&row, lengths.text()[b], lengths.mel()[b], rows, cols))
            .collect();
        Ok(Tensor::from_vec(
            paths.concat(),
            (batch, rows, cols),
            log_probs.device(),
        )?)
    }
}
