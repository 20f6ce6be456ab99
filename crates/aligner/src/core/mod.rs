//! Core traits and types shared across the alignment pipeline.
//!
//! Tensors follow the `[batch, tokens, frames]` layout for energies and
//! alignments, `[batch, tokens, dim]` for token embeddings and
//! `[batch, frames, dim]` for frame embeddings. Log-domain arithmetic is
//! performed in `f32` regardless of the incoming dtype.

pub mod config;
pub mod direction;
pub mod errors;

use candle_core::Tensor;

pub use config::Config;
pub use direction::{Direction, DirectionSet};
pub use errors::AlignmentError;

/// Finite sentinel used wherever a masked log-probability must keep taking
/// part in log-sum-exp or subtraction.
pub const LOG_EPS: f32 = -1000.0;

/// `ln 2`, the offset used when averaging two directions in log space.
pub const LOG_2: f64 = std::f64::consts::LN_2;

/// Produces the `[batch, tokens, frames]` compatibility matrix.
///
/// Only entries where both the token and the frame are valid carry meaning;
/// the aligner masks everything else.
pub trait EnergySource {
    fn energy(&self, text: &Tensor, mel: &Tensor) -> Result<Tensor, AlignmentError>;
}

impl<F> EnergySource for F
where
    F: Fn(&Tensor, &Tensor) -> candle_core::Result<Tensor>,
{
    fn energy(&self, text: &Tensor, mel: &Tensor) -> Result<Tensor, AlignmentError> {
        Ok(self(text, mel)?)
    }
}

/// Parameter-free scaled dot-product energy, `text · melᵀ / sqrt(dim)`.
///
/// Requires both embeddings to share the feature dimension.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaledDotEnergy;

impl EnergySource for ScaledDotEnergy {
    fn energy(&self, text: &Tensor, mel: &Tensor) -> Result<Tensor, AlignmentError> {
        let (tb, _, td) = text
            .dims3()
            .map_err(|_| AlignmentError::shape("text embeddings must be [batch, tokens, dim]"))?;
        let (mb, _, md) = mel
            .dims3()
            .map_err(|_| AlignmentError::shape("mel embeddings must be [batch, frames, dim]"))?;
        if tb != mb || td != md {
            return Err(AlignmentError::shape(format!(
                "scaled dot energy needs matching batch and dim, got text [{tb}, _, {td}] and mel [{mb}, _, {md}]"
            )));
        }
        let scale = 1.0 / (td as f64).sqrt();
        let mel_t = mel.transpose(1, 2)?.contiguous()?;
        let scores = text.contiguous()?.matmul(&mel_t)?;
        Ok(scores.affine(scale, 0.0)?)
    }
}

/// Output of one alignment call.
#[derive(Debug, Clone)]
pub struct Alignment {
    /// `[batch, tokens, frames]` log-probability that a frame belongs to a
    /// token, `LOG_EPS` outside the valid region.
    pub soft: Tensor,
    /// `[batch, tokens, frames]` `U8` monotonic path, when requested.
    pub hard: Option<Tensor>,
    /// `[batch, frames, text_dim]` token features spread over frames by the
    /// soft alignment, zero on padded frames.
    pub expanded: Tensor,
}

impl Alignment {
    /// Probability-domain view of [`Alignment::soft`].
    pub fn soft_probabilities(&self) -> candle_core::Result<Tensor> {
        self.soft.exp()
    }

    /// Number of frames given to each token by the hard path, `[batch, tokens]`.
    pub fn hard_durations(&self) -> Option<candle_core::Result<Tensor>> {
        self.hard.as_ref().map(crate::decode::durations)
    }

    /// Expected frame count per token under the soft alignment.
    pub fn expected_durations(&self) -> candle_core::Result<Tensor> {
        crate::decode::expected_durations(&self.soft)
    }
}

/// Unified interface for monotonic aligners.
///
/// * `text` is `[batch, tokens, text_dim]`, `mel` is `[batch, frames, mel_dim]`.
/// * `text_mask` / `mel_mask` are `[batch, tokens]` / `[batch, frames]`
///   left-packed validity masks (any dtype, non-zero means valid).
/// * Every batch row must satisfy `1 <= text_len < mel_len`.
pub trait Aligner {
    fn align(
        &self,
        text: &Tensor,
        mel: &Tensor,
        text_mask: &Tensor,
        mel_mask: &Tensor,
        config: &Config,
    ) -> Result<Alignment, AlignmentError>;
}
