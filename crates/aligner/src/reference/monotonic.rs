//! Portable banded monotonic aligner.
//!
//! Validates inputs, computes the energy, runs the requested boundary
//! directions and optionally decodes a hard path.

use std::sync::OnceLock;

use candle_core::{DType, Tensor};

use crate::boundary::soft_alignment;
use crate::core::{
    Aligner, Alignment, AlignmentError, Config, EnergySource, ScaledDotEnergy, LOG_EPS,
};
use crate::decode::{MonotonicViterbi, PathDecoder};
use crate::masks::SequenceLengths;
use crate::ops::LogSpaceExt;

/// Reference aligner over any [`EnergySource`] and [`PathDecoder`].
#[derive(Debug)]
pub struct MonotonicAligner<E = ScaledDotEnergy, P = MonotonicViterbi> {
    energy: E,
    decoder: P,
    first_call: OnceLock<()>,
}

impl<E> MonotonicAligner<E, MonotonicViterbi> {
    /// Aligner decoding hard paths with [`MonotonicViterbi`].
    pub fn new(energy: E) -> Self {
        Self::with_decoder(energy, MonotonicViterbi)
    }
}

impl<E, P> MonotonicAligner<E, P> {
    pub fn with_decoder(energy: E, decoder: P) -> Self {
        Self {
            energy,
            decoder,
            first_call: OnceLock::new(),
        }
    }
}

impl Default for MonotonicAligner {
    fn default() -> Self {
        Self::new(ScaledDotEnergy)
    }
}

impl<E, P> Aligner for MonotonicAligner<E, P>
where
    E: EnergySource,
    P: PathDecoder,
{
    fn align(
        &self,
        text: &Tensor,
        mel: &Tensor,
        text_mask: &Tensor,
        mel_mask: &Tensor,
        config: &Config,
    ) -> Result<Alignment, AlignmentError> {
        let mut cfg = config.clone();
        cfg.apply_env_overrides();

        if self.first_call.set(()).is_ok() {
            log::info!(
                "aligner::reference init directions={} hard_alignment={} parallel_directions={}",
                cfg.directions,
                cfg.hard_alignment,
                cfg.parallel_directions
            );
        }

        let device = text.device();
        for (name, tensor) in [("mel", mel), ("text_mask", text_mask), ("mel_mask", mel_mask)] {
            if !device.same_device(tensor.device()) {
                return Err(AlignmentError::shape(format!(
                    "{name} must reside on the same device as text"
                )));
            }
        }
        let (batch, tokens, _) = text
            .dims3()
            .map_err(|_| AlignmentError::shape("text must have shape [batch, tokens, dim]"))?;
        let (mel_batch, frames, _) = mel
            .dims3()
            .map_err(|_| AlignmentError::shape("mel must have shape [batch, frames, dim]"))?;
        if mel_batch != batch {
            return Err(AlignmentError::shape(format!(
                "text batch {batch} does not match mel batch {mel_batch}"
            )));
        }

        let lengths = SequenceLengths::from_masks(text_mask, mel_mask)?;
        if lengths.batch() != batch
            || lengths.text_capacity() != tokens
            || lengths.mel_capacity() != frames
        {
            return Err(AlignmentError::shape(format!(
                "masks [{}, {}] / [{}, {}] do not match embeddings [{batch}, {tokens}] / [{batch}, {frames}]",
                lengths.batch(),
                lengths.text_capacity(),
                lengths.batch(),
                lengths.mel_capacity()
            )));
        }
        lengths.check_contract()?;

        let energy = self.energy.energy(text, mel)?;
        let (soft, hard) = align_energy(&energy, &lengths, &cfg, &self.decoder)?;
        let expanded = expand_features(&soft, text, &lengths)?;
        Ok(Alignment {
            soft,
            hard,
            expanded,
        })
    }
}

/// Soft alignment and optional hard path for a precomputed
/// `[batch, tokens, frames]` energy.
pub fn align_energy<P: PathDecoder + ?Sized>(
    energy: &Tensor,
    lengths: &SequenceLengths,
    config: &Config,
    decoder: &P,
) -> Result<(Tensor, Option<Tensor>), AlignmentError> {
    let dims = energy
        .dims3()
        .map_err(|_| AlignmentError::shape("energy must have shape [batch, tokens, frames]"))?;
    if dims != (lengths.batch(), lengths.text_capacity(), lengths.mel_capacity()) {
        return Err(AlignmentError::shape(format!(
            "energy {dims:?} does not match lengths ({}, {}, {})",
            lengths.batch(),
            lengths.text_capacity(),
            lengths.mel_capacity()
        )));
    }
    lengths.check_contract()?;

    let soft = soft_alignment(
        energy,
        lengths,
        config.directions,
        config.parallel_directions,
    )?;
    let hard = if config.hard_alignment {
        // The decoder sees `LOG_EPS` on every padded token or frame.
        let scores = soft
            .detach()
            .masked_fill(&lengths.alignment_mask(soft.device())?, LOG_EPS)?;
        Some(decoder.decode(&scores, lengths)?)
    } else {
        None
    };
    Ok((soft, hard))
}

/// Spreads `[batch, tokens, dim]` token features over frames with the soft
/// alignment: `out[b, j] = sum_i exp(soft[b, i, j]) * text[b, i]`, zero on
/// padded frames. The output keeps the dtype of `text`.
pub fn expand_features(
    soft: &Tensor,
    text: &Tensor,
    lengths: &SequenceLengths,
) -> Result<Tensor, AlignmentError> {
    let weights = soft.to_dtype(DType::F32)?.exp()?.transpose(1, 2)?.contiguous()?;
    let features = text.to_dtype(DType::F32)?.contiguous()?;
    let frame_mask = lengths
        .mel_mask(soft.device())?
        .to_dtype(DType::F32)?
        .unsqueeze(2)?;
    let expanded = weights.matmul(&features)?.broadcast_mul(&frame_mask)?;
    Ok(expanded.to_dtype(text.dtype())?)
}
