//! Hard decisions on top of the soft alignment.

pub mod durations;
pub mod viterbi;

use candle_core::Tensor;

pub use durations::{durations, expected_durations, integer_durations};
pub use viterbi::MonotonicViterbi;

use crate::core::AlignmentError;
use crate::masks::SequenceLengths;

/// Turns `[batch, tokens, frames]` scores into a `U8` one-to-many monotonic
/// path: every valid frame has exactly one token, tokens never go back and
/// none is skipped. Padded cells are `0`.
///
/// Implementations must not track gradients.
pub trait PathDecoder: Send + Sync {
    fn decode(&self, log_probs: &Tensor, lengths: &SequenceLengths) -> Result<Tensor, AlignmentError>;
}
