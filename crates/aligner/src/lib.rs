//! Monotonic boundary alignment between token and frame sequences.
//!
//! Given a `[batch, tokens, frames]` energy matrix and left-packed validity
//! masks, the crate computes the probability that each frame belongs to each
//! token under a monotonic boundary model. It marginalises over every
//! boundary sequence with a banded, log-domain forward recursion, optionally
//! in both directions, and can decode a hard one-to-many monotonic path on
//! top.
//!
//! Every batch row must satisfy `1 <= text_len < mel_len`. Violations are
//! reported as [`AlignmentError`] before any tensor work starts. Masked
//! log-probabilities are held at the finite sentinel
//! [`LOG_EPS`](core::LOG_EPS) so that no `NaN` reaches the caller.
//!
//! The entry point is the [`Aligner`] trait, implemented by
//! [`MonotonicAligner`]. Precomputed energies go through
//! [`align_energy`](reference::align_energy); each direction is also
//! available on its own via [`boundary::boundary_log_prob`].

pub mod boundary;
pub mod core;
pub mod decode;
pub mod masks;
pub(crate) mod ops;
pub mod reference;

pub use core::{
    Aligner, Alignment, AlignmentError, Config, Direction, DirectionSet, EnergySource,
    ScaledDotEnergy,
};
pub use decode::{MonotonicViterbi, PathDecoder};
pub use masks::SequenceLengths;
pub use reference::MonotonicAligner;
