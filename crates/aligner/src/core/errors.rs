//! Error types emitted by the aligner.

use thiserror::Error;

/// Aligner-specific error category.
///
/// Contract violations (`EmptyDirections`, `UnknownDirection`, `LengthContract`,
/// `EmptyText`, `InvalidMask`, `InvalidShape`) are raised before any tensor
/// computation starts.
#[derive(Debug, Error)]
pub enum AlignmentError {
    /// No direction was requested.
    #[error("direction set must contain at least one of `forward` or `backward`")]
    EmptyDirections,
    /// A direction name outside `{forward, backward}`.
    #[error("unknown direction `{0}`, expected `forward` or `backward`")]
    UnknownDirection(String),
    /// A batch row whose token count is not strictly below its frame count.
    #[error(
        "batch row {batch}: text length {text_len} must be strictly less than mel length {mel_len}"
    )]
    LengthContract {
        batch: usize,
        text_len: usize,
        mel_len: usize,
    },
    /// A batch row without any valid token.
    #[error("batch row {batch}: text length must be at least 1")]
    EmptyText { batch: usize },
    /// A validity mask that is not a left-packed true prefix.
    #[error("invalid mask: {context}")]
    InvalidMask { context: String },
    /// The supplied tensor shapes do not align with the documented contract.
    #[error("invalid tensor shape for {context}")]
    InvalidShape { context: String },
    /// Configuration could not be parsed or failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A backend-specific failure propagated to the caller.
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
}

impl AlignmentError {
    pub(crate) fn shape<S: Into<String>>(context: S) -> Self {
        AlignmentError::InvalidShape {
            context: context.into(),
        }
    }

    pub(crate) fn mask<S: Into<String>>(context: S) -> Self {
        AlignmentError::InvalidMask {
            context: context.into(),
        }
    }
}
