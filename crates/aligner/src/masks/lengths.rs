//! Per-row valid lengths derived from left-packed validity masks.
//!
//! Every mask produced here is a `U8` tensor: `1` where the position is
//! valid, `0` for padding.

use candle_core::{DType, Device, Result, Tensor};

use crate::core::AlignmentError;

/// Valid token/frame counts of a padded batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceLengths {
    text: Vec<usize>,
    mel: Vec<usize>,
    text_capacity: usize,
    mel_capacity: usize,
}

impl SequenceLengths {
    /// Builds lengths from explicit counts and the padded extents `I` and `J`.
    pub fn from_lengths(
        text: Vec<usize>,
        mel: Vec<usize>,
        text_capacity: usize,
        mel_capacity: usize,
    ) -> std::result::Result<Self, AlignmentError> {
        if text.len() != mel.len() {
            return Err(AlignmentError::shape(format!(
                "text lengths ({}) and mel lengths ({}) disagree on batch size",
                text.len(),
                mel.len()
            )));
        }
        if let Some((b, len)) = text.iter().enumerate().find(|(_, &l)| l > text_capacity) {
            return Err(AlignmentError::mask(format!(
                "batch row {b}: text length {len} exceeds padded size {text_capacity}"
            )));
        }
        if let Some((b, len)) = mel.iter().enumerate().find(|(_, &l)| l > mel_capacity) {
            return Err(AlignmentError::mask(format!(
                "batch row {b}: mel length {len} exceeds padded size {mel_capacity}"
            )));
        }
        Ok(Self {
            text,
            mel,
            text_capacity,
            mel_capacity,
        })
    }

    /// Reads lengths from `[batch, tokens]` and `[batch, frames]` masks.
    pub fn from_masks(
        text_mask: &Tensor,
        mel_mask: &Tensor,
    ) -> std::result::Result<Self, AlignmentError> {
        let (text, text_capacity) = lengths_from_mask(text_mask, "text_mask")?;
        let (mel, mel_capacity) = lengths_from_mask(mel_mask, "mel_mask")?;
        Self::from_lengths(text, mel, text_capacity, mel_capacity)
    }

    /// Enforces `1 <= text_len < mel_len` on every batch row.
    pub fn check_contract(&self) -> std::result::Result<(), AlignmentError> {
        for (batch, (&text_len, &mel_len)) in self.text.iter().zip(self.mel.iter()).enumerate() {
            if text_len == 0 {
                return Err(AlignmentError::EmptyText { batch });
            }
            if text_len >= mel_len {
                return Err(AlignmentError::LengthContract {
                    batch,
                    text_len,
                    mel_len,
                });
            }
        }
        Ok(())
    }

    pub fn batch(&self) -> usize {
        self.text.len()
    }

    pub fn text(&self) -> &[usize] {
        &self.text
    }

    pub fn mel(&self) -> &[usize] {
        &self.mel
    }

    /// Padded token extent `I`.
    pub fn text_capacity(&self) -> usize {
        self.text_capacity
    }

    /// Padded frame extent `J`.
    pub fn mel_capacity(&self) -> usize {
        self.mel_capacity
    }

    /// `mel_len - text_len` for one row, saturating at zero.
    pub fn slack(&self, batch: usize) -> usize {
        self.mel[batch].saturating_sub(self.text[batch])
    }

    pub fn max_slack(&self) -> usize {
        (0..self.batch()).map(|b| self.slack(b)).max().unwrap_or(0)
    }

    /// Number of boundary offsets the banded recursion has to track.
    pub fn band_width(&self) -> usize {
        self.max_slack() + 1
    }

    /// Lengths of the reflected problem solved by the backward pass: the
    /// pinned final token and its final frame are dropped.
    pub fn reversed(&self) -> Self {
        Self {
            text: self.text.iter().map(|l| l.saturating_sub(1)).collect(),
            mel: self.mel.iter().map(|l| l.saturating_sub(1)).collect(),
            text_capacity: self.text_capacity.saturating_sub(1),
            mel_capacity: self.mel_capacity.saturating_sub(1),
        }
    }

    /// `[batch, tokens]` validity mask.
    pub fn text_mask(&self, device: &Device) -> Result<Tensor> {
        prefix_mask(&self.text, self.text_capacity, device)
    }

    /// `[batch, frames]` validity mask.
    pub fn mel_mask(&self, device: &Device) -> Result<Tensor> {
        prefix_mask(&self.mel, self.mel_capacity, device)
    }

    /// `[batch, tokens, frames]` mask, `text_mask[i] & mel_mask[j]`.
    pub fn alignment_mask(&self, device: &Device) -> Result<Tensor> {
        let (rows, cols) = (self.text_capacity, self.mel_capacity);
        let mut data = vec![0u8; self.batch() * rows * cols];
        for b in 0..self.batch() {
            for i in 0..self.text[b] {
                let row_start = (b * rows + i) * cols;
                data[row_start..row_start + self.mel[b]].fill(1);
            }
        }
        Tensor::from_vec(data, (self.batch(), rows, cols), device)
    }
}

fn prefix_mask(lengths: &[usize], capacity: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0u8; lengths.len() * capacity];
    for (b, &len) in lengths.iter().enumerate() {
        let len = len.min(capacity);
        data[b * capacity..b * capacity + len].fill(1);
    }
    Tensor::from_vec(data, (lengths.len(), capacity), device)
}

/// Counts the valid prefix of every row of a `[batch, len]` mask.
///
/// Rejects masks whose valid positions are not a contiguous prefix.
pub fn lengths_from_mask(
    mask: &Tensor,
    name: &str,
) -> std::result::Result<(Vec<usize>, usize), AlignmentError> {
    let (_, capacity) = mask
        .dims2()
        .map_err(|_| AlignmentError::shape(format!("{name} must be [batch, len]")))?;
    let rows = mask.to_dtype(DType::F32)?.to_vec2::<f32>()?;
    let mut lengths = Vec::with_capacity(rows.len());
    for (b, row) in rows.iter().enumerate() {
        let len = row.iter().take_while(|&&v| v != 0.0).count();
        if row[len..].iter().any(|&v| v != 0.0) {
            return Err(AlignmentError::mask(format!(
                "{name} row {b} is not a left-packed prefix"
            )));
        }
        lengths.push(len);
    }
    Ok((lengths, capacity))
}
