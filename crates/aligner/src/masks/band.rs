//! Boundary validity masks for the banded recursion.
//!
//! The conceptual predicate is indexed `[b, i, j, k]`: token `i` may end at
//! frame `j` when the frames before it number `k`. Only the diagonal band is
//! materialised. In band coordinates `u = k - i` is the start offset and
//! `w = j - i` the end offset, both in `0..band_width`, which turns the
//! per-row length constraint into `u <= w <= slack[b]`.

use candle_core::{Device, Result, Tensor};

use super::SequenceLengths;
use crate::core::Direction;

/// Configures a [`BandMask`] for one recursion direction.
#[derive(Debug, Clone)]
pub struct MaskBuilder<'a> {
    lengths: &'a SequenceLengths,
    direction: Direction,
    force_assign_last: bool,
}

impl<'a> MaskBuilder<'a> {
    /// Starts a forward-direction builder with the final boundary pinned.
    pub fn new(lengths: &'a SequenceLengths) -> Self {
        Self {
            lengths,
            direction: Direction::Forward,
            force_assign_last: true,
        }
    }

    /// Selects the direction; backward masks do not pin the final boundary
    /// because the reflection already fixes it.
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self.force_assign_last = direction == Direction::Forward;
        self
    }

    pub fn force_assign_last(mut self, force: bool) -> Self {
        self.force_assign_last = force;
        self
    }

    pub fn build(self) -> BandMask {
        let lengths = match self.direction {
            Direction::Forward => self.lengths.clone(),
            Direction::Backward => self.lengths.reversed(),
        };
        BandMask {
            band_width: lengths.band_width(),
            lengths,
            force_assign_last: self.force_assign_last,
        }
    }
}

/// Band-limited validity of boundary transitions for one direction.
#[derive(Debug, Clone)]
pub struct BandMask {
    lengths: SequenceLengths,
    band_width: usize,
    force_assign_last: bool,
}

impl BandMask {
    /// Lengths of the problem this mask describes (reflected for backward).
    pub fn lengths(&self) -> &SequenceLengths {
        &self.lengths
    }

    pub fn band_width(&self) -> usize {
        self.band_width
    }

    /// Token rows of the problem (`I`, or `I - 1` for backward).
    pub fn rows(&self) -> usize {
        self.lengths.text_capacity()
    }

    /// Frame columns of the problem (`J`, or `J - 1` for backward).
    pub fn frames(&self) -> usize {
        self.lengths.mel_capacity()
    }

    pub fn forces_last(&self) -> bool {
        self.force_assign_last
    }

    /// Token `i` can end at frame `j` while leaving a frame for every later
    /// token and not running past the sequence.
    pub fn is_feasible(&self, b: usize, i: usize, j: usize) -> bool {
        if b >= self.lengths.batch() || i >= self.lengths.text()[b] || j < i {
            return false;
        }
        if self.lengths.mel()[b] < self.lengths.text()[b] {
            return false;
        }
        j - i <= self.lengths.slack(b)
    }

    /// Conceptual `[b, i, j, k]` predicate: feasibility, `i <= k <= j`, and
    /// the terminal pin when enabled. Token `i` always has at least `i`
    /// frames before it.
    pub fn is_valid(&self, b: usize, i: usize, j: usize, k: usize) -> bool {
        if !self.is_feasible(b, i, j) || k < i || k > j {
            return false;
        }
        !self.is_pinned_out(b, i, j)
    }

    fn is_pinned_out(&self, b: usize, i: usize, j: usize) -> bool {
        self.force_assign_last
            && i + 1 == self.lengths.text()[b]
            && j + 1 != self.lengths.mel()[b]
    }

    /// `[batch, rows, W(u), W(w)]` transition validity, pin included.
    pub fn transition_mask(&self, device: &Device) -> Result<Tensor> {
        self.band_tensor(device, true)
    }

    /// `[batch, rows, W(u), W(v)]` validity of the suffix `P(B_i >= j | k)`.
    ///
    /// The pin only restricts where the last boundary lands; every frame of
    /// the feasible range still lies at or before it, so it is left out here.
    pub fn suffix_mask(&self, device: &Device) -> Result<Tensor> {
        self.band_tensor(device, false)
    }

    fn band_tensor(&self, device: &Device, with_pin: bool) -> Result<Tensor> {
        let (batch, rows, width) = (self.lengths.batch(), self.rows(), self.band_width);
        let mut data = vec![0u8; batch * rows * width * width];
        for b in 0..batch {
            for i in 0..rows {
                for u in 0..width {
                    let row_start = (((b * rows) + i) * width + u) * width;
                    for w in u..width {
                        let (j, k) = (i + w, i + u);
                        let valid = if with_pin {
                            self.is_valid(b, i, j, k)
                        } else {
                            self.is_feasible(b, i, j)
                        };
                        if valid {
                            data[row_start + w] = 1;
                        }
                    }
                }
            }
        }
        Tensor::from_vec(data, (batch, rows, width, width), device)
    }

    /// `[batch, rows, W]` feasibility of frame `i + v` for token `i`, pin
    /// excluded. Used to mask interval probabilities in band coordinates.
    pub fn feasible_band(&self, device: &Device) -> Result<Tensor> {
        let (batch, rows, width) = (self.lengths.batch(), self.rows(), self.band_width);
        let mut data = vec![0u8; batch * rows * width];
        for b in 0..batch {
            for i in 0..rows {
                for v in 0..width {
                    if self.is_feasible(b, i, i + v) {
                        data[(b * rows + i) * width + v] = 1;
                    }
                }
            }
        }
        Tensor::from_vec(data, (batch, rows, width), device)
    }

    /// `[batch, rows, frames]` set of feasible `(token, end frame)` pairs.
    pub fn token_frame_band(&self, device: &Device) -> Result<Tensor> {
        let (batch, rows, frames) = (self.lengths.batch(), self.rows(), self.frames());
        let mut data = vec![0u8; batch * rows * frames];
        for b in 0..batch {
            for i in 0..rows {
                for j in 0..frames {
                    if self.is_feasible(b, i, j) && !self.is_pinned_out(b, i, j) {
                        data[(b * rows + i) * frames + j] = 1;
                    }
                }
            }
        }
        Tensor::from_vec(data, (batch, rows, frames), device)
    }

    /// Dense `[batch, rows, frames(j), frames(k)]` view of [`Self::is_valid`].
    ///
    /// Quadratic in the frame count; meant for reference checks.
    pub fn dense(&self, device: &Device) -> Result<Tensor> {
        let (batch, rows, frames) = (self.lengths.batch(), self.rows(), self.frames());
        let mut data = vec![0u8; batch * rows * frames * frames];
        for b in 0..batch {
            for i in 0..rows {
                for j in 0..frames {
                    let row_start = (((b * rows) + i) * frames + j) * frames;
                    for k in 0..=j {
                        if self.is_valid(b, i, j, k) {
                            data[row_start + k] = 1;
                        }
                    }
                }
            }
        }
        Tensor::from_vec(data, (batch, rows, frames, frames), device)
    }
}
