//! Per-row reversal of padded `[batch, tokens, frames]` tensors.
//!
//! Rows are right-padded to different lengths, so a plain flip would move
//! each row's valid block to the end of the axis. The reflector maps index
//! `x` of a row with valid length `len` on an axis of size `n` to
//! `(len - 1 - x) mod n`: a flip followed by a circular shift of
//! `len - n`. Valid positions swap ends and padding stays padding. The map
//! is an involution, so the same call reflects results back.

use candle_core::{Result, Tensor};

use crate::masks::SequenceLengths;

/// Reflects tensors laid out for a given set of lengths.
#[derive(Debug, Clone)]
pub struct Reflector {
    text: Vec<usize>,
    mel: Vec<usize>,
}

impl Reflector {
    pub fn new(lengths: &SequenceLengths) -> Self {
        Self {
            text: lengths.text().to_vec(),
            mel: lengths.mel().to_vec(),
        }
    }

    fn source(len: usize, size: usize, x: usize) -> u32 {
        (len as isize - 1 - x as isize).rem_euclid(size as isize) as u32
    }

    /// Reverses both the token and frame axes of a `[batch, tokens, frames]`
    /// tensor row by row.
    pub fn reflect(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, rows, frames) = xs.dims3()?;
        if batch != self.text.len() {
            candle_core::bail!(
                "reflector built for {} rows, got a batch of {batch}",
                self.text.len()
            )
        }
        let mut mel_index = Vec::with_capacity(batch * rows * frames);
        let mut text_index = Vec::with_capacity(batch * rows * frames);
        for b in 0..batch {
            for i in 0..rows {
                let src_row = Self::source(self.text[b], rows, i);
                for j in 0..frames {
                    mel_index.push(Self::source(self.mel[b], frames, j));
                    text_index.push(src_row);
                }
            }
        }
        let device = xs.device();
        let mel_index = Tensor::from_vec(mel_index, (batch, rows, frames), device)?;
        let text_index = Tensor::from_vec(text_index, (batch, rows, frames), device)?;
        xs.contiguous()?
            .gather(&mel_index, 2)?
            .gather(&text_index, 1)
    }

    /// Energy of the reversed problem: the reflected matrix without the
    /// pinned final token and its final frame, `[batch, tokens - 1, frames - 1]`.
    pub fn reversed_energy(&self, energy: &Tensor) -> Result<Tensor> {
        let (_, rows, frames) = energy.dims3()?;
        self.reflect(energy)?
            .narrow(1, 1, rows - 1)?
            .narrow(2, 1, frames - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn lengths(text: &[usize], mel: &[usize], caps: (usize, usize)) -> SequenceLengths {
        SequenceLengths::from_lengths(text.to_vec(), mel.to_vec(), caps.0, caps.1).unwrap()
    }

    /// Per-row circular shifts applied after flipping an axis of `size`.
    fn shifts(lengths: &[usize], size: usize) -> Vec<isize> {
        lengths.iter().map(|&len| len as isize - size as isize).collect()
    }

    #[test]
    fn valid_block_is_reversed_in_place() -> Result<()> {
        let device = Device::Cpu;
        let lens = lengths(&[2, 1], &[3, 2], (2, 3));
        let xs = Tensor::new(
            &[
                [[1f32, 2., 3.], [4., 5., 6.]],
                [[7., 8., 0.], [0., 0., 0.]],
            ],
            &device,
        )?;
        let out = Reflector::new(&lens).reflect(&xs)?.to_vec3::<f32>()?;
        assert_eq!(out[0], vec![vec![6., 5., 4.], vec![3., 2., 1.]]);
        assert_eq!(out[1], vec![vec![8., 7., 0.], vec![0., 0., 0.]]);
        Ok(())
    }

    #[test]
    fn reflecting_twice_is_the_identity() -> Result<()> {
        let device = Device::Cpu;
        let lens = lengths(&[3, 2], &[5, 4], (3, 5));
        let xs = Tensor::randn(0f32, 1., (2, 3, 5), &device)?;
        let reflector = Reflector::new(&lens);
        let twice = reflector.reflect(&reflector.reflect(&xs)?)?;
        let diff = (twice - &xs)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn shifts_follow_the_length_gap() {
        assert_eq!(shifts(&[3, 2], 3), vec![0, -1]);
        assert_eq!(shifts(&[5, 4], 5), vec![0, -1]);
    }

    #[test]
    fn reflection_matches_flip_then_roll() -> Result<()> {
        let device = Device::Cpu;
        let lens = lengths(&[3, 2], &[5, 4], (3, 5));
        let xs = Tensor::arange(0f32, 30., &device)?.reshape((2, 3, 5))?;
        let out = Reflector::new(&lens).reflect(&xs)?.to_vec3::<f32>()?;
        let data = xs.to_vec3::<f32>()?;
        let text_shift = shifts(lens.text(), 3);
        let mel_shift = shifts(lens.mel(), 5);
        for b in 0..2 {
            for i in 0..3 {
                for j in 0..5 {
                    // Flip, then roll by the shift.
                    let fi = (i as isize - text_shift[b]).rem_euclid(3) as usize;
                    let fj = (j as isize - mel_shift[b]).rem_euclid(5) as usize;
                    assert_eq!(out[b][i][j], data[b][2 - fi][4 - fj]);
                }
            }
        }
        Ok(())
    }
}
