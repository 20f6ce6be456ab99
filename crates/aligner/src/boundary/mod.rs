//! Boundary distributions and their interval probabilities.
//!
//! Each direction is an independent pure function from an energy matrix to a
//! `[batch, tokens, frames]` log-probability that frame `j` belongs to token
//! `i`. The forward pass models `P(B_i | B_{i-1})` with the last boundary
//! pinned to the final frame. The backward pass models `P(B_i | B_{i+1})` by
//! running the same banded recursion on the reflected problem and mapping the
//! result back.

pub mod combine;
pub mod conditional;
pub mod interval;
pub mod recursion;
pub mod reflect;

use candle_core::{DType, Device, Result, Tensor};

pub use combine::combine_directions;
pub use conditional::{band_energy, ConditionalDistribution};
pub use interval::{band_to_dense, interval_log_prob, unit_suffix};
pub use recursion::{forward_recursion, initial_state, terminal_log_mass};
pub use reflect::Reflector;

use crate::core::{AlignmentError, Direction, DirectionSet, LOG_EPS};
use crate::masks::{MaskBuilder, SequenceLengths};
use crate::ops::LogSpaceExt;

/// Soft alignment for one direction, `[batch, tokens, frames]` in the log
/// domain with `LOG_EPS` outside each row's feasible band.
///
/// `lengths` must satisfy [`SequenceLengths::check_contract`] and match the
/// energy's padded extents.
pub fn boundary_log_prob(
    direction: Direction,
    energy: &Tensor,
    lengths: &SequenceLengths,
) -> Result<Tensor> {
    let energy = energy.to_dtype(DType::F32)?;
    let (batch, rows, frames) = energy.dims3()?;
    if batch != lengths.batch()
        || rows != lengths.text_capacity()
        || frames != lengths.mel_capacity()
    {
        candle_core::bail!(
            "energy [{batch}, {rows}, {frames}] does not match lengths [{}, {}, {}]",
            lengths.batch(),
            lengths.text_capacity(),
            lengths.mel_capacity()
        )
    }
    if let Err(err) = lengths.check_contract() {
        candle_core::bail!("{err}")
    }
    log::debug!(
        "{direction} boundary pass: batch={batch} tokens={rows} frames={frames} band={}",
        lengths.band_width()
    );
    match direction {
        Direction::Forward => forward_boundary(&energy, lengths),
        Direction::Backward => backward_boundary(&energy, lengths),
    }
}

fn forward_boundary(energy: &Tensor, lengths: &SequenceLengths) -> Result<Tensor> {
    let device = energy.device();
    let mask = MaskBuilder::new(lengths).build();
    let cond = ConditionalDistribution::compute(energy, &mask)?;
    let states = forward_recursion(&cond.log_prob)?;
    if log::log_enabled!(log::Level::Trace) {
        log::trace!(
            "forward terminal log mass: {:?}",
            terminal_log_mass(&states, lengths)?
        );
    }
    let start = states.narrow(1, 0, mask.rows())?;
    let band = interval_log_prob(&start, &cond.log_prob_geq)?
        .masked_fill(&mask.feasible_band(device)?, LOG_EPS)?;
    band_to_dense(&band, mask.frames())
}

/// The reversed problem drops the pinned final token and its final frame.
/// Its boundary `R_m` is the first reflected frame of unreflected token
/// `text_len - 2 - m`, so the reflected row `m` owns frame `c` when
/// `R_{m-1} < c <= R_m` in shifted terms. That is the `>=` suffix of reversed
/// row `m` read one frame later, which is the strict suffix
/// `P(B_i < j | B_{i+1})` once mapped back. Row `m == text_len - 1`
/// (unreflected token 0) has no later boundary and takes the unit suffix.
fn backward_boundary(energy: &Tensor, lengths: &SequenceLengths) -> Result<Tensor> {
    let device = energy.device();
    let (batch, rows, frames) = energy.dims3()?;
    let mask = MaskBuilder::new(lengths).build();
    let width = mask.band_width();
    let reflector = Reflector::new(lengths);
    let beyond = Tensor::full(LOG_EPS, (batch, 1, width, width), device)?;

    let (states, suffix) = if rows > 1 {
        let reversed_mask = MaskBuilder::new(lengths)
            .direction(Direction::Backward)
            .build();
        let reversed = reflector.reversed_energy(energy)?;
        let cond = ConditionalDistribution::compute(&reversed, &reversed_mask)?;
        let states = forward_recursion(&cond.log_prob)?;
        let suffix = Tensor::cat(&[&cond.log_prob_geq, &beyond], 1)?;
        (states, suffix)
    } else {
        (initial_state(batch, width, device)?.unsqueeze(1)?, beyond)
    };

    let terminal = terminal_rows(lengths, rows, device)?
        .reshape((batch, rows, 1, 1))?
        .broadcast_as((batch, rows, width, width))?
        .contiguous()?;
    let suffix = terminal.where_cond(&unit_suffix(batch, rows, width, device)?, &suffix)?;

    let band = interval_log_prob(&states, &suffix)?
        .masked_fill(&mask.feasible_band(device)?, LOG_EPS)?;
    reflector.reflect(&band_to_dense(&band, frames)?)
}

/// `[batch, rows]` selector of the reversed row holding unreflected token 0.
fn terminal_rows(lengths: &SequenceLengths, rows: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0u8; lengths.batch() * rows];
    for (b, &len) in lengths.text().iter().enumerate() {
        if len >= 1 && len <= rows {
            data[b * rows + len - 1] = 1;
        }
    }
    Tensor::from_vec(data, (lengths.batch(), rows), device)
}

/// Runs the requested directions and averages them when both are present.
///
/// With `parallel` set the two passes run on separate rayon tasks.
pub fn soft_alignment(
    energy: &Tensor,
    lengths: &SequenceLengths,
    directions: DirectionSet,
    parallel: bool,
) -> std::result::Result<Tensor, AlignmentError> {
    let forward = directions.contains(Direction::Forward);
    let backward = directions.contains(Direction::Backward);
    let soft = match (forward, backward) {
        (true, true) => {
            let run = |direction| boundary_log_prob(direction, energy, lengths);
            let (fwd, bwd) = if parallel {
                rayon::join(|| run(Direction::Forward), || run(Direction::Backward))
            } else {
                (run(Direction::Forward), run(Direction::Backward))
            };
            combine_directions(&fwd?, &bwd?)?
        }
        (true, false) => boundary_log_prob(Direction::Forward, energy, lengths)?,
        (false, true) => boundary_log_prob(Direction::Backward, energy, lengths)?,
        (false, false) => return Err(AlignmentError::EmptyDirections),
    };
    Ok(soft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::D;

    fn lengths(text: &[usize], mel: &[usize]) -> SequenceLengths {
        let text_cap = text.iter().copied().max().unwrap_or(0);
        let mel_cap = mel.iter().copied().max().unwrap_or(0);
        SequenceLengths::from_lengths(text.to_vec(), mel.to_vec(), text_cap, mel_cap).unwrap()
    }

    /// Every boundary sequence `B_0 < … < B_{n-1} = frames - 1`.
    fn boundary_paths(tokens: usize, frames: usize) -> Vec<Vec<usize>> {
        fn extend(prefix: &mut Vec<usize>, tokens: usize, frames: usize, out: &mut Vec<Vec<usize>>) {
            let i = prefix.len();
            if i + 1 == tokens {
                prefix.push(frames - 1);
                out.push(prefix.clone());
                prefix.pop();
                return;
            }
            let lo = prefix.last().map_or(0, |&p| p + 1);
            let hi = frames - (tokens - i);
            for j in lo..=hi {
                prefix.push(j);
                extend(prefix, tokens, frames, out);
                prefix.pop();
            }
        }
        let mut out = Vec::new();
        extend(&mut Vec::new(), tokens, frames, &mut out);
        out
    }

    fn softmax_weight(energy: &[f64], pick: usize, range: std::ops::RangeInclusive<usize>) -> f64 {
        let total: f64 = range.map(|j| energy[j].exp()).sum();
        energy[pick].exp() / total
    }

    /// Exhaustive `P(frame j belongs to token i)` for one row, in `f64`.
    fn enumerate_soft(energy: &[Vec<f64>], tokens: usize, frames: usize, direction: Direction) -> Vec<Vec<f64>> {
        let slack = frames - tokens;
        let mut soft = vec![vec![0.0; frames]; tokens];
        for path in boundary_paths(tokens, frames) {
            let mut p = 1.0;
            match direction {
                Direction::Forward => {
                    for i in 0..tokens - 1 {
                        let lo = if i == 0 { 0 } else { path[i - 1] + 1 };
                        p *= softmax_weight(&energy[i], path[i], lo..=i + slack);
                    }
                }
                Direction::Backward => {
                    for t in (0..tokens - 1).rev() {
                        p *= softmax_weight(&energy[t], path[t], t..=path[t + 1] - 1);
                    }
                }
            }
            let mut start = 0;
            for (i, &end) in path.iter().enumerate() {
                for frame in soft[i].iter_mut().take(end + 1).skip(start) {
                    *frame += p;
                }
                start = end + 1;
            }
        }
        soft
    }

    fn check_against_enumeration(direction: Direction, text: &[usize], mel: &[usize]) -> Result<()> {
        let device = Device::Cpu;
        let lens = lengths(text, mel);
        let (rows, frames) = (lens.text_capacity(), lens.mel_capacity());
        let energy = Tensor::randn(0f32, 1.5, (text.len(), rows, frames), &device)?;
        let soft = boundary_log_prob(direction, &energy, &lens)?
            .exp()?
            .to_vec3::<f32>()?;
        let energy = energy.to_dtype(DType::F64)?.to_vec3::<f64>()?;

        for b in 0..text.len() {
            let expected = enumerate_soft(&energy[b], text[b], mel[b], direction);
            for i in 0..rows {
                for j in 0..frames {
                    let want = if i < text[b] && j < mel[b] { expected[i][j] } else { 0.0 };
                    let got = soft[b][i][j] as f64;
                    assert!(
                        (got - want).abs() < 1e-4,
                        "{direction} b={b} i={i} j={j}: got {got}, want {want}"
                    );
                }
            }
        }
        Ok(())
    }

    #[test]
    fn forward_matches_exhaustive_enumeration() -> Result<()> {
        check_against_enumeration(Direction::Forward, &[3, 2, 1], &[6, 4, 3])
    }

    #[test]
    fn backward_matches_exhaustive_enumeration() -> Result<()> {
        check_against_enumeration(Direction::Backward, &[3, 2, 1], &[6, 4, 3])
    }

    #[test]
    fn backward_handles_single_token_batches() -> Result<()> {
        check_against_enumeration(Direction::Backward, &[1, 1], &[4, 2])
    }

    #[test]
    fn uniform_two_by_three_scenario() -> Result<()> {
        let device = Device::Cpu;
        let lens = lengths(&[2], &[3]);
        let energy = Tensor::zeros((1, 2, 3), DType::F32, &device)?;
        // Token 0 ends on frame 0 or 1 with equal odds.
        let expected = [[1.0f32, 0.5, 0.0], [0.0, 0.5, 1.0]];
        for direction in [Direction::Forward, Direction::Backward] {
            let soft = boundary_log_prob(direction, &energy, &lens)?
                .exp()?
                .to_vec3::<f32>()?;
            for i in 0..2 {
                for j in 0..3 {
                    assert!((soft[0][i][j] - expected[i][j]).abs() < 1e-5, "{direction} i={i} j={j}");
                }
            }
        }
        Ok(())
    }

    #[test]
    fn reflected_band_matches_forward_band() -> Result<()> {
        let device = Device::Cpu;
        let lens = lengths(&[3, 2], &[5, 4]);
        let energy = Tensor::randn(0f32, 1., (2, 3, 5), &device)?;
        let live = |direction| -> Result<Vec<Vec<Vec<bool>>>> {
            let soft = boundary_log_prob(direction, &energy, &lens)?.to_vec3::<f32>()?;
            Ok(soft
                .into_iter()
                .map(|row| row.into_iter().map(|r| r.into_iter().map(|v| v > LOG_EPS / 2.0).collect()).collect())
                .collect())
        };
        let forward = live(Direction::Forward)?;
        let backward = live(Direction::Backward)?;
        assert_eq!(forward, backward);

        let band = MaskBuilder::new(&lens)
            .force_assign_last(false)
            .build()
            .token_frame_band(&device)?
            .to_vec3::<u8>()?;
        for b in 0..2 {
            for i in 0..3 {
                for j in 0..5 {
                    assert_eq!(forward[b][i][j], band[b][i][j] == 1, "b={b} i={i} j={j}");
                }
            }
        }
        Ok(())
    }

    #[test]
    fn every_valid_frame_has_unit_mass() -> Result<()> {
        let device = Device::Cpu;
        let lens = lengths(&[4, 2, 3], &[7, 7, 4]);
        let energy = Tensor::randn(0f32, 1., (3, 4, 7), &device)?;
        let soft = soft_alignment(&energy, &lens, DirectionSet::BOTH, true).unwrap();
        let mass = soft.exp()?.sum(1)?.to_vec2::<f32>()?;
        for (b, row) in mass.iter().enumerate() {
            for (j, total) in row.iter().enumerate() {
                let want = if j < lens.mel()[b] { 1.0 } else { 0.0 };
                assert!((total - want).abs() < 1e-4, "b={b} j={j}: {total}");
            }
        }
        Ok(())
    }

    #[test]
    fn large_energy_offsets_leave_alignments_unchanged() -> Result<()> {
        let device = Device::Cpu;
        let lens = lengths(&[2, 3], &[4, 6]);
        let energy = Tensor::randn(0f32, 1., (2, 3, 6), &device)?;
        for direction in [Direction::Forward, Direction::Backward] {
            let base = boundary_log_prob(direction, &energy, &lens)?.exp()?;
            let low = boundary_log_prob(direction, &(&energy - 2000.)?, &lens)?.exp()?;
            let diff = (&low - &base)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?;
            assert!(diff < 1e-3, "{direction}: {diff}");

            let mass = low.sum(1)?.to_vec2::<f32>()?;
            for (b, row) in mass.iter().enumerate() {
                for (j, total) in row.iter().enumerate() {
                    let want = if j < lens.mel()[b] { 1.0 } else { 0.0 };
                    assert!((total - want).abs() < 1e-4, "{direction} b={b} j={j}: {total}");
                }
            }
        }
        Ok(())
    }

    #[test]
    fn parallel_and_sequential_passes_agree() -> Result<()> {
        let device = Device::Cpu;
        let lens = lengths(&[3, 1], &[5, 3]);
        let energy = Tensor::randn(0f32, 1., (2, 3, 5), &device)?;
        let a = soft_alignment(&energy, &lens, DirectionSet::BOTH, true).unwrap();
        let b = soft_alignment(&energy, &lens, DirectionSet::BOTH, false).unwrap();
        let diff = (a - b)?.abs()?.flatten_all()?.max(D::Minus1)?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn mismatched_lengths_are_reported() {
        let device = Device::Cpu;
        let lens = lengths(&[2], &[4]);
        let energy = Tensor::zeros((1, 3, 4), DType::F32, &device).unwrap();
        assert!(boundary_log_prob(Direction::Forward, &energy, &lens).is_err());
    }
}
