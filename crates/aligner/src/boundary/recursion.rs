//! Banded semi-Markov forward recursion.
//!
//! `states[b, i, u]` is the log-probability that token `i` starts on frame
//! `i + u`, i.e. that the first `i` tokens own exactly the first `i + u`
//! frames. Row `rows` holds the terminal distribution. In band coordinates
//! the end offset of token `i` is the start offset of token `i + 1`, so no
//! re-indexing happens between steps.

use candle_core::{Device, Result, Tensor};

use crate::core::LOG_EPS;
use crate::masks::SequenceLengths;
use crate::ops::LogSpaceExt;

/// `[batch, W]` state before the first token: every row starts on frame 0.
pub fn initial_state(batch: usize, width: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![LOG_EPS; batch * width];
    for b in 0..batch {
        data[b * width] = 0.0;
    }
    Tensor::from_vec(data, (batch, width), device)
}

/// Runs the recursion over `[batch, rows, W, W]` transitions and returns the
/// `[batch, rows + 1, W]` start distributions.
pub fn forward_recursion(log_prob: &Tensor) -> Result<Tensor> {
    let (batch, rows, width, _) = log_prob.dims4()?;
    let mut state = initial_state(batch, width, log_prob.device())?;
    let mut states = Vec::with_capacity(rows + 1);
    states.push(state.clone());
    for i in 0..rows {
        let step = log_prob.narrow(1, i, 1)?.squeeze(1)?;
        state = state
            .unsqueeze(2)?
            .broadcast_add(&step)?
            .log_sum_exp_keepdim(1)?
            .squeeze(1)?;
        states.push(state.clone());
    }
    Tensor::stack(&states, 1)
}

/// Log-probability that each row consumes exactly its valid frames, read
/// from `states[b, text_len, slack]`. Close to zero for a pinned recursion.
pub fn terminal_log_mass(states: &Tensor, lengths: &SequenceLengths) -> Result<Vec<f32>> {
    let states = states.to_vec3::<f32>()?;
    Ok((0..lengths.batch())
        .map(|b| states[b][lengths.text()[b]][lengths.slack(b)])
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::ConditionalDistribution;
    use crate::masks::MaskBuilder;

    #[test]
    fn initial_state_is_a_point_mass() -> Result<()> {
        let state = initial_state(2, 3, &Device::Cpu)?.to_vec2::<f32>()?;
        assert_eq!(state, vec![vec![0.0, LOG_EPS, LOG_EPS]; 2]);
        Ok(())
    }

    #[test]
    fn pinned_recursion_ends_on_the_last_frame() -> Result<()> {
        let device = Device::Cpu;
        let lens = SequenceLengths::from_lengths(vec![3, 2, 1], vec![7, 3, 4], 3, 7).unwrap();
        let mask = MaskBuilder::new(&lens).build();
        let energy = Tensor::randn(0f32, 2., (3, 3, 7), &device)?;
        let cond = ConditionalDistribution::compute(&energy, &mask)?;
        let states = forward_recursion(&cond.log_prob)?;
        assert_eq!(states.dims(), &[3, 4, mask.band_width()]);

        for (b, mass) in terminal_log_mass(&states, &lens)?.into_iter().enumerate() {
            assert!(mass.abs() < 1e-4, "row {b} terminal log mass {mass}");
        }
        Ok(())
    }

    #[test]
    fn every_start_distribution_sums_to_one() -> Result<()> {
        let device = Device::Cpu;
        let lens = SequenceLengths::from_lengths(vec![4], vec![9], 4, 9).unwrap();
        let mask = MaskBuilder::new(&lens).force_assign_last(false).build();
        let energy = Tensor::randn(0f32, 1., (1, 4, 9), &device)?;
        let cond = ConditionalDistribution::compute(&energy, &mask)?;
        let states = forward_recursion(&cond.log_prob)?;
        let totals = states
            .exp()?
            .sum(candle_core::D::Minus1)?
            .to_vec2::<f32>()?;
        for (i, total) in totals[0].iter().enumerate() {
            assert!((total - 1.0).abs() < 1e-4, "row {i} sums to {total}");
        }
        Ok(())
    }
}
