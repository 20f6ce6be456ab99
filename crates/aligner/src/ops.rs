//! Log-domain tensor helpers used by the alignment passes.
//!
//! All helpers stay differentiable: the stabilising maxima are detached and
//! everything else is built from Candle primitives.

use candle_core::{Result, Tensor, D};

use crate::core::LOG_EPS;

/// Lower clamp for stabilising maxima, so a slice made only of `-inf` yields
/// `-inf` instead of `NaN`.
const MAX_FLOOR: f64 = -1e30;

pub(crate) trait LogSpaceExt {
    /// `log(sum(exp(x)))` along `dim`, keeping the reduced dimension.
    fn log_sum_exp_keepdim(&self, dim: usize) -> Result<Tensor>;

    /// `out[..., v] = log(sum_{w >= v} exp(x[..., w]))` along the last dim,
    /// floored at [`LOG_EPS`].
    fn reverse_log_cumsum_exp(&self) -> Result<Tensor>;

    /// Elementwise `log(exp(a) + exp(b))`.
    fn log_add_exp(&self, other: &Tensor) -> Result<Tensor>;

    /// Keeps entries where `keep` is non-zero, writes `value` elsewhere.
    /// `keep` must broadcast to `self`.
    fn masked_fill(&self, keep: &Tensor, value: f32) -> Result<Tensor>;
}

impl LogSpaceExt for Tensor {
    fn log_sum_exp_keepdim(&self, dim: usize) -> Result<Tensor> {
        let max = self.max_keepdim(dim)?.maximum(MAX_FLOOR)?.detach();
        self.broadcast_sub(&max)?
            .exp()?
            .sum_keepdim(dim)?
            .log()?
            .broadcast_add(&max)
    }

    fn reverse_log_cumsum_exp(&self) -> Result<Tensor> {
        let width = self.dim(D::Minus1)?;
        let max = self.max_keepdim(D::Minus1)?.maximum(MAX_FLOOR)?.detach();
        let scaled = self.broadcast_sub(&max)?.exp()?;
        // tril[w][v] = 1 when w >= v, so `scaled · tril` sums every suffix.
        let tril = Tensor::tril2(width, scaled.dtype(), scaled.device())?;
        scaled
            .contiguous()?
            .broadcast_matmul(&tril)?
            .log()?
            .broadcast_add(&max)?
            .maximum(LOG_EPS as f64)
    }

    fn log_add_exp(&self, other: &Tensor) -> Result<Tensor> {
        let max = self.maximum(other)?.maximum(MAX_FLOOR)?.detach();
        let sum = (self.sub(&max)?.exp()? + other.sub(&max)?.exp()?)?;
        sum.log()?.add(&max)
    }

    fn masked_fill(&self, keep: &Tensor, value: f32) -> Result<Tensor> {
        let keep = keep.broadcast_as(self.shape())?.contiguous()?;
        let fill = Tensor::full(value, self.shape(), self.device())?.to_dtype(self.dtype())?;
        keep.where_cond(self, &fill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn naive_lse(xs: &[f32]) -> f32 {
        xs.iter().map(|x| x.exp()).sum::<f32>().ln()
    }

    #[test]
    fn log_sum_exp_matches_naive() -> Result<()> {
        let device = Device::Cpu;
        let rows = vec![vec![0.1f32, -0.4, 2.0], vec![-3.0, 0.0, 0.5]];
        let xs = Tensor::new(&[[0.1f32, -0.4, 2.0], [-3.0, 0.0, 0.5]], &device)?;
        let out = xs.log_sum_exp_keepdim(1)?.squeeze(1)?.to_vec1::<f32>()?;
        for (row, got) in rows.iter().zip(out.iter()) {
            assert!((naive_lse(row) - got).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn log_sum_exp_of_neg_inf_slice_is_neg_inf() -> Result<()> {
        let device = Device::Cpu;
        let xs = Tensor::new(&[[f32::NEG_INFINITY, f32::NEG_INFINITY], [0.0, f32::NEG_INFINITY]], &device)?;
        let out = xs.log_sum_exp_keepdim(1)?.squeeze(1)?.to_vec1::<f32>()?;
        assert_eq!(out[0], f32::NEG_INFINITY);
        assert!(out[1].abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn reverse_cumsum_sums_suffixes() -> Result<()> {
        let device = Device::Cpu;
        let values = [0.5f32, -1.0, 0.25, -2.0];
        let xs = Tensor::new(&[values], &device)?;
        let out = xs.reverse_log_cumsum_exp()?.squeeze(0)?.to_vec1::<f32>()?;
        for v in 0..values.len() {
            let expected = naive_lse(&values[v..]);
            assert!((out[v] - expected).abs() < 1e-5, "v={v}: {} vs {expected}", out[v]);
        }
        Ok(())
    }

    #[test]
    fn reverse_cumsum_floors_at_sentinel() -> Result<()> {
        let device = Device::Cpu;
        let xs = Tensor::new(&[[0.0f32, -5000.0]], &device)?;
        let out = xs.reverse_log_cumsum_exp()?.squeeze(0)?.to_vec1::<f32>()?;
        assert!(out[0].abs() < 1e-6);
        assert_eq!(out[1], LOG_EPS);
        Ok(())
    }

    #[test]
    fn log_add_exp_matches_naive() -> Result<()> {
        let device = Device::Cpu;
        let a = Tensor::new(&[0.0f32, -2.0, LOG_EPS], &device)?;
        let b = Tensor::new(&[0.0f32, 1.0, LOG_EPS], &device)?;
        let out = a.log_add_exp(&b)?.to_vec1::<f32>()?;
        assert!((out[0] - 2f32.ln()).abs() < 1e-6);
        assert!((out[1] - ((-2f32).exp() + 1f32.exp()).ln()).abs() < 1e-5);
        assert!((out[2] - (LOG_EPS + 2f32.ln())).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn masked_fill_broadcasts_mask() -> Result<()> {
        let device = Device::Cpu;
        let xs = Tensor::new(&[[1f32, 2.0], [3.0, 4.0]], &device)?;
        let keep = Tensor::new(&[[1u8], [0]], &device)?;
        let out = xs.masked_fill(&keep, LOG_EPS)?.to_vec2::<f32>()?;
        assert_eq!(out, vec![vec![1.0, 2.0], vec![LOG_EPS, LOG_EPS]]);
        Ok(())
    }
}
