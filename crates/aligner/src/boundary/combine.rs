use candle_core::{Result, Tensor};

use crate::core::LOG_2;
use crate::ops::LogSpaceExt;

/// Averages two log-probability tensors in the probability domain:
/// `logaddexp(forward - ln 2, backward - ln 2)`.
pub fn combine_directions(forward: &Tensor, backward: &Tensor) -> Result<Tensor> {
    let forward = forward.affine(1.0, -LOG_2)?;
    let backward = backward.affine(1.0, -LOG_2)?;
    forward.log_add_exp(&backward)
}
