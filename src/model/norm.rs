//! RMS normalization.
//!
//! Rescales the last dimension by its root mean square, without centering.
//!
//! Reference: <https://arxiv.org/abs/1910.07467>

use candle_core::{Module, Result, Tensor, D};
use candle_nn::VarBuilder;

/// RMS normalization layer.
///
/// ```text
/// rms = sqrt(mean(x^2, dim=-1) + eps)
/// output = (x / rms) * weight
/// ```
#[derive(Debug, Clone)]
pub struct RmsNorm {
    /// Scale, `[hidden_size]`.
    weight: Tensor,
    eps: f64,
}

impl RmsNorm {
    /// Creates a layer from an existing scale tensor.
    pub fn new(weight: Tensor, eps: f64) -> Self {
        Self { weight, eps }
    }

    /// Loads the `weight` tensor from `vb`.
    pub fn load(hidden_size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get(hidden_size, "weight")?;
        Ok(Self::new(weight, eps))
    }
}

impl Module for RmsNorm {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let variance = x.sqr()?.mean_keepdim(D::Minus1)?;
        let rms = (variance + self.eps)?.sqrt()?;
        x.broadcast_div(&rms)?.broadcast_mul(&self.weight)
    }
}
