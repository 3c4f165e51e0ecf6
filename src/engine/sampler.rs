//! Next-token selection for target-only decoding.
//!
//! ```text
//! logits [vocab]
//!     │  temperature == 0 ──────────────► argmax
//!     ▼
//! logits / temperature
//!     ▼  top-k (optional)
//! k highest logits
//!     ▼  softmax
//! probabilities
//!     ▼  top-p (optional)
//! smallest prefix with mass > p
//!     ▼
//! weighted draw
//! ```
//!
//! Greedy selection uses the same argmax as the speculative verifier, so a
//! greedy standard run and a speculative run agree token for token.

use candle_core::{Tensor, D};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::SamplingConfig;
use crate::core::sequence::TokenId;
use crate::error::{Error, Result};

/// Token sampler for a single sequence.
#[derive(Debug, Clone)]
pub struct Sampler {
    temperature: f32,
    /// 0 = disabled.
    top_k: usize,
    /// 1.0 = disabled.
    top_p: f32,
    rng: StdRng,
}

impl Sampler {
    /// Create a sampler; seeded when the config carries a seed.
    pub fn new(config: &SamplingConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            rng,
        }
    }

    /// Greedy sampler.
    pub fn greedy() -> Self {
        Self::new(&SamplingConfig::greedy())
    }

    /// Whether this sampler always takes the argmax.
    pub fn is_greedy(&self) -> bool {
        self.temperature == 0.0
    }

    /// Pick a token from `[vocab_size]` logits.
    pub fn sample(&mut self, logits: &Tensor) -> Result<TokenId> {
        if logits.rank() != 1 {
            return Err(Error::Config(format!(
                "sampler expects 1D logits, got shape {:?}",
                logits.dims()
            )));
        }
        if self.is_greedy() {
            return Ok(logits.argmax(D::Minus1)?.to_scalar::<u32>()?);
        }

        let scaled = (logits / self.temperature as f64)?;
        let mut candidates: Vec<(TokenId, f32)> = scaled
            .to_vec1::<f32>()?
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i as TokenId, v))
            .collect();

        if self.top_k > 0 && self.top_k < candidates.len() {
            sort_descending(&mut candidates);
            candidates.truncate(self.top_k);
        }

        softmax_in_place(&mut candidates);

        if self.top_p > 0.0 && self.top_p < 1.0 {
            sort_descending(&mut candidates);
            let mut cumulative = 0.0f32;
            let mut cutoff = candidates.len();
            for (i, (_, p)) in candidates.iter().enumerate() {
                cumulative += p;
                if cumulative > self.top_p {
                    cutoff = i + 1;
                    break;
                }
            }
            candidates.truncate(cutoff);
        }

        let weights: Vec<f64> = candidates.iter().map(|&(_, p)| p as f64).collect();
        let dist = WeightedIndex::new(&weights)
            .map_err(|e| Error::Config(format!("cannot sample from logits: {e}")))?;
        Ok(candidates[dist.sample(&mut self.rng)].0)
    }
}

fn sort_descending(candidates: &mut [(TokenId, f32)]) {
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
}

fn softmax_in_place(candidates: &mut [(TokenId, f32)]) {
    let max = candidates
        .iter()
        .map(|&(_, v)| v)
        .fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for (_, v) in candidates.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for (_, v) in candidates.iter_mut() {
            *v /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use std::collections::HashSet;

    fn sampling(temperature: f32, top_k: usize, top_p: f32) -> SamplingConfig {
        SamplingConfig {
            temperature,
            top_k,
            top_p,
            seed: Some(42),
        }
    }

    #[test]
    fn test_greedy_sampling() {
        let mut sampler = Sampler::greedy();
        let logits = Tensor::new(&[0.1f32, 0.2, 0.3, 10.0, 0.4], &Device::Cpu).unwrap();
        assert_eq!(sampler.sample(&logits).unwrap(), 3);
    }

    #[test]
    fn test_temperature_sampling_varies() {
        let mut sampler = Sampler::new(&sampling(1.0, 0, 1.0));
        let logits = Tensor::new(&[1.0f32, 1.0, 1.0, 1.0, 1.0], &Device::Cpu).unwrap();

        let seen: HashSet<_> = (0..100).map(|_| sampler.sample(&logits).unwrap()).collect();
        assert!(seen.len() > 1, "uniform logits should yield different tokens");
    }

    #[test]
    fn test_top_k_restricts_choices() {
        let mut sampler = Sampler::new(&sampling(1.0, 2, 1.0));
        let logits = Tensor::new(&[0.1f32, 0.2, 0.3, 5.0, 4.5], &Device::Cpu).unwrap();

        for _ in 0..50 {
            let token = sampler.sample(&logits).unwrap();
            assert!(token == 3 || token == 4, "got {token}");
        }
    }

    #[test]
    fn test_top_p_keeps_dominant_token() {
        let mut sampler = Sampler::new(&sampling(1.0, 0, 0.5));
        let logits = Tensor::new(&[0.0f32, 0.0, 0.0, 10.0, 0.0], &Device::Cpu).unwrap();
        for _ in 0..10 {
            assert_eq!(sampler.sample(&logits).unwrap(), 3);
        }
    }

    #[test]
    fn test_seed_reproducibility() {
        let config = sampling(1.0, 0, 1.0);
        let logits = Tensor::new(&[1.0f32, 1.0, 1.0, 1.0, 1.0], &Device::Cpu).unwrap();
        let mut a = Sampler::new(&config);
        let mut b = Sampler::new(&config);

        let first: Vec<_> = (0..10).map(|_| a.sample(&logits).unwrap()).collect();
        let second: Vec<_> = (0..10).map(|_| b.sample(&logits).unwrap()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rejects_batched_logits() {
        let mut sampler = Sampler::greedy();
        let logits = Tensor::zeros((2, 4), candle_core::DType::F32, &Device::Cpu).unwrap();
        assert!(sampler.sample(&logits).is_err());
    }
}
