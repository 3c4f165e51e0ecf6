//! A small attention-free causal language model.
//!
//! `TinyLm` is a reference implementation of [`CausalLm`] for demos and
//! tests. Each block mixes context with a causal running mean instead of
//! attention, followed by a SwiGLU feed-forward:
//!
//! ```text
//! input_ids [b, s]
//!     │  embed_tokens + embed_positions
//!     ▼
//! x [b, s, h] ──┬─────────────────────────────┐
//!               ▼                             │
//!          mix_norm → causal mean over 0..=i  + residual
//!               ▼                             │
//!          mlp_norm → SwiGLU                  + residual
//!     │  (× num_hidden_layers)
//!     ▼
//! norm → x · embed_tokensᵀ (tied head) → logits [b, s, vocab]
//! ```
//!
//! Row `i` of the output depends only on tokens `0..=i`, which is what the
//! speculative verifier needs.

use std::collections::HashMap;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{embedding, Embedding, VarBuilder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::mlp::SwiGlu;
use super::norm::RmsNorm;
use super::port::CausalLm;
use crate::error::{Error, Result};

/// Architecture hyperparameters; also the `config.json` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TinyLmConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_hidden_layers: usize,
    pub rms_norm_eps: f64,
    /// Longest context the position embedding covers.
    pub max_position_embeddings: usize,
}

impl Default for TinyLmConfig {
    fn default() -> Self {
        Self {
            vocab_size: 256,
            hidden_size: 64,
            intermediate_size: 128,
            num_hidden_layers: 2,
            rms_norm_eps: 1e-6,
            max_position_embeddings: 2048,
        }
    }
}

impl TinyLmConfig {
    /// Check that every dimension is non-zero.
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("vocab_size", self.vocab_size),
            ("hidden_size", self.hidden_size),
            ("intermediate_size", self.intermediate_size),
            ("max_position_embeddings", self.max_position_embeddings),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct TinyBlock {
    mix_norm: RmsNorm,
    mlp_norm: RmsNorm,
    mlp: SwiGlu,
}

impl TinyBlock {
    fn load(config: &TinyLmConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            mix_norm: RmsNorm::load(config.hidden_size, config.rms_norm_eps, vb.pp("mix_norm"))?,
            mlp_norm: RmsNorm::load(config.hidden_size, config.rms_norm_eps, vb.pp("mlp_norm"))?,
            mlp: SwiGlu::load(config.hidden_size, config.intermediate_size, vb.pp("mlp"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let mixed = causal_mean(&self.mix_norm.forward(x)?)?;
        let x = (x + mixed)?;
        let ff = self.mlp.forward(&self.mlp_norm.forward(&x)?)?;
        x + ff
    }
}

/// Running mean along the sequence dimension of `[b, s, h]`.
fn causal_mean(x: &Tensor) -> candle_core::Result<Tensor> {
    let seq_len = x.dim(1)?;
    let counts = Tensor::arange(1u32, seq_len as u32 + 1, x.device())?
        .to_dtype(x.dtype())?
        .reshape((1, seq_len, 1))?;
    x.cumsum(1)?.broadcast_div(&counts)
}

/// Minimal causal LM.
#[derive(Debug, Clone)]
pub struct TinyLm {
    embed_tokens: Embedding,
    embed_positions: Embedding,
    layers: Vec<TinyBlock>,
    norm: RmsNorm,
    config: TinyLmConfig,
    device: Device,
}

impl TinyLm {
    /// Build from weights in `vb`.
    pub fn load(config: &TinyLmConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let embed_tokens = embedding(config.vocab_size, config.hidden_size, vb.pp("embed_tokens"))?;
        let embed_positions = embedding(
            config.max_position_embeddings,
            config.hidden_size,
            vb.pp("embed_positions"),
        )?;
        let layers = (0..config.num_hidden_layers)
            .map(|i| TinyBlock::load(config, vb.pp(format!("layers.{i}"))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let norm = RmsNorm::load(config.hidden_size, config.rms_norm_eps, vb.pp("norm"))?;

        Ok(Self {
            embed_tokens,
            embed_positions,
            layers,
            norm,
            config: config.clone(),
            device: vb.device().clone(),
        })
    }

    /// Build with deterministic pseudo-random weights.
    ///
    /// The same `(config, seed)` always yields the same model.
    pub fn seeded(config: &TinyLmConfig, seed: u64, device: &Device) -> Result<Self> {
        let tensors = seeded_weights(config, seed, device)?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        Self::load(config, vb)
    }

    pub fn config(&self) -> &TinyLmConfig {
        &self.config
    }
}

impl CausalLm for TinyLm {
    fn forward_all(&self, input_ids: &Tensor) -> candle_core::Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        if seq_len > self.config.max_position_embeddings {
            return Err(candle_core::Error::Msg(format!(
                "sequence of {seq_len} tokens exceeds {} positions",
                self.config.max_position_embeddings
            )));
        }

        let positions = Tensor::arange(0u32, seq_len as u32, &self.device)?.unsqueeze(0)?;
        let tokens = self.embed_tokens.forward(input_ids)?;
        let mut x = tokens.broadcast_add(&self.embed_positions.forward(&positions)?)?;
        for layer in &self.layers {
            x = layer.forward(&x)?;
        }
        let x = self.norm.forward(&x)?;
        x.broadcast_matmul(&self.embed_tokens.embeddings().t()?)
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

/// Deterministic weights for [`TinyLm`], keyed by SafeTensors name.
pub fn seeded_weights(
    config: &TinyLmConfig,
    seed: u64,
    device: &Device,
) -> Result<HashMap<String, Tensor>> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(seed);
    let h = config.hidden_size;
    let i = config.intermediate_size;
    let mut tensors = HashMap::new();

    let mut uniform = |rows: usize, cols: usize, scale: f32| -> Result<Tensor> {
        let data: Vec<f32> = (0..rows * cols)
            .map(|_| rng.gen_range(-scale..scale))
            .collect();
        Ok(Tensor::from_vec(data, (rows, cols), device)?)
    };

    tensors.insert("embed_tokens.weight".into(), uniform(config.vocab_size, h, 1.0)?);
    tensors.insert(
        "embed_positions.weight".into(),
        uniform(config.max_position_embeddings, h, 0.5)?,
    );
    let in_scale = 1.0 / (h as f32).sqrt();
    let out_scale = 1.0 / (i as f32).sqrt();
    for layer in 0..config.num_hidden_layers {
        let prefix = format!("layers.{layer}");
        tensors.insert(format!("{prefix}.mlp.gate_proj.weight"), uniform(i, h, in_scale)?);
        tensors.insert(format!("{prefix}.mlp.up_proj.weight"), uniform(i, h, in_scale)?);
        tensors.insert(format!("{prefix}.mlp.down_proj.weight"), uniform(h, i, out_scale)?);
    }

    let ones = Tensor::ones(h, DType::F32, device)?;
    for layer in 0..config.num_hidden_layers {
        tensors.insert(format!("layers.{layer}.mix_norm.weight"), ones.clone());
        tensors.insert(format!("layers.{layer}.mlp_norm.weight"), ones.clone());
    }
    tensors.insert("norm.weight".into(), ones);

    Ok(tensors)
}
