//! Adapter from candle causal LMs to [`LanguageModelPort`].

use candle_core::{Device, Tensor};

use crate::core::sequence::TokenId;
use crate::speculative::port::LanguageModelPort;

/// A candle causal LM that returns logits for every input position.
pub trait CausalLm {
    /// `[batch, seq]` u32 ids to `[batch, seq, vocab]` logits.
    fn forward_all(&self, input_ids: &Tensor) -> candle_core::Result<Tensor>;

    /// Device the model's weights live on.
    fn device(&self) -> &Device;
}

/// Exposes a [`CausalLm`] as a [`LanguageModelPort`].
///
/// Each `score` call runs one full forward pass over the context; there is
/// no KV cache, so the result depends on nothing but the context.
#[derive(Debug, Clone)]
pub struct CausalLmPort<M> {
    model: M,
    calls: usize,
}

impl<M: CausalLm> CausalLmPort<M> {
    /// Wraps `model` with a zeroed call counter.
    pub fn new(model: M) -> Self {
        Self { model, calls: 0 }
    }

    /// Number of forward passes run.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Returns a reference to the wrapped model.
    pub fn model(&self) -> &M {
        &self.model
    }
}

impl<M: CausalLm> LanguageModelPort for CausalLmPort<M> {
    fn score(&mut self, context: &[TokenId]) -> candle_core::Result<Tensor> {
        self.calls += 1;
        let input_ids = Tensor::new(context, self.model.device())?.unsqueeze(0)?;
        self.model.forward_all(&input_ids)?.squeeze(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelRole;
    use crate::model::tiny::{TinyLm, TinyLmConfig};
    use crate::speculative::port::greedy_predictions;

    #[test]
    fn test_port_scores_every_position() {
        let config = TinyLmConfig {
            vocab_size: 20,
            hidden_size: 8,
            intermediate_size: 16,
            num_hidden_layers: 1,
            ..Default::default()
        };
        let model = TinyLm::seeded(&config, 3, &Device::Cpu).unwrap();
        let mut port = CausalLmPort::new(model);

        let logits = port.score(&[1, 2, 3]).unwrap();
        assert_eq!(logits.dims(), &[3, 20]);

        let preds = greedy_predictions(&mut port, ModelRole::Target, &[1, 2, 3]).unwrap();
        assert_eq!(preds.len(), 3);
        assert!(preds.iter().all(|&t| t < 20));
        assert_eq!(port.calls(), 2);
    }
}
