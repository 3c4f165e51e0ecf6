//! Target-only autoregressive decoding.
//!
//! One target call per generated token. This is the baseline speculative
//! decoding is measured against, and the loop the speculative engine hands
//! over to after a fallback.

use std::time::Instant;

use tracing::trace;

use super::request::StopCriteria;
use super::sampler::Sampler;
use crate::config::SamplingConfig;
use crate::core::sequence::{FinishReason, TokenId, TokenSequence};
use crate::error::{ModelRole, Result};
use crate::speculative::metrics::SpeculationMetrics;
use crate::speculative::port::{next_token_logits, LanguageModelPort};

/// Plain decode loop over the target model.
#[derive(Debug, Clone)]
pub struct StandardDecodeLoop {
    sampler: Sampler,
}

impl StandardDecodeLoop {
    /// Create a loop that selects tokens according to `sampling`.
    pub fn new(sampling: &SamplingConfig) -> Self {
        Self {
            sampler: Sampler::new(sampling),
        }
    }

    /// Score `context` and select the next token.
    pub fn step<T: LanguageModelPort + ?Sized>(
        &mut self,
        target: &mut T,
        context: &[TokenId],
    ) -> Result<TokenId> {
        let logits = next_token_logits(target, ModelRole::Target, context)?;
        self.sampler.sample(&logits)
    }

    /// Decode until a stop condition holds.
    ///
    /// Each step is recorded in `metrics` as a fallback step.
    pub fn run<T: LanguageModelPort + ?Sized>(
        &mut self,
        target: &mut T,
        sequence: &mut TokenSequence,
        stop: &StopCriteria,
        metrics: &mut SpeculationMetrics,
    ) -> Result<FinishReason> {
        loop {
            if let Some(reason) = stop.check(sequence) {
                return Ok(reason);
            }

            let start = Instant::now();
            let token = self.step(target, sequence.as_slice())?;
            metrics.record_fallback_step(start.elapsed());
            sequence.push(token)?;
            trace!(token, position = sequence.len() - 1, "target-only step");
        }
    }
}
