//! Generation requests, results, and stop conditions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{GenerationConfig, SamplingConfig};
use crate::core::sequence::{FinishReason, TokenId, TokenSequence};
use crate::speculative::metrics::{MetricsReport, SpeculationMetrics};

/// Request for token generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Prompt token ids; must not be empty.
    pub prompt: Vec<TokenId>,
    /// Maximum number of tokens to generate.
    pub max_new_tokens: usize,
    /// Sampling for target-only decoding.
    pub sampling: SamplingConfig,
    /// Stop once this token has been generated.
    pub eos_token_id: Option<TokenId>,
}

impl GenerationRequest {
    /// Create a request with default settings.
    pub fn new(prompt: impl Into<Vec<TokenId>>) -> Self {
        Self::from_config(prompt, &GenerationConfig::default())
    }

    /// Create a request using a [`GenerationConfig`] for its defaults.
    pub fn from_config(prompt: impl Into<Vec<TokenId>>, config: &GenerationConfig) -> Self {
        Self {
            prompt: prompt.into(),
            max_new_tokens: config.max_new_tokens,
            sampling: config.sampling.clone(),
            eos_token_id: config.eos_token_id,
        }
    }

    /// Set the maximum tokens to generate.
    pub fn max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    /// Set the sampling configuration.
    pub fn sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    /// Set the temperature for target-only decoding.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.sampling.temperature = temperature;
        self
    }

    /// Set the sampling seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.sampling.seed = Some(seed);
        self
    }

    /// Set the end-of-sequence token.
    pub fn eos_token_id(mut self, eos_token_id: Option<TokenId>) -> Self {
        self.eos_token_id = eos_token_id;
        self
    }
}

/// Output from a generation call.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Generated token ids, excluding the prompt. Ends with the EOS token
    /// when finished by one.
    pub tokens: Vec<TokenId>,
    /// Reason for finishing.
    pub finish_reason: FinishReason,
    /// Metrics for this call.
    pub metrics: SpeculationMetrics,
}

impl GenerationOutput {
    /// Number of generated tokens.
    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Serializable metrics snapshot.
    pub fn report(&self) -> MetricsReport {
        self.metrics.report(self.finish_reason)
    }
}

/// Shared flag for cancelling a running generation call.
///
/// Checked before every speculative round and every target-only step, so a
/// call stops at the next boundary rather than mid-round. Once cancelled the
/// handle stays cancelled until [`reset`](Self::reset).
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Create an uncancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Termination checks shared by the speculative and target-only loops.
#[derive(Debug, Clone)]
pub struct StopCriteria {
    max_new_tokens: usize,
    eos_token_id: Option<TokenId>,
    cancel: CancelHandle,
}

impl StopCriteria {
    /// Build from a request and the engine's cancel handle.
    pub fn new(request: &GenerationRequest, cancel: CancelHandle) -> Self {
        Self {
            max_new_tokens: request.max_new_tokens,
            eos_token_id: request.eos_token_id,
            cancel,
        }
    }

    /// Why generation should stop now, if it should.
    pub fn check(&self, sequence: &TokenSequence) -> Option<FinishReason> {
        let generated = sequence.generated();
        if self.eos_token_id.is_some() && generated.last().copied() == self.eos_token_id {
            return Some(FinishReason::EndOfSequence);
        }
        if generated.len() >= self.max_new_tokens {
            return Some(FinishReason::MaxTokens);
        }
        if sequence.remaining_capacity() == 0 {
            return Some(FinishReason::ContextFull);
        }
        if self.cancel.is_cancelled() {
            return Some(FinishReason::Cancelled);
        }
        None
    }

    /// Tokens that may still be appended, by budget and by context length.
    pub fn remaining(&self, sequence: &TokenSequence) -> usize {
        self.max_new_tokens
            .saturating_sub(sequence.generated_len())
            .min(sequence.remaining_capacity())
    }

    /// Whether `token` ends generation.
    pub fn is_eos(&self, token: TokenId) -> bool {
        self.eos_token_id == Some(token)
    }
}
