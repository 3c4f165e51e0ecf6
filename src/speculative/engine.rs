//! Speculative decoding engine.
//!
//! Orchestrates the draft model, the target model, the adaptive controller
//! and the target-only fallback for one generation call at a time.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::config::SpeculationConfig;
use super::controller::AdaptiveController;
use super::metrics::{FallbackReason, SpeculationMetrics};
use super::port::LanguageModelPort;
use super::proposer::DraftProposer;
use super::verifier::{SpeculationRound, Verifier};
use crate::core::sequence::{FinishReason, TokenSequence};
use crate::engine::request::{CancelHandle, GenerationOutput, GenerationRequest, StopCriteria};
use crate::engine::standard::StandardDecodeLoop;
use crate::error::{Error, ModelRole, Result};

/// Where the generation loop currently is.
///
/// `StandardDecoding` is terminal for the call: once speculation is
/// abandoned it is never resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Speculating { k: usize },
    StandardDecoding,
}

/// Speculative decoding engine.
///
/// Pairs a small draft model with a large target model. Each round the draft
/// proposes K tokens one call at a time, the target checks all of them in a
/// single call, and the agreed prefix plus one target token is committed.
/// With greedy selection the output is identical to decoding with the target
/// alone; only the number of target calls changes.
///
/// ## Workflow
///
/// 1. **Draft**: propose K tokens with the draft model
/// 2. **Verify**: score `context ++ proposals` with the target once
/// 3. **Commit**: keep the matching prefix, then the target's own token
/// 4. **Adapt**: pick the next K from the running acceptance rate
///
/// ```text
/// Context:  [The, quick, brown]
/// Draft:    [fox, jumps, over, a]     <- K = 4 draft calls
/// Target:   [fox, jumps, over, the]   <- 1 target call
/// Commit:   [fox, jumps, over, the]   <- 3 accepted + 1 patched
/// ```
///
/// After `fallback_threshold` consecutive rounds with nothing accepted, or a
/// model failure when `fallback_on_error` is set, the rest of the call runs
/// as target-only decoding.
pub struct SpeculativeDecodingEngine<D, T> {
    /// Small model (fast approximation).
    draft: D,
    /// Large model (ground truth).
    target: T,
    config: SpeculationConfig,
    proposer: DraftProposer,
    verifier: Verifier,
    controller: AdaptiveController,
    cancel: CancelHandle,
}

impl<D, T> SpeculativeDecodingEngine<D, T>
where
    D: LanguageModelPort,
    T: LanguageModelPort,
{
    /// Create an engine, validating `config`.
    pub fn new(draft: D, target: T, config: SpeculationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            draft,
            target,
            proposer: DraftProposer::new(config.max_context_len),
            verifier: Verifier::new(config.bonus_token),
            controller: AdaptiveController::new(&config),
            config,
            cancel: CancelHandle::new(),
        })
    }

    /// Generate tokens with speculative decoding.
    ///
    /// Returns an error and no tokens if a model call fails while
    /// `fallback_on_error` is off, or if the target fails during fallback.
    pub fn generate(&mut self, request: &GenerationRequest) -> Result<GenerationOutput> {
        let start = Instant::now();
        let mut sequence = self.start_sequence(request)?;
        let stop = StopCriteria::new(request, self.cancel.clone());
        let mut metrics = SpeculationMetrics::default();
        let mut standard = StandardDecodeLoop::new(&request.sampling);
        self.controller.reset();

        info!(
            prompt_len = sequence.prompt_len(),
            max_new_tokens = request.max_new_tokens,
            k = self.controller.base_k(),
            "starting speculative generation"
        );

        let mut state = DecodeState::Speculating {
            k: self.controller.base_k(),
        };

        let finish_reason = loop {
            if let Some(reason) = stop.check(&sequence) {
                break reason;
            }

            state = match state {
                DecodeState::Speculating { k } => {
                    match self.speculate(&mut sequence, k, &stop, &mut metrics) {
                        Ok(Some(round)) => self.after_round(&round, &mut metrics),
                        Ok(None) => {
                            warn!(len = sequence.len(), "draft proposed nothing, stopping");
                            break FinishReason::ContextFull;
                        }
                        Err(e) if e.is_model_failure() && self.config.fallback_on_error => {
                            let role = e.role().unwrap_or(ModelRole::Draft);
                            warn!(%role, error = %e, "model call failed, falling back to target-only decoding");
                            metrics.fallback = Some(FallbackReason::ModelError {
                                role,
                                message: e.to_string(),
                            });
                            DecodeState::StandardDecoding
                        }
                        Err(e) => return Err(e),
                    }
                }
                DecodeState::StandardDecoding => {
                    break standard.run(&mut self.target, &mut sequence, &stop, &mut metrics)?;
                }
            };
        };

        metrics.total_time = start.elapsed();
        info!(
            tokens = metrics.tokens_generated,
            rounds = metrics.speculative_rounds,
            fallback_steps = metrics.fallback_steps,
            target_calls = metrics.target_calls,
            acceptance_rate = metrics.acceptance_rate(),
            finish_reason = finish_reason.as_str(),
            "speculative generation finished"
        );

        Ok(GenerationOutput {
            tokens: sequence.into_generated(),
            finish_reason,
            metrics,
        })
    }

    /// Generate tokens with the target model only.
    ///
    /// Every step is a fallback step in the returned metrics.
    pub fn generate_standard(&mut self, request: &GenerationRequest) -> Result<GenerationOutput> {
        let start = Instant::now();
        let mut sequence = self.start_sequence(request)?;
        let stop = StopCriteria::new(request, self.cancel.clone());
        let mut metrics = SpeculationMetrics::default();

        info!(
            prompt_len = sequence.prompt_len(),
            max_new_tokens = request.max_new_tokens,
            "starting target-only generation"
        );

        let finish_reason = StandardDecodeLoop::new(&request.sampling).run(
            &mut self.target,
            &mut sequence,
            &stop,
            &mut metrics,
        )?;

        metrics.total_time = start.elapsed();
        info!(
            tokens = metrics.tokens_generated,
            target_calls = metrics.target_calls,
            finish_reason = finish_reason.as_str(),
            "target-only generation finished"
        );

        Ok(GenerationOutput {
            tokens: sequence.into_generated(),
            finish_reason,
            metrics,
        })
    }

    fn start_sequence(&self, request: &GenerationRequest) -> Result<TokenSequence> {
        if request.prompt.is_empty() {
            return Err(Error::EmptyPrompt);
        }
        TokenSequence::new(request.prompt.clone(), self.config.max_context_len)
    }

    /// Run one draft/verify round and commit its tokens.
    ///
    /// Nothing is appended unless both models succeed. Returns `None` when
    /// the draft had no room to propose anything.
    fn speculate(
        &mut self,
        sequence: &mut TokenSequence,
        k: usize,
        stop: &StopCriteria,
        metrics: &mut SpeculationMetrics,
    ) -> Result<Option<SpeculationRound>> {
        let remaining = stop.remaining(sequence);
        let k = k.min(remaining);

        let proposal = self.proposer.propose(&mut self.draft, sequence.as_slice(), k)?;
        if proposal.is_empty() {
            return Ok(None);
        }

        let target_start = Instant::now();
        let round = match self
            .verifier
            .verify(&mut self.target, sequence.as_slice(), &proposal.tokens)
        {
            Ok(round) => round,
            Err(e) => {
                // The round is dropped, but the draft work still happened.
                metrics.draft_calls += proposal.calls;
                metrics.draft_time += proposal.elapsed;
                return Err(e);
            }
        };
        let target_time = target_start.elapsed();

        // The bonus or patch token may not fit the budget, and nothing
        // after an EOS token is kept.
        let mut committed = 0;
        for token in round.emitted_tokens().take(remaining) {
            sequence.push(token)?;
            committed += 1;
            if stop.is_eos(token) {
                break;
            }
        }

        metrics.record_round(
            k,
            &round,
            committed,
            proposal.calls,
            proposal.elapsed,
            target_time,
        );
        self.controller.record_round(round.accepted_count);

        debug!(
            round = metrics.speculative_rounds,
            k,
            accepted = round.accepted_count,
            committed,
            len = sequence.len(),
            "speculative round"
        );

        Ok(Some(round))
    }

    fn after_round(&self, round: &SpeculationRound, metrics: &mut SpeculationMetrics) -> DecodeState {
        if self.controller.should_fall_back() {
            let consecutive = self.controller.consecutive_rejections();
            warn!(
                consecutive,
                last_accepted = round.accepted_count,
                "draft keeps getting rejected, falling back to target-only decoding"
            );
            metrics.fallback = Some(FallbackReason::Rejections { consecutive });
            return DecodeState::StandardDecoding;
        }

        DecodeState::Speculating {
            k: self.controller.next_k(metrics),
        }
    }

    /// Handle for cancelling calls on this engine from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Get the speculation configuration.
    pub fn config(&self) -> &SpeculationConfig {
        &self.config
    }

    /// Get reference to the draft model.
    pub fn draft(&self) -> &D {
        &self.draft
    }

    /// Get reference to the target model.
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Get mutable reference to the target model.
    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }
}
