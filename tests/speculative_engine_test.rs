//! Integration tests for SpeculativeDecodingEngine.
//!
//! The models here are deterministic stub ports from `spec_decode::testing`,
//! so every run can be checked against plain target-only greedy decoding.

use candle_core::Tensor;
use spec_decode::speculative::FallbackReason;
use spec_decode::testing::{
    contrarian_model, hash_model, naive_greedy, sometimes_wrong_model, FailAfter, FailingModel,
};
use spec_decode::{
    CancelHandle, Error, FinishReason, GenerationRequest, LanguageModelPort, ModelRole,
    SpeculationConfig, SpeculativeDecodingEngine, TokenId,
};

const VOCAB: usize = 50;

fn expected(prompt: &[TokenId], max_new_tokens: usize) -> Vec<TokenId> {
    naive_greedy(&mut hash_model(VOCAB), prompt, max_new_tokens)
        .unwrap()
        .0
}

#[test]
fn test_identical_models_without_bonus() {
    // k = 4, 20 tokens: every proposal is accepted, 4 tokens per round.
    let config = SpeculationConfig::new(4).bonus_token(false);
    let mut engine =
        SpeculativeDecodingEngine::new(hash_model(VOCAB), hash_model(VOCAB), config).unwrap();

    let output = engine
        .generate(&GenerationRequest::new(vec![1, 2, 3]).max_new_tokens(20))
        .unwrap();

    assert_eq!(output.tokens, expected(&[1, 2, 3], 20));
    assert_eq!(output.metrics.target_calls, 5);
    assert_eq!(engine.target().calls(), 5);
    assert_eq!(output.metrics.draft_calls, 20);
    assert_eq!(output.metrics.tokens_accepted, 20);
    assert!((output.metrics.acceptance_rate() - 1.0).abs() < 1e-6);
    assert_eq!(output.metrics.bonus_tokens, 0);
}

#[test]
fn test_identical_models_with_bonus() {
    // Each fully accepted round also takes the target's next token: 5 per call.
    let mut engine = SpeculativeDecodingEngine::new(
        hash_model(VOCAB),
        hash_model(VOCAB),
        SpeculationConfig::new(4),
    )
    .unwrap();

    let output = engine
        .generate(&GenerationRequest::new(vec![1, 2, 3]).max_new_tokens(20))
        .unwrap();

    assert_eq!(output.tokens, expected(&[1, 2, 3], 20));
    assert_eq!(output.metrics.target_calls, 4);
    assert_eq!(output.metrics.bonus_tokens, 4);
    assert_eq!(output.metrics.draft_calls, 16);
    assert_eq!(output.finish_reason, FinishReason::MaxTokens);
}

#[test]
fn test_always_rejected_falls_back() {
    let mut engine = SpeculativeDecodingEngine::new(
        contrarian_model(VOCAB),
        hash_model(VOCAB),
        SpeculationConfig::new(4),
    )
    .unwrap();

    let output = engine
        .generate(&GenerationRequest::new(vec![7]).max_new_tokens(12))
        .unwrap();

    assert_eq!(output.tokens, expected(&[7], 12));
    assert_eq!(output.metrics.speculative_rounds, 5);
    assert_eq!(output.metrics.tokens_accepted, 0);
    assert_eq!(output.metrics.patched_tokens, 5);
    assert_eq!(output.metrics.fallback_steps, 7);
    // One target call per token, as if there were no draft.
    assert_eq!(output.metrics.target_calls, 12);
    assert_eq!(
        output.metrics.fallback,
        Some(FallbackReason::Rejections { consecutive: 5 })
    );
    assert!(output.metrics.fell_back());
    // Five rounds of k = 4, and no draft calls once decoding is target-only.
    assert_eq!(engine.draft().calls(), 20);
    assert_eq!(output.metrics.draft_calls, engine.draft().calls());
}

#[test]
fn test_partial_agreement_matches_target() {
    let mut engine = SpeculativeDecodingEngine::new(
        sometimes_wrong_model(VOCAB, 3),
        hash_model(VOCAB),
        SpeculationConfig::new(3),
    )
    .unwrap();

    let output = engine
        .generate(&GenerationRequest::new(vec![4, 8]).max_new_tokens(30))
        .unwrap();

    assert_eq!(output.tokens, expected(&[4, 8], 30));
    assert!(output.metrics.target_calls <= 30);
    assert!(output.metrics.tokens_accepted > 0);
    assert!(output.metrics.rounds.iter().all(|r| r.committed >= 1));
}

#[test]
fn test_k_grows_after_warmup() {
    let config = SpeculationConfig::new(2).k_bounds(1, 4);
    let mut engine =
        SpeculativeDecodingEngine::new(hash_model(VOCAB), hash_model(VOCAB), config).unwrap();

    let output = engine
        .generate(&GenerationRequest::new(vec![2]).max_new_tokens(40))
        .unwrap();

    let ks: Vec<usize> = output.metrics.rounds.iter().map(|r| r.k).collect();
    assert!(ks[..5].iter().all(|&k| k == 2), "warmup ks: {ks:?}");
    // One above base, never further.
    assert_eq!(ks[5], 3);
    assert_eq!(ks[6], 3);
    assert!(ks.iter().all(|&k| k <= 3), "ks: {ks:?}");
    assert_eq!(output.tokens, expected(&[2], 40));
}

#[test]
fn test_k_stays_next_to_base_on_long_runs() {
    let config = SpeculationConfig::new(4).k_bounds(1, 10);
    let mut engine =
        SpeculativeDecodingEngine::new(hash_model(VOCAB), hash_model(VOCAB), config).unwrap();
    assert_eq!(engine.config().max_speculative_tokens, 10);

    let output = engine
        .generate(&GenerationRequest::new(vec![6]).max_new_tokens(120))
        .unwrap();

    let ks: Vec<usize> = output.metrics.rounds.iter().map(|r| r.k).collect();
    assert_eq!(&ks[..7], &[4, 4, 4, 4, 4, 5, 5]);
    assert_eq!(ks.iter().max(), Some(&5));
    assert_eq!(output.tokens, expected(&[6], 120));
}

#[test]
fn test_k_shrinks_on_rejection() {
    let config = SpeculationConfig::new(4).fallback_threshold(100);
    let mut engine =
        SpeculativeDecodingEngine::new(contrarian_model(VOCAB), hash_model(VOCAB), config).unwrap();

    let output = engine
        .generate(&GenerationRequest::new(vec![2]).max_new_tokens(12))
        .unwrap();

    // One round per token; the last two are clamped by the budget.
    let ks: Vec<usize> = output.metrics.rounds.iter().map(|r| r.k).collect();
    assert_eq!(ks, vec![4, 4, 4, 4, 4, 3, 3, 3, 3, 3, 2, 1]);
    assert!(output.metrics.fallback.is_none());
    assert_eq!(output.tokens, expected(&[2], 12));
}

#[test]
fn test_eos_stops_both_paths_identically() {
    let prompt = [5, 6];
    let full = expected(&prompt, 20);
    let eos = full[6];
    let stop_at = full.iter().position(|&t| t == eos).unwrap();

    let mut engine = SpeculativeDecodingEngine::new(
        sometimes_wrong_model(VOCAB, 4),
        hash_model(VOCAB),
        SpeculationConfig::new(4),
    )
    .unwrap();
    let request = GenerationRequest::new(prompt.to_vec())
        .max_new_tokens(20)
        .eos_token_id(Some(eos));

    let speculative = engine.generate(&request).unwrap();
    let standard = engine.generate_standard(&request).unwrap();

    assert_eq!(speculative.tokens, full[..=stop_at].to_vec());
    assert_eq!(standard.tokens, speculative.tokens);
    assert_eq!(speculative.finish_reason, FinishReason::EndOfSequence);
    assert_eq!(standard.finish_reason, FinishReason::EndOfSequence);
}

#[test]
fn test_context_limit() {
    let config = SpeculationConfig::new(4).max_context_len(10);
    let mut engine =
        SpeculativeDecodingEngine::new(hash_model(VOCAB), hash_model(VOCAB), config).unwrap();

    let output = engine
        .generate(&GenerationRequest::new(vec![1, 2, 3]).max_new_tokens(20))
        .unwrap();

    assert_eq!(output.finish_reason, FinishReason::ContextFull);
    assert_eq!(output.tokens, expected(&[1, 2, 3], 7));
}

#[test]
fn test_prompt_longer_than_context() {
    let config = SpeculationConfig::new(2).max_context_len(4);
    let mut engine =
        SpeculativeDecodingEngine::new(hash_model(VOCAB), hash_model(VOCAB), config).unwrap();

    let err = engine
        .generate(&GenerationRequest::new(vec![1, 2, 3, 4, 5]))
        .unwrap_err();
    assert!(matches!(err, Error::ContextOverflow { len: 5, max: 4 }));
}

#[test]
fn test_zero_budget() {
    let mut engine = SpeculativeDecodingEngine::new(
        hash_model(VOCAB),
        hash_model(VOCAB),
        SpeculationConfig::default(),
    )
    .unwrap();

    let output = engine
        .generate(&GenerationRequest::new(vec![1]).max_new_tokens(0))
        .unwrap();

    assert!(output.tokens.is_empty());
    assert_eq!(output.finish_reason, FinishReason::MaxTokens);
    assert_eq!(engine.draft().calls(), 0);
    assert_eq!(engine.target().calls(), 0);
}

#[test]
fn test_budget_smaller_than_k() {
    let mut engine = SpeculativeDecodingEngine::new(
        hash_model(VOCAB),
        hash_model(VOCAB),
        SpeculationConfig::new(8),
    )
    .unwrap();

    let output = engine
        .generate(&GenerationRequest::new(vec![3]).max_new_tokens(3))
        .unwrap();

    assert_eq!(output.tokens, expected(&[3], 3));
    assert_eq!(output.metrics.rounds[0].k, 3);
    assert_eq!(output.metrics.target_calls, 1);
}

#[test]
fn test_draft_failure_falls_back_to_target() {
    let mut engine = SpeculativeDecodingEngine::new(
        FailingModel::new(),
        hash_model(VOCAB),
        SpeculationConfig::default(),
    )
    .unwrap();

    let output = engine
        .generate(&GenerationRequest::new(vec![9, 9]).max_new_tokens(6))
        .unwrap();

    assert_eq!(output.tokens, expected(&[9, 9], 6));
    assert_eq!(output.metrics.speculative_rounds, 0);
    assert_eq!(output.metrics.fallback_steps, 6);
    assert!(matches!(
        output.metrics.fallback,
        Some(FallbackReason::ModelError {
            role: ModelRole::Draft,
            ..
        })
    ));
}

#[test]
fn test_draft_failure_mid_call_keeps_committed_tokens() {
    // Two full rounds of k = 3, then the draft breaks on its seventh call.
    let mut engine = SpeculativeDecodingEngine::new(
        FailAfter::new(hash_model(VOCAB), 6),
        hash_model(VOCAB),
        SpeculationConfig::new(3),
    )
    .unwrap();

    let output = engine
        .generate(&GenerationRequest::new(vec![4]).max_new_tokens(15))
        .unwrap();

    assert_eq!(output.tokens, expected(&[4], 15));
    assert_eq!(output.metrics.speculative_rounds, 2);
    assert_eq!(output.metrics.tokens_generated, 15);
    assert_eq!(output.metrics.fallback_steps, 15 - 8);
}

#[test]
fn test_draft_failure_without_fallback_is_error() {
    let config = SpeculationConfig::default().fallback_on_error(false);
    let mut engine =
        SpeculativeDecodingEngine::new(FailingModel::new(), hash_model(VOCAB), config).unwrap();

    let err = engine
        .generate(&GenerationRequest::new(vec![1]).max_new_tokens(5))
        .unwrap_err();

    assert!(matches!(
        err,
        Error::ModelInvocation {
            role: ModelRole::Draft,
            ..
        }
    ));
}

#[test]
fn test_target_failure_during_fallback_is_error() {
    let mut engine = SpeculativeDecodingEngine::new(
        hash_model(VOCAB),
        FailAfter::new(hash_model(VOCAB), 1),
        SpeculationConfig::new(2),
    )
    .unwrap();

    let err = engine
        .generate(&GenerationRequest::new(vec![1]).max_new_tokens(10))
        .unwrap_err();

    assert_eq!(err.role(), Some(ModelRole::Target));
    // One good round, one failed verify, one failed fallback step.
    assert_eq!(engine.target().calls(), 3);
}

/// Fails exactly one call, then recovers.
struct FailOnCall<P> {
    inner: P,
    fail_on: usize,
    calls: usize,
}

impl<P: LanguageModelPort> LanguageModelPort for FailOnCall<P> {
    fn score(&mut self, context: &[TokenId]) -> candle_core::Result<Tensor> {
        self.calls += 1;
        if self.calls == self.fail_on {
            return Err(candle_core::Error::Msg("transient failure".into()));
        }
        self.inner.score(context)
    }
}

#[test]
fn test_failed_verify_still_counts_draft_work() {
    let target = FailOnCall {
        inner: hash_model(VOCAB),
        fail_on: 2,
        calls: 0,
    };
    let mut engine =
        SpeculativeDecodingEngine::new(hash_model(VOCAB), target, SpeculationConfig::new(2))
            .unwrap();

    let output = engine
        .generate(&GenerationRequest::new(vec![1]).max_new_tokens(10))
        .unwrap();

    // Round one commits 3, round two is lost at verify, then 7 target-only steps.
    assert_eq!(output.tokens, expected(&[1], 10));
    assert_eq!(output.metrics.speculative_rounds, 1);
    assert_eq!(output.metrics.fallback_steps, 7);
    assert_eq!(engine.draft().calls(), 4);
    assert_eq!(output.metrics.draft_calls, 4);
    assert!(matches!(
        output.metrics.fallback,
        Some(FallbackReason::ModelError {
            role: ModelRole::Target,
            ..
        })
    ));
}

#[test]
fn test_cancelled_before_start() {
    let mut engine = SpeculativeDecodingEngine::new(
        hash_model(VOCAB),
        hash_model(VOCAB),
        SpeculationConfig::default(),
    )
    .unwrap();
    engine.cancel_handle().cancel();

    let output = engine
        .generate(&GenerationRequest::new(vec![1]).max_new_tokens(10))
        .unwrap();

    assert_eq!(output.finish_reason, FinishReason::Cancelled);
    assert!(output.tokens.is_empty());
    assert_eq!(engine.target().calls(), 0);

    engine.cancel_handle().reset();
    let output = engine
        .generate(&GenerationRequest::new(vec![1]).max_new_tokens(10))
        .unwrap();
    assert_eq!(output.finish_reason, FinishReason::MaxTokens);
}

/// Cancels a shared handle after a number of calls.
struct CancelAfter<P> {
    inner: P,
    handle: Option<CancelHandle>,
    after: usize,
    calls: usize,
}

impl<P: LanguageModelPort> LanguageModelPort for CancelAfter<P> {
    fn score(&mut self, context: &[TokenId]) -> candle_core::Result<Tensor> {
        self.calls += 1;
        if self.calls == self.after {
            if let Some(handle) = &self.handle {
                handle.cancel();
            }
        }
        self.inner.score(context)
    }
}

#[test]
fn test_cancelled_between_rounds() {
    let target = CancelAfter {
        inner: hash_model(VOCAB),
        handle: None,
        after: 2,
        calls: 0,
    };
    let mut engine =
        SpeculativeDecodingEngine::new(hash_model(VOCAB), target, SpeculationConfig::new(2))
            .unwrap();
    engine.target_mut().handle = Some(engine.cancel_handle());

    let output = engine
        .generate(&GenerationRequest::new(vec![1]).max_new_tokens(30))
        .unwrap();

    // The second round completes; the third never starts.
    assert_eq!(output.finish_reason, FinishReason::Cancelled);
    assert_eq!(output.metrics.speculative_rounds, 2);
    assert_eq!(output.tokens, expected(&[1], 6));
}

#[test]
fn test_metrics_reset_between_calls() {
    let mut engine = SpeculativeDecodingEngine::new(
        hash_model(VOCAB),
        hash_model(VOCAB),
        SpeculationConfig::new(4),
    )
    .unwrap();
    let request = GenerationRequest::new(vec![1, 2]).max_new_tokens(10);

    let first = engine.generate(&request).unwrap();
    let second = engine.generate(&request).unwrap();

    assert_eq!(first.tokens, second.tokens);
    assert_eq!(first.metrics.target_calls, second.metrics.target_calls);
    assert_eq!(first.metrics.rounds, second.metrics.rounds);
}

#[test]
fn test_standard_generation_metrics() {
    let mut engine = SpeculativeDecodingEngine::new(
        hash_model(VOCAB),
        hash_model(VOCAB),
        SpeculationConfig::default(),
    )
    .unwrap();

    let output = engine
        .generate_standard(&GenerationRequest::new(vec![3]).max_new_tokens(8))
        .unwrap();

    assert_eq!(output.tokens, expected(&[3], 8));
    assert_eq!(output.metrics.speculative_rounds, 0);
    assert_eq!(output.metrics.fallback_steps, 8);
    assert_eq!(output.metrics.target_calls, 8);
    assert_eq!(engine.draft().calls(), 0);
    assert!(output.metrics.fallback.is_none());
}
