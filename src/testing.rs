//! Deterministic stub models for tests and demos.
//!
//! These ports define a model by a next-token function instead of weights,
//! which makes draft/target agreement patterns easy to construct: two ports
//! built from the same function behave as identical models without sharing
//! any state.

use candle_core::{Device, Tensor};

use crate::core::sequence::TokenId;
use crate::speculative::port::LanguageModelPort;

/// A model whose greedy choice after each prefix is given by a function.
///
/// Each logit row is one-hot at `next(&context[..=i])`.
#[derive(Debug, Clone)]
pub struct FnModel<F> {
    vocab_size: usize,
    next: F,
    calls: usize,
}

impl<F> FnModel<F>
where
    F: FnMut(&[TokenId]) -> TokenId,
{
    /// Create a model over `vocab_size` ids. `next` must return ids below it.
    pub fn new(vocab_size: usize, next: F) -> Self {
        Self {
            vocab_size,
            next,
            calls: 0,
        }
    }

    /// Number of `score` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl<F> LanguageModelPort for FnModel<F>
where
    F: FnMut(&[TokenId]) -> TokenId,
{
    fn score(&mut self, context: &[TokenId]) -> candle_core::Result<Tensor> {
        self.calls += 1;
        let mut data = vec![0f32; context.len() * self.vocab_size];
        for i in 0..context.len() {
            let token = (self.next)(&context[..=i]) as usize;
            if token >= self.vocab_size {
                return Err(candle_core::Error::Msg(format!(
                    "token {token} outside vocabulary of {}",
                    self.vocab_size
                )));
            }
            data[i * self.vocab_size + token] = 1.0;
        }
        Tensor::from_vec(data, (context.len(), self.vocab_size), &Device::Cpu)
    }
}

/// A pseudo-random but deterministic next-token rule over `vocab_size` ids.
pub fn hash_next(context: &[TokenId], vocab_size: usize) -> TokenId {
    let last = context.last().copied().unwrap_or(0) as u64;
    let mixed = last
        .wrapping_mul(2_654_435_761)
        .wrapping_add(context.len() as u64 * 40_503)
        .wrapping_add(17);
    (mixed % vocab_size as u64) as TokenId
}

/// A stand-in target model following [`hash_next`].
pub fn hash_model(vocab_size: usize) -> FnModel<impl FnMut(&[TokenId]) -> TokenId + Clone> {
    FnModel::new(vocab_size, move |ctx: &[TokenId]| hash_next(ctx, vocab_size))
}

/// A draft that never agrees with [`hash_model`].
pub fn contrarian_model(
    vocab_size: usize,
) -> FnModel<impl FnMut(&[TokenId]) -> TokenId + Clone> {
    FnModel::new(vocab_size, move |ctx: &[TokenId]| {
        (hash_next(ctx, vocab_size) + 1) % vocab_size as TokenId
    })
}

/// A draft that agrees with [`hash_model`] except when the prefix length is a
/// multiple of `period`.
pub fn sometimes_wrong_model(
    vocab_size: usize,
    period: usize,
) -> FnModel<impl FnMut(&[TokenId]) -> TokenId + Clone> {
    FnModel::new(vocab_size, move |ctx: &[TokenId]| {
        let target = hash_next(ctx, vocab_size);
        if ctx.len() % period == 0 {
            (target + 1) % vocab_size as TokenId
        } else {
            target
        }
    })
}

/// A port whose every call fails.
#[derive(Debug, Clone, Default)]
pub struct FailingModel {
    calls: usize,
}

impl FailingModel {
    /// Create a failing port.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attempted calls.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl LanguageModelPort for FailingModel {
    fn score(&mut self, _context: &[TokenId]) -> candle_core::Result<Tensor> {
        self.calls += 1;
        Err(candle_core::Error::Msg("model unavailable".into()))
    }
}

/// Wraps a port and fails every call after the first `healthy_calls`.
#[derive(Debug, Clone)]
pub struct FailAfter<P> {
    inner: P,
    healthy_calls: usize,
    calls: usize,
}

impl<P> FailAfter<P> {
    /// Let `healthy_calls` calls through, then fail.
    pub fn new(inner: P, healthy_calls: usize) -> Self {
        Self {
            inner,
            healthy_calls,
            calls: 0,
        }
    }

    /// Number of attempted calls.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl<P: LanguageModelPort> LanguageModelPort for FailAfter<P> {
    fn score(&mut self, context: &[TokenId]) -> candle_core::Result<Tensor> {
        self.calls += 1;
        if self.calls > self.healthy_calls {
            return Err(candle_core::Error::Msg(format!(
                "injected failure on call {}",
                self.calls
            )));
        }
        self.inner.score(context)
    }
}

/// Plain target-only greedy decoding against a port, for comparisons.
///
/// Returns the generated tokens and the number of model calls.
pub fn naive_greedy<P: LanguageModelPort>(
    model: &mut P,
    prompt: &[TokenId],
    max_new_tokens: usize,
) -> candle_core::Result<(Vec<TokenId>, usize)> {
    let mut tokens = prompt.to_vec();
    let mut calls = 0;
    for _ in 0..max_new_tokens {
        let logits = model.score(&tokens)?;
        calls += 1;
        let last = logits.get(tokens.len() - 1)?;
        let next = last.argmax(candle_core::D::Minus1)?.to_scalar::<u32>()?;
        tokens.push(next);
    }
    Ok((tokens.split_off(prompt.len()), calls))
}
