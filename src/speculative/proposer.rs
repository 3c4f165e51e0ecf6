//! Draft token proposal.

use std::time::{Duration, Instant};

use tracing::trace;

use super::port::{greedy_predictions, LanguageModelPort};
use crate::core::sequence::TokenId;
use crate::error::{Error, ModelRole, Result};

/// Tokens proposed by the draft model for one round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftProposal {
    /// Proposed token IDs, in order.
    pub tokens: Vec<TokenId>,
    /// Number of draft model calls made.
    pub calls: usize,
    /// Wall time spent in the draft model.
    pub elapsed: Duration,
}

impl DraftProposal {
    /// Number of proposed tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether nothing was proposed.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Greedy draft proposer.
///
/// Drafting is inherently sequential: each proposed token is appended to a
/// scratch copy of the context before the next draft call.
///
/// ```text
/// context:  [c0 .. cn]
/// call 1:   [c0 .. cn]          -> d1
/// call 2:   [c0 .. cn, d1]      -> d2
/// ...
/// call k:   [c0 .. cn, d1..dk-1] -> dk
/// ```
#[derive(Debug, Clone)]
pub struct DraftProposer {
    /// Maximum total length of context plus proposals.
    max_context_len: usize,
}

impl DraftProposer {
    /// Create a proposer bounded by `max_context_len`.
    pub fn new(max_context_len: usize) -> Self {
        Self { max_context_len }
    }

    /// Propose up to `k` tokens following `context`.
    ///
    /// Returns fewer than `k` tokens when the context would otherwise grow
    /// past the maximum length. The caller's context is not modified.
    pub fn propose<D: LanguageModelPort + ?Sized>(
        &self,
        draft: &mut D,
        context: &[TokenId],
        k: usize,
    ) -> Result<DraftProposal> {
        if context.is_empty() {
            return Err(Error::EmptyPrompt);
        }
        let room = self.max_context_len.saturating_sub(context.len());
        let k = k.min(room);

        let start = Instant::now();
        let mut scratch = Vec::with_capacity(context.len() + k);
        scratch.extend_from_slice(context);
        let mut calls = 0;

        for _ in 0..k {
            let predictions = greedy_predictions(draft, ModelRole::Draft, &scratch)?;
            calls += 1;
            // One prediction per position; the last one continues the scratch.
            let token = predictions[predictions.len() - 1];
            scratch.push(token);
        }

        let tokens = scratch.split_off(context.len());
        trace!(requested = k, proposed = tokens.len(), ?tokens, "draft proposal");

        Ok(DraftProposal {
            tokens,
            calls,
            elapsed: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{hash_model, hash_next, FailingModel, FnModel};

    #[test]
    fn test_proposes_k_greedy_tokens() {
        let mut draft = FnModel::new(10, |ctx: &[TokenId]| (ctx[ctx.len() - 1] + 1) % 10);
        let proposer = DraftProposer::new(64);

        let proposal = proposer.propose(&mut draft, &[3], 4).unwrap();

        assert_eq!(proposal.tokens, vec![4, 5, 6, 7]);
        assert_eq!(proposal.calls, 4);
        assert_eq!(draft.calls(), 4);
    }

    #[test]
    fn test_each_call_sees_previous_proposals() {
        let mut draft = hash_model(50);
        let proposal = DraftProposer::new(64).propose(&mut draft, &[10, 20], 3).unwrap();

        let mut ctx = vec![10, 20];
        for &token in &proposal.tokens {
            assert_eq!(token, hash_next(&ctx, 50));
            ctx.push(token);
        }
    }

    #[test]
    fn test_truncated_at_max_context() {
        let mut draft = hash_model(50);
        let proposer = DraftProposer::new(5);

        let proposal = proposer.propose(&mut draft, &[1, 2, 3], 4).unwrap();

        assert_eq!(proposal.len(), 2);
        assert_eq!(draft.calls(), 2);
    }

    #[test]
    fn test_full_context_proposes_nothing() {
        let mut draft = hash_model(50);
        let proposal = DraftProposer::new(2).propose(&mut draft, &[1, 2], 4).unwrap();
        assert!(proposal.is_empty());
        assert_eq!(draft.calls(), 0);
    }

    #[test]
    fn test_draft_failure_propagates() {
        let mut draft = FailingModel::new();
        let err = DraftProposer::new(16)
            .propose(&mut draft, &[1], 2)
            .unwrap_err();
        assert_eq!(err.role(), Some(ModelRole::Draft));
        assert_eq!(draft.calls(), 1);
    }
}
