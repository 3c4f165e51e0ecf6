//! Target-model verification of draft proposals.
//!
//! One target forward pass over `context ++ proposals` yields the target's
//! greedy prediction at every position, which is enough to check all
//! proposals at once:
//!
//! ```text
//! context:      c0 c1 c2 | d0 d1 d2 d3
//! predictions:  .  .  p0 | p1 p2 p3 p4
//!                     │     │  │  │  └─ bonus token after a full accept
//!                     └─────┴──┴──┴──── compared against d0..d3
//! ```
//!
//! Proposals are accepted while `p[i] == d[i]`. At the first mismatch the
//! target's own `p[i]` replaces the draft token and the round ends.

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::port::{greedy_predictions, LanguageModelPort};
use crate::core::sequence::TokenId;
use crate::error::{Error, ModelRole, Result};

/// Outcome for a single proposed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenVerdict {
    /// Offset of the proposal within the round.
    pub index: usize,
    /// Token proposed by the draft model.
    pub draft_token: TokenId,
    /// Target model's greedy prediction at the same position.
    pub target_token: TokenId,
    /// Whether the two agree.
    pub accepted: bool,
}

/// The record of one draft-propose / target-verify round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeculationRound {
    /// Tokens proposed by the draft model.
    pub draft_tokens: Vec<TokenId>,
    /// Leading draft tokens that matched the target, in `[0, draft_tokens.len()]`.
    pub accepted_count: usize,
    /// Target token appended after the accepted prefix: the correction at the
    /// first mismatch, or the free token after a full accept.
    pub patched_token: Option<TokenId>,
    /// Per-token trace, up to and including the first mismatch.
    pub trace: Vec<TokenVerdict>,
}

impl SpeculationRound {
    /// Whether every draft token was accepted.
    pub fn fully_accepted(&self) -> bool {
        self.accepted_count == self.draft_tokens.len()
    }

    /// Tokens this round contributes, in order.
    pub fn emitted_tokens(&self) -> impl Iterator<Item = TokenId> + '_ {
        self.draft_tokens[..self.accepted_count]
            .iter()
            .copied()
            .chain(self.patched_token)
    }

    /// Number of tokens this round contributes.
    pub fn num_emitted(&self) -> usize {
        self.accepted_count + usize::from(self.patched_token.is_some())
    }
}

/// Greedy verifier: checks draft tokens against the target model's argmax.
#[derive(Debug, Clone)]
pub struct Verifier {
    /// Take the target's next prediction after a fully accepted round.
    bonus_token: bool,
}

impl Verifier {
    /// Create a verifier.
    pub fn new(bonus_token: bool) -> Self {
        Self { bonus_token }
    }

    /// Verify `proposals` as a continuation of `context` with one target call.
    ///
    /// `context` must be non-empty: the first proposal is checked against the
    /// prediction made at the last context position. An empty proposal is a
    /// no-progress round and makes no target call.
    pub fn verify<T: LanguageModelPort + ?Sized>(
        &self,
        target: &mut T,
        context: &[TokenId],
        proposals: &[TokenId],
    ) -> Result<SpeculationRound> {
        if context.is_empty() {
            return Err(Error::EmptyPrompt);
        }
        if proposals.is_empty() {
            return Ok(SpeculationRound {
                draft_tokens: Vec::new(),
                accepted_count: 0,
                patched_token: None,
                trace: Vec::new(),
            });
        }

        let mut sequence = Vec::with_capacity(context.len() + proposals.len());
        sequence.extend_from_slice(context);
        sequence.extend_from_slice(proposals);

        let predictions = greedy_predictions(target, ModelRole::Target, &sequence)?;
        // predictions[offset + i] is the target's choice for proposals[i].
        let offset = context.len() - 1;

        let mut trace = Vec::with_capacity(proposals.len());
        let mut accepted_count = 0;
        let mut patched_token = None;

        for (i, &draft_token) in proposals.iter().enumerate() {
            let target_token = predictions[offset + i];
            let accepted = target_token == draft_token;
            trace!(index = i, draft_token, target_token, accepted, "verdict");
            trace.push(TokenVerdict {
                index: i,
                draft_token,
                target_token,
                accepted,
            });
            if !accepted {
                patched_token = Some(target_token);
                break;
            }
            accepted_count += 1;
        }

        if patched_token.is_none() && self.bonus_token {
            patched_token = Some(predictions[offset + proposals.len()]);
        }

        Ok(SpeculationRound {
            draft_tokens: proposals.to_vec(),
            accepted_count,
            patched_token,
            trace,
        })
    }
}
