//! Token sequence tracking for a single generation call.
//!
//! A [`TokenSequence`] holds the prompt followed by every token generated so
//! far. It only ever grows, and never beyond its maximum context length.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Vocabulary index of a token.
pub type TokenId = u32;

/// Reason a generation call stopped producing tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Requested number of new tokens reached.
    MaxTokens,
    /// End-of-sequence token generated.
    EndOfSequence,
    /// Maximum context length reached before the token budget.
    ContextFull,
    /// Cancelled between rounds by the caller.
    Cancelled,
}

impl FinishReason {
    /// Get the reason name as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxTokens => "max_tokens",
            Self::EndOfSequence => "end_of_sequence",
            Self::ContextFull => "context_full",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Append-only buffer of prompt and generated token ids.
///
/// # Example
///
/// ```
/// use spec_decode::core::sequence::TokenSequence;
///
/// let mut seq = TokenSequence::new(vec![10, 20], 8).unwrap();
/// assert_eq!(seq.prompt_len(), 2);
///
/// seq.push(30).unwrap();
/// assert_eq!(seq.generated(), &[30]);
/// assert_eq!(seq.len(), 3);
/// assert_eq!(seq.remaining_capacity(), 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSequence {
    /// Prompt tokens followed by generated tokens.
    tokens: Vec<TokenId>,
    /// Number of leading prompt tokens.
    prompt_len: usize,
    /// Maximum total length.
    max_len: usize,
}

impl TokenSequence {
    /// Create a sequence from prompt tokens.
    ///
    /// Fails if the prompt alone is longer than `max_len`.
    pub fn new(prompt: Vec<TokenId>, max_len: usize) -> Result<Self> {
        if prompt.len() > max_len {
            return Err(Error::ContextOverflow {
                len: prompt.len(),
                max: max_len,
            });
        }
        let prompt_len = prompt.len();
        Ok(Self {
            tokens: prompt,
            prompt_len,
            max_len,
        })
    }

    /// Append one generated token.
    pub fn push(&mut self, token: TokenId) -> Result<()> {
        if self.tokens.len() >= self.max_len {
            return Err(Error::ContextOverflow {
                len: self.tokens.len() + 1,
                max: self.max_len,
            });
        }
        self.tokens.push(token);
        Ok(())
    }

    /// Append several tokens; either all are appended or none.
    pub fn extend_from_slice(&mut self, tokens: &[TokenId]) -> Result<()> {
        if self.tokens.len() + tokens.len() > self.max_len {
            return Err(Error::ContextOverflow {
                len: self.tokens.len() + tokens.len(),
                max: self.max_len,
            });
        }
        self.tokens.extend_from_slice(tokens);
        Ok(())
    }

    // ========== Getters ==========

    /// All tokens, prompt first.
    pub fn as_slice(&self) -> &[TokenId] {
        &self.tokens
    }

    /// Prompt tokens only.
    pub fn prompt(&self) -> &[TokenId] {
        &self.tokens[..self.prompt_len]
    }

    /// Tokens generated after the prompt.
    pub fn generated(&self) -> &[TokenId] {
        &self.tokens[self.prompt_len..]
    }

    /// Number of prompt tokens.
    pub fn prompt_len(&self) -> usize {
        self.prompt_len
    }

    /// Number of generated tokens.
    pub fn generated_len(&self) -> usize {
        self.tokens.len() - self.prompt_len
    }

    /// Total number of tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the sequence holds no tokens at all.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Maximum total length.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// How many more tokens fit before the context is full.
    pub fn remaining_capacity(&self) -> usize {
        self.max_len - self.tokens.len()
    }

    /// Last token, if any.
    pub fn last(&self) -> Option<TokenId> {
        self.tokens.last().copied()
    }

    /// Consume the sequence, returning the generated suffix.
    pub fn into_generated(mut self) -> Vec<TokenId> {
        self.tokens.split_off(self.prompt_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_longer_than_context() {
        let err = TokenSequence::new(vec![1, 2, 3], 2).unwrap_err();
        assert!(matches!(err, Error::ContextOverflow { len: 3, max: 2 }));
    }

    #[test]
    fn test_push_stops_at_max_len() {
        let mut seq = TokenSequence::new(vec![1], 2).unwrap();
        seq.push(2).unwrap();
        assert_eq!(seq.remaining_capacity(), 0);
        assert!(seq.push(3).is_err());
        assert_eq!(seq.as_slice(), &[1, 2]);
    }

    #[test]
    fn test_extend_is_all_or_nothing() {
        let mut seq = TokenSequence::new(vec![1], 3).unwrap();
        assert!(seq.extend_from_slice(&[2, 3, 4]).is_err());
        assert_eq!(seq.len(), 1);

        seq.extend_from_slice(&[2, 3]).unwrap();
        assert_eq!(seq.generated(), &[2, 3]);
    }

    #[test]
    fn test_into_generated() {
        let mut seq = TokenSequence::new(vec![7, 8], 10).unwrap();
        seq.push(9).unwrap();
        assert_eq!(seq.last(), Some(9));
        assert_eq!(seq.prompt(), &[7, 8]);
        assert_eq!(seq.into_generated(), vec![9]);
    }
}
