//! Speculative decoding configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for speculative decoding.
///
/// The draft model proposes K tokens per round and the target model verifies
/// them in a single forward pass. K starts at `num_speculative_tokens` and is
/// adjusted between rounds within `[min_speculative_tokens,
/// max_speculative_tokens]` from the running acceptance rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeculationConfig {
    /// Initial number of tokens to speculate per round (base K).
    pub num_speculative_tokens: usize,

    /// Lower bound for the adaptive K.
    pub min_speculative_tokens: usize,

    /// Upper bound for the adaptive K.
    pub max_speculative_tokens: usize,

    /// Acceptance rate above which K grows by one.
    pub grow_threshold: f32,

    /// Acceptance rate below which K shrinks by one.
    pub shrink_threshold: f32,

    /// Speculative rounds that must complete before K is adapted.
    pub warmup_rounds: usize,

    /// Consecutive rounds with zero accepted draft tokens that abandon
    /// speculation for the rest of the call.
    pub fallback_threshold: usize,

    /// Switch to target-only decoding when a model call fails instead of
    /// failing the whole call.
    pub fallback_on_error: bool,

    /// Append the target's next prediction after a fully accepted round.
    /// It comes from the same verification pass, so costs no extra call.
    pub bonus_token: bool,

    /// Maximum total sequence length (prompt + generated).
    pub max_context_len: usize,
}

impl Default for SpeculationConfig {
    fn default() -> Self {
        Self {
            num_speculative_tokens: 4,
            min_speculative_tokens: 1,
            max_speculative_tokens: 10,
            grow_threshold: 0.8,
            shrink_threshold: 0.3,
            warmup_rounds: 5,
            fallback_threshold: 5,
            fallback_on_error: true,
            bonus_token: true,
            max_context_len: 2048,
        }
    }
}

impl SpeculationConfig {
    /// Create a config with the given base K and defaults elsewhere.
    pub fn new(num_speculative_tokens: usize) -> Self {
        Self {
            num_speculative_tokens,
            ..Default::default()
        }
    }

    /// Set the base number of speculative tokens.
    pub fn num_tokens(mut self, k: usize) -> Self {
        self.num_speculative_tokens = k;
        self
    }

    /// Set the adaptive K bounds.
    pub fn k_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_speculative_tokens = min;
        self.max_speculative_tokens = max;
        self
    }

    /// Set the grow / shrink acceptance thresholds.
    pub fn thresholds(mut self, grow: f32, shrink: f32) -> Self {
        self.grow_threshold = grow;
        self.shrink_threshold = shrink;
        self
    }

    /// Set the number of warmup rounds before K adapts.
    pub fn warmup_rounds(mut self, rounds: usize) -> Self {
        self.warmup_rounds = rounds;
        self
    }

    /// Set the consecutive zero-acceptance rounds that trigger fallback.
    pub fn fallback_threshold(mut self, rounds: usize) -> Self {
        self.fallback_threshold = rounds;
        self
    }

    /// Enable or disable fallback to target-only decoding on model errors.
    pub fn fallback_on_error(mut self, enabled: bool) -> Self {
        self.fallback_on_error = enabled;
        self
    }

    /// Enable or disable the free token after a fully accepted round.
    pub fn bonus_token(mut self, enabled: bool) -> Self {
        self.bonus_token = enabled;
        self
    }

    /// Set the maximum context length.
    pub fn max_context_len(mut self, len: usize) -> Self {
        self.max_context_len = len;
        self
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<()> {
        if self.min_speculative_tokens == 0 {
            return Err(Error::Config(
                "min_speculative_tokens must be at least 1".into(),
            ));
        }
        if self.max_speculative_tokens < self.min_speculative_tokens {
            return Err(Error::Config(format!(
                "max_speculative_tokens ({}) must be >= min_speculative_tokens ({})",
                self.max_speculative_tokens, self.min_speculative_tokens
            )));
        }
        if !(self.min_speculative_tokens..=self.max_speculative_tokens)
            .contains(&self.num_speculative_tokens)
        {
            return Err(Error::Config(format!(
                "num_speculative_tokens ({}) must be between {} and {}",
                self.num_speculative_tokens,
                self.min_speculative_tokens,
                self.max_speculative_tokens
            )));
        }
        for (name, value) in [
            ("grow_threshold", self.grow_threshold),
            ("shrink_threshold", self.shrink_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(Error::Config(format!(
                    "{name} ({value}) must be in (0, 1]"
                )));
            }
        }
        if self.shrink_threshold >= self.grow_threshold {
            return Err(Error::Config(format!(
                "shrink_threshold ({}) must be below grow_threshold ({})",
                self.shrink_threshold, self.grow_threshold
            )));
        }
        if self.warmup_rounds == 0 {
            return Err(Error::Config("warmup_rounds must be at least 1".into()));
        }
        if self.fallback_threshold == 0 {
            return Err(Error::Config(
                "fallback_threshold must be at least 1".into(),
            ));
        }
        if self.max_context_len < 2 {
            return Err(Error::Config(
                "max_context_len must leave room for a prompt and one token".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        SpeculationConfig::default().validate().unwrap();
    }

    #[test]
    fn test_k_outside_bounds() {
        let config = SpeculationConfig::new(12);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = SpeculationConfig::new(0).k_bounds(0, 4);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_thresholds() {
        assert!(SpeculationConfig::default()
            .thresholds(0.8, 0.0)
            .validate()
            .is_err());
        assert!(SpeculationConfig::default()
            .fallback_threshold(0)
            .validate()
            .is_err());
        assert!(SpeculationConfig::default()
            .warmup_rounds(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_inverted_thresholds() {
        let config = SpeculationConfig::default().thresholds(0.3, 0.8);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SpeculationConfig =
            serde_json::from_str(r#"{"num_speculative_tokens": 6, "bonus_token": false}"#)
                .unwrap();
        assert_eq!(config.num_speculative_tokens, 6);
        assert!(!config.bonus_token);
        assert_eq!(config.max_speculative_tokens, 10);
    }
}
