//! Adaptive speculation length and the rejection circuit breaker.

use super::config::SpeculationConfig;
use super::metrics::SpeculationMetrics;

/// Chooses K for the next round and decides when to stop speculating.
///
/// After the warmup rounds K is one of three values around the configured
/// base, picked from the cumulative acceptance rate:
///
/// | acceptance rate            | next K                     |
/// |----------------------------|----------------------------|
/// | `> grow_threshold`         | `min(base_k + 1, max_k)`   |
/// | `< shrink_threshold`       | `max(base_k - 1, min_k)`   |
/// | otherwise                  | `base_k`                   |
///
/// Separately it counts consecutive rounds in which the draft got nothing
/// accepted (the target's patch token does not count). Once that count
/// reaches `fallback_threshold` the engine abandons speculation.
#[derive(Debug, Clone)]
pub struct AdaptiveController {
    base_k: usize,
    min_k: usize,
    max_k: usize,
    grow_threshold: f32,
    shrink_threshold: f32,
    warmup_rounds: usize,
    fallback_threshold: usize,
    /// Rounds in a row with zero accepted draft tokens.
    consecutive_rejections: usize,
}

impl AdaptiveController {
    /// Create a controller from a validated config.
    pub fn new(config: &SpeculationConfig) -> Self {
        Self {
            base_k: config.num_speculative_tokens,
            min_k: config.min_speculative_tokens,
            max_k: config.max_speculative_tokens,
            grow_threshold: config.grow_threshold,
            shrink_threshold: config.shrink_threshold,
            warmup_rounds: config.warmup_rounds,
            fallback_threshold: config.fallback_threshold,
            consecutive_rejections: 0,
        }
    }

    /// K for the next round, given the metrics so far.
    pub fn next_k(&self, metrics: &SpeculationMetrics) -> usize {
        if metrics.speculative_rounds < self.warmup_rounds {
            return self.base_k;
        }

        let rate = metrics.acceptance_rate();
        if rate > self.grow_threshold {
            (self.base_k + 1).min(self.max_k)
        } else if rate < self.shrink_threshold {
            self.base_k.saturating_sub(1).max(self.min_k)
        } else {
            self.base_k
        }
    }

    /// Record how many draft tokens the last round accepted.
    pub fn record_round(&mut self, accepted_count: usize) {
        if accepted_count == 0 {
            self.consecutive_rejections += 1;
        } else {
            self.consecutive_rejections = 0;
        }
    }

    /// Whether speculation should be abandoned for the rest of the call.
    pub fn should_fall_back(&self) -> bool {
        self.consecutive_rejections >= self.fallback_threshold
    }

    /// Rounds in a row with zero accepted draft tokens.
    pub fn consecutive_rejections(&self) -> usize {
        self.consecutive_rejections
    }

    /// The configured starting K.
    pub fn base_k(&self) -> usize {
        self.base_k
    }

    /// Clear per-call state.
    pub fn reset(&mut self) {
        self.consecutive_rejections = 0;
    }
}
