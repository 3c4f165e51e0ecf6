//! Speculative decoding metrics.
//!
//! [`SpeculationMetrics`] is a plain value owned by one generation call: the
//! engine resets it when a call starts, updates it after every round, and
//! hands it back with the output. [`MetricsReport`] is its flattened,
//! serializable snapshot for logs and the JSONL sink.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::verifier::SpeculationRound;
use crate::core::sequence::FinishReason;
use crate::error::{ModelRole, Result};

/// Why speculation was abandoned partway through a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackReason {
    /// Too many consecutive rounds without an accepted draft token.
    Rejections { consecutive: usize },
    /// A model call failed and fallback-on-error is enabled.
    ModelError { role: ModelRole, message: String },
}

/// Compact per-round record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    /// K requested for the round.
    pub k: usize,
    /// Draft tokens actually proposed.
    pub proposed: usize,
    /// Draft tokens accepted.
    pub accepted: usize,
    /// Tokens committed to the sequence.
    pub committed: usize,
}

/// Counters and timings for one generation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeculationMetrics {
    /// Draft-propose / target-verify rounds run.
    pub speculative_rounds: usize,
    /// Target-only decode steps run (after fallback, or in standard mode).
    pub fallback_steps: usize,
    /// Tokens appended to the sequence.
    pub tokens_generated: usize,
    /// Draft tokens proposed, including ones never reached after a mismatch.
    pub tokens_proposed: usize,
    /// Draft tokens that matched the target.
    pub tokens_accepted: usize,
    /// Target tokens substituted at a mismatch.
    pub patched_tokens: usize,
    /// Free target tokens taken after fully accepted rounds.
    pub bonus_tokens: usize,
    /// Draft model calls.
    pub draft_calls: usize,
    /// Target model calls.
    pub target_calls: usize,
    /// Wall time in the draft model.
    pub draft_time: Duration,
    /// Wall time in the target model.
    pub target_time: Duration,
    /// Wall time of the whole call.
    pub total_time: Duration,
    /// Set when speculation was abandoned.
    pub fallback: Option<FallbackReason>,
    /// One entry per speculative round.
    pub rounds: Vec<RoundSummary>,
}

impl SpeculationMetrics {
    /// Fraction of proposed draft tokens that were accepted.
    ///
    /// Returns `0.0` before anything has been proposed.
    pub fn acceptance_rate(&self) -> f32 {
        if self.tokens_proposed == 0 {
            0.0
        } else {
            self.tokens_accepted as f32 / self.tokens_proposed as f32
        }
    }

    /// Generated tokens per second of total wall time.
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.total_time.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.tokens_generated as f64 / secs
        }
    }

    /// Generated tokens per target model call; 1.0 for plain decoding.
    pub fn tokens_per_target_call(&self) -> f64 {
        if self.target_calls == 0 {
            0.0
        } else {
            self.tokens_generated as f64 / self.target_calls as f64
        }
    }

    /// Whether speculation was abandoned during the call.
    pub fn fell_back(&self) -> bool {
        self.fallback.is_some()
    }

    /// Account for one speculative round.
    ///
    /// `committed` is how many of the round's tokens made it into the
    /// sequence, which can be fewer than it emitted when the budget runs out
    /// or an end-of-sequence token is reached.
    pub fn record_round(
        &mut self,
        k: usize,
        round: &SpeculationRound,
        committed: usize,
        draft_calls: usize,
        draft_time: Duration,
        target_time: Duration,
    ) {
        self.speculative_rounds += 1;
        self.tokens_proposed += round.draft_tokens.len();
        self.tokens_accepted += round.accepted_count;
        if round.patched_token.is_some() {
            if round.fully_accepted() {
                self.bonus_tokens += 1;
            } else {
                self.patched_tokens += 1;
            }
        }
        self.tokens_generated += committed;
        self.draft_calls += draft_calls;
        self.target_calls += 1;
        self.draft_time += draft_time;
        self.target_time += target_time;
        self.rounds.push(RoundSummary {
            k,
            proposed: round.draft_tokens.len(),
            accepted: round.accepted_count,
            committed,
        });
    }

    /// Account for one target-only decode step.
    pub fn record_fallback_step(&mut self, target_time: Duration) {
        self.fallback_steps += 1;
        self.tokens_generated += 1;
        self.target_calls += 1;
        self.target_time += target_time;
    }

    /// Flatten into a serializable report.
    pub fn report(&self, finish_reason: FinishReason) -> MetricsReport {
        MetricsReport {
            run_id: None,
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
            finish_reason,
            speculative_rounds: self.speculative_rounds,
            fallback_steps: self.fallback_steps,
            tokens_generated: self.tokens_generated,
            tokens_proposed: self.tokens_proposed,
            tokens_accepted: self.tokens_accepted,
            patched_tokens: self.patched_tokens,
            bonus_tokens: self.bonus_tokens,
            draft_calls: self.draft_calls,
            target_calls: self.target_calls,
            draft_secs: self.draft_time.as_secs_f64(),
            target_secs: self.target_time.as_secs_f64(),
            total_secs: self.total_time.as_secs_f64(),
            acceptance_rate: self.acceptance_rate(),
            tokens_per_second: self.tokens_per_second(),
            tokens_per_target_call: self.tokens_per_target_call(),
            fallback: self.fallback.clone(),
        }
    }
}

/// Flat snapshot of [`SpeculationMetrics`] with derived rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Caller-chosen label for the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Unix time in milliseconds when the report was taken.
    pub timestamp_ms: u64,
    pub finish_reason: FinishReason,
    pub speculative_rounds: usize,
    pub fallback_steps: usize,
    pub tokens_generated: usize,
    pub tokens_proposed: usize,
    pub tokens_accepted: usize,
    pub patched_tokens: usize,
    pub bonus_tokens: usize,
    pub draft_calls: usize,
    pub target_calls: usize,
    pub draft_secs: f64,
    pub target_secs: f64,
    pub total_secs: f64,
    pub acceptance_rate: f32,
    pub tokens_per_second: f64,
    pub tokens_per_target_call: f64,
    #[serde(default)]
    pub fallback: Option<FallbackReason>,
}

impl MetricsReport {
    /// Attach a run label.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Append this report as one JSON line to `path`, creating the file.
    pub fn append_jsonl(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(self)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

/// Read every report from a JSONL file.
///
/// Blank and malformed lines are skipped with a warning. A missing file reads
/// as empty.
pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<MetricsReport>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut reports = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<MetricsReport>(line) {
            Ok(report) => reports.push(report),
            Err(e) => warn!(line = lineno + 1, error = %e, "skipping malformed metrics record"),
        }
    }
    Ok(reports)
}
