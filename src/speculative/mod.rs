//! Speculative decoding.
//!
//! This module implements greedy draft-verify speculative decoding.
//!
//! ## How it works
//!
//! 1. **Draft Phase**: A small, fast draft model proposes K tokens, one call
//!    per token.
//!
//! 2. **Verify Phase**: The target model scores the context plus all K
//!    proposals in a single call.
//!
//! 3. **Accept/Patch**: Proposals are kept while they match the target's
//!    argmax. At the first mismatch the target's own token is used instead;
//!    if all K match, the target's next prediction comes for free.
//!
//! ## Example
//!
//! ```text
//! Draft (K=4):     [prompt] -> t1 -> t2 -> t3 -> t4
//! Target verify:   [prompt, t1, t2, t3, t4] -> argmax at all 5 positions
//! Accept/Patch:    t1, t2 match, t3 does not -> commit t1, t2, t3'
//! ```
//!
//! ## Adaptation
//!
//! - K moves within `[min_speculative_tokens, max_speculative_tokens]` by the
//!   cumulative acceptance rate, after a warmup.
//! - Repeated zero-acceptance rounds switch the call to target-only decoding.

pub mod config;
pub mod controller;
pub mod engine;
pub mod metrics;
pub mod port;
pub mod proposer;
pub mod verifier;

pub use config::SpeculationConfig;
pub use controller::AdaptiveController;
pub use engine::SpeculativeDecodingEngine;
pub use metrics::{read_jsonl, FallbackReason, MetricsReport, RoundSummary, SpeculationMetrics};
pub use port::LanguageModelPort;
pub use proposer::{DraftProposal, DraftProposer};
pub use verifier::{SpeculationRound, TokenVerdict, Verifier};
