//! spec-decode: speculative decoding with a draft and a target model.
//!
//! This crate implements greedy draft-verify decoding:
//! - A draft model proposes K tokens, a target model verifies them in one call
//! - K adapts to the running acceptance rate
//! - Persistent rejection (or a model failure) falls back to target-only decoding
//! - Per-call metrics, with a JSONL sink
//!
//! Any model can take part through [`LanguageModelPort`]; [`CausalLmPort`]
//! adapts candle models such as the bundled [`TinyLm`].

pub mod config;
pub mod error;
pub mod logging;

pub mod core;
pub mod engine;
pub mod model;
pub mod speculative;
pub mod testing;

pub use config::{GenerationConfig, LoggingConfig, ModelSource, RunConfig, SamplingConfig};
pub use core::{FinishReason, TokenId, TokenSequence};
pub use engine::{CancelHandle, GenerationOutput, GenerationRequest, Sampler, StandardDecodeLoop};
pub use error::{Error, ModelRole, Result};
pub use model::{CausalLm, CausalLmPort, TextCodec, TinyLm, TinyLmConfig};
pub use speculative::{
    LanguageModelPort, MetricsReport, SpeculationConfig, SpeculationMetrics,
    SpeculativeDecodingEngine,
};
