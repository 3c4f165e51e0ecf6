//! Model collaborators.
//!
//! This module contains:
//! - The candle adapter behind `LanguageModelPort`
//! - TinyLm, a small reference model (RMSNorm, SwiGLU, no attention)
//! - Model loading from local files or HuggingFace Hub
//! - The tokenizer codec

pub mod loader;
pub mod mlp;
pub mod norm;
pub mod port;
pub mod tiny;
pub mod tokenizer;

pub use loader::{download_model, load_safetensors, load_tiny_lm, save_safetensors, ModelFiles};
pub use port::{CausalLm, CausalLmPort};
pub use tiny::{seeded_weights, TinyLm, TinyLmConfig};
pub use tokenizer::TextCodec;
