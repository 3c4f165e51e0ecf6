//! Core data types.
//!
//! This module contains:
//! - TokenSequence, the per-call token buffer
//! - FinishReason for why a call stopped

pub mod sequence;

pub use sequence::{FinishReason, TokenId, TokenSequence};
