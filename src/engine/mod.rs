//! Generation plumbing shared by every decode path.
//!
//! This module contains:
//! - GenerationRequest / GenerationOutput and the stop conditions
//! - Sampler for target-only token selection
//! - StandardDecodeLoop, the target-only baseline and fallback

pub mod request;
pub mod sampler;
pub mod standard;

pub use request::{CancelHandle, GenerationOutput, GenerationRequest, StopCriteria};
pub use sampler::Sampler;
pub use standard::StandardDecodeLoop;
