//! Error types for spec-decode.

use std::fmt;

use thiserror::Error;

/// Result type alias for spec-decode operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which of the two models a port call was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    /// The small, fast proposal model.
    Draft,
    /// The model whose greedy predictions define the output.
    Target,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => f.write_str("draft"),
            Self::Target => f.write_str("target"),
        }
    }
}

/// Main error type for spec-decode.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid speculation or generation configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A model port call failed.
    #[error("{role} model invocation failed: {source}")]
    ModelInvocation {
        role: ModelRole,
        #[source]
        source: candle_core::Error,
    },

    /// A model port returned logits of an unexpected shape.
    #[error("{role} model returned invalid logits: {reason}")]
    InvalidLogits { role: ModelRole, reason: String },

    /// Appending would grow the sequence past the maximum context length.
    #[error("context length {len} would exceed maximum of {max}")]
    ContextOverflow { len: usize, max: usize },

    /// Generation needs at least one prompt token to condition on.
    #[error("prompt must contain at least one token")]
    EmptyPrompt,

    /// Model loading failed.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Tokenization error.
    #[error("tokenization error: {0}")]
    Tokenization(String),

    /// Tensor operation error outside a model port call.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap a port failure for the given model.
    pub fn invocation(role: ModelRole, source: candle_core::Error) -> Self {
        Self::ModelInvocation { role, source }
    }

    /// Whether this error came from a model port (and is eligible for fallback).
    pub fn is_model_failure(&self) -> bool {
        matches!(
            self,
            Self::ModelInvocation { .. } | Self::InvalidLogits { .. }
        )
    }

    /// The model involved, if this is a model failure.
    pub fn role(&self) -> Option<ModelRole> {
        match self {
            Self::ModelInvocation { role, .. } | Self::InvalidLogits { role, .. } => Some(*role),
            _ => None,
        }
    }
}
