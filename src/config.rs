//! Configuration types for spec-decode.
//!
//! Everything a run needs lives in one [`RunConfig`] JSON document:
//!
//! ```json
//! {
//!   "draft":  { "source": "seeded", "seed": 7, "model": { "hidden_size": 32, ... } },
//!   "target": { "source": "hub", "repo_id": "org/tiny-lm", "revision": "main" },
//!   "tokenizer": { "source": "ids" },
//!   "speculation": { "num_speculative_tokens": 4, ... },
//!   "generation": { "max_new_tokens": 64, "sampling": { "temperature": 0.0 } },
//!   "logging": { "level": "info", "format": "pretty" },
//!   "metrics_path": "runs/metrics.jsonl"
//! }
//! ```
//!
//! Every section has defaults, so a partial document is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::sequence::TokenId;
use crate::error::{Error, Result};
use crate::model::tiny::TinyLmConfig;
use crate::speculative::config::SpeculationConfig;

/// Sampling configuration for the target-only decode loop.
///
/// The speculative loop itself is always greedy; these settings only apply
/// to standard decoding (baseline runs and post-fallback steps).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Temperature for sampling (0.0 = greedy).
    pub temperature: f32,
    /// Top-k sampling (0 = disabled).
    pub top_k: usize,
    /// Top-p (nucleus) sampling (1.0 = disabled).
    pub top_p: f32,
    /// RNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_k: 0,
            top_p: 1.0,
            seed: None,
        }
    }
}

impl SamplingConfig {
    /// Greedy argmax selection.
    pub fn greedy() -> Self {
        Self::default()
    }

    /// Whether selection is a plain argmax.
    pub fn is_greedy(&self) -> bool {
        self.temperature == 0.0
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(Error::Config(format!(
                "temperature must be a non-negative number, got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(Error::Config(format!(
                "top_p must be in (0, 1], got {}",
                self.top_p
            )));
        }
        Ok(())
    }
}

/// Per-request generation defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum number of new tokens per call.
    pub max_new_tokens: usize,
    /// Stop after generating this token. Falls back to the tokenizer's EOS
    /// token when unset.
    pub eos_token_id: Option<TokenId>,
    /// Sampling for target-only decoding.
    pub sampling: SamplingConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 64,
            eos_token_id: None,
            sampling: SamplingConfig::default(),
        }
    }
}

/// Where a model's weights come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ModelSource {
    /// Deterministic random weights; useful for demos and tests.
    Seeded {
        seed: u64,
        #[serde(default)]
        model: TinyLmConfig,
    },
    /// A local SafeTensors file plus its config.json.
    Local { weights: PathBuf, config: PathBuf },
    /// `config.json` and SafeTensors weights from a HuggingFace Hub repo.
    Hub {
        repo_id: String,
        #[serde(default = "default_revision")]
        revision: String,
    },
}

fn default_revision() -> String {
    "main".to_string()
}

impl ModelSource {
    /// Seeded weights with the default architecture.
    pub fn seeded(seed: u64) -> Self {
        Self::Seeded {
            seed,
            model: TinyLmConfig::default(),
        }
    }
}

/// Where the tokenizer comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TokenizerSource {
    /// No tokenizer: prompts and outputs are comma-separated token ids.
    Ids,
    /// A local `tokenizer.json`.
    File { path: PathBuf },
    /// `tokenizer.json` from a HuggingFace Hub repo.
    Hub {
        repo_id: String,
        #[serde(default = "default_revision")]
        revision: String,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, for terminals.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(Error::Config(format!("unknown log format '{other}'"))),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Also write logs to this file.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Complete configuration for one CLI run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Draft model weights.
    pub draft: ModelSource,
    /// Target model weights.
    pub target: ModelSource,
    /// Tokenizer.
    pub tokenizer: TokenizerSource,
    /// Speculation parameters.
    pub speculation: SpeculationConfig,
    /// Generation defaults.
    pub generation: GenerationConfig,
    /// Logging.
    pub logging: LoggingConfig,
    /// Append a metrics record per run to this JSONL file.
    pub metrics_path: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            draft: ModelSource::seeded(7),
            target: ModelSource::seeded(7),
            tokenizer: TokenizerSource::Ids,
            speculation: SpeculationConfig::default(),
            generation: GenerationConfig::default(),
            logging: LoggingConfig::default(),
            metrics_path: None,
        }
    }
}

impl RunConfig {
    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty-printed JSON, creating parent directories.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.speculation.validate()?;
        self.generation.sampling.validate()?;
        for source in [&self.draft, &self.target] {
            if let ModelSource::Seeded { model, .. } = source {
                model.validate()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sampling_is_greedy() {
        assert!(SamplingConfig::default().is_greedy());
        assert!(SamplingConfig::greedy().validate().is_ok());
    }

    #[test]
    fn test_sampling_validation() {
        let bad_temp = SamplingConfig {
            temperature: -1.0,
            ..Default::default()
        };
        assert!(bad_temp.validate().is_err());

        let bad_top_p = SamplingConfig {
            top_p: 0.0,
            ..Default::default()
        };
        assert!(bad_top_p.validate().is_err());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let json = r#"{ "speculation": { "num_speculative_tokens": 6 } }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.speculation.num_speculative_tokens, 6);
        assert_eq!(config.speculation.max_speculative_tokens, 10);
        assert_eq!(config.generation.max_new_tokens, 64);
        assert_eq!(config.tokenizer, TokenizerSource::Ids);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_model_source_tags() {
        let json = r#"{ "source": "hub", "repo_id": "org/model" }"#;
        let source: ModelSource = serde_json::from_str(json).unwrap();
        assert_eq!(
            source,
            ModelSource::Hub {
                repo_id: "org/model".into(),
                revision: "main".into()
            }
        );
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
