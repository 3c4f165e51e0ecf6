//! Model loading utilities.
//!
//! This module provides functions for:
//! - Downloading model files from HuggingFace Hub
//! - Loading and saving SafeTensors weights
//! - Building a [`TinyLm`] from a [`ModelSource`]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use hf_hub::api::sync::{Api, ApiRepo};
use hf_hub::{Repo, RepoType};
use serde::de::DeserializeOwned;
use tracing::info;

use super::tiny::{TinyLm, TinyLmConfig};
use crate::config::ModelSource;
use crate::error::{Error, Result};

/// Paths to downloaded model files.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    /// Path to config.json.
    pub config: PathBuf,
    /// Paths to weight files (SafeTensors).
    pub weights: Vec<PathBuf>,
}

/// Open a HuggingFace Hub model repo at `revision`.
pub(crate) fn hub_repo(model_id: &str, revision: &str) -> Result<ApiRepo> {
    let api = Api::new().map_err(|e| Error::ModelLoad(format!("failed to create HF API: {e}")))?;
    Ok(api.repo(Repo::with_revision(
        model_id.to_string(),
        RepoType::Model,
        revision.to_string(),
    )))
}

/// Downloads `config.json` and SafeTensors weights from HuggingFace Hub.
///
/// `revision` is a branch, tag, or commit hash; use "main" for latest.
pub fn download_model(model_id: &str, revision: &str) -> Result<ModelFiles> {
    let repo = hub_repo(model_id, revision)?;

    let config = repo
        .get("config.json")
        .map_err(|e| Error::ModelLoad(format!("failed to download config.json: {e}")))?;
    let weights = download_weights(&repo)?;

    Ok(ModelFiles { config, weights })
}

/// Single `model.safetensors`, or every shard listed in the index.
fn download_weights(repo: &ApiRepo) -> Result<Vec<PathBuf>> {
    if let Ok(path) = repo.get("model.safetensors") {
        return Ok(vec![path]);
    }

    let index_path = repo.get("model.safetensors.index.json").map_err(|_| {
        Error::ModelLoad("no SafeTensors weights found; only SafeTensors is supported".into())
    })?;
    let index: serde_json::Value = load_json(&index_path)?;
    let weight_map = index["weight_map"]
        .as_object()
        .ok_or_else(|| Error::ModelLoad("invalid safetensors index: missing weight_map".into()))?;

    let mut shards: Vec<&str> = weight_map.values().filter_map(|v| v.as_str()).collect();
    shards.sort_unstable();
    shards.dedup();

    shards
        .into_iter()
        .map(|name| {
            repo.get(name)
                .map_err(|e| Error::ModelLoad(format!("failed to download {name}: {e}")))
        })
        .collect()
}

/// Creates a VarBuilder over memory-mapped SafeTensors files.
///
/// # Safety
///
/// The files must not be modified while the VarBuilder is alive.
#[allow(unsafe_code)]
pub fn load_safetensors(
    paths: &[PathBuf],
    dtype: DType,
    device: &Device,
) -> Result<VarBuilder<'static>> {
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(paths, dtype, device)? };
    Ok(vb)
}

/// Writes named tensors to a SafeTensors file.
pub fn save_safetensors(tensors: &HashMap<String, Tensor>, path: impl AsRef<Path>) -> Result<()> {
    candle_core::safetensors::save(tensors, path.as_ref())?;
    Ok(())
}

/// Reads and parses a JSON file.
pub fn load_json<C: DeserializeOwned>(path: &Path) -> Result<C> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::ModelLoad(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::ModelLoad(format!("failed to parse {}: {e}", path.display())))
}

/// Builds a [`TinyLm`] from wherever `source` points.
pub fn load_tiny_lm(source: &ModelSource, device: &Device) -> Result<TinyLm> {
    match source {
        ModelSource::Seeded { seed, model } => {
            info!(seed, vocab_size = model.vocab_size, "building seeded model");
            TinyLm::seeded(model, *seed, device)
        }
        ModelSource::Local { weights, config } => {
            info!(weights = %weights.display(), "loading local model");
            let config: TinyLmConfig = load_json(config)?;
            let vb = load_safetensors(std::slice::from_ref(weights), DType::F32, device)?;
            TinyLm::load(&config, vb)
        }
        ModelSource::Hub { repo_id, revision } => {
            info!(%repo_id, %revision, "downloading model");
            let files = download_model(repo_id, revision)?;
            let config: TinyLmConfig = load_json(&files.config)?;
            let vb = load_safetensors(&files.weights, DType::F32, device)?;
            TinyLm::load(&config, vb)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_json_missing_file() {
        let err = load_json::<TinyLmConfig>(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(matches!(err, Error::ModelLoad(_)));
    }

    #[test]
    fn test_seeded_source() {
        let source = ModelSource::Seeded {
            seed: 1,
            model: TinyLmConfig {
                vocab_size: 12,
                hidden_size: 8,
                intermediate_size: 8,
                num_hidden_layers: 1,
                ..Default::default()
            },
        };
        let model = load_tiny_lm(&source, &Device::Cpu).unwrap();
        assert_eq!(model.config().vocab_size, 12);
    }
}
