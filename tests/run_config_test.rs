//! Integration tests for RunConfig files.

use spec_decode::config::{LogFormat, ModelSource, RunConfig, TokenizerSource};
use spec_decode::{Error, SpeculationConfig, TinyLmConfig};

#[test]
fn test_save_and_load() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("run.json");

    let mut config = RunConfig::default();
    config.draft = ModelSource::Seeded {
        seed: 3,
        model: TinyLmConfig {
            hidden_size: 32,
            ..Default::default()
        },
    };
    config.target = ModelSource::Hub {
        repo_id: "org/tiny-lm".into(),
        revision: "v2".into(),
    };
    config.tokenizer = TokenizerSource::File {
        path: "tokenizer.json".into(),
    };
    config.speculation = SpeculationConfig::new(6).bonus_token(false);
    config.generation.max_new_tokens = 99;
    config.generation.eos_token_id = Some(2);
    config.logging.format = LogFormat::Json;
    config.metrics_path = Some("metrics.jsonl".into());

    config.save_to_file(&path)?;
    let loaded = RunConfig::from_file(&path)?;

    assert_eq!(loaded, config);
    Ok(())
}

#[test]
fn test_invalid_file_contents() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("run.json");

    std::fs::write(&path, "{ not json")?;
    assert!(matches!(RunConfig::from_file(&path), Err(Error::Config(_))));

    std::fs::write(&path, r#"{ "speculation": { "num_speculative_tokens": 0 } }"#)?;
    assert!(matches!(RunConfig::from_file(&path), Err(Error::Config(_))));
    Ok(())
}

#[test]
fn test_missing_file() {
    let err = RunConfig::from_file("/nonexistent/run.json").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
