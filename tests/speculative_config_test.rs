//! Unit tests for SpeculationConfig.

use spec_decode::{Error, SpeculationConfig};

#[test]
fn test_default_config() {
    let config = SpeculationConfig::default();
    assert_eq!(config.num_speculative_tokens, 4);
    assert_eq!(config.min_speculative_tokens, 1);
    assert_eq!(config.max_speculative_tokens, 10);
    assert_eq!(config.warmup_rounds, 5);
    assert_eq!(config.fallback_threshold, 5);
    assert!(config.bonus_token);
    assert!(config.fallback_on_error);
    assert!(config.validate().is_ok());
}

#[test]
fn test_builder_pattern() {
    let config = SpeculationConfig::new(2)
        .num_tokens(6)
        .k_bounds(2, 8)
        .thresholds(0.9, 0.2)
        .warmup_rounds(3)
        .fallback_threshold(4)
        .bonus_token(false)
        .max_context_len(512);

    assert_eq!(config.num_speculative_tokens, 6);
    assert_eq!(config.min_speculative_tokens, 2);
    assert_eq!(config.max_speculative_tokens, 8);
    assert_eq!(config.grow_threshold, 0.9);
    assert_eq!(config.shrink_threshold, 0.2);
    assert_eq!(config.warmup_rounds, 3);
    assert_eq!(config.fallback_threshold, 4);
    assert!(!config.bonus_token);
    assert_eq!(config.max_context_len, 512);
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_configs() {
    let cases = [
        SpeculationConfig::new(0).k_bounds(0, 4),
        SpeculationConfig::new(4).k_bounds(5, 3),
        SpeculationConfig::new(12),
        SpeculationConfig::default().thresholds(0.3, 0.8),
        SpeculationConfig::default().thresholds(1.5, 0.3),
        SpeculationConfig::default().fallback_threshold(0),
    ];
    for config in cases {
        assert!(
            matches!(config.validate(), Err(Error::Config(_))),
            "expected rejection: {config:?}"
        );
    }
}

#[test]
fn test_json_round_trip() {
    let config = SpeculationConfig::new(3).k_bounds(1, 6).bonus_token(false);
    let json = serde_json::to_string(&config).unwrap();
    let parsed: SpeculationConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
}
