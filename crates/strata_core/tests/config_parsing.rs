use serde_json::json;
use strata_core::{Substrate, SubstrateConfig, SubstrateError};

#[test]
fn partial_document_fills_defaults() {
    let config: SubstrateConfig = serde_json::from_value(json!({
        "rating": { "k0": 16.0 },
        "spatial": { "gap_tolerance": 3 }
    }))
    .unwrap();

    let defaults = SubstrateConfig::default();
    assert_eq!(config.rating.k0, 16.0);
    assert_eq!(config.rating.baseline, defaults.rating.baseline);
    assert_eq!(config.spatial.gap_tolerance, 3);
    assert_eq!(config.spatial.max_ranges, defaults.spatial.max_ranges);
    config.validate().unwrap();
}

#[test]
fn empty_document_is_default() {
    let config: SubstrateConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, SubstrateConfig::default());
}

#[test]
fn config_survives_json_round_trip() {
    let mut config = SubstrateConfig::default();
    config.spatial.initial_radius = 0.125;
    let text = serde_json::to_string(&config).unwrap();
    let parsed: SubstrateConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn invalid_config_is_rejected_at_open() {
    let config: SubstrateConfig = serde_json::from_value(json!({
        "spatial": { "nearest_max_rounds": 0 }
    }))
    .unwrap();

    match Substrate::open_in_memory(config) {
        Err(SubstrateError::Config(err)) => assert_eq!(err.field, "spatial.nearest_max_rounds"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("invalid config must be rejected"),
    }
}

#[test]
fn wrong_field_type_fails_to_parse() {
    let parsed = serde_json::from_value::<SubstrateConfig>(json!({
        "rating": { "k0": "fast" }
    }));
    assert!(parsed.is_err());
}
