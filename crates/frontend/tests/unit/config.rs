//! Configuration validation tests.

use bpsim_core::config::{Config, ConfigError};
use rstest::rstest;

#[test]
fn default_config_is_valid() {
    Config::default().validate().unwrap();
}

#[test]
fn json_overrides_merge_with_defaults() {
    let json = r#"{
        "queues": { "fsq_size": 8 },
        "tage": {
            "num_predictors": 2,
            "table_sizes": [64, 64],
            "tag_bits": [8, 8],
            "hist_lengths": [4, 8]
        }
    }"#;
    let config: Config = serde_json::from_str(json).unwrap();
    assert_eq!(config.queues.fsq_size, 8);
    assert_eq!(config.queues.ftq_size, 20, "unset fields keep defaults");
    assert_eq!(config.tage.num_predictors, 2);
    config.validate().unwrap();
}

#[rstest]
#[case(0)]
#[case(3)]
fn btb_ways_must_divide_entries(#[case] ways: usize) {
    let mut config = Config::default();
    config.btb.num_entries = 2048;
    config.btb.num_ways = ways;
    assert!(config.validate().is_err());
}

#[test]
fn btb_entries_must_be_power_of_two() {
    let mut config = Config::default();
    config.btb.num_entries = 100;
    config.btb.num_ways = 4;
    assert_eq!(
        config.validate(),
        Err(ConfigError::NotPowerOfTwo {
            what: "btb num_entries",
            value: 100
        })
    );
}

#[test]
fn half_aligned_rejects_ahead_pipelining() {
    let mut config = Config::default();
    config.btb.half_aligned = true;
    config.btb.ahead_pipelined_stages = 1;
    assert_eq!(config.validate(), Err(ConfigError::HalfAlignedAhead));
}

#[test]
fn tage_vector_lengths_must_match() {
    let mut config = Config::default();
    config.tage.num_predictors = 5;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::LengthMismatch { what: "tage", .. })
    ));
}

#[test]
fn history_windows_cannot_exceed_register() {
    let mut config = Config::default();
    config.pipeline.history_bits = 16;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::HistoryTooLong { .. })
    ));
}

#[test]
fn zero_queues_are_rejected() {
    let mut config = Config::default();
    config.queues.fsq_size = 0;
    assert_eq!(config.validate(), Err(ConfigError::Zero { what: "fsq_size" }));
}
