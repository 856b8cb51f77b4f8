/*!
 * Configuration Tests
 */

use pretty_assertions::assert_eq;
use serial_test::serial;
use vmscan::{ConfigError, ReclaimConfig, Reclaimer};

#[test]
fn test_builder_rejects_invalid_config() {
    let config = ReclaimConfig {
        swap_cluster_max: 0,
        ..Default::default()
    };
    let err = Reclaimer::builder().with_config(config).build().unwrap_err();
    assert!(matches!(err, ConfigError::ZeroValue(_)));
}

#[test]
fn test_json_round_trip_keeps_overrides() {
    let config = ReclaimConfig::default().with_swappiness(90);
    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(ReclaimConfig::from_json(&json).unwrap(), config);
}

#[test]
fn test_malformed_json_is_a_parse_error() {
    let err = ReclaimConfig::from_json("{ swappiness: ").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_error_reports_as_tagged_json() {
    let err = ConfigError::InvalidSwappiness(150);
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["error_type"], "invalid_swappiness");
    assert_eq!(json["details"], 150);
}

#[test]
#[serial]
fn test_env_config_drives_reclaimer() {
    std::env::set_var("VMSCAN_SWAP_CLUSTER_MAX", "8");
    let config = ReclaimConfig::from_env();
    std::env::remove_var("VMSCAN_SWAP_CLUSTER_MAX");

    let reclaimer = Reclaimer::builder().with_config(config.unwrap()).build().unwrap();
    assert_eq!(reclaimer.config().swap_cluster_max, 8);
    assert_eq!(reclaimer.config().refill_cap(), 32);
}
