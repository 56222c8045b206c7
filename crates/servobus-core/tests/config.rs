use std::fs;
use std::time::Duration;

use servobus_core::config::{BusConfig, ConfigError};
use servobus_core::protocol::Bus;
use servobus_core::registers::Model;
use servobus_core::sim::SimulatedBus;
use tempfile::tempdir;

#[test]
fn test_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bus.json");

    let config = BusConfig {
        port: Some("/dev/ttyUSB0".to_string()),
        baud_rate: 115_200,
        timeout_ms: 250,
        poll_interval_us: 500,
        model: Model::Scs,
        debug: true,
    };
    config.save(&path).unwrap();

    let loaded = BusConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_load_missing_file() {
    let dir = tempdir().unwrap();
    let err = BusConfig::load(&dir.path().join("missing.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_load_invalid_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bus.json");
    fs::write(&path, "{ not json").unwrap();
    assert!(matches!(BusConfig::load(&path), Err(ConfigError::Json(_))));
}

#[test]
fn test_load_rejects_empty_port() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bus.json");
    fs::write(&path, r#"{ "port": "  " }"#).unwrap();
    assert!(matches!(BusConfig::load(&path), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_config_drives_bus() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("servobus_core=debug")
        .with_test_writer()
        .try_init();

    let config = BusConfig::from_json(r#"{ "timeout_ms": 40, "debug": true }"#).unwrap();
    let mut bus = Bus::from_config(SimulatedBus::with_servos(config.model, &[1]), &config);

    assert_eq!(bus.timeout(), Duration::from_millis(40));
    assert!(bus.is_debug());
    assert!(bus.ping(1).is_ok());
}
