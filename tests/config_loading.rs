//! Configuration file and environment loading.

use lunix_tng::config::{ConfigError, LunixConfig};
use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_missing_file_gives_defaults() {
    let config = LunixConfig::load_from("/nonexistent/lunix.toml").unwrap();
    assert_eq!(config, LunixConfig::default());
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_partial_file_keeps_other_defaults() {
    let file = write_config(
        r#"
[sensors]
count = 2
seed = 42
"#,
    );
    let config = LunixConfig::load_from(file.path()).unwrap();
    assert_eq!(config.sensors.count, 2);
    assert_eq!(config.sensors.seed, Some(42));
    assert_eq!(config.sensors.major, 60);
    assert_eq!(config.application.log_level, "info");
    assert_eq!(config.crypto.data_queue_size, 128);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
[application]
log_level = "warn"
"#,
    );
    std::env::set_var("LUNIX_APPLICATION__LOG_LEVEL", "debug");
    std::env::set_var("LUNIX_SENSORS__UPDATE_INTERVAL_MS", "10");
    let config = LunixConfig::load_from(file.path());
    std::env::remove_var("LUNIX_APPLICATION__LOG_LEVEL");
    std::env::remove_var("LUNIX_SENSORS__UPDATE_INTERVAL_MS");

    let config = config.unwrap();
    assert_eq!(config.application.log_level, "debug");
    assert_eq!(config.sensors.update_interval_ms, 10);
}

#[test]
#[serial]
fn test_bad_type_is_a_load_error() {
    let file = write_config(
        r#"
[sensors]
count = "many"
"#,
    );
    assert!(matches!(
        LunixConfig::load_from(file.path()),
        Err(ConfigError::Load(_))
    ));
}

#[test]
#[serial]
fn test_shipped_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/lunix.toml");
    let config = LunixConfig::load_from(path).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config, LunixConfig::default());
}
