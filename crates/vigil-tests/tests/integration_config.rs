// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Configuration Integration Tests
//!
//! Integration tests for vigil-config functionality including:
//!
//! - Loading YAML and TOML files
//! - Validation rules
//! - Environment variable overrides and placeholders
//!
//! ## Test Categories
//!
//! - `test_load_*`: File loading tests
//! - `test_validation_*`: Validation tests
//! - `test_env_*`: Environment tests

use std::path::PathBuf;
use std::time::Duration;

use vigil_config::{
    ConfigError, ConfigFormat, ConfigLoader, DeliveryMode, LogFormat, LogLevel, MapEnv, TransportKind, VigilConfig,
};
use vigil_tests::common::temp_test_dir;
use vigil_tests::prelude::*;

fn isolated_loader(env: MapEnv) -> ConfigLoader {
    ConfigLoader::builder().env_source(env).build()
}

fn assert_full_config(config: &VigilConfig) {
    let platform = &config.platform;
    assert_eq!(platform.worker_count, Some(2));
    assert_eq!(platform.test_timeout, Some(Duration::from_secs(30)));
    assert_eq!(platform.delivery, DeliveryMode::Queued);
    assert_eq!(platform.minimum_expected_tests, Some(1));
    assert_eq!(platform.maximum_failed_tests, Some(5));
    assert!(!platform.show_passed);

    assert_eq!(config.ipc.transport, TransportKind::Tcp);
    assert_eq!(config.ipc.host, "127.0.0.1");
    assert_eq!(config.ipc.port, 5050);
    assert_eq!(config.ipc.connect_timeout, Duration::from_secs(5));
    assert_eq!(config.ipc.request_timeout, Duration::from_secs(10));

    assert_eq!(config.logging.level, LogLevel::Debug);
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.enabled_extensions(), vec!["trx-report".to_string()]);
    assert_eq!(config.extensions.len(), 2);
}

// =============================================================================
// Loading
// =============================================================================

#[test]
fn test_load_yaml_file() {
    let dir = temp_test_dir("vigil-config");
    let path = dir.path().join("vigil.yaml");
    std::fs::write(&path, ConfigFixtures::full_yaml()).unwrap();

    let config = isolated_loader(MapEnv::new()).load(&path).unwrap();

    assert_full_config(&config);
    assert_eq!(config.platform.results_directory, dir.path().join("out"));
}

#[test]
fn test_load_toml_file() {
    let dir = temp_test_dir("vigil-config");
    let path = dir.path().join("vigil.toml");
    std::fs::write(&path, ConfigFixtures::full_toml()).unwrap();

    let config = isolated_loader(MapEnv::new()).load(&path).unwrap();

    assert_full_config(&config);
}

#[test]
fn test_load_yaml_and_toml_agree() {
    let loader = isolated_loader(MapEnv::new());
    let yaml = loader.load_from_str(ConfigFixtures::full_yaml(), ConfigFormat::Yaml).unwrap();
    let toml = loader.load_from_str(ConfigFixtures::full_toml(), ConfigFormat::Toml).unwrap();

    assert_eq!(yaml, toml);
    assert_eq!(yaml.platform.results_directory, PathBuf::from("out"));
}

#[test]
fn test_load_rendered_config_round_trips() {
    let loader = isolated_loader(MapEnv::new());
    let config = loader.load_from_str(ConfigFixtures::full_yaml(), ConfigFormat::Yaml).unwrap();

    let rendered = ConfigFormat::Json.render(&config).unwrap();
    let reloaded = loader.load_from_str(&rendered, ConfigFormat::Json).unwrap();

    assert_eq!(config, reloaded);
}

#[test]
fn test_load_missing_file() {
    let result = isolated_loader(MapEnv::new()).load("/nonexistent/vigil.yaml");
    assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
}

#[test]
fn test_load_unsupported_extension() {
    let dir = temp_test_dir("vigil-config");
    let path = dir.path().join("vigil.ini");
    std::fs::write(&path, "[platform]").unwrap();

    let result = isolated_loader(MapEnv::new()).load(&path);
    assert!(matches!(result, Err(ConfigError::UnsupportedFormat { .. })));
}

#[test]
fn test_load_or_default_without_path() {
    let config = isolated_loader(MapEnv::new()).load_or_default(None).unwrap();
    assert_eq!(config, VigilConfig::default());
}

#[test]
fn test_load_malformed_yaml_reports_path() {
    let dir = temp_test_dir("vigil-config");
    let path = dir.path().join("broken.yaml");
    std::fs::write(&path, "platform: [unclosed").unwrap();

    match isolated_loader(MapEnv::new()).load(&path) {
        Err(ConfigError::Parse { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("Expected a parse error, got {:?}", other),
    }
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_validation_unix_requires_socket() {
    let result = isolated_loader(MapEnv::new())
        .load_from_str(ConfigFixtures::unix_without_socket_yaml(), ConfigFormat::Yaml);

    let err = result.unwrap_err();
    assert_eq!(err.field(), Some("ipc.socket_path"));
}

#[test]
fn test_validation_rejects_zero_workers() {
    let yaml = "platform:\n  worker_count: 0\n";
    let err = isolated_loader(MapEnv::new())
        .load_from_str(yaml, ConfigFormat::Yaml)
        .unwrap_err();
    assert_eq!(err.field(), Some("platform.worker_count"));
}

#[test]
fn test_validation_rejects_duplicate_extensions() {
    let yaml = "extensions:\n  - uid: trx-report\n  - uid: trx-report\n";
    let err = isolated_loader(MapEnv::new())
        .load_from_str(yaml, ConfigFormat::Yaml)
        .unwrap_err();
    assert_eq!(err.field(), Some("extensions[1].uid"));
}

// =============================================================================
// Environment
// =============================================================================

#[test]
fn test_env_overrides_file_values() {
    let env = MapEnv::new()
        .with("VIGIL_WORKER_COUNT", "8")
        .with("VIGIL_DELIVERY", "awaited")
        .with("VIGIL_IPC_PORT", "6000")
        .with("VIGIL_LOG_LEVEL", "warn");

    let config = isolated_loader(env)
        .load_from_str(ConfigFixtures::full_yaml(), ConfigFormat::Yaml)
        .unwrap();

    assert_eq!(config.platform.worker_count, Some(8));
    assert_eq!(config.platform.delivery, DeliveryMode::Awaited);
    assert_eq!(config.ipc.port, 6000);
    assert_eq!(config.logging.level, LogLevel::Warn);
    assert_eq!(config.platform.maximum_failed_tests, Some(5));
}

#[test]
fn test_env_invalid_override_is_rejected() {
    let env = MapEnv::new().with("VIGIL_IPC_PORT", "not-a-port");

    let result = isolated_loader(env).load_or_default(None);

    assert!(matches!(
        result,
        Err(ConfigError::InvalidEnvVar { ref name, .. }) if name == "VIGIL_IPC_PORT"
    ));
}

#[test]
fn test_env_placeholders_resolve() {
    let yaml = "ipc:\n  host: ${RUNNER_HOST}\n  port: ${RUNNER_PORT:7070}\n";
    let env = MapEnv::new().with("RUNNER_HOST", "10.0.0.5");

    let config = isolated_loader(env).load_from_str(yaml, ConfigFormat::Yaml).unwrap();

    assert_eq!(config.ipc.host, "10.0.0.5");
    assert_eq!(config.ipc.port, 7070);
}

#[test]
fn test_env_custom_prefix() {
    let env = MapEnv::new().with("CI_WORKER_COUNT", "3");
    let loader = ConfigLoader::builder().env_prefix("CI").env_source(env).build();

    let config = loader.load_or_default(None).unwrap();

    assert_eq!(config.platform.worker_count, Some(3));
}
