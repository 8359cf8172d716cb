// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema definitions for vigil.
//!
//! # Schema Structure
//!
//! ```text
//! VigilConfig
//! ├── platform: PlatformConfig
//! ├── ipc: IpcConfig
//! ├── logging: LoggingConfig
//! └── extensions: Vec<ExtensionEntry>
//! ```
//!
//! Every section has defaults, so an empty file is a valid configuration.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// Constants
// =============================================================================

/// Default IPC host.
pub const DEFAULT_IPC_HOST: &str = "127.0.0.1";

/// Default IPC connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default IPC request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default maximum IPC frame size (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Smallest accepted maximum frame size; a frame header alone is 8 bytes.
pub const MIN_MAX_FRAME_SIZE: u32 = 64;

/// Default results directory.
pub const DEFAULT_RESULTS_DIRECTORY: &str = "TestResults";

// =============================================================================
// Top-Level Configuration
// =============================================================================

/// The root configuration structure for vigil.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VigilConfig {
    /// Platform (test host) settings.
    #[serde(default)]
    pub platform: PlatformConfig,

    /// IPC settings used by `--server` and `listen`.
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Registered extension factories to activate.
    #[serde(default)]
    pub extensions: Vec<ExtensionEntry>,
}

impl VigilConfig {
    /// Validates the entire configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        self.platform.validate()?;
        self.ipc.validate()?;
        self.logging.validate()?;

        let mut seen = HashSet::new();
        for (index, entry) in self.extensions.iter().enumerate() {
            let field = format!("extensions[{}].uid", index);
            if entry.uid.trim().is_empty() {
                return Err(ConfigError::validation(field, "must not be empty"));
            }
            if !seen.insert(entry.uid.as_str()) {
                return Err(ConfigError::validation(
                    field,
                    format!("duplicate extension '{}'", entry.uid),
                ));
            }
        }

        Ok(())
    }

    /// Returns the uids of enabled extensions, in file order.
    pub fn enabled_extensions(&self) -> Vec<String> {
        self.extensions
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.uid.clone())
            .collect()
    }
}

// =============================================================================
// Platform Configuration
// =============================================================================

/// How the message bus delivers published messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// `publish` returns after every consumer ran.
    #[default]
    Awaited,
    /// `publish` enqueues and returns; `drain` waits.
    Queued,
}

impl DeliveryMode {
    /// Returns the configuration spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Awaited => "awaited",
            DeliveryMode::Queued => "queued",
        }
    }
}

impl FromStr for DeliveryMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "awaited" => Ok(DeliveryMode::Awaited),
            "queued" => Ok(DeliveryMode::Queued),
            other => Err(ConfigError::validation(
                "platform.delivery",
                format!("expected 'awaited' or 'queued', got '{}'", other),
            )),
        }
    }
}

/// Test host settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformConfig {
    /// Concurrently running tests. `None` uses the available parallelism.
    #[serde(default)]
    pub worker_count: Option<usize>,

    /// Default per-test timeout.
    #[serde(default, with = "humantime_serde")]
    pub test_timeout: Option<Duration>,

    /// Bus delivery mode.
    #[serde(default)]
    pub delivery: DeliveryMode,

    /// Fewer executed tests than this exit with code 9.
    #[serde(default)]
    pub minimum_expected_tests: Option<usize>,

    /// Stop after this many failures (exit code 13).
    #[serde(default)]
    pub maximum_failed_tests: Option<usize>,

    /// Directory for results and diagnostic files.
    #[serde(default = "default_results_directory")]
    pub results_directory: PathBuf,

    /// Print passed tests, not only failures.
    #[serde(default = "default_true")]
    pub show_passed: bool,

    /// Banner override.
    #[serde(default)]
    pub banner: Option<String>,
}

impl PlatformConfig {
    /// Validates the platform section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.worker_count == Some(0) {
            return Err(ConfigError::validation(
                "platform.worker_count",
                "must be at least 1",
            ));
        }
        if self.test_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::validation(
                "platform.test_timeout",
                "must be greater than zero",
            ));
        }
        if self.maximum_failed_tests == Some(0) {
            return Err(ConfigError::validation(
                "platform.maximum_failed_tests",
                "must be at least 1",
            ));
        }
        if self.results_directory.as_os_str().is_empty() {
            return Err(ConfigError::validation(
                "platform.results_directory",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            test_timeout: None,
            delivery: DeliveryMode::default(),
            minimum_expected_tests: None,
            maximum_failed_tests: None,
            results_directory: default_results_directory(),
            show_passed: true,
            banner: None,
        }
    }
}

fn default_results_directory() -> PathBuf {
    PathBuf::from(DEFAULT_RESULTS_DIRECTORY)
}

fn default_true() -> bool {
    true
}

// =============================================================================
// IPC Configuration
// =============================================================================

/// IPC transport kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// TCP socket.
    #[default]
    Tcp,
    /// Unix domain socket.
    Unix,
}

/// IPC settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IpcConfig {
    /// Transport kind.
    #[serde(default)]
    pub transport: TransportKind,

    /// TCP host.
    #[serde(default = "default_ipc_host")]
    pub host: String,

    /// TCP port. Zero lets `listen` pick a free port.
    #[serde(default)]
    pub port: u16,

    /// Unix socket path; required for the unix transport.
    #[serde(default)]
    pub socket_path: Option<PathBuf>,

    /// Connect timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Largest accepted frame in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: u32,
}

impl IpcConfig {
    /// Validates the IPC section.
    pub fn validate(&self) -> ConfigResult<()> {
        match self.transport {
            TransportKind::Tcp => {
                if self.host.trim().is_empty() {
                    return Err(ConfigError::validation("ipc.host", "must not be empty"));
                }
            }
            TransportKind::Unix => {
                let missing = self
                    .socket_path
                    .as_ref()
                    .is_none_or(|p| p.as_os_str().is_empty());
                if missing {
                    return Err(ConfigError::validation(
                        "ipc.socket_path",
                        "required for the unix transport",
                    ));
                }
            }
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::validation(
                "ipc.connect_timeout",
                "must be greater than zero",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::validation(
                "ipc.request_timeout",
                "must be greater than zero",
            ));
        }
        if self.max_frame_size < MIN_MAX_FRAME_SIZE {
            return Err(ConfigError::validation(
                "ipc.max_frame_size",
                format!("must be at least {} bytes", MIN_MAX_FRAME_SIZE),
            ));
        }
        Ok(())
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            host: default_ipc_host(),
            port: 0,
            socket_path: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

fn default_ipc_host() -> String {
    DEFAULT_IPC_HOST.to_string()
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_max_frame_size() -> u32 {
    DEFAULT_MAX_FRAME_SIZE
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,

    /// Diagnostic log file; relative paths resolve against the config file.
    #[serde(default)]
    pub diagnostic_file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Validates the logging configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(ref file) = self.diagnostic_file {
            if file.as_os_str().is_empty() {
                return Err(ConfigError::validation(
                    "logging.diagnostic_file",
                    "must not be empty",
                ));
            }
        }
        Ok(())
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ConfigError::validation(
                "logging.level",
                format!("unknown level '{}'", other),
            )),
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Single-line compact text.
    Compact,
    /// JSON lines.
    Json,
}

impl LogFormat {
    /// Returns the configuration spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::validation(
                "logging.format",
                format!("unknown format '{}'", other),
            )),
        }
    }
}

// =============================================================================
// Extensions
// =============================================================================

/// One registered extension factory to activate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtensionEntry {
    /// Factory uid in the registration table.
    pub uid: String,

    /// Whether to create it.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ExtensionEntry {
    /// An enabled entry.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            enabled: true,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VigilConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.platform.delivery, DeliveryMode::Awaited);
        assert!(config.platform.show_passed);
        assert_eq!(config.ipc.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(config.ipc.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = VigilConfig::default();
        config.platform.worker_count = Some(0);
        let err = config.validate().unwrap_err();
        assert_eq!(err.field(), Some("platform.worker_count"));
    }

    #[test]
    fn test_unix_transport_requires_socket_path() {
        let mut config = VigilConfig::default();
        config.ipc.transport = TransportKind::Unix;
        assert_eq!(config.validate().unwrap_err().field(), Some("ipc.socket_path"));

        config.ipc.socket_path = Some(PathBuf::from("/tmp/vigil.sock"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tiny_frame_size_rejected() {
        let mut config = VigilConfig::default();
        config.ipc.max_frame_size = 8;
        assert_eq!(config.validate().unwrap_err().field(), Some("ipc.max_frame_size"));
    }

    #[test]
    fn test_duplicate_extensions_rejected() {
        let config = VigilConfig {
            extensions: vec![ExtensionEntry::new("trx"), ExtensionEntry::new("trx")],
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().field(), Some("extensions[1].uid"));
    }

    #[test]
    fn test_enabled_extensions_keeps_order() {
        let config = VigilConfig {
            extensions: vec![
                ExtensionEntry::new("b"),
                ExtensionEntry { uid: "skip".into(), enabled: false },
                ExtensionEntry::new("a"),
            ],
            ..Default::default()
        };
        assert_eq!(config.enabled_extensions(), vec!["b", "a"]);
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("QUEUED".parse::<DeliveryMode>().unwrap(), DeliveryMode::Queued);
        assert!("eager".parse::<DeliveryMode>().is_err());
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(LogLevel::Debug.to_string(), "debug");
    }
}
