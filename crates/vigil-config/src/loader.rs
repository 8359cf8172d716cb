// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading and processing for vigil.
//!
//! # Loading Pipeline
//!
//! 1. Pick the format from the file extension
//! 2. Resolve `${VAR}` / `${VAR:default}` placeholders in the raw content
//! 3. Parse into [`VigilConfig`]
//! 4. Apply `VIGIL_*` environment overrides
//! 5. Resolve relative paths against the file's directory
//! 6. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! VIGIL_WORKER_COUNT=8
//! VIGIL_TEST_TIMEOUT=30s
//! VIGIL_DELIVERY=queued
//! VIGIL_IPC_PORT=9000
//! VIGIL_LOG_LEVEL=debug
//! ```
//!
//! Environment lookups go through an [`EnvSource`], so tests can supply a
//! fixed map instead of mutating the process environment.

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{DeliveryMode, LogFormat, LogLevel, TransportKind, VigilConfig};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "VIGIL";

// =============================================================================
// EnvSource
// =============================================================================

/// Where environment variables are read from.
pub trait EnvSource: fmt::Debug + Send + Sync {
    /// Returns the value of `name`, if set.
    fn var(&self, name: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A fixed set of variables.
#[derive(Debug, Clone, Default)]
pub struct MapEnv(HashMap<String, String>);

impl MapEnv {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }
}

impl EnvSource for MapEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.0.get(name).cloned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// =============================================================================
// ConfigLoader
// =============================================================================

/// Configuration loader for vigil.
///
/// # Examples
///
/// ```no_run
/// use vigil_config::loader::ConfigLoader;
///
/// let loader = ConfigLoader::new();
/// let config = loader.load("vigil.yaml").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Base directory for resolving relative paths.
    base_path: Option<PathBuf>,

    /// Environment variable prefix.
    env_prefix: String,

    /// Whether to resolve environment variables in values.
    resolve_env_vars: bool,

    /// Whether to resolve relative paths.
    resolve_paths: bool,

    env: Arc<dyn EnvSource>,
}

impl ConfigLoader {
    /// Creates a new configuration loader with default settings.
    pub fn new() -> Self {
        Self {
            base_path: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
            resolve_paths: true,
            env: Arc::new(ProcessEnv),
        }
    }

    /// Creates a builder for configuring the loader.
    pub fn builder() -> ConfigLoaderBuilder {
        ConfigLoaderBuilder::new()
    }

    /// Sets the base path for resolving relative paths.
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables environment variable resolution.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Enables or disables relative path resolution.
    pub fn with_path_resolution(mut self, enabled: bool) -> Self {
        self.resolve_paths = enabled;
        self
    }

    /// Replaces the environment source.
    pub fn with_env_source(mut self, env: impl EnvSource + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Loads configuration from a file.
    ///
    /// The file format is determined by the file extension:
    /// - `.yaml` or `.yml` - YAML format
    /// - `.toml` - TOML format
    /// - `.json` - JSON format
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<VigilConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let base_path = self.base_path.clone().unwrap_or_else(|| {
            path.parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."))
        });

        let content = self.read_file(path)?;
        let format = ConfigFormat::from_path(path)?;
        let mut config = self.parse_content(&content, format, path)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        if self.resolve_paths {
            self.resolve_relative_paths(&mut config, &base_path);
        }

        config.validate()?;

        info!("Configuration loaded successfully");
        debug!(
            extensions = config.extensions.len(),
            delivery = config.platform.delivery.as_str(),
            "Configuration summary"
        );

        Ok(config)
    }

    /// Loads `path` if given, otherwise defaults plus environment overrides.
    pub fn load_or_default(&self, path: Option<&Path>) -> ConfigResult<VigilConfig> {
        match path {
            Some(path) => self.load(path),
            None => {
                let mut config = VigilConfig::default();
                if self.resolve_env_vars {
                    self.apply_env_overrides(&mut config)?;
                }
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Loads configuration from a string.
    ///
    /// Placeholders and overrides apply; relative paths are left as written.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<VigilConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)
        } else {
            content.to_string()
        };
        let mut config = parse_str(&content, format)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;

        Ok(config)
    }

    /// Reads file content.
    fn read_file(&self, path: &Path) -> ConfigResult<String> {
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))
    }

    /// Parses content based on format.
    fn parse_content(
        &self,
        content: &str,
        format: ConfigFormat,
        path: &Path,
    ) -> ConfigResult<VigilConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)
        } else {
            content.to_string()
        };

        parse_str(&content, format).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::parse(path, message),
            other => other,
        })
    }

    /// Resolves `${VAR_NAME}` and `${VAR_NAME:default}` placeholders.
    ///
    /// An unset variable without a default keeps its placeholder text.
    fn resolve_env_placeholders(&self, content: &str) -> String {
        let mut result = String::with_capacity(content.len());
        let mut chars = content.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' || chars.peek() != Some(&'{') {
                result.push(c);
                continue;
            }
            chars.next();

            let mut var_content = String::new();
            let mut found_close = false;
            for c in chars.by_ref() {
                if c == '}' {
                    found_close = true;
                    break;
                }
                var_content.push(c);
            }

            if !found_close {
                result.push_str("${");
                result.push_str(&var_content);
                continue;
            }

            let (var_name, default_value) = match var_content.split_once(':') {
                Some((name, default)) => (name, Some(default)),
                None => (var_content.as_str(), None),
            };

            match (self.env.var(var_name), default_value) {
                (Some(value), _) => result.push_str(&value),
                (None, Some(default)) => result.push_str(default),
                (None, None) => {
                    warn!(variable = var_name, "Environment variable not found");
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        }

        result
    }

    fn env_var(&self, suffix: &str) -> Option<(String, String)> {
        let name = format!("{}_{}", self.env_prefix, suffix);
        self.env.var(&name).map(|value| (name, value))
    }

    /// Applies `<PREFIX>_*` environment overrides.
    fn apply_env_overrides(&self, config: &mut VigilConfig) -> ConfigResult<()> {
        // Platform
        if let Some((name, value)) = self.env_var("WORKER_COUNT") {
            config.platform.worker_count = Some(parse_number(&name, &value)?);
        }
        if let Some((name, value)) = self.env_var("TEST_TIMEOUT") {
            config.platform.test_timeout = Some(parse_duration(&name, &value)?);
        }
        if let Some((name, value)) = self.env_var("DELIVERY") {
            config.platform.delivery = DeliveryMode::from_str(&value)
                .map_err(|_| ConfigError::invalid_env_var(name, "expected 'awaited' or 'queued'"))?;
        }
        if let Some((name, value)) = self.env_var("MINIMUM_EXPECTED_TESTS") {
            config.platform.minimum_expected_tests = Some(parse_number(&name, &value)?);
        }
        if let Some((name, value)) = self.env_var("MAXIMUM_FAILED_TESTS") {
            config.platform.maximum_failed_tests = Some(parse_number(&name, &value)?);
        }
        if let Some((_, value)) = self.env_var("RESULTS_DIRECTORY") {
            config.platform.results_directory = PathBuf::from(value);
        }
        if let Some((_, value)) = self.env_var("SHOW_PASSED") {
            config.platform.show_passed = parse_bool(&value);
        }
        if let Some((_, value)) = self.env_var("BANNER") {
            config.platform.banner = Some(value);
        }

        // IPC
        if let Some((name, value)) = self.env_var("IPC_TRANSPORT") {
            config.ipc.transport = match value.to_lowercase().as_str() {
                "tcp" => TransportKind::Tcp,
                "unix" => TransportKind::Unix,
                _ => return Err(ConfigError::invalid_env_var(name, "expected 'tcp' or 'unix'")),
            };
        }
        if let Some((_, value)) = self.env_var("IPC_HOST") {
            config.ipc.host = value;
        }
        if let Some((name, value)) = self.env_var("IPC_PORT") {
            config.ipc.port = value
                .parse()
                .map_err(|_| ConfigError::invalid_env_var(name, "expected valid port number"))?;
        }
        if let Some((_, value)) = self.env_var("IPC_SOCKET_PATH") {
            config.ipc.socket_path = Some(PathBuf::from(value));
        }
        if let Some((name, value)) = self.env_var("IPC_CONNECT_TIMEOUT") {
            config.ipc.connect_timeout = parse_duration(&name, &value)?;
        }
        if let Some((name, value)) = self.env_var("IPC_REQUEST_TIMEOUT") {
            config.ipc.request_timeout = parse_duration(&name, &value)?;
        }
        if let Some((name, value)) = self.env_var("IPC_MAX_FRAME_SIZE") {
            config.ipc.max_frame_size = parse_number(&name, &value)?;
        }

        // Logging
        if let Some((name, value)) = self.env_var("LOG_LEVEL") {
            config.logging.level = parse_log_level(&value)
                .ok_or_else(|| ConfigError::invalid_env_var(name, "expected a log level"))?;
        }
        if let Some((name, value)) = self.env_var("LOG_FORMAT") {
            config.logging.format = LogFormat::from_str(&value).map_err(|_| {
                ConfigError::invalid_env_var(name, "expected 'text', 'compact' or 'json'")
            })?;
        }
        if let Some((_, value)) = self.env_var("DIAGNOSTIC_FILE") {
            config.logging.diagnostic_file = Some(PathBuf::from(value));
        }

        Ok(())
    }

    /// Resolves relative paths in configuration.
    fn resolve_relative_paths(&self, config: &mut VigilConfig, base_path: &Path) {
        if config.platform.results_directory.is_relative() {
            config.platform.results_directory = base_path.join(&config.platform.results_directory);
        }

        if let Some(ref mut socket_path) = config.ipc.socket_path {
            if socket_path.is_relative() {
                *socket_path = base_path.join(&socket_path);
            }
        }

        if let Some(ref mut diagnostic_file) = config.logging.diagnostic_file {
            if diagnostic_file.is_relative() {
                *diagnostic_file = base_path.join(&diagnostic_file);
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ConfigLoaderBuilder
// =============================================================================

/// Builder for ConfigLoader.
#[derive(Debug, Default)]
pub struct ConfigLoaderBuilder {
    base_path: Option<PathBuf>,
    env_prefix: Option<String>,
    resolve_env_vars: Option<bool>,
    resolve_paths: Option<bool>,
    env: Option<Arc<dyn EnvSource>>,
}

impl ConfigLoaderBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base path.
    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Sets the environment prefix.
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Enables or disables environment variable resolution.
    pub fn resolve_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = Some(enabled);
        self
    }

    /// Enables or disables path resolution.
    pub fn resolve_paths(mut self, enabled: bool) -> Self {
        self.resolve_paths = Some(enabled);
        self
    }

    /// Sets the environment source.
    pub fn env_source(mut self, env: impl EnvSource + 'static) -> Self {
        self.env = Some(Arc::new(env));
        self
    }

    /// Builds the ConfigLoader.
    pub fn build(self) -> ConfigLoader {
        let mut loader = ConfigLoader::new();

        if let Some(base_path) = self.base_path {
            loader.base_path = Some(base_path);
        }
        if let Some(prefix) = self.env_prefix {
            loader.env_prefix = prefix;
        }
        if let Some(resolve_env_vars) = self.resolve_env_vars {
            loader.resolve_env_vars = resolve_env_vars;
        }
        if let Some(resolve_paths) = self.resolve_paths {
            loader.resolve_paths = resolve_paths;
        }
        if let Some(env) = self.env {
            loader.env = env;
        }

        loader
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }

    /// Serializes a configuration in this format.
    pub fn render(&self, config: &VigilConfig) -> ConfigResult<String> {
        match self {
            ConfigFormat::Yaml => {
                serde_yaml::to_string(config).map_err(|e| ConfigError::serialization(e.to_string()))
            }
            ConfigFormat::Toml => {
                toml::to_string_pretty(config).map_err(|e| ConfigError::serialization(e.to_string()))
            }
            ConfigFormat::Json => serde_json::to_string_pretty(config)
                .map_err(|e| ConfigError::serialization(e.to_string())),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Parses a string based on format.
fn parse_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> ConfigResult<T> {
    match format {
        ConfigFormat::Yaml => yaml_parse(content),
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
    }
}

/// YAML parsing through the `config` crate.
fn yaml_parse<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    let config = config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .map_err(|e| ConfigError::serialization(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::serialization(e.to_string()))
}

/// Parses a boolean from environment variable.
fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "true" | "1" | "yes" | "on" | "enabled"
    )
}

/// Parses a log level string.
fn parse_log_level(value: &str) -> Option<LogLevel> {
    LogLevel::from_str(value).ok()
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid_env_var(name, "expected valid number"))
}

fn parse_duration(name: &str, value: &str) -> ConfigResult<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| ConfigError::invalid_env_var(name, format!("expected a duration: {}", e)))
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads configuration from a file with default settings.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<VigilConfig> {
    ConfigLoader::new().load(path)
}

/// Loads configuration from a string with the specified format.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<VigilConfig> {
    ConfigLoader::new().load_from_str(content, format)
}

// =============================================================================
// Tests
// =============================================================================
