// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Logging and tracing initialization.
//!
//! Logs go to stderr so they never interleave with test output on stdout.
//! A diagnostic file, when requested, receives the same events as plain text.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use tracing::{Level, Subscriber};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

use vigil_config::LogFormat;

use crate::error::{BinError, BinResult};

// =============================================================================
// Logging Initialization
// =============================================================================

/// Initializes the logging subsystem.
///
/// `RUST_LOG` wins over `level` when set.
///
/// # Arguments
///
/// * `level` - Log level string (trace, debug, info, warn, error)
/// * `format` - Log output format (text, json, compact)
/// * `diagnostic_file` - Optional file that receives a copy of every event
///
/// # Errors
///
/// Fails if the diagnostic file cannot be created or a global subscriber is
/// already installed.
pub fn init_logging(level: &str, format: LogFormat, diagnostic_file: Option<&Path>) -> BinResult<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default().add_directive(LevelFilter::from_level(parse_level(level)).into())
    });

    let diagnostic = match diagnostic_file {
        Some(path) => Some(open_diagnostic_file(path)?),
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer(format))
        .with(diagnostic.map(diagnostic_layer))
        .try_init()
        .map_err(|e| BinError::init(format!("Failed to install logger: {}", e)))
}

fn console_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let is_terminal = std::io::IsTerminal::is_terminal(&std::io::stderr());

    match format {
        LogFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(is_terminal)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(is_terminal)
            .boxed(),
    }
}

fn diagnostic_layer<S>(file: Arc<File>) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .boxed()
}

fn open_diagnostic_file(path: &Path) -> BinResult<Arc<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| BinError::from(e).with_context(format!("creating {}", parent.display())))?;
    }
    let file = File::create(path)
        .map_err(|e| BinError::from(e).with_context(format!("creating {}", path.display())))?;
    Ok(Arc::new(file))
}

/// Returns the diagnostic log path for a run inside `results_directory`.
pub fn diagnostic_file_name(results_directory: &Path, execution_id: &str) -> std::path::PathBuf {
    results_directory.join(format!("vigil_{}.diag", execution_id))
}

// =============================================================================
// Log Level Parsing
// =============================================================================

/// Parses a log level string into a `Level`.
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("Info"), Level::INFO);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("invalid"), Level::INFO);
    }

    #[test]
    fn test_diagnostic_file_name() {
        let path = diagnostic_file_name(Path::new("results"), "abc");
        assert_eq!(path, Path::new("results").join("vigil_abc.diag"));
    }

    #[test]
    fn test_open_diagnostic_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/run.diag");
        assert!(open_diagnostic_file(&path).is_ok());
        assert!(path.exists());
    }
}
