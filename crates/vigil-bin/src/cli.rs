// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `run`: Run the registered tests (default)
//! - `listen`: Accept test hosts over IPC and print what they report
//! - `validate`: Validate the configuration file
//! - `options`: List the command-line options the test host accepts
//! - `version`: Show version information

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use vigil_core::command_line::names;
use vigil_core::{CommandLineError, CommandLineOptions};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// vigil - test platform host
///
/// Runs registered tests, reports results to the console and, in server
/// mode, to a connected runner over IPC.
#[derive(Parser, Debug)]
#[command(
    name = "vigil",
    author = "Sylvex <contact@sylvex.io>",
    version = vigil_core::VERSION,
    about = "Test platform host",
    long_about = None,
    propagate_version = true,
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// Configuration file path (YAML, TOML or JSON)
    #[arg(short, long, env = "VIGIL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Enable quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run options when no subcommand is given
    #[command(flatten)]
    pub run: RunArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands for the vigil CLI.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the registered tests
    ///
    /// This is the default command when no subcommand is specified.
    /// Extension options go after `--`, e.g. `vigil run -- --report-trx`.
    Run(RunArgs),

    /// Listen for test hosts and print the events they report
    Listen(ListenArgs),

    /// Validate the configuration file
    ///
    /// Parses and validates the configuration file without running tests.
    Validate(ValidateArgs),

    /// List the command-line options the test host accepts
    Options(OptionsArgs),

    /// Show detailed version information
    Version,
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `run` command.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Show platform and extension information, then exit
    #[arg(long)]
    pub info: bool,

    /// List the tests instead of running them
    #[arg(long)]
    pub list_tests: bool,

    /// Run only tests whose uid matches (`*` wildcards, `|` alternatives)
    #[arg(long)]
    pub filter: Option<String>,

    /// Default per-test timeout, e.g. `30s`
    #[arg(long, value_parser = humantime_duration)]
    pub timeout: Option<Duration>,

    /// Fail with exit code 9 if fewer tests ran
    #[arg(long)]
    pub minimum_expected_tests: Option<usize>,

    /// Stop after this many failures (exit code 13)
    #[arg(long)]
    pub maximum_failed_tests: Option<usize>,

    /// Directory for results and diagnostic logs
    #[arg(long)]
    pub results_directory: Option<PathBuf>,

    /// Report to a runner over IPC instead of running standalone
    #[arg(long)]
    pub server: bool,

    /// Runner host for `--server`
    #[arg(long, requires = "server")]
    pub client_host: Option<String>,

    /// Runner port for `--server`
    #[arg(long, requires = "server")]
    pub client_port: Option<u16>,

    /// Runner Unix socket for `--server`
    #[arg(long, requires = "server", conflicts_with_all = ["client_host", "client_port"])]
    pub client_socket: Option<PathBuf>,

    /// Do not print the banner
    #[arg(long)]
    pub no_banner: bool,

    /// Write a diagnostic log to the results directory
    #[arg(long)]
    pub diagnostic: bool,

    /// Extension options, passed after `--`
    #[arg(last = true, allow_hyphen_values = true)]
    pub extension_args: Vec<String>,
}

/// Arguments for the `listen` command.
#[derive(Args, Debug, Default, Clone)]
pub struct ListenArgs {
    /// Host to bind; overrides `ipc.host`
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind; overrides `ipc.port` (0 picks a free port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Unix socket to bind instead of TCP
    #[arg(long, conflicts_with_all = ["host", "port"])]
    pub socket: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Show parsed configuration after validation
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format for validation results
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `options` command.
#[derive(Args, Debug, Clone, Default)]
pub struct OptionsArgs {
    /// Include hidden options
    #[arg(long)]
    pub all: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}

impl From<LogFormat> for vigil_config::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Text => vigil_config::LogFormat::Text,
            LogFormat::Json => vigil_config::LogFormat::Json,
            LogFormat::Compact => vigil_config::LogFormat::Compact,
        }
    }
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for programmatic parsing
    Json,
    /// YAML format
    Yaml,
}

fn humantime_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|e| e.to_string())
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective command, defaulting to `Run` with the top-level
    /// run options if none specified.
    pub fn effective_command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(self.run.clone()))
    }

    /// Get the effective log level: quiet and verbose win over `--log-level`.
    pub fn effective_log_level(&self) -> Option<&str> {
        if self.quiet {
            Some("error")
        } else if self.verbose {
            Some("debug")
        } else {
            self.log_level.as_deref()
        }
    }
}

impl RunArgs {
    /// Resolves the typed flags and trailing extension arguments into the
    /// option lookup the host validates.
    ///
    /// # Errors
    ///
    /// Returns `CommandLineError::UnexpectedArgument` if a trailing value
    /// precedes every option name.
    pub fn to_options(&self) -> Result<CommandLineOptions, CommandLineError> {
        let mut options = CommandLineOptions::new();

        let flags = [
            (self.info, names::INFO),
            (self.list_tests, names::LIST_TESTS),
            (self.server, names::SERVER),
            (self.no_banner, names::NO_BANNER),
            (self.diagnostic, names::DIAGNOSTIC),
        ];
        for (set, name) in flags {
            if set {
                options.set_flag(name);
            }
        }

        if let Some(ref filter) = self.filter {
            options.set(names::FILTER, [filter]);
        }
        if let Some(timeout) = self.timeout {
            options.set(
                names::TIMEOUT,
                [humantime::format_duration(timeout).to_string()],
            );
        }
        if let Some(n) = self.minimum_expected_tests {
            options.set(names::MINIMUM_EXPECTED_TESTS, [n.to_string()]);
        }
        if let Some(n) = self.maximum_failed_tests {
            options.set(names::MAXIMUM_FAILED_TESTS, [n.to_string()]);
        }
        if let Some(ref dir) = self.results_directory {
            options.set(names::RESULTS_DIRECTORY, [dir.display().to_string()]);
        }
        if let Some(ref host) = self.client_host {
            options.set(names::CLIENT_HOST, [host]);
        }
        if let Some(port) = self.client_port {
            options.set(names::CLIENT_PORT, [port.to_string()]);
        }
        if let Some(ref socket) = self.client_socket {
            options.set(names::CLIENT_SOCKET, [socket.display().to_string()]);
        }

        options.merge(CommandLineOptions::from_args(&self.extension_args)?);
        Ok(options)
    }
}

// =============================================================================
// Tests
// =============================================================================
