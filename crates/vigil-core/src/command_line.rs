// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Command-line option model.
//!
//! Extensions declare the options they understand through a
//! [`CommandLineOptionsProvider`]. The resolved values are exposed to the
//! rest of the platform through [`CommandLineOptions`], a lookup by option
//! name; nothing outside this module looks at raw argv tokens.
//!
//! # Example
//!
//! ```
//! use vigil_core::command_line::CommandLineOptions;
//!
//! let options = CommandLineOptions::from_args(["--filter", "math.*", "--no-banner"]).unwrap();
//! assert_eq!(
//!     options.try_get_option_argument_list("filter"),
//!     Some(&["math.*".to_string()][..])
//! );
//! assert!(options.is_option_set("--no-banner"));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::CommandLineError;
use crate::extension::{Extension, ExtensionInfo};

// =============================================================================
// ArgumentArity
// =============================================================================

/// How many arguments an option accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArgumentArity {
    /// Minimum argument count.
    pub min: usize,
    /// Maximum argument count (`usize::MAX` for unbounded).
    pub max: usize,
}

impl ArgumentArity {
    /// A flag without arguments.
    pub const ZERO: Self = Self::new(0, 0);
    /// An optional single argument.
    pub const ZERO_OR_ONE: Self = Self::new(0, 1);
    /// Exactly one argument.
    pub const EXACTLY_ONE: Self = Self::new(1, 1);
    /// Any number of arguments.
    pub const ZERO_OR_MORE: Self = Self::new(0, usize::MAX);
    /// At least one argument.
    pub const ONE_OR_MORE: Self = Self::new(1, usize::MAX);

    /// Creates an arity.
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    /// Returns `true` if `count` arguments are acceptable.
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min && count <= self.max
    }
}

impl fmt::Display for ArgumentArity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "exactly {}", self.min)
        } else if self.max == usize::MAX {
            write!(f, "at least {}", self.min)
        } else {
            write!(f, "{} to {}", self.min, self.max)
        }
    }
}

// =============================================================================
// CommandLineOption
// =============================================================================

/// A declared command-line option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLineOption {
    /// Option name without leading dashes.
    pub name: String,
    /// Help text.
    pub description: String,
    /// Accepted argument count.
    pub arity: ArgumentArity,
    /// Hidden from help output.
    pub is_hidden: bool,
    /// Declared by the platform itself.
    pub is_builtin: bool,
}

impl CommandLineOption {
    /// Creates a visible, non-builtin option.
    pub fn new(name: impl Into<String>, description: impl Into<String>, arity: ArgumentArity) -> Self {
        Self {
            name: normalize(&name.into()).to_string(),
            description: description.into(),
            arity,
            is_hidden: false,
            is_builtin: false,
        }
    }

    /// Hides the option from help output.
    pub fn hidden(mut self) -> Self {
        self.is_hidden = true;
        self
    }

    /// Marks the option as a platform built-in.
    pub fn builtin(mut self) -> Self {
        self.is_builtin = true;
        self
    }
}

/// An extension that declares command-line options.
pub trait CommandLineOptionsProvider: Extension {
    /// The options this provider understands.
    fn command_line_options(&self) -> Vec<CommandLineOption>;

    /// Validates the arguments given to one of this provider's options.
    fn validate_option_arguments(
        &self,
        _option: &CommandLineOption,
        _arguments: &[String],
    ) -> Result<(), String> {
        Ok(())
    }

    /// Validates combinations of options once every option is resolved.
    fn validate_command_line_options(&self, _options: &CommandLineOptions) -> Result<(), String> {
        Ok(())
    }
}

// =============================================================================
// CommandLineOptions
// =============================================================================

fn normalize(name: &str) -> &str {
    name.trim_start_matches('-')
}

/// Resolved option values, looked up by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLineOptions {
    values: BTreeMap<String, Vec<String>>,
}

impl CommandLineOptions {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `--name value...` tokens.
    ///
    /// `--name=value` is accepted as a shorthand for a single argument.
    /// Repeating an option appends to its arguments.
    ///
    /// # Errors
    ///
    /// Returns `CommandLineError::UnexpectedArgument` for a value that
    /// precedes every option name.
    pub fn from_args<I, S>(args: I) -> Result<Self, CommandLineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::new();
        let mut current: Option<String> = None;

        for arg in args {
            let arg = arg.as_ref();
            if let Some(stripped) = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-').filter(|s| !s.is_empty())) {
                let (name, inline) = match stripped.split_once('=') {
                    Some((name, value)) => (name, Some(value)),
                    None => (stripped, None),
                };
                let entry = options.values.entry(name.to_string()).or_default();
                if let Some(value) = inline {
                    entry.push(value.to_string());
                }
                current = Some(name.to_string());
            } else {
                match &current {
                    Some(name) => options.values.entry(name.clone()).or_default().push(arg.to_string()),
                    None => {
                        return Err(CommandLineError::UnexpectedArgument {
                            token: arg.to_string(),
                        });
                    }
                }
            }
        }

        trace!(options = options.values.len(), "Resolved command-line options");
        Ok(options)
    }

    /// Sets an option's arguments, replacing any previous value.
    pub fn set<I, S>(&mut self, name: &str, arguments: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values.insert(
            normalize(name).to_string(),
            arguments.into_iter().map(Into::into).collect(),
        );
    }

    /// Sets an option with builder syntax.
    pub fn with<I, S>(mut self, name: &str, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(name, arguments);
        self
    }

    /// Sets a flag without arguments.
    pub fn set_flag(&mut self, name: &str) {
        self.set(name, std::iter::empty::<String>());
    }

    /// Merges another set into this one; `other` wins on conflicts.
    pub fn merge(&mut self, other: CommandLineOptions) {
        self.values.extend(other.values);
    }

    /// Returns the arguments of an option, or `None` if it was not given.
    pub fn try_get_option_argument_list(&self, name: &str) -> Option<&[String]> {
        self.values.get(normalize(name)).map(Vec::as_slice)
    }

    /// Returns `true` if the option was given.
    pub fn is_option_set(&self, name: &str) -> bool {
        self.values.contains_key(normalize(name))
    }

    /// Returns the first argument of an option.
    pub fn get_single(&self, name: &str) -> Option<&str> {
        self.try_get_option_argument_list(name)
            .and_then(|args| args.first())
            .map(String::as_str)
    }

    /// Parses the first argument of an option.
    ///
    /// # Errors
    ///
    /// Returns `CommandLineError::InvalidValue` if the argument does not parse.
    pub fn parse_single<T>(&self, name: &str) -> Result<Option<T>, CommandLineError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get_single(name) {
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| CommandLineError::invalid_value(normalize(name), e.to_string())),
            None => Ok(None),
        }
    }

    /// Parses the first argument of an option as a humantime duration.
    ///
    /// # Errors
    ///
    /// Returns `CommandLineError::InvalidValue` if the argument is not a
    /// duration such as `30s` or `2m`.
    pub fn parse_duration(&self, name: &str) -> Result<Option<Duration>, CommandLineError> {
        match self.get_single(name) {
            Some(raw) => humantime::parse_duration(raw)
                .map(Some)
                .map_err(|e| CommandLineError::invalid_value(normalize(name), e.to_string())),
            None => Ok(None),
        }
    }

    /// Returns the option names that were given.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Returns the number of options given.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no option was given.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// =============================================================================
// Platform Options
// =============================================================================

/// Names of the options declared by the platform itself.
pub mod names {
    /// Show help.
    pub const HELP: &str = "help";
    /// Show platform and extension information.
    pub const INFO: &str = "info";
    /// Discover tests without running them.
    pub const LIST_TESTS: &str = "list-tests";
    /// Filter tests by uid pattern.
    pub const FILTER: &str = "filter";
    /// Default per-test timeout.
    pub const TIMEOUT: &str = "timeout";
    /// Fail the run when fewer tests ran.
    pub const MINIMUM_EXPECTED_TESTS: &str = "minimum-expected-tests";
    /// Stop the run after this many failures.
    pub const MAXIMUM_FAILED_TESTS: &str = "maximum-failed-tests";
    /// Directory for results and diagnostics.
    pub const RESULTS_DIRECTORY: &str = "results-directory";
    /// Run in server mode, reporting to an IPC client.
    pub const SERVER: &str = "server";
    /// IPC client host.
    pub const CLIENT_HOST: &str = "client-host";
    /// IPC client port.
    pub const CLIENT_PORT: &str = "client-port";
    /// IPC client socket path.
    pub const CLIENT_SOCKET: &str = "client-socket";
    /// Suppress the banner.
    pub const NO_BANNER: &str = "no-banner";
    /// Write a diagnostic log.
    pub const DIAGNOSTIC: &str = "diagnostic";
}

/// Declares the platform's built-in options.
#[derive(Debug, Clone)]
pub struct PlatformCommandLineProvider {
    info: ExtensionInfo,
}

impl PlatformCommandLineProvider {
    /// Uid of the built-in provider.
    pub const UID: &'static str = "platform-command-line";

    /// Creates the provider.
    pub fn new() -> Self {
        Self {
            info: ExtensionInfo::builtin(
                Self::UID,
                "Platform command line",
                "Options understood by the test platform",
            ),
        }
    }
}

impl Default for PlatformCommandLineProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Extension for PlatformCommandLineProvider {
    fn uid(&self) -> &str {
        self.info.uid()
    }
    fn version(&self) -> &str {
        self.info.version()
    }
    fn display_name(&self) -> &str {
        self.info.display_name()
    }
    fn description(&self) -> &str {
        self.info.description()
    }
}

impl CommandLineOptionsProvider for PlatformCommandLineProvider {
    fn command_line_options(&self) -> Vec<CommandLineOption> {
        use names::*;
        let option = |name: &str, description: &str, arity| {
            CommandLineOption::new(name, description, arity).builtin()
        };

        vec![
            option(HELP, "Show command line help", ArgumentArity::ZERO),
            option(INFO, "Show information about the platform and its extensions", ArgumentArity::ZERO),
            option(LIST_TESTS, "List available tests without running them", ArgumentArity::ZERO),
            option(FILTER, "Run only tests whose uid matches the pattern ('*' wildcards, '|' separated)", ArgumentArity::EXACTLY_ONE),
            option(TIMEOUT, "Default per-test timeout, e.g. 30s", ArgumentArity::EXACTLY_ONE),
            option(MINIMUM_EXPECTED_TESTS, "Fail the run if fewer tests than this ran", ArgumentArity::EXACTLY_ONE),
            option(MAXIMUM_FAILED_TESTS, "Stop starting tests once this many have failed", ArgumentArity::EXACTLY_ONE),
            option(RESULTS_DIRECTORY, "Directory for results and diagnostic files", ArgumentArity::EXACTLY_ONE),
            option(SERVER, "Run in server mode and report to an IPC client", ArgumentArity::ZERO_OR_ONE).hidden(),
            option(CLIENT_HOST, "Host of the IPC client", ArgumentArity::EXACTLY_ONE).hidden(),
            option(CLIENT_PORT, "Port of the IPC client", ArgumentArity::EXACTLY_ONE).hidden(),
            option(CLIENT_SOCKET, "Unix socket path of the IPC client", ArgumentArity::EXACTLY_ONE).hidden(),
            option(NO_BANNER, "Do not display the startup banner", ArgumentArity::ZERO),
            option(DIAGNOSTIC, "Write a diagnostic log to the results directory", ArgumentArity::ZERO),
        ]
    }

    fn validate_option_arguments(
        &self,
        option: &CommandLineOption,
        arguments: &[String],
    ) -> Result<(), String> {
        let Some(value) = arguments.first() else {
            return Ok(());
        };

        match option.name.as_str() {
            names::TIMEOUT => humantime::parse_duration(value)
                .map(|_| ())
                .map_err(|e| format!("'{}' is not a duration: {}", value, e)),
            names::MINIMUM_EXPECTED_TESTS | names::MAXIMUM_FAILED_TESTS => match value.parse::<u32>() {
                Ok(n) if n > 0 => Ok(()),
                _ => Err(format!("'{}' is not a positive integer", value)),
            },
            names::CLIENT_PORT => value
                .parse::<u16>()
                .map(|_| ())
                .map_err(|_| format!("'{}' is not a valid port", value)),
            names::SERVER if value != "vigil" => {
                Err(format!("unsupported server protocol '{}'", value))
            }
            _ => Ok(()),
        }
    }

    fn validate_command_line_options(&self, options: &CommandLineOptions) -> Result<(), String> {
        if options.is_option_set(names::CLIENT_PORT) && options.is_option_set(names::CLIENT_SOCKET) {
            return Err("'--client-port' and '--client-socket' are mutually exclusive".to_string());
        }
        let has_client =
            options.is_option_set(names::CLIENT_PORT) || options.is_option_set(names::CLIENT_SOCKET);
        if has_client && !options.is_option_set(names::SERVER) {
            return Err("'--client-port' and '--client-socket' require '--server'".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// CommandLineValidator
// =============================================================================

/// Validates resolved options against every provider's declarations.
pub struct CommandLineValidator {
    declared: HashMap<String, (usize, CommandLineOption)>,
    providers: Vec<Arc<dyn CommandLineOptionsProvider>>,
}

impl CommandLineValidator {
    /// Collects the declarations of the given providers.
    ///
    /// When two providers declare the same name, the first one wins.
    pub fn new(providers: Vec<Arc<dyn CommandLineOptionsProvider>>) -> Self {
        let mut declared = HashMap::new();
        for (index, provider) in providers.iter().enumerate() {
            for option in provider.command_line_options() {
                declared.entry(option.name.clone()).or_insert((index, option));
            }
        }
        Self { declared, providers }
    }

    /// Checks every resolved option.
    ///
    /// # Errors
    ///
    /// - `CommandLineError::UnknownOption` - No provider declares the option
    /// - `CommandLineError::Arity` - Wrong number of arguments
    /// - `CommandLineError::InvalidValue` - A provider rejected the value
    pub fn validate(&self, options: &CommandLineOptions) -> Result<(), CommandLineError> {
        for name in options.names() {
            let Some((index, option)) = self.declared.get(name) else {
                return Err(CommandLineError::UnknownOption {
                    name: name.to_string(),
                });
            };

            let arguments = options.try_get_option_argument_list(name).unwrap_or_default();
            if !option.arity.accepts(arguments.len()) {
                return Err(CommandLineError::Arity {
                    name: name.to_string(),
                    expected: option.arity,
                    actual: arguments.len(),
                });
            }

            self.providers[*index]
                .validate_option_arguments(option, arguments)
                .map_err(|message| CommandLineError::invalid_value(name, message))?;
        }

        for provider in &self.providers {
            provider
                .validate_command_line_options(options)
                .map_err(|message| CommandLineError::invalid_value(provider.uid(), message))?;
        }

        Ok(())
    }

    /// Returns every declared option, sorted by name.
    pub fn options(&self) -> Vec<&CommandLineOption> {
        let mut options: Vec<_> = self.declared.values().map(|(_, o)| o).collect();
        options.sort_by(|a, b| a.name.cmp(&b.name));
        options
    }

    /// Returns the declaring provider's uid for an option.
    pub fn provider_of(&self, name: &str) -> Option<&str> {
        self.declared
            .get(normalize(name))
            .map(|(index, _)| self.providers[*index].uid())
    }
}

impl fmt::Debug for CommandLineValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandLineValidator")
            .field("options", &self.declared.len())
            .field("providers", &self.providers.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Junit(ExtensionInfo);

    impl Extension for Junit {
        fn uid(&self) -> &str {
            self.0.uid()
        }
        fn version(&self) -> &str {
            self.0.version()
        }
        fn display_name(&self) -> &str {
            self.0.display_name()
        }
        fn description(&self) -> &str {
            self.0.description()
        }
    }

    impl CommandLineOptionsProvider for Junit {
        fn command_line_options(&self) -> Vec<CommandLineOption> {
            vec![CommandLineOption::new("--report-junit", "Write a JUnit report", ArgumentArity::ZERO_OR_ONE)]
        }

        fn validate_option_arguments(&self, _: &CommandLineOption, arguments: &[String]) -> Result<(), String> {
            match arguments.first() {
                Some(path) if !path.ends_with(".xml") => Err("report must be an .xml file".to_string()),
                _ => Ok(()),
            }
        }
    }

    fn validator() -> CommandLineValidator {
        CommandLineValidator::new(vec![
            Arc::new(PlatformCommandLineProvider::new()),
            Arc::new(Junit(ExtensionInfo::builtin("junit", "JUnit", "JUnit reports"))),
        ])
    }

    #[test]
    fn test_arity_display() {
        assert_eq!(ArgumentArity::ZERO.to_string(), "exactly 0");
        assert_eq!(ArgumentArity::ZERO_OR_ONE.to_string(), "0 to 1");
        assert_eq!(ArgumentArity::ONE_OR_MORE.to_string(), "at least 1");
        assert!(ArgumentArity::ZERO_OR_MORE.accepts(42));
        assert!(!ArgumentArity::EXACTLY_ONE.accepts(2));
    }

    #[test]
    fn test_from_args() {
        let options =
            CommandLineOptions::from_args(["--filter", "a.*|b", "--timeout=5s", "-no-banner", "--filter", "c"])
                .unwrap();

        assert_eq!(
            options.try_get_option_argument_list("filter").unwrap(),
            &["a.*|b".to_string(), "c".to_string()]
        );
        assert_eq!(options.get_single("--timeout"), Some("5s"));
        assert_eq!(options.try_get_option_argument_list("no-banner"), Some(&[][..]));
        assert_eq!(options.try_get_option_argument_list("missing"), None);
    }

    #[test]
    fn test_from_args_rejects_leading_value() {
        let err = CommandLineOptions::from_args(["stray"]).unwrap_err();
        assert_eq!(
            err,
            CommandLineError::UnexpectedArgument {
                token: "stray".to_string()
            }
        );
    }

    #[test]
    fn test_typed_getters() {
        let options = CommandLineOptions::new()
            .with(names::TIMEOUT, ["1m 30s"])
            .with(names::MAXIMUM_FAILED_TESTS, ["three"]);

        assert_eq!(
            options.parse_duration(names::TIMEOUT).unwrap(),
            Some(Duration::from_secs(90))
        );
        assert!(options.parse_single::<u32>(names::MAXIMUM_FAILED_TESTS).is_err());
        assert_eq!(options.parse_single::<u32>(names::MINIMUM_EXPECTED_TESTS).unwrap(), None);
    }

    #[test]
    fn test_validator_accepts_known_options() {
        let options = CommandLineOptions::new()
            .with(names::FILTER, ["math.*"])
            .with("report-junit", ["out.xml"]);
        validator().validate(&options).unwrap();
        assert_eq!(validator().provider_of("--report-junit"), Some("junit"));
    }

    #[test]
    fn test_validator_errors() {
        let v = validator();

        let unknown = CommandLineOptions::new().with("bogus", Vec::<String>::new());
        assert!(matches!(v.validate(&unknown), Err(CommandLineError::UnknownOption { .. })));

        let arity = CommandLineOptions::new().with(names::TIMEOUT, Vec::<String>::new());
        assert!(matches!(
            v.validate(&arity),
            Err(CommandLineError::Arity { actual: 0, .. })
        ));

        let value = CommandLineOptions::new().with(names::TIMEOUT, ["soon"]);
        assert!(matches!(v.validate(&value), Err(CommandLineError::InvalidValue { .. })));

        let provider = CommandLineOptions::new().with("report-junit", ["out.txt"]);
        assert!(matches!(v.validate(&provider), Err(CommandLineError::InvalidValue { name, .. }) if name == "report-junit"));

        let combo = CommandLineOptions::new().with(names::CLIENT_PORT, ["5000"]);
        assert!(v.validate(&combo).is_err());
    }
}
