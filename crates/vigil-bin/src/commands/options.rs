// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `options` command.

use serde::Serialize;

use vigil_core::{CommandLineOptions, CommandLineValidator, ExecutionId};

use crate::cli::{OptionsArgs, OutputFormat};
use crate::error::{BinError, BinResult};
use crate::runtime::TestApplication;

/// One listed option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionRow {
    /// Option name, without dashes.
    pub name: String,
    /// Accepted argument count.
    pub arity: String,
    /// Uid of the declaring provider.
    pub provider: String,
    /// Declared by the platform.
    pub builtin: bool,
    /// Hidden from help.
    pub hidden: bool,
    /// Help text.
    pub description: String,
}

/// Prints the options the platform and the activated extensions declare.
pub fn list_options(args: OptionsArgs, app: TestApplication) -> BinResult<()> {
    let host = app.build_host(CommandLineOptions::new(), ExecutionId::generate())?;
    let validator = CommandLineValidator::new(host.option_providers());
    let rows = option_rows(&validator, args.all);

    match args.format {
        OutputFormat::Text => {
            let width = rows.iter().map(|r| r.name.len()).max().unwrap_or(0) + 2;
            for row in &rows {
                println!("  --{:<width$} {}", row.name, row.description, width = width);
                println!("    {:<width$} arity: {}, provider: {}", "", row.arity, row.provider, width = width);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::to_string_pretty(&rows)
                .map_err(|e| BinError::init(format!("Failed to render options: {}", e)))?;
            println!("{}", output);
        }
        OutputFormat::Yaml => {
            let output = serde_yaml::to_string(&rows)
                .map_err(|e| BinError::init(format!("Failed to render options: {}", e)))?;
            print!("{}", output);
        }
    }
    Ok(())
}

/// Collects the declared options, sorted by name; hidden ones only with `all`.
pub fn option_rows(validator: &CommandLineValidator, all: bool) -> Vec<OptionRow> {
    validator
        .options()
        .into_iter()
        .filter(|option| all || !option.is_hidden)
        .map(|option| OptionRow {
            name: option.name.clone(),
            arity: option.arity.to_string(),
            provider: validator.provider_of(&option.name).unwrap_or_default().to_string(),
            builtin: option.is_builtin,
            hidden: option.is_hidden,
            description: option.description.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vigil_core::command_line::names;
    use vigil_core::{CommandLineOptionsProvider, PlatformCommandLineProvider};

    #[test]
    fn test_platform_options_listed() {
        let platform: Arc<dyn CommandLineOptionsProvider> = Arc::new(PlatformCommandLineProvider::new());
        let validator = CommandLineValidator::new(vec![platform]);
        let rows = option_rows(&validator, true);

        let timeout = rows.iter().find(|r| r.name == names::TIMEOUT).unwrap();
        assert!(timeout.builtin);
        assert_eq!(timeout.arity, "exactly 1");

        let mut sorted = rows.clone();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(rows, sorted);

        let visible = option_rows(&validator, false);
        assert!(visible.iter().all(|r| !r.hidden));
        assert!(visible.len() <= rows.len());
    }
}
