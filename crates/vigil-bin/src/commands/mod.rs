// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.
//!
//! - `run`: Run the registered tests
//! - `listen`: Print what connected test hosts report
//! - `validate`: Validate the configuration file
//! - `options`: List accepted command-line options
//! - `version`: Show version information

mod listen;
mod options;
mod run;
mod validate;
mod version;

pub use listen::{listen, EventPrinter};
pub use options::list_options;
pub use run::run;
pub use validate::validate;
pub use version::version;

use std::path::Path;

use vigil_config::{ConfigLoader, VigilConfig};
use vigil_core::ExitCode;

use crate::cli::{Cli, Commands};
use crate::error::BinResult;
use crate::logging::init_logging;
use crate::runtime::TestApplication;

/// Executes the appropriate command based on CLI arguments.
///
/// Loads the configuration first; a missing `--config` file is allowed and
/// yields the defaults.
pub async fn execute(cli: Cli, app: TestApplication) -> BinResult<ExitCode> {
    let config = ConfigLoader::new().load_or_default(cli.config.as_deref())?;
    let app = app.with_config(config);

    match cli.effective_command() {
        Commands::Run(args) => run::run(&cli, args, app).await,
        Commands::Listen(args) => {
            init_command_logging(&cli, app.config(), None)?;
            listen::listen(args, app.config()).await?;
            Ok(ExitCode::Success)
        }
        Commands::Validate(args) => {
            validate::validate(&cli, args, app.config())?;
            Ok(ExitCode::Success)
        }
        Commands::Options(args) => {
            options::list_options(args, app)?;
            Ok(ExitCode::Success)
        }
        Commands::Version => {
            version::version(&cli)?;
            Ok(ExitCode::Success)
        }
    }
}

/// Installs logging from the CLI flags, falling back to the `logging`
/// config section.
pub(crate) fn init_command_logging(cli: &Cli, config: &VigilConfig, diagnostic_file: Option<&Path>) -> BinResult<()> {
    let level = cli
        .effective_log_level()
        .unwrap_or_else(|| config.logging.level.as_str());
    let format = cli.log_format.map(Into::into).unwrap_or(config.logging.format);
    init_logging(level, format, diagnostic_file)
}
