// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `run` command.

use std::path::PathBuf;

use tracing::debug;

use vigil_core::command_line::names;
use vigil_core::{CommandLineOptions, ExecutionId, ExitCode};

use crate::cli::{Cli, RunArgs};
use crate::error::BinResult;
use crate::logging::diagnostic_file_name;
use crate::runtime::TestApplication;
use crate::shutdown::ShutdownCoordinator;

use super::init_command_logging;

/// Executes the `run` command and returns the process exit code.
pub async fn run(cli: &Cli, args: RunArgs, app: TestApplication) -> BinResult<ExitCode> {
    let options = args.to_options()?;
    let execution_id = ExecutionId::generate();

    let diagnostic = diagnostic_path(&app, &options, &execution_id);
    init_command_logging(cli, app.config(), diagnostic.as_deref())?;
    if let Some(ref path) = diagnostic {
        debug!(path = %path.display(), "Writing diagnostic log");
    }

    let coordinator = ShutdownCoordinator::new();
    let listener = coordinator.spawn_signal_listener();

    let result = app.run(options, execution_id, coordinator.token()).await;
    listener.abort();

    Ok(result?.exit_code)
}

/// `--diagnostic` writes into the results directory; otherwise the
/// configured `logging.diagnostic_file`, if any.
fn diagnostic_path(app: &TestApplication, options: &CommandLineOptions, execution_id: &ExecutionId) -> Option<PathBuf> {
    if options.is_option_set(names::DIAGNOSTIC) {
        let dir = app.results_directory(options);
        return Some(diagnostic_file_name(&dir, execution_id.as_str()));
    }
    app.config().logging.diagnostic_file.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use vigil_core::TestRegistry;

    #[test]
    fn test_diagnostic_path() {
        let app = TestApplication::new(TestRegistry::new());
        let id = ExecutionId::new("run1");

        assert!(diagnostic_path(&app, &CommandLineOptions::new(), &id).is_none());

        let options = CommandLineOptions::new()
            .with("diagnostic", Vec::<String>::new())
            .with("results-directory", ["out"]);
        assert_eq!(
            diagnostic_path(&app, &options, &id).unwrap(),
            Path::new("out").join("vigil_run1.diag")
        );
    }
}
