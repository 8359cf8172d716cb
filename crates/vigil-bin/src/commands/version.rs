// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use crate::cli::Cli;
use crate::error::BinResult;

/// Executes the `version` command to display version information.
pub fn version(_cli: &Cli) -> BinResult<()> {
    println!("vigil - test platform host");
    println!();
    println!("Version Information:");
    println!("  vigil-bin:    {}", env!("CARGO_PKG_VERSION"));
    println!("  vigil-core:   {}", vigil_core::VERSION);
    println!("  vigil-ipc:    {}", vigil_ipc::VERSION);
    println!("  vigil-config: {}", vigil_config::VERSION);
    println!();
    println!("Protocol:");
    println!("  IPC version:  {}", vigil_ipc::PROTOCOL_VERSION);
    println!("  Max frame:    {} bytes", vigil_ipc::DEFAULT_MAX_FRAME_SIZE);
    println!();
    println!("Build Information:");
    println!("  Rust Edition: 2024");
    println!("  Target:       {}", std::env::consts::ARCH);
    println!("  OS:           {}", std::env::consts::OS);
    println!();
    println!("License: PolyForm Noncommercial License 1.0.0");
    println!("Copyright (c) 2025 Sylvex. All rights reserved.");

    Ok(())
}
