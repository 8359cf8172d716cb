// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.
//!
//! The configuration was already loaded and validated by the time this
//! runs; the command reports a summary plus non-fatal warnings.

use vigil_config::{ConfigFormat, TransportKind, VigilConfig};

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::BinResult;

/// Executes the `validate` command.
pub fn validate(cli: &Cli, args: ValidateArgs, config: &VigilConfig) -> BinResult<()> {
    let source = cli
        .config
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults)".to_string());
    let warnings = collect_warnings(config);
    let platform = &config.platform;

    match args.format {
        OutputFormat::Text => {
            println!("✓ Configuration is valid: {}", source);
            println!();
            println!("Summary:");
            println!(
                "  Workers:            {}",
                platform.worker_count.map_or_else(|| "auto".to_string(), |n| n.to_string())
            );
            println!(
                "  Test timeout:       {}",
                platform
                    .test_timeout
                    .map_or_else(|| "none".to_string(), |t| humantime::format_duration(t).to_string())
            );
            println!("  Delivery:           {}", platform.delivery.as_str());
            println!("  Results directory:  {}", platform.results_directory.display());
            println!("  IPC endpoint:       {}", ipc_summary(config));
            println!("  Log level:          {}", config.logging.level);
            println!("  Extensions:         {}", config.enabled_extensions().join(", "));

            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  ⚠ {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Parsed configuration:");
                print!("{}", ConfigFormat::Yaml.render(config)?);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "valid": true,
                "config_path": source,
                "summary": {
                    "worker_count": platform.worker_count,
                    "test_timeout": platform.test_timeout.map(|t| humantime::format_duration(t).to_string()),
                    "delivery": platform.delivery.as_str(),
                    "results_directory": platform.results_directory.display().to_string(),
                    "ipc_endpoint": ipc_summary(config),
                    "extensions": config.enabled_extensions(),
                },
                "warnings": warnings,
                "config": if args.show_config { Some(config) } else { None },
            });
            println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
        }
        OutputFormat::Yaml => {
            println!("valid: true");
            println!("config_path: {}", source);
            println!("delivery: {}", platform.delivery.as_str());
            println!("ipc_endpoint: {}", ipc_summary(config));
            if !warnings.is_empty() {
                println!("warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
            if args.show_config {
                println!("config:");
                for line in ConfigFormat::Yaml.render(config)?.lines() {
                    println!("  {}", line);
                }
            }
        }
    }

    Ok(())
}

fn ipc_summary(config: &VigilConfig) -> String {
    let ipc = &config.ipc;
    match (ipc.transport, &ipc.socket_path) {
        (TransportKind::Unix, Some(path)) => format!("unix:{}", path.display()),
        _ if ipc.port == 0 => format!("{} (no port; pass --client-port)", ipc.host),
        _ => format!("{}:{}", ipc.host, ipc.port),
    }
}

/// Non-fatal issues worth pointing out.
fn collect_warnings(config: &VigilConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let platform = &config.platform;

    if let (Some(min), Some(max)) = (platform.minimum_expected_tests, platform.maximum_failed_tests) {
        if max > min && min > 0 {
            warnings.push(format!(
                "maximum_failed_tests ({}) exceeds minimum_expected_tests ({})",
                max, min
            ));
        }
    }

    let disabled: Vec<_> = config
        .extensions
        .iter()
        .filter(|e| !e.enabled)
        .map(|e| e.uid.as_str())
        .collect();
    if !disabled.is_empty() {
        warnings.push(format!("Disabled extensions: {}", disabled.join(", ")));
    }

    if let Some(ref path) = config.logging.diagnostic_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                warnings.push(format!(
                    "Diagnostic log directory does not exist and will be created: {}",
                    parent.display()
                ));
            }
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_config::ExtensionEntry;

    #[test]
    fn test_default_config_has_no_warnings() {
        assert!(collect_warnings(&VigilConfig::default()).is_empty());
    }

    #[test]
    fn test_disabled_extensions_warned() {
        let mut config = VigilConfig::default();
        let mut entry = ExtensionEntry::new("trx-report");
        entry.enabled = false;
        config.extensions.push(entry);

        let warnings = collect_warnings(&config);
        assert_eq!(warnings, vec!["Disabled extensions: trx-report".to_string()]);
    }

    #[test]
    fn test_ipc_summary() {
        let mut config = VigilConfig::default();
        config.ipc.port = 5050;
        assert_eq!(ipc_summary(&config), "127.0.0.1:5050");
    }
}
