// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # vigil-config
//!
//! Configuration for the vigil test platform.
//!
//! ## Features
//!
//! - **Schema Definition**: platform, IPC, logging and extension sections with validation
//! - **Multi-Format Support**: YAML, TOML, and JSON configuration files
//! - **Environment Overrides**: `VIGIL_*` variables override file values
//! - **Placeholders**: `${VAR}` and `${VAR:default}` inside config files
//!
//! ## Quick Start
//!
//! ```no_run
//! use vigil_config::loader::load_config;
//!
//! let config = load_config("vigil.yaml").unwrap();
//!
//! println!("Delivery: {}", config.platform.delivery.as_str());
//! println!("Extensions: {:?}", config.enabled_extensions());
//! ```
//!
//! ## Example File
//!
//! ```yaml
//! platform:
//!   worker_count: 8
//!   test_timeout: 30s
//!   delivery: queued
//!   maximum_failed_tests: 5
//!
//! ipc:
//!   host: "${VIGIL_HOST:127.0.0.1}"
//!   port: 9000
//!
//! logging:
//!   level: debug
//!
//! extensions:
//!   - uid: trx-report
//! ```
//!
//! ## Environment Variables
//!
//! ```text
//! VIGIL_WORKER_COUNT=4
//! VIGIL_IPC_PORT=9090
//! VIGIL_LOG_LEVEL=debug
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod error;
pub mod loader;
pub mod schema;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{ConfigError, ConfigResult};
pub use schema::{
    DeliveryMode, ExtensionEntry, IpcConfig, LogFormat, LogLevel, LoggingConfig, PlatformConfig,
    TransportKind, VigilConfig,
};

pub use loader::{
    load_config, load_config_str, ConfigFormat, ConfigLoader, ConfigLoaderBuilder, EnvSource,
    MapEnv, ProcessEnv,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

// =============================================================================
// Prelude
// =============================================================================

/// Convenience re-exports for common use cases.
pub mod prelude {
    pub use crate::error::{ConfigError, ConfigResult};
    pub use crate::loader::{load_config, ConfigLoader};
    pub use crate::schema::{DeliveryMode, LogFormat, LogLevel, VigilConfig};
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name() {
        assert_eq!(NAME, "vigil-config");
    }

    #[test]
    fn test_prelude_imports() {
        use prelude::*;
        let config = VigilConfig::default();
        assert_eq!(config.logging.format, LogFormat::Text);
    }
}
