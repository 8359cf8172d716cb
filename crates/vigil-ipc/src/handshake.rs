// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection handshake.
//!
//! Both peers exchange a [`HandshakeInfo`] before any other message. The
//! connection is usable only if the `ProtocolVersion` entries are equal
//! (ordinal, case-sensitive).

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{IpcError, IpcResult};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: &str = "1.0.0";

// =============================================================================
// HandshakeKey
// =============================================================================

/// Well-known handshake keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum HandshakeKey {
    /// Process id.
    Pid = 0,
    /// CPU architecture.
    Architecture = 1,
    /// Platform name and version.
    Framework = 2,
    /// Operating system.
    Os = 3,
    /// Wire protocol version.
    ProtocolVersion = 4,
    /// Role of the peer (`testhost`, `listener`, ...).
    HostType = 5,
    /// Path of the peer's executable.
    ModulePath = 6,
    /// Execution id of the run.
    ExecutionId = 7,
}

impl HandshakeKey {
    /// All well-known keys.
    pub const ALL: [HandshakeKey; 8] = [
        HandshakeKey::Pid,
        HandshakeKey::Architecture,
        HandshakeKey::Framework,
        HandshakeKey::Os,
        HandshakeKey::ProtocolVersion,
        HandshakeKey::HostType,
        HandshakeKey::ModulePath,
        HandshakeKey::ExecutionId,
    ];

    /// Returns the wire code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decodes a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

impl fmt::Display for HandshakeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeKey::Pid => "pid",
            HandshakeKey::Architecture => "architecture",
            HandshakeKey::Framework => "framework",
            HandshakeKey::Os => "os",
            HandshakeKey::ProtocolVersion => "protocol_version",
            HandshakeKey::HostType => "host_type",
            HandshakeKey::ModulePath => "module_path",
            HandshakeKey::ExecutionId => "execution_id",
        };
        f.write_str(name)
    }
}

// =============================================================================
// HandshakeInfo
// =============================================================================

/// Key/value properties a peer announces. Unknown keys are preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeInfo {
    properties: BTreeMap<u8, String>,
}

impl HandshakeInfo {
    /// Creates an empty handshake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Describes this process in the given role.
    pub fn local(host_type: &str, execution_id: Option<&str>) -> Self {
        let mut info = Self::new()
            .with(HandshakeKey::Pid, std::process::id().to_string())
            .with(HandshakeKey::Architecture, std::env::consts::ARCH)
            .with(HandshakeKey::Framework, format!("{} {}", vigil_core::NAME, vigil_core::VERSION))
            .with(HandshakeKey::Os, std::env::consts::OS)
            .with(HandshakeKey::ProtocolVersion, PROTOCOL_VERSION)
            .with(HandshakeKey::HostType, host_type);
        if let Some(path) = std::env::current_exe().ok().and_then(|p| p.to_str().map(String::from)) {
            info = info.with(HandshakeKey::ModulePath, path);
        }
        if let Some(id) = execution_id {
            info = info.with(HandshakeKey::ExecutionId, id);
        }
        info
    }

    /// Sets a well-known key, builder style.
    pub fn with(mut self, key: HandshakeKey, value: impl Into<String>) -> Self {
        self.properties.insert(key.code(), value.into());
        self
    }

    /// Sets a raw key.
    pub fn insert_raw(&mut self, key: u8, value: impl Into<String>) {
        self.properties.insert(key, value.into());
    }

    /// Returns a well-known key's value.
    pub fn get(&self, key: HandshakeKey) -> Option<&str> {
        self.properties.get(&key.code()).map(String::as_str)
    }

    /// Returns a raw key's value.
    pub fn get_raw(&self, key: u8) -> Option<&str> {
        self.properties.get(&key).map(String::as_str)
    }

    /// Returns the advertised protocol version.
    pub fn protocol_version(&self) -> Option<&str> {
        self.get(HandshakeKey::ProtocolVersion)
    }

    /// Iterates over raw entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = (u8, &str)> {
        self.properties.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Checks that `remote` speaks the same protocol version.
    ///
    /// # Errors
    ///
    /// Returns `IpcError::VersionMismatch` if the versions differ or either
    /// side omits its version.
    pub fn check_compatible(&self, remote: &HandshakeInfo) -> IpcResult<()> {
        match (self.protocol_version(), remote.protocol_version()) {
            (Some(local), Some(theirs)) if local == theirs => Ok(()),
            (local, theirs) => Err(IpcError::VersionMismatch {
                local: local.unwrap_or("<missing>").to_string(),
                remote: theirs.unwrap_or("<missing>").to_string(),
            }),
        }
    }
}

impl FromIterator<(u8, String)> for HandshakeInfo {
    fn from_iter<I: IntoIterator<Item = (u8, String)>>(iter: I) -> Self {
        Self {
            properties: iter.into_iter().collect(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
