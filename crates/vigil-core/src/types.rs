// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core identifier types for vigil.
//!
//! - [`TestNodeUid`]: stable identity of one test node
//! - [`SessionUid`]: identity of one discovery + execution session
//! - [`ExecutionId`]: identity of one host process run, shared with IPC peers

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// TestNodeUid
// =============================================================================

/// An opaque, stable identifier for one test node.
///
/// Equality is by value. A test node keeps the same uid across every
/// update published for it.
///
/// # Examples
///
/// ```
/// use vigil_core::types::TestNodeUid;
///
/// let uid = TestNodeUid::new("math::adds_numbers");
/// assert_eq!(uid.as_str(), "math::adds_numbers");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestNodeUid(String);

impl TestNodeUid {
    /// Creates a new test node uid.
    #[inline]
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// Returns the uid as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the uid and returns the inner string.
    #[inline]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TestNodeUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TestNodeUid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TestNodeUid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for TestNodeUid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// SessionUid
// =============================================================================

/// Identifier of a single test session.
///
/// Born when the session starts, referenced by every message published in
/// it, and retired when the session closes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionUid(String);

impl SessionUid {
    /// Creates a session uid from an existing value.
    #[inline]
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// Generates a fresh, time-ordered session uid.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the uid as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the uid and returns the inner string.
    #[inline]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionUid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionUid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionUid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// ExecutionId
// =============================================================================

/// Identifier of one host process execution.
///
/// Exchanged during the IPC handshake and echoed on every reported batch so
/// an external runner can correlate several hosts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Creates an execution id from an existing value.
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random execution id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ExecutionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_uid_value_equality() {
        let a = TestNodeUid::new("suite::case");
        let b: TestNodeUid = "suite::case".into();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "suite::case");
        assert_eq!(b.into_inner(), "suite::case");
    }

    #[test]
    fn test_session_uid_generate_is_unique() {
        let a = SessionUid::generate();
        let b = SessionUid::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let uid = TestNodeUid::new("x");
        assert_eq!(serde_json::to_string(&uid).unwrap(), "\"x\"");
        let id: ExecutionId = serde_json::from_str("\"run-1\"").unwrap();
        assert_eq!(id.as_str(), "run-1");
    }
}
