// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Message types carried by the message bus.
//!
//! Producers publish [`BusMessage`] values. Consumers select the ones they
//! want by [`DataKind`], which is the runtime type tag of a message.
//!
//! # Message Categories
//!
//! - **TestNodeUpdate**: full snapshot of one test node's state
//! - **SessionFileArtifact**: a file produced at session scope
//!
//! # Example
//!
//! ```rust,ignore
//! use vigil_core::message::{BusMessage, TestNodeUpdateMessage};
//!
//! let msg = BusMessage::node_update(session_uid, node, None);
//! assert_eq!(msg.kind(), DataKind::TestNodeUpdate);
//! ```

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::TestNode;
use crate::types::{SessionUid, TestNodeUid};

// =============================================================================
// DataKind
// =============================================================================

/// Runtime type of a bus message, declared by producers and consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// [`TestNodeUpdateMessage`].
    TestNodeUpdate,
    /// [`SessionFileArtifactMessage`].
    SessionFileArtifact,
}

impl DataKind {
    /// Returns the kind name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::TestNodeUpdate => "TestNodeUpdateMessage",
            DataKind::SessionFileArtifact => "SessionFileArtifactMessage",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// TestNodeUpdateMessage
// =============================================================================

/// A full snapshot of one test node's current state.
///
/// Consumers treat the latest message for a given uid as authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestNodeUpdateMessage {
    /// Session the update belongs to.
    pub session_uid: SessionUid,
    /// The node snapshot.
    pub test_node: TestNode,
    /// Parent grouping node, if any.
    pub parent_uid: Option<TestNodeUid>,
}

impl TestNodeUpdateMessage {
    /// Creates an update message.
    pub fn new(session_uid: SessionUid, test_node: TestNode, parent_uid: Option<TestNodeUid>) -> Self {
        Self {
            session_uid,
            test_node,
            parent_uid,
        }
    }
}

// =============================================================================
// SessionFileArtifactMessage
// =============================================================================

/// A file produced at session scope (not tied to a single node).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFileArtifactMessage {
    /// Session the artifact belongs to.
    pub session_uid: SessionUid,
    /// Path to the file.
    pub path: PathBuf,
    /// Display name.
    pub display_name: String,
    /// Optional description.
    pub description: Option<String>,
    /// When the artifact was reported.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// BusMessage
// =============================================================================

/// Messages sent through the message bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusMessage {
    /// A test node update.
    TestNodeUpdate(TestNodeUpdateMessage),
    /// A session-scoped file artifact.
    SessionFileArtifact(SessionFileArtifactMessage),
}

impl BusMessage {
    /// Creates a test node update message.
    pub fn node_update(
        session_uid: SessionUid,
        test_node: TestNode,
        parent_uid: Option<TestNodeUid>,
    ) -> Self {
        Self::TestNodeUpdate(TestNodeUpdateMessage::new(session_uid, test_node, parent_uid))
    }

    /// Creates a session file artifact message.
    pub fn session_artifact(
        session_uid: SessionUid,
        path: impl Into<PathBuf>,
        display_name: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        Self::SessionFileArtifact(SessionFileArtifactMessage {
            session_uid,
            path: path.into(),
            display_name: display_name.into(),
            description,
            timestamp: Utc::now(),
        })
    }

    /// Returns the runtime kind of the message.
    pub fn kind(&self) -> DataKind {
        match self {
            BusMessage::TestNodeUpdate(_) => DataKind::TestNodeUpdate,
            BusMessage::SessionFileArtifact(_) => DataKind::SessionFileArtifact,
        }
    }

    /// Returns the session the message belongs to.
    pub fn session_uid(&self) -> &SessionUid {
        match self {
            BusMessage::TestNodeUpdate(m) => &m.session_uid,
            BusMessage::SessionFileArtifact(m) => &m.session_uid,
        }
    }

    /// Returns the node update, if this is one.
    pub fn as_node_update(&self) -> Option<&TestNodeUpdateMessage> {
        match self {
            BusMessage::TestNodeUpdate(m) => Some(m),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::TestNodeStateProperty;

    #[test]
    fn test_message_kind_and_session() {
        let session = SessionUid::new("s-1");
        let node = TestNode::new("t", "t", TestNodeStateProperty::InProgress);
        let msg = BusMessage::node_update(session.clone(), node, None);

        assert_eq!(msg.kind(), DataKind::TestNodeUpdate);
        assert_eq!(msg.session_uid(), &session);
        assert!(msg.as_node_update().is_some());

        let artifact = BusMessage::session_artifact(session, "/tmp/out.log", "out.log", None);
        assert_eq!(artifact.kind(), DataKind::SessionFileArtifact);
        assert!(artifact.as_node_update().is_none());
    }
}
