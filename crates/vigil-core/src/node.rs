// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Test nodes: one discoverable or executable unit in the test tree.

use serde::{Deserialize, Serialize};

use crate::property::{Property, PropertyBag, StateKind, TestNodeStateProperty};
use crate::types::TestNodeUid;

/// A node in the test tree with its current property snapshot.
///
/// Nodes are values: every update publishes a complete snapshot, produced
/// by [`TestNode::transition`] so that previously attached properties are
/// carried forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestNode {
    /// Stable identity.
    pub uid: TestNodeUid,
    /// Name shown to users.
    pub display_name: String,
    /// State plus additive properties.
    pub properties: PropertyBag,
}

impl TestNode {
    /// Creates a node in the given state.
    pub fn new(
        uid: impl Into<TestNodeUid>,
        display_name: impl Into<String>,
        state: TestNodeStateProperty,
    ) -> Self {
        Self {
            uid: uid.into(),
            display_name: display_name.into(),
            properties: PropertyBag::new(state),
        }
    }

    /// Appends a property, builder style.
    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Returns the next snapshot of this node in a new state.
    pub fn transition(&self, state: TestNodeStateProperty) -> Self {
        Self {
            uid: self.uid.clone(),
            display_name: self.display_name.clone(),
            properties: self.properties.with_state(state),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> &TestNodeStateProperty {
        self.properties.state()
    }

    /// Returns the current state discriminant.
    pub fn state_kind(&self) -> StateKind {
        self.properties.state().kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_is_a_full_snapshot() {
        let node = TestNode::new("a::b", "b", TestNodeStateProperty::InProgress)
            .with_property(Property::Category("unit".into()));

        let done = node
            .transition(TestNodeStateProperty::passed())
            .with_property(Property::StandardOutput("ok".into()));

        assert_eq!(node.state_kind(), StateKind::InProgress);
        assert_eq!(done.state_kind(), StateKind::Passed);
        assert_eq!(done.uid, node.uid);
        assert_eq!(done.properties.len(), 2);
    }
}
