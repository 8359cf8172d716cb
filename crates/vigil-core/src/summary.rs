// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Run summary aggregation.
//!
//! [`TestRunSummaryConsumer`] keeps the latest state of every node it has
//! seen. Updates are full snapshots, so the last message for a uid wins and
//! counting is done over the final map, never over the message stream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::bus::{DataConsumer, ProducerInfo};
use crate::cancellation::TestRunCancellationToken;
use crate::error::HandlerError;
use crate::extension::{Extension, ExtensionInfo};
use crate::message::{BusMessage, DataKind};
use crate::property::StateKind;
use crate::types::TestNodeUid;

// =============================================================================
// TestRunSummary
// =============================================================================

/// Counts of node states at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunSummary {
    /// Nodes seen in any state.
    pub total: usize,
    /// Nodes that passed.
    pub passed: usize,
    /// Nodes that failed.
    pub failed: usize,
    /// Nodes that were skipped.
    pub skipped: usize,
    /// Nodes that timed out.
    pub timed_out: usize,
    /// Nodes that were cancelled.
    pub cancelled: usize,
    /// Nodes that errored.
    pub errored: usize,
    /// Nodes only discovered.
    pub discovered: usize,
    /// Nodes still in progress.
    pub in_progress: usize,
    /// Wall-clock duration of the run.
    #[serde(with = "humantime_duration")]
    pub duration: Duration,
}

impl TestRunSummary {
    /// Failed, timed-out and errored nodes.
    pub fn failures(&self) -> usize {
        self.failed + self.timed_out + self.errored
    }

    /// Nodes that reached a final state.
    pub fn executed(&self) -> usize {
        self.passed + self.failures() + self.skipped + self.cancelled
    }

    /// Returns `true` if nothing failed.
    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }

    fn record(&mut self, kind: StateKind) {
        self.total += 1;
        match kind {
            StateKind::Discovered => self.discovered += 1,
            StateKind::InProgress => self.in_progress += 1,
            StateKind::Passed => self.passed += 1,
            StateKind::Failed => self.failed += 1,
            StateKind::Skipped => self.skipped += 1,
            StateKind::Cancelled => self.cancelled += 1,
            StateKind::Timeout => self.timed_out += 1,
            StateKind::Error => self.errored += 1,
        }
    }
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// TestRunSummaryConsumer
// =============================================================================

/// Consumer that tracks the latest state of every node.
#[derive(Debug)]
pub struct TestRunSummaryConsumer {
    info: ExtensionInfo,
    latest: DashMap<TestNodeUid, StateKind>,
    started: Instant,
}

impl TestRunSummaryConsumer {
    /// Uid of the summary consumer.
    pub const UID: &'static str = "run-summary";

    /// Creates a consumer; the run duration is measured from here.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            info: ExtensionInfo::builtin(Self::UID, "Run summary", "Counts test results"),
            latest: DashMap::new(),
            started: Instant::now(),
        })
    }

    /// Returns the latest state recorded for a node.
    pub fn state_of(&self, uid: &TestNodeUid) -> Option<StateKind> {
        self.latest.get(uid).map(|entry| *entry.value())
    }

    /// Builds a summary from the current map.
    pub fn summary(&self) -> TestRunSummary {
        let mut summary = TestRunSummary::default();
        for entry in self.latest.iter() {
            summary.record(*entry.value());
        }
        summary.duration = self.started.elapsed();
        summary
    }
}

impl Extension for TestRunSummaryConsumer {
    fn uid(&self) -> &str {
        self.info.uid()
    }
    fn version(&self) -> &str {
        self.info.version()
    }
    fn display_name(&self) -> &str {
        self.info.display_name()
    }
    fn description(&self) -> &str {
        self.info.description()
    }
}

#[async_trait]
impl DataConsumer for TestRunSummaryConsumer {
    fn data_types_consumed(&self) -> &[DataKind] {
        &[DataKind::TestNodeUpdate]
    }

    async fn consume(
        &self,
        _producer: &ProducerInfo,
        message: &BusMessage,
        _cancellation: &TestRunCancellationToken,
    ) -> Result<(), HandlerError> {
        if let Some(update) = message.as_node_update() {
            self.latest
                .insert(update.test_node.uid.clone(), update.test_node.state_kind());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TestNode;
    use crate::property::TestNodeStateProperty;
    use crate::types::SessionUid;

    async fn feed(consumer: &TestRunSummaryConsumer, uid: &str, state: TestNodeStateProperty) {
        let producer = ProducerInfo {
            uid: "p".to_string(),
            display_name: "p".to_string(),
        };
        let msg = BusMessage::node_update(SessionUid::new("s"), TestNode::new(uid, uid, state), None);
        consumer
            .consume(&producer, &msg, &TestRunCancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_last_state_wins() {
        let consumer = TestRunSummaryConsumer::new();
        feed(&consumer, "a", TestNodeStateProperty::InProgress).await;
        feed(&consumer, "a", TestNodeStateProperty::passed()).await;
        feed(&consumer, "b", TestNodeStateProperty::InProgress).await;
        feed(&consumer, "b", TestNodeStateProperty::failed("boom")).await;
        feed(&consumer, "c", TestNodeStateProperty::skipped(None)).await;

        let summary = consumer.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.in_progress, 0);
        assert_eq!(summary.executed(), 3);
        assert!(!summary.is_success());
        assert_eq!(consumer.state_of(&TestNodeUid::new("a")), Some(StateKind::Passed));
    }
}
