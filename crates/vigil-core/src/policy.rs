// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Run policies driven by bus traffic.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::bus::{DataConsumer, ProducerInfo};
use crate::cancellation::TestRunCancellationToken;
use crate::capability::GracefulStopCapability;
use crate::error::HandlerError;
use crate::extension::{Extension, ExtensionInfo};
use crate::message::{BusMessage, DataKind};
use crate::property::StateKind;

/// Stops the run once a number of tests have failed.
///
/// Counts final failure states (failed, timed out, errored) and asks the
/// framework's graceful stop capability to stop when the threshold is
/// reached. Without that capability the policy only records the trip and
/// the run is not reported as stopped.
pub struct MaximumFailedTestsPolicy {
    info: ExtensionInfo,
    threshold: usize,
    failures: AtomicUsize,
    tripped: AtomicBool,
    stopped: AtomicBool,
    stop: Option<Arc<dyn GracefulStopCapability>>,
}

impl MaximumFailedTestsPolicy {
    /// Uid of the policy consumer.
    pub const UID: &'static str = "maximum-failed-tests";

    /// Creates the policy.
    pub fn new(threshold: usize, stop: Option<Arc<dyn GracefulStopCapability>>) -> Arc<Self> {
        Arc::new(Self {
            info: ExtensionInfo::builtin(
                Self::UID,
                "Maximum failed tests",
                "Stops the run after too many failures",
            ),
            threshold: threshold.max(1),
            failures: AtomicUsize::new(0),
            tripped: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop,
        })
    }

    /// Returns `true` once the threshold has been reached.
    pub fn has_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Returns `true` if the trip actually stopped test execution.
    pub fn has_stopped_execution(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Returns the number of failures counted so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

impl Extension for MaximumFailedTestsPolicy {
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
impl DataConsumer for MaximumFailedTestsPolicy {
    fn data_types_consumed(&self) -> &[DataKind] {
        &[DataKind::TestNodeUpdate]
    }

    async fn consume(
        &self,
        _producer: &ProducerInfo,
        message: &BusMessage,
        _cancellation: &TestRunCancellationToken,
    ) -> Result<(), HandlerError> {
        let Some(update) = message.as_node_update() else {
            return Ok(());
        };

        let state = update.test_node.state();
        if !state.is_failure() || state.kind() == StateKind::Cancelled {
            return Ok(());
        }

        let count = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if count < self.threshold || self.tripped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(failures = count, threshold = self.threshold, "Maximum failed tests reached");
        match &self.stop {
            Some(stop) => {
                if stop.stop_test_execution().await {
                    self.stopped.store(true, Ordering::SeqCst);
                }
            }
            None => warn!("Framework does not support graceful stop; the run continues"),
        }
        Ok(())
    }
}

impl std::fmt::Debug for MaximumFailedTestsPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaximumFailedTestsPolicy")
            .field("threshold", &self.threshold)
            .field("failures", &self.failures())
            .field("tripped", &self.has_tripped())
            .finish_non_exhaustive()
    }
}
