// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Optional behaviors a test framework may declare.
//!
//! The set of capabilities is closed, so it is modeled as one enum over
//! trait objects rather than an open family of marker traits. The host
//! always queries before using a capability; absence means "use the
//! default behavior".
//!
//! # Example
//!
//! ```rust,ignore
//! use vigil_core::capability::Capabilities;
//!
//! if let Some(stop) = framework.capabilities().graceful_stop() {
//!     stop.stop_test_execution().await;
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::command_line::CommandLineOption;

// =============================================================================
// Capability Traits
// =============================================================================

/// The framework can stop starting new tests while in-flight ones finish.
#[async_trait]
pub trait GracefulStopCapability: Send + Sync {
    /// Requests a graceful stop. Returns `true` on the first request.
    async fn stop_test_execution(&self) -> bool;
}

/// The framework supplies its own startup banner.
#[async_trait]
pub trait BannerMessageOwnerCapability: Send + Sync {
    /// Returns the banner, or `None` to suppress it.
    async fn banner_message(&self) -> Option<String>;
}

/// The framework can enrich TRX reports.
pub trait TrxReportCapability: Send + Sync {
    /// Returns whether TRX enrichment is supported.
    fn is_trx_supported(&self) -> bool;

    /// Notifies the framework that a TRX report is being produced.
    fn enable_trx(&self);
}

/// The framework renders its own help output.
pub trait HelpMessageOwnerCapability: Send + Sync {
    /// Returns the help text for the given options, or `None` for the
    /// default rendering.
    fn help_message(&self, options: &[&CommandLineOption]) -> Option<String>;
}

// =============================================================================
// Capability / Capabilities
// =============================================================================

/// Discriminant of a [`Capability`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    /// [`GracefulStopCapability`].
    GracefulStop,
    /// [`BannerMessageOwnerCapability`].
    BannerMessageOwner,
    /// [`TrxReportCapability`].
    TrxReportEnrichment,
    /// [`HelpMessageOwnerCapability`].
    HelpMessageOwner,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CapabilityKind::GracefulStop => "graceful-stop",
            CapabilityKind::BannerMessageOwner => "banner-message-owner",
            CapabilityKind::TrxReportEnrichment => "trx-report-enrichment",
            CapabilityKind::HelpMessageOwner => "help-message-owner",
        };
        f.write_str(name)
    }
}

/// One declared capability.
#[derive(Clone)]
pub enum Capability {
    /// Graceful stop support.
    GracefulStop(Arc<dyn GracefulStopCapability>),
    /// Banner ownership.
    BannerMessageOwner(Arc<dyn BannerMessageOwnerCapability>),
    /// TRX report enrichment.
    TrxReportEnrichment(Arc<dyn TrxReportCapability>),
    /// Help message ownership.
    HelpMessageOwner(Arc<dyn HelpMessageOwnerCapability>),
}

impl Capability {
    /// Returns the capability's kind.
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Capability::GracefulStop(_) => CapabilityKind::GracefulStop,
            Capability::BannerMessageOwner(_) => CapabilityKind::BannerMessageOwner,
            Capability::TrxReportEnrichment(_) => CapabilityKind::TrxReportEnrichment,
            Capability::HelpMessageOwner(_) => CapabilityKind::HelpMessageOwner,
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability({})", self.kind())
    }
}

/// An ordered collection of capabilities.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    items: Vec<Capability>,
}

impl Capabilities {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a capability.
    pub fn with(mut self, capability: Capability) -> Self {
        self.items.push(capability);
        self
    }

    /// Appends a capability.
    pub fn push(&mut self, capability: Capability) {
        self.items.push(capability);
    }

    /// Returns the first capability of the given kind.
    pub fn get(&self, kind: CapabilityKind) -> Option<&Capability> {
        self.items.iter().find(|c| c.kind() == kind)
    }

    /// Returns `true` if a capability of the given kind is present.
    pub fn contains(&self, kind: CapabilityKind) -> bool {
        self.get(kind).is_some()
    }

    /// Returns the graceful stop capability.
    pub fn graceful_stop(&self) -> Option<Arc<dyn GracefulStopCapability>> {
        match self.get(CapabilityKind::GracefulStop) {
            Some(Capability::GracefulStop(c)) => Some(c.clone()),
            _ => None,
        }
    }

    /// Returns the banner owner capability.
    pub fn banner_message_owner(&self) -> Option<Arc<dyn BannerMessageOwnerCapability>> {
        match self.get(CapabilityKind::BannerMessageOwner) {
            Some(Capability::BannerMessageOwner(c)) => Some(c.clone()),
            _ => None,
        }
    }

    /// Returns the TRX enrichment capability.
    pub fn trx_report(&self) -> Option<Arc<dyn TrxReportCapability>> {
        match self.get(CapabilityKind::TrxReportEnrichment) {
            Some(Capability::TrxReportEnrichment(c)) => Some(c.clone()),
            _ => None,
        }
    }

    /// Returns the help owner capability.
    pub fn help_message_owner(&self) -> Option<Arc<dyn HelpMessageOwnerCapability>> {
        match self.get(CapabilityKind::HelpMessageOwner) {
            Some(Capability::HelpMessageOwner(c)) => Some(c.clone()),
            _ => None,
        }
    }

    /// Iterates in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.items.iter()
    }

    /// Returns the number of capabilities.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if there are none.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
