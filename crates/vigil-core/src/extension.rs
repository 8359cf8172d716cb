// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Extension contract and registration table.
//!
//! Every pluggable component (data consumer, producer, lifetime handler,
//! options provider, test framework) implements [`Extension`]: a stable
//! uid, a semver version, display metadata and an enablement check.
//!
//! Extensions are activated through an explicit registration table instead
//! of runtime discovery: an [`ExtensionFactory`] is registered under its
//! uid and produces an [`ExtensionSet`] when the host is built.
//!
//! # Example
//!
//! ```rust,ignore
//! use vigil_core::extension::{ExtensionContext, ExtensionRegistry};
//!
//! let mut registry = ExtensionRegistry::new();
//! registry.register(Box::new(JunitReporterFactory::default()));
//!
//! let set = registry.create("junit-reporter", &context)?;
//! assert_eq!(set.consumers.len(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::DataConsumer;
use crate::command_line::{CommandLineOptions, CommandLineOptionsProvider};
use crate::error::ExtensionError;
use crate::session::{AsyncCleanableExtension, TestSessionLifetimeHandler};
use crate::types::ExecutionId;

// =============================================================================
// Extension
// =============================================================================

/// The identity and enablement contract shared by all extensions.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Stable identity of the extension.
    fn uid(&self) -> &str;

    /// Semantic version of the extension.
    fn version(&self) -> &str;

    /// Name shown to users.
    fn display_name(&self) -> &str;

    /// Short description shown in `--info` output.
    fn description(&self) -> &str;

    /// Returns whether the extension currently participates.
    ///
    /// This is evaluated on every publish for data consumers, so an
    /// extension disabled mid-session stops receiving messages.
    async fn is_enabled(&self) -> bool {
        true
    }
}

// =============================================================================
// ExtensionInfo
// =============================================================================

/// Static extension metadata that implementors can delegate to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionInfo {
    /// Stable identity.
    pub uid: String,
    /// Semantic version.
    pub version: String,
    /// Display name.
    pub display_name: String,
    /// Description.
    pub description: String,
}

impl ExtensionInfo {
    /// Creates extension metadata.
    pub fn new(
        uid: impl Into<String>,
        version: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            version: version.into(),
            display_name: display_name.into(),
            description: description.into(),
        }
    }

    /// Creates metadata for a built-in extension, versioned with this crate.
    pub fn builtin(uid: &str, display_name: &str, description: &str) -> Self {
        Self::new(uid, crate::VERSION, display_name, description)
    }
}

#[async_trait]
impl Extension for ExtensionInfo {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn description(&self) -> &str {
        &self.description
    }
}

// =============================================================================
// ExtensionSet / ExtensionContext
// =============================================================================

/// The components produced by one extension factory.
///
/// A single extension may play several roles, so each role has its own
/// list.
#[derive(Default)]
pub struct ExtensionSet {
    /// Data consumers to register on the bus.
    pub consumers: Vec<Arc<dyn DataConsumer>>,
    /// Session lifetime handlers.
    pub lifetime_handlers: Vec<Arc<dyn TestSessionLifetimeHandler>>,
    /// Cleanup hooks run when the session closes.
    pub cleanables: Vec<Arc<dyn AsyncCleanableExtension>>,
    /// Command-line option providers.
    pub option_providers: Vec<Arc<dyn CommandLineOptionsProvider>>,
}

impl ExtensionSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a data consumer.
    pub fn with_consumer(mut self, consumer: Arc<dyn DataConsumer>) -> Self {
        self.consumers.push(consumer);
        self
    }

    /// Adds a lifetime handler.
    pub fn with_lifetime_handler(mut self, handler: Arc<dyn TestSessionLifetimeHandler>) -> Self {
        self.lifetime_handlers.push(handler);
        self
    }

    /// Adds a cleanup hook.
    pub fn with_cleanable(mut self, cleanable: Arc<dyn AsyncCleanableExtension>) -> Self {
        self.cleanables.push(cleanable);
        self
    }

    /// Adds an options provider.
    pub fn with_option_provider(mut self, provider: Arc<dyn CommandLineOptionsProvider>) -> Self {
        self.option_providers.push(provider);
        self
    }

    /// Moves every component of `other` into this set.
    pub fn merge(&mut self, other: ExtensionSet) {
        self.consumers.extend(other.consumers);
        self.lifetime_handlers.extend(other.lifetime_handlers);
        self.cleanables.extend(other.cleanables);
        self.option_providers.extend(other.option_providers);
    }

    /// Returns `true` if the set has no components.
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
            && self.lifetime_handlers.is_empty()
            && self.cleanables.is_empty()
            && self.option_providers.is_empty()
    }
}

impl fmt::Debug for ExtensionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionSet")
            .field("consumers", &self.consumers.len())
            .field("lifetime_handlers", &self.lifetime_handlers.len())
            .field("cleanables", &self.cleanables.len())
            .field("option_providers", &self.option_providers.len())
            .finish()
    }
}

/// Inputs available to factories when building extensions.
#[derive(Debug, Clone)]
pub struct ExtensionContext {
    /// Resolved command-line options.
    pub options: Arc<CommandLineOptions>,
    /// Identity of this host execution.
    pub execution_id: ExecutionId,
}

impl ExtensionContext {
    /// Creates a context.
    pub fn new(options: Arc<CommandLineOptions>, execution_id: ExecutionId) -> Self {
        Self {
            options,
            execution_id,
        }
    }
}

// =============================================================================
// ExtensionFactory / ExtensionRegistry
// =============================================================================

/// Factory trait for creating extension components.
pub trait ExtensionFactory: Send + Sync {
    /// Uid the factory is registered under.
    fn uid(&self) -> &str;

    /// Builds the extension's components.
    ///
    /// # Errors
    ///
    /// Returns `ExtensionError::CreationFailed` if the extension cannot be
    /// built from the given context.
    fn create(&self, context: &ExtensionContext) -> Result<ExtensionSet, ExtensionError>;
}

/// A factory backed by a closure.
pub struct FnExtensionFactory<F> {
    uid: String,
    create: F,
}

impl<F> FnExtensionFactory<F>
where
    F: Fn(&ExtensionContext) -> Result<ExtensionSet, ExtensionError> + Send + Sync,
{
    /// Creates a factory from a closure.
    pub fn new(uid: impl Into<String>, create: F) -> Self {
        Self {
            uid: uid.into(),
            create,
        }
    }
}

impl<F> ExtensionFactory for FnExtensionFactory<F>
where
    F: Fn(&ExtensionContext) -> Result<ExtensionSet, ExtensionError> + Send + Sync,
{
    fn uid(&self) -> &str {
        &self.uid
    }

    fn create(&self, context: &ExtensionContext) -> Result<ExtensionSet, ExtensionError> {
        (self.create)(context)
    }
}

/// The registration table mapping extension uids to factories.
pub struct ExtensionRegistry {
    factories: HashMap<String, Box<dyn ExtensionFactory>>,
}

impl ExtensionRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registers a factory.
    ///
    /// If a factory with the same uid already exists, it will be replaced.
    pub fn register(&mut self, factory: Box<dyn ExtensionFactory>) {
        let uid = factory.uid().to_string();
        if self.factories.insert(uid.clone(), factory).is_some() {
            tracing::debug!(uid = %uid, "Replaced extension factory");
        } else {
            tracing::debug!(uid = %uid, "Registered extension factory");
        }
    }

    /// Registers a closure as a factory.
    pub fn register_fn<F>(&mut self, uid: impl Into<String>, create: F)
    where
        F: Fn(&ExtensionContext) -> Result<ExtensionSet, ExtensionError> + Send + Sync + 'static,
    {
        self.register(Box::new(FnExtensionFactory::new(uid, create)));
    }

    /// Unregisters a factory.
    pub fn unregister(&mut self, uid: &str) -> Option<Box<dyn ExtensionFactory>> {
        self.factories.remove(uid)
    }

    /// Creates the extension registered under `uid`.
    ///
    /// # Errors
    ///
    /// - `ExtensionError::NotRegistered` - No factory registered for the uid
    /// - Other errors from the factory
    pub fn create(
        &self,
        uid: &str,
        context: &ExtensionContext,
    ) -> Result<ExtensionSet, ExtensionError> {
        let factory = self
            .factories
            .get(uid)
            .ok_or_else(|| ExtensionError::not_registered(uid))?;

        factory.create(context)
    }

    /// Creates every listed extension and merges the results in order.
    pub fn create_all<'a>(
        &self,
        uids: impl IntoIterator<Item = &'a str>,
        context: &ExtensionContext,
    ) -> Result<ExtensionSet, ExtensionError> {
        let mut set = ExtensionSet::new();
        for uid in uids {
            set.merge(self.create(uid, context)?);
        }
        Ok(set)
    }

    /// Returns the registered uids, sorted.
    pub fn uids(&self) -> Vec<&str> {
        let mut uids: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        uids.sort_unstable();
        uids
    }

    /// Returns `true` if a factory is registered for the uid.
    pub fn contains(&self, uid: &str) -> bool {
        self.factories.contains_key(uid)
    }

    /// Returns the number of registered factories.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns `true` if no factories are registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("uids", &self.uids())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
