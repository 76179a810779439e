//! Service-kind factory.
//!
//! Maps the symbolic `executor` string of a `ServiceDefinition` to a
//! constructor, so the servicer can build services without knowing their
//! concrete types.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use super::domain::{ConnectorListenerService, IndexRefreshService, RequestService, TaskService};
use super::lifecycle::Service;

/// Constructor for one service kind.
pub type ServiceConstructor = Arc<dyn Fn() -> Arc<dyn Service> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("unknown service kind: {0}")]
    UnknownKind(String),
}

/// Kind string -> constructor table.
#[derive(Default)]
pub struct ServiceFactory {
    constructors: DashMap<String, ServiceConstructor>,
}

impl fmt::Debug for ServiceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceFactory")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ServiceFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory pre-loaded with every built-in service kind.
    #[must_use]
    pub fn with_builtin() -> Self {
        let factory = Self::new();
        factory.register(IndexRefreshService::KIND, || {
            Arc::new(IndexRefreshService::new()) as Arc<dyn Service>
        });
        factory.register(TaskService::KIND, || Arc::new(TaskService::new()) as Arc<dyn Service>);
        factory.register(RequestService::KIND, || {
            Arc::new(RequestService::new()) as Arc<dyn Service>
        });
        factory.register(ConnectorListenerService::KIND, || {
            Arc::new(ConnectorListenerService::new()) as Arc<dyn Service>
        });
        factory
    }

    /// Registers (or replaces) the constructor for `kind`.
    pub fn register<F>(&self, kind: &str, constructor: F)
    where
        F: Fn() -> Arc<dyn Service> + Send + Sync + 'static,
    {
        if self
            .constructors
            .insert(kind.to_string(), Arc::new(constructor))
            .is_some()
        {
            tracing::warn!(kind, "service kind constructor replaced");
        }
    }

    /// Builds a fresh, unconfigured service of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError::UnknownKind`] if nothing is registered for `kind`.
    pub fn create(&self, kind: &str) -> Result<Arc<dyn Service>, FactoryError> {
        // Clone the constructor out so the shard lock is not held while it runs.
        let constructor = self
            .constructors
            .get(kind)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| FactoryError::UnknownKind(kind.to_string()))?;
        Ok(constructor())
    }

    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> BTreeSet<String> {
        self.constructors.iter().map(|e| e.key().clone()).collect()
    }
}
