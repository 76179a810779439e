use async_trait::async_trait;

use crate::types::{Server, ServiceDefinition, WorkItem, WorkKind};

/// Persistence backend for service and server definitions.
/// Implementations: relational store (external), memory (tests, demo node).
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Load every persisted service definition.
    async fn list_service_definitions(&self) -> anyhow::Result<Vec<ServiceDefinition>>;

    /// Load a single service definition by name.
    async fn get_service_definition(&self, name: &str) -> anyhow::Result<Option<ServiceDefinition>>;

    /// Load the override record for a host. `None` means the host has no record.
    async fn get_server_by_name(&self, name: &str) -> anyhow::Result<Option<Server>>;

    /// Stage a definition write. Visible to readers only after `commit`.
    async fn save_service_definition(&self, definition: &ServiceDefinition) -> anyhow::Result<()>;

    /// Commit staged writes.
    async fn commit(&self) -> anyhow::Result<()>;
}

/// Persistence backend for task results and requests.
#[async_trait]
pub trait WorkItemStore: Send + Sync {
    /// Atomically claim up to `limit` pending items of `kind` for `host`,
    /// moving them to `Running`.
    async fn claim_pending(
        &self,
        kind: WorkKind,
        host: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<WorkItem>>;

    /// Items of `kind` the store believes are running on `host`.
    async fn running_on_host(&self, kind: WorkKind, host: &str) -> anyhow::Result<Vec<WorkItem>>;

    /// Force an item into `Terminated`, recording why.
    async fn mark_terminated(&self, id: &str, reason: &str) -> anyhow::Result<()>;

    /// Record the outcome of a finished item.
    async fn complete(&self, id: &str, succeeded: bool) -> anyhow::Result<()>;
}
