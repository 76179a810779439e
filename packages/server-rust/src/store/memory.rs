//! In-memory [`DefinitionStore`] and [`WorkItemStore`] implementations.
//!
//! Used by tests and the standalone node binary when no external persistence
//! backend is configured. Writes to the definition store are staged until
//! `commit`, mirroring the unit-of-work contract of the real store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use servicer_core::{
    DefinitionStore, Server, ServiceDefinition, WorkItem, WorkItemStore, WorkKind, WorkState,
};

// ---------------------------------------------------------------------------
// MemoryDefinitionStore
// ---------------------------------------------------------------------------

/// Definition store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryDefinitionStore {
    definitions: Mutex<BTreeMap<String, ServiceDefinition>>,
    staged: Mutex<Vec<ServiceDefinition>>,
    servers: Mutex<HashMap<String, Server>>,
    commits: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryDefinitionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with committed definitions and servers.
    #[must_use]
    pub fn with_contents(definitions: Vec<ServiceDefinition>, servers: Vec<Server>) -> Self {
        let store = Self::new();
        for definition in definitions {
            store.put_definition(definition);
        }
        for server in servers {
            store.put_server(server);
        }
        store
    }

    /// Writes a definition directly, bypassing staging (administrator edit).
    pub fn put_definition(&self, definition: ServiceDefinition) {
        self.definitions
            .lock()
            .insert(definition.name.clone(), definition);
    }

    pub fn put_server(&self, server: Server) {
        self.servers.lock().insert(server.name.clone(), server);
    }

    pub fn remove_server(&self, name: &str) -> Option<Server> {
        self.servers.lock().remove(name)
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Makes every subsequent call fail, simulating a lost database connection.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn check_available(&self) -> anyhow::Result<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            anyhow::bail!("definition store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn list_service_definitions(&self) -> anyhow::Result<Vec<ServiceDefinition>> {
        self.check_available()?;
        Ok(self.definitions.lock().values().cloned().collect())
    }

    async fn get_service_definition(&self, name: &str) -> anyhow::Result<Option<ServiceDefinition>> {
        self.check_available()?;
        Ok(self.definitions.lock().get(name).cloned())
    }

    async fn get_server_by_name(&self, name: &str) -> anyhow::Result<Option<Server>> {
        self.check_available()?;
        Ok(self.servers.lock().get(name).cloned())
    }

    async fn save_service_definition(&self, definition: &ServiceDefinition) -> anyhow::Result<()> {
        self.check_available()?;
        self.staged.lock().push(definition.clone());
        Ok(())
    }

    async fn commit(&self) -> anyhow::Result<()> {
        self.check_available()?;
        let staged = std::mem::take(&mut *self.staged.lock());
        let mut definitions = self.definitions.lock();
        for definition in staged {
            definitions.insert(definition.name.clone(), definition);
        }
        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryWorkStore
// ---------------------------------------------------------------------------

/// Work-item store held in memory. Items are claimed in insertion order.
#[derive(Debug, Default)]
pub struct MemoryWorkStore {
    items: Mutex<Vec<WorkItem>>,
}

impl MemoryWorkStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an item.
    pub fn insert(&self, item: WorkItem) {
        let mut items = self.items.lock();
        match items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
    }

    /// Queues a new pending item under a generated id and returns the id.
    pub fn enqueue(&self, name: &str, kind: WorkKind) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.insert(WorkItem::pending(id.clone(), name, kind));
        id
    }

    pub fn get(&self, id: &str) -> Option<WorkItem> {
        self.items.lock().iter().find(|item| item.id == id).cloned()
    }

    pub fn count_in_state(&self, state: WorkState) -> usize {
        self.items
            .lock()
            .iter()
            .filter(|item| item.state == state)
            .count()
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut WorkItem)) -> anyhow::Result<()> {
        let mut items = self.items.lock();
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| anyhow::anyhow!("unknown work item: {id}"))?;
        apply(item);
        Ok(())
    }
}

#[async_trait]
impl WorkItemStore for MemoryWorkStore {
    async fn claim_pending(
        &self,
        kind: WorkKind,
        host: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<WorkItem>> {
        let mut items = self.items.lock();
        let claimed = items
            .iter_mut()
            .filter(|item| item.kind == kind && item.state == WorkState::Pending)
            .take(limit)
            .map(|item| {
                item.state = WorkState::Running;
                item.host = Some(host.to_string());
                item.clone()
            })
            .collect();
        Ok(claimed)
    }

    async fn running_on_host(&self, kind: WorkKind, host: &str) -> anyhow::Result<Vec<WorkItem>> {
        Ok(self
            .items
            .lock()
            .iter()
            .filter(|item| {
                item.kind == kind
                    && item.state == WorkState::Running
                    && item.host.as_deref() == Some(host)
            })
            .cloned()
            .collect())
    }

    async fn mark_terminated(&self, id: &str, reason: &str) -> anyhow::Result<()> {
        self.update(id, |item| {
            item.state = WorkState::Terminated;
            item.completion_note = Some(reason.to_string());
        })
    }

    async fn complete(&self, id: &str, succeeded: bool) -> anyhow::Result<()> {
        self.update(id, |item| {
            // A terminate that raced completion wins.
            if !item.state.is_final() {
                item.state = if succeeded {
                    WorkState::Completed
                } else {
                    WorkState::Failed
                };
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn staged_definitions_visible_after_commit() {
        let store = MemoryDefinitionStore::new();
        let def = ServiceDefinition::synthesized("Task");
        store.save_service_definition(&def).await.unwrap();
        assert!(store.get_service_definition("Task").await.unwrap().is_none());

        store.commit().await.unwrap();
        assert_eq!(store.get_service_definition("Task").await.unwrap(), Some(def));
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryDefinitionStore::with_contents(vec![], vec![Server::new("node-1")]);
        store.set_unavailable(true);
        assert!(store.get_server_by_name("node-1").await.is_err());
        assert!(store.list_service_definitions().await.is_err());

        store.set_unavailable(false);
        assert!(store.get_server_by_name("node-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn claim_pending_respects_kind_limit_and_order() {
        let store = MemoryWorkStore::new();
        let first = store.enqueue("first", WorkKind::Task);
        let second = store.enqueue("second", WorkKind::Task);
        store.enqueue("third", WorkKind::Task);
        store.enqueue("request", WorkKind::Request);

        let claimed = store.claim_pending(WorkKind::Task, "node-1", 2).await.unwrap();
        let ids: Vec<_> = claimed.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec![first.clone(), second]);
        assert_eq!(store.get(&first).unwrap().host.as_deref(), Some("node-1"));

        let running = store.running_on_host(WorkKind::Task, "node-1").await.unwrap();
        assert_eq!(running.len(), 2);
        assert!(store.running_on_host(WorkKind::Task, "node-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn complete_does_not_override_termination() {
        let store = MemoryWorkStore::new();
        let id = store.enqueue("job", WorkKind::Request);
        store.mark_terminated(&id, "operator request").await.unwrap();
        store.complete(&id, true).await.unwrap();
        assert_eq!(store.get(&id).unwrap().state, WorkState::Terminated);
        assert!(store.complete("missing", true).await.is_err());
    }
}
