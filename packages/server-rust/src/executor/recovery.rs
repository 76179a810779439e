//! Once-per-process orphan recovery.
//!
//! When the task or request driver first starts in a process, any work item
//! the store still believes is running on this host belonged to a previous
//! process that died mid-run. Those items are terminated so they do not claim
//! to be running forever.

use std::collections::{BTreeSet, HashSet};

use parking_lot::Mutex;
use servicer_core::{WorkItemStore, WorkKind};

use super::registry::ExecutorRegistry;

/// Reason recorded on work items terminated by the sweep.
pub const ORPHAN_REASON: &str = "orphaned by previous process";

/// Tracks which work kinds have already been swept in this process.
#[derive(Debug, Default)]
pub struct OrphanSweep {
    swept: Mutex<HashSet<WorkKind>>,
}

impl OrphanSweep {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once `kind` has been swept.
    pub fn has_swept(&self, kind: WorkKind) -> bool {
        self.swept.lock().contains(&kind)
    }

    /// Terminates items of `kind` claimed by `host` that have no live executor.
    ///
    /// Runs at most once per kind for the lifetime of this value. Returns the
    /// ids terminated, or `None` if the sweep already ran. A store failure
    /// leaves the kind unswept so the next first-start attempt retries.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot list running items.
    pub async fn sweep_once(
        &self,
        kind: WorkKind,
        host: &str,
        registry: &ExecutorRegistry,
        store: &dyn WorkItemStore,
    ) -> anyhow::Result<Option<BTreeSet<String>>> {
        if !self.swept.lock().insert(kind) {
            return Ok(None);
        }

        let claimed = match store.running_on_host(kind, host).await {
            Ok(items) => items,
            Err(e) => {
                self.swept.lock().remove(&kind);
                return Err(e);
            }
        };

        let orphans = registry.find_missing(claimed.iter().map(|item| item.id.as_str()));
        for id in &orphans {
            match store.mark_terminated(id, ORPHAN_REASON).await {
                Ok(()) => {
                    metrics::counter!("orphans_terminated_total", "kind" => kind.to_string())
                        .increment(1);
                    tracing::warn!(%kind, host, id, "terminated orphaned work item");
                }
                Err(e) => {
                    tracing::error!(%kind, host, id, error = %e, "failed to terminate orphaned work item");
                }
            }
        }

        tracing::info!(%kind, host, claimed = claimed.len(), orphans = orphans.len(), "orphan sweep complete");
        Ok(Some(orphans))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use servicer_core::{WorkItem, WorkState};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::executor::command::CooperativeHandle;
    use crate::store::MemoryWorkStore;

    fn running(id: &str, host: &str, kind: WorkKind) -> WorkItem {
        WorkItem {
            host: Some(host.to_string()),
            state: WorkState::Running,
            ..WorkItem::pending(id, id, kind)
        }
    }

    #[tokio::test]
    async fn sweep_terminates_only_unregistered_items_on_this_host() {
        let store = MemoryWorkStore::new();
        store.insert(running("T-1", "node-1", WorkKind::Task));
        store.insert(running("T-2", "node-1", WorkKind::Task));
        store.insert(running("T-3", "node-2", WorkKind::Task));
        store.insert(running("R-1", "node-1", WorkKind::Request));

        let registry = ExecutorRegistry::new();
        registry
            .add("T-2", "live", Arc::new(CooperativeHandle::new(CancellationToken::new())))
            .unwrap();

        let sweep = OrphanSweep::new();
        let orphans = sweep
            .sweep_once(WorkKind::Task, "node-1", &registry, &store)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(orphans.into_iter().collect::<Vec<_>>(), vec!["T-1"]);
        let terminated = store.get("T-1").unwrap();
        assert_eq!(terminated.state, WorkState::Terminated);
        assert_eq!(terminated.completion_note.as_deref(), Some(ORPHAN_REASON));
        assert_eq!(store.get("T-2").unwrap().state, WorkState::Running);
        assert_eq!(store.get("T-3").unwrap().state, WorkState::Running);
        assert_eq!(store.get("R-1").unwrap().state, WorkState::Running);
    }

    #[tokio::test]
    async fn sweep_runs_once_per_kind() {
        let store = MemoryWorkStore::new();
        let registry = ExecutorRegistry::new();
        let sweep = OrphanSweep::new();

        assert!(sweep
            .sweep_once(WorkKind::Request, "node-1", &registry, &store)
            .await
            .unwrap()
            .is_some());

        store.insert(running("R-9", "node-1", WorkKind::Request));
        assert!(sweep
            .sweep_once(WorkKind::Request, "node-1", &registry, &store)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.get("R-9").unwrap().state, WorkState::Running);
        assert!(sweep.has_swept(WorkKind::Request));
        assert!(!sweep.has_swept(WorkKind::Task));
    }
}
