//! Process-wide table of live executors keyed by work-item id.
//!
//! Every task or request executor registers here for exactly the duration of
//! its run. Command delivery and orphan detection both read this table, so a
//! stale entry means misrouted commands and false "still running" reports.
//! [`ExecutorRegistry::register`] returns an RAII guard that removes the entry
//! on drop, including during unwinding.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use super::command::ExecutorHandle;

/// Errors from registry operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("work item has no id; executors must be registered under a durable id")]
    MissingId,
}

/// A live executor as seen by the registry.
#[derive(Clone)]
pub struct ExecutorInfo {
    pub id: String,
    /// Display name of the owning task or request.
    pub owner: String,
    pub handle: Arc<dyn ExecutorHandle>,
    /// Name of the thread that registered (and runs) the executor.
    pub thread_name: String,
    pub registered_at_ms: u64,
}

impl fmt::Debug for ExecutorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorInfo")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("thread_name", &self.thread_name)
            .field("registered_at_ms", &self.registered_at_ms)
            .finish_non_exhaustive()
    }
}

/// Single-host executor table guarded by one mutex.
///
/// Expected cardinality is tens of entries, so a single lock around a
/// `HashMap` keeps every read-modify-write atomic without finer locking.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: Mutex<HashMap<String, ExecutorInfo>>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("active", &self.len())
            .finish()
    }
}

impl ExecutorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` under `id`. Call from the thread that will run the
    /// executor, immediately before it starts.
    ///
    /// A previous entry for `id` is overwritten and reported as stale.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::MissingId`] if `id` is empty.
    pub fn add(
        &self,
        id: &str,
        owner: &str,
        handle: Arc<dyn ExecutorHandle>,
    ) -> Result<(), RegistryError> {
        if id.trim().is_empty() {
            tracing::warn!(owner, "rejected executor registration without a work item id");
            return Err(RegistryError::MissingId);
        }

        let info = ExecutorInfo {
            id: id.to_string(),
            owner: owner.to_string(),
            handle,
            thread_name: current_thread_name(),
            registered_at_ms: now_millis(),
        };

        let active = {
            let mut executors = self.executors.lock();
            if let Some(previous) = executors.insert(id.to_string(), info) {
                tracing::warn!(
                    id,
                    owner,
                    stale_owner = %previous.owner,
                    stale_thread = %previous.thread_name,
                    "executor already registered; stale entry was not removed"
                );
            }
            executors.len()
        };

        tracing::debug!(id, owner, "executor registered");
        record_active(active);
        Ok(())
    }

    /// Registers and returns a guard that removes the entry when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::MissingId`] if `id` is empty.
    pub fn register(
        self: &Arc<Self>,
        id: &str,
        owner: &str,
        handle: Arc<dyn ExecutorHandle>,
    ) -> Result<ExecutorRegistration, RegistryError> {
        self.add(id, owner, Arc::clone(&handle))?;
        Ok(ExecutorRegistration {
            registry: Arc::clone(self),
            id: id.to_string(),
            handle,
        })
    }

    /// Unregisters `id`. Returns the removed entry.
    ///
    /// An absent id is logged but not an error: a controller may race a
    /// completing executor.
    pub fn remove(&self, id: &str) -> Option<ExecutorInfo> {
        let (removed, active) = {
            let mut executors = self.executors.lock();
            (executors.remove(id), executors.len())
        };

        if removed.is_none() {
            tracing::warn!(id, "removal requested for an executor that is not registered");
        } else {
            tracing::debug!(id, "executor removed");
        }
        record_active(active);
        removed
    }

    /// Unregisters `id` only while it still maps to `handle`. A newer
    /// registration under the same id is left alone.
    pub fn remove_if(&self, id: &str, handle: &Arc<dyn ExecutorHandle>) -> Option<ExecutorInfo> {
        let (removed, active) = {
            let mut executors = self.executors.lock();
            let owned = executors
                .get(id)
                .is_some_and(|info| Arc::ptr_eq(&info.handle, handle));
            let removed = if owned { executors.remove(id) } else { None };
            (removed, executors.len())
        };

        if removed.is_some() {
            tracing::debug!(id, "executor removed");
            record_active(active);
        } else {
            tracing::debug!(id, "executor entry already replaced or removed");
        }
        removed
    }

    /// Looks up the executor for `id`. `None` is a normal outcome.
    pub fn get(&self, id: &str) -> Option<ExecutorInfo> {
        self.executors.lock().get(id).cloned()
    }

    /// Returns the subset of `ids` with no live executor on this host.
    pub fn find_missing<'a, I>(&self, ids: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let executors = self.executors.lock();
        ids.into_iter()
            .filter(|id| !executors.contains_key(*id))
            .map(str::to_string)
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.executors.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.executors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.lock().is_empty()
    }

    /// Ids of every live executor, sorted.
    pub fn ids(&self) -> BTreeSet<String> {
        self.executors.lock().keys().cloned().collect()
    }

    /// Consistent copy of every live entry.
    pub fn snapshot(&self) -> Vec<ExecutorInfo> {
        let mut entries: Vec<ExecutorInfo> = self.executors.lock().values().cloned().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }
}

// ---------------------------------------------------------------------------
// ExecutorRegistration
// ---------------------------------------------------------------------------

/// RAII guard that unregisters its executor when dropped.
///
/// Drop runs during unwinding too, so an executor that panics or returns
/// early never leaves a stale entry behind.
pub struct ExecutorRegistration {
    registry: Arc<ExecutorRegistry>,
    id: String,
    handle: Arc<dyn ExecutorHandle>,
}

impl fmt::Debug for ExecutorRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistration")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl ExecutorRegistration {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for ExecutorRegistration {
    fn drop(&mut self) {
        self.registry.remove_if(&self.id, &self.handle);
    }
}

fn current_thread_name() -> String {
    let thread = std::thread::current();
    thread
        .name()
        .map_or_else(|| format!("{:?}", thread.id()), str::to_string)
}

fn record_active(active: usize) {
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!("executors_active").set(active as f64);
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::executor::command::CooperativeHandle;

    fn handle() -> Arc<dyn ExecutorHandle> {
        Arc::new(CooperativeHandle::new(CancellationToken::new()))
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn add_then_get_returns_same_handle() {
        let registry = ExecutorRegistry::new();
        let h = handle();
        registry.add("T-1", "Aggregation", Arc::clone(&h)).unwrap();

        let info = registry.get("T-1").unwrap();
        assert!(Arc::ptr_eq(&info.handle, &h));
        assert_eq!(info.owner, "Aggregation");
        assert!(!info.thread_name.is_empty());
    }

    #[test]
    fn remove_then_get_is_absent() {
        let registry = ExecutorRegistry::new();
        registry.add("T-1", "Aggregation", handle()).unwrap();
        assert!(registry.remove("T-1").is_some());
        assert!(registry.get("T-1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_unknown_id_is_not_fatal() {
        let registry = ExecutorRegistry::new();
        assert!(registry.remove("never-registered").is_none());
    }

    #[test]
    fn empty_id_is_rejected() {
        let registry = ExecutorRegistry::new();
        assert_eq!(registry.add("", "Orphan", handle()), Err(RegistryError::MissingId));
        assert_eq!(registry.add("  ", "Orphan", handle()), Err(RegistryError::MissingId));
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_add_overwrites_entry() {
        let registry = ExecutorRegistry::new();
        let first = handle();
        let second = handle();
        registry.add("T-1", "First", first).unwrap();
        registry.add("T-1", "Second", Arc::clone(&second)).unwrap();

        assert_eq!(registry.len(), 1);
        let info = registry.get("T-1").unwrap();
        assert_eq!(info.owner, "Second");
        assert!(Arc::ptr_eq(&info.handle, &second));
    }

    #[test]
    fn stale_guard_keeps_newer_registration() {
        let registry = Arc::new(ExecutorRegistry::new());
        let stale = registry.register("T-1", "First", handle()).unwrap();
        let newer = handle();
        let _live = registry.register("T-1", "Second", Arc::clone(&newer)).unwrap();

        drop(stale);
        let info = registry.get("T-1").unwrap();
        assert!(Arc::ptr_eq(&info.handle, &newer));
        assert!(registry.find_missing(["T-1"]).is_empty());
    }

    #[test]
    fn remove_if_ignores_foreign_handle() {
        let registry = ExecutorRegistry::new();
        registry.add("T-2", "Owner", handle()).unwrap();
        assert!(registry.remove_if("T-2", &handle()).is_none());
        assert!(registry.contains("T-2"));
    }

    #[test]
    fn find_missing_returns_unregistered_subset() {
        let registry = ExecutorRegistry::new();
        registry.add("b", "B", handle()).unwrap();
        assert_eq!(registry.find_missing(["a", "b", "c"]), set(&["a", "c"]));
    }

    #[test]
    fn nightly_refresh_scenario() {
        let registry = ExecutorRegistry::new();
        registry.add("T-100", "Nightly Refresh", handle()).unwrap();
        assert_eq!(registry.find_missing(["T-100", "T-200"]), set(&["T-200"]));

        registry.remove("T-100");
        assert_eq!(registry.find_missing(["T-100"]), set(&["T-100"]));
    }

    #[test]
    fn registration_guard_removes_on_drop() {
        let registry = Arc::new(ExecutorRegistry::new());
        {
            let guard = registry.register("R-7", "Provisioning", handle()).unwrap();
            assert_eq!(guard.id(), "R-7");
            assert!(registry.contains("R-7"));
        }
        assert!(!registry.contains("R-7"));
    }

    #[test]
    fn registration_guard_removes_on_panic() {
        let registry = Arc::new(ExecutorRegistry::new());
        let inner = Arc::clone(&registry);
        let result = std::thread::spawn(move || {
            let _guard = inner.register("T-9", "Exploding", handle()).unwrap();
            panic!("executor failed");
        })
        .join();

        assert!(result.is_err());
        assert!(registry.get("T-9").is_none());
    }

    #[test]
    fn thread_name_is_captured_from_registering_thread() {
        let registry = Arc::new(ExecutorRegistry::new());
        let inner = Arc::clone(&registry);
        std::thread::Builder::new()
            .name("task-worker-3".to_string())
            .spawn(move || inner.add("T-3", "Named", handle()).unwrap())
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(registry.get("T-3").unwrap().thread_name, "task-worker-3");
    }

    #[test]
    fn concurrent_registrations_are_not_lost() {
        let registry = Arc::new(ExecutorRegistry::new());
        let workers: Vec<_> = (0..2)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let id = format!("w{worker}-{i}");
                        registry.add(&id, "Concurrent", handle()).unwrap();
                        let info = registry.get(&id).unwrap();
                        assert_eq!(info.id, id);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(registry.len(), 1000);
        assert!(registry.find_missing(["w0-499", "w1-0"]).is_empty());
    }

    #[test]
    fn snapshot_is_sorted_by_id() {
        let registry = ExecutorRegistry::new();
        registry.add("b", "B", handle()).unwrap();
        registry.add("a", "A", handle()).unwrap();
        let ids: Vec<_> = registry.snapshot().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(registry.ids(), set(&["a", "b"]));
    }
}
