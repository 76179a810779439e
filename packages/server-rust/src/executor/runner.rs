//! Runs a claimed work item under executor tracking.

use std::sync::Arc;

use async_trait::async_trait;
use servicer_core::{WorkItem, WorkItemStore};
use tokio_util::sync::CancellationToken;

use super::command::CooperativeHandle;
use super::registry::ExecutorRegistry;

/// Reason recorded when an executor stops because its token was cancelled.
pub const TERMINATED_REASON: &str = "terminated by command";

/// Domain logic for a single task or request.
///
/// Implementations must poll `cancel` at safe points and return early once it
/// fires; nothing preempts them.
#[async_trait]
pub trait WorkRunner: Send + Sync {
    async fn run(&self, item: &WorkItem, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// Runner that only logs. Used when no domain runner is wired in.
#[derive(Debug, Default)]
pub struct LoggingRunner;

#[async_trait]
impl WorkRunner for LoggingRunner {
    async fn run(&self, item: &WorkItem, _cancel: CancellationToken) -> anyhow::Result<()> {
        tracing::info!(id = %item.id, name = %item.name, kind = %item.kind, "running work item");
        Ok(())
    }
}

/// How a tracked run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed,
    Terminated,
    /// The item had no id and never ran.
    Rejected,
}

/// Registers an executor for `item`, runs it, and records the outcome.
///
/// The registration is held by an RAII guard, so the registry entry is gone
/// before the outcome is written, whatever the runner did.
pub async fn run_tracked(
    registry: &Arc<ExecutorRegistry>,
    store: &dyn WorkItemStore,
    runner: &dyn WorkRunner,
    item: WorkItem,
    parent: &CancellationToken,
) -> RunOutcome {
    let token = parent.child_token();
    let handle = Arc::new(CooperativeHandle::new(token.clone()));

    let registration = match registry.register(&item.id, &item.name, handle) {
        Ok(registration) => registration,
        Err(e) => {
            tracing::warn!(name = %item.name, error = %e, "skipping work item");
            return RunOutcome::Rejected;
        }
    };

    let result = runner.run(&item, token.clone()).await;
    drop(registration);

    let outcome = if token.is_cancelled() {
        RunOutcome::Terminated
    } else if result.is_ok() {
        RunOutcome::Succeeded
    } else {
        RunOutcome::Failed
    };

    if let Err(e) = &result {
        tracing::warn!(id = %item.id, name = %item.name, error = %e, "work item failed");
    }

    let recorded = match outcome {
        RunOutcome::Terminated => store.mark_terminated(&item.id, TERMINATED_REASON).await,
        _ => store.complete(&item.id, outcome == RunOutcome::Succeeded).await,
    };
    if let Err(e) = recorded {
        tracing::error!(id = %item.id, error = %e, "failed to record work item outcome");
    }

    outcome
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use servicer_core::{WorkKind, WorkState};

    use super::*;
    use crate::executor::command::{deliver, ExecutorCommand};
    use crate::store::MemoryWorkStore;

    struct FailingRunner;

    #[async_trait]
    impl WorkRunner for FailingRunner {
        async fn run(&self, _item: &WorkItem, _cancel: CancellationToken) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    /// Runs until cancelled.
    struct WaitingRunner;

    #[async_trait]
    impl WorkRunner for WaitingRunner {
        async fn run(&self, _item: &WorkItem, cancel: CancellationToken) -> anyhow::Result<()> {
            cancel.cancelled().await;
            Ok(())
        }
    }

    async fn claimed(store: &MemoryWorkStore, kind: WorkKind) -> WorkItem {
        store.enqueue("job", kind);
        store.claim_pending(kind, "node-1", 1).await.unwrap().remove(0)
    }

    #[tokio::test]
    async fn successful_run_completes_and_unregisters() {
        let registry = Arc::new(ExecutorRegistry::new());
        let store = MemoryWorkStore::new();
        let item = claimed(&store, WorkKind::Task).await;
        let id = item.id.clone();

        let outcome =
            run_tracked(&registry, &store, &LoggingRunner, item, &CancellationToken::new()).await;

        assert_eq!(outcome, RunOutcome::Succeeded);
        assert!(registry.is_empty());
        assert_eq!(store.get(&id).unwrap().state, WorkState::Completed);
    }

    #[tokio::test]
    async fn failed_run_still_unregisters() {
        let registry = Arc::new(ExecutorRegistry::new());
        let store = MemoryWorkStore::new();
        let item = claimed(&store, WorkKind::Request).await;
        let id = item.id.clone();

        let outcome =
            run_tracked(&registry, &store, &FailingRunner, item, &CancellationToken::new()).await;

        assert_eq!(outcome, RunOutcome::Failed);
        assert!(registry.get(&id).is_none());
        assert_eq!(store.get(&id).unwrap().state, WorkState::Failed);
    }

    #[tokio::test]
    async fn terminate_command_stops_running_executor() {
        let registry = Arc::new(ExecutorRegistry::new());
        let store = Arc::new(MemoryWorkStore::new());
        let item = claimed(&store, WorkKind::Task).await;
        let id = item.id.clone();

        let run = {
            let registry = Arc::clone(&registry);
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                run_tracked(&registry, store.as_ref(), &WaitingRunner, item, &CancellationToken::new())
                    .await
            })
        };

        while !registry.contains(&id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        deliver(&registry, &id, ExecutorCommand::Terminate);

        assert_eq!(run.await.unwrap(), RunOutcome::Terminated);
        assert!(registry.is_empty());
        let item = store.get(&id).unwrap();
        assert_eq!(item.state, WorkState::Terminated);
        assert_eq!(item.completion_note.as_deref(), Some(TERMINATED_REASON));
    }

    #[tokio::test]
    async fn item_without_id_is_rejected() {
        let registry = Arc::new(ExecutorRegistry::new());
        let store = MemoryWorkStore::new();
        let item = WorkItem::pending("", "anonymous", WorkKind::Task);

        let outcome =
            run_tracked(&registry, &store, &LoggingRunner, item, &CancellationToken::new()).await;
        assert_eq!(outcome, RunOutcome::Rejected);
    }
}
