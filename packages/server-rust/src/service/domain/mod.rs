//! Built-in services.
//!
//! - `IndexRefreshService`: periodic, re-reads its own definition each run
//! - `TaskService`: periodic, claims and runs pending tasks
//! - `RequestService`: continuous, dispatches pending requests from a worker
//! - `ConnectorListenerService`: continuous, polls an external listener

pub mod connector;
pub mod index_refresh;
pub mod request;
pub mod task;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use servicer_core::{ServiceDefinition, WorkKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use connector::{ConnectorListenerService, IdleListener, ListenerResource};
pub use index_refresh::IndexRefreshService;
pub use request::RequestService;
pub use task::TaskService;

use super::context::ServiceContext;
use crate::executor::{run_tracked, RunOutcome};

/// Attribute capping how many items a work-running service runs at once.
pub const MAX_CONCURRENT_ATTRIBUTE: &str = "maxConcurrent";
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

pub(crate) fn max_concurrent(definition: &ServiceDefinition) -> usize {
    definition
        .attribute_u64(MAX_CONCURRENT_ATTRIBUTE)
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_CONCURRENT)
}

// ---------------------------------------------------------------------------
// InFlight
// ---------------------------------------------------------------------------

/// Spawned executor tasks of one service.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    handles: Mutex<Vec<JoinHandle<RunOutcome>>>,
}

impl InFlight {
    /// Drops finished handles and returns how many are still running.
    pub(crate) fn running(&self) -> usize {
        let mut handles = self.handles.lock();
        handles.retain(|handle| !handle.is_finished());
        handles.len()
    }

    fn push(&self, handle: JoinHandle<RunOutcome>) {
        self.handles.lock().push(handle);
    }

    /// Waits up to `timeout` for every in-flight executor. Returns `false` if
    /// some were still running when the timeout elapsed.
    pub(crate) async fn drain(&self, timeout: Duration) -> bool {
        let handles = std::mem::take(&mut *self.handles.lock());
        if handles.is_empty() {
            return true;
        }
        tokio::time::timeout(timeout, futures_util::future::join_all(handles))
            .await
            .is_ok()
    }
}

/// Claims pending items of `kind` for this host up to the service's
/// concurrency limit and spawns a tracked executor for each.
///
/// Returns the number of items dispatched.
pub(crate) async fn dispatch_pending(
    ctx: &ServiceContext,
    definition: &ServiceDefinition,
    kind: WorkKind,
    cancel: &CancellationToken,
    in_flight: &InFlight,
) -> anyhow::Result<usize> {
    let capacity = max_concurrent(definition).saturating_sub(in_flight.running());
    if capacity == 0 {
        tracing::debug!(service = %definition.name, "at concurrency limit");
        return Ok(0);
    }

    let items = ctx.env.work.claim_pending(kind, ctx.host(), capacity).await?;
    let dispatched = items.len();

    for item in items {
        let registry = Arc::clone(&ctx.env.executors);
        let work = Arc::clone(&ctx.env.work);
        let runner = Arc::clone(&ctx.env.runner);
        let cancel = cancel.clone();
        in_flight.push(tokio::spawn(async move {
            run_tracked(&registry, work.as_ref(), runner.as_ref(), item, &cancel).await
        }));
    }

    if dispatched > 0 {
        tracing::debug!(service = %definition.name, %kind, dispatched, "dispatched work items");
    }
    Ok(dispatched)
}

/// Runs the once-per-process orphan sweep for `kind`, logging rather than
/// failing the start.
pub(crate) async fn sweep_orphans(ctx: &ServiceContext, kind: WorkKind) {
    match ctx
        .env
        .orphans
        .sweep_once(kind, ctx.host(), &ctx.env.executors, ctx.env.work.as_ref())
        .await
    {
        Ok(Some(orphaned)) if !orphaned.is_empty() => {
            tracing::warn!(%kind, count = orphaned.len(), "terminated orphaned work items");
        }
        Ok(_) => {}
        Err(e) => tracing::error!(%kind, error = %e, "orphan sweep failed"),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_concurrent_reads_attribute_with_default() {
        let definition = ServiceDefinition::synthesized("Task");
        assert_eq!(max_concurrent(&definition), DEFAULT_MAX_CONCURRENT);

        let definition = definition.with_attribute(MAX_CONCURRENT_ATTRIBUTE, 2);
        assert_eq!(max_concurrent(&definition), 2);

        let zero = ServiceDefinition::synthesized("Task").with_attribute(MAX_CONCURRENT_ATTRIBUTE, 0);
        assert_eq!(max_concurrent(&zero), DEFAULT_MAX_CONCURRENT);
    }

    #[tokio::test]
    async fn drain_with_nothing_in_flight_is_immediate() {
        let in_flight = InFlight::default();
        assert_eq!(in_flight.running(), 0);
        assert!(in_flight.drain(Duration::from_millis(1)).await);
    }
}
