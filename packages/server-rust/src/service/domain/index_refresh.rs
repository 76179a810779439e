use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use servicer_core::Attributes;

use crate::service::context::ServiceContext;
use crate::service::lifecycle::{
    ExecutionMode, Service, ServiceBase, ServiceError, ServiceState, ServiceStatus, TaskMonitor,
};

/// Periodic service that refreshes search indexes.
///
/// Each run re-reads its own definition so an interval edited directly in
/// storage is picked up without an administrator notification. The stored
/// definition wins: an edit pushed without being saved is reverted on the
/// next run.
#[derive(Debug)]
pub struct IndexRefreshService {
    base: ServiceBase,
    refreshes: AtomicU64,
}

impl Default for IndexRefreshService {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexRefreshService {
    pub const KIND: &'static str = "IndexRefreshService";

    #[must_use]
    pub fn new() -> Self {
        Self {
            base: ServiceBase::new("IndexRefresh", ExecutionMode::Periodic),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Completed refreshes since construction.
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    async fn refresh(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        let name = self.base.name();
        if let Some(stored) = ctx.env.definitions.get_service_definition(&name).await? {
            let changed = self
                .base
                .definition()
                .map_or(true, |current| current.interval_secs != stored.interval_secs);
            if changed {
                tracing::info!(service = %name, interval_secs = stored.interval_secs, "stored interval changed");
                ctx.reconfigure(stored);
            }
        }

        let count = self.refreshes.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(service = %name, count, "index refreshed");
        Ok(())
    }
}

#[async_trait]
impl Service for IndexRefreshService {
    fn name(&self) -> String {
        self.base.name()
    }

    fn mode(&self) -> ExecutionMode {
        self.base.mode()
    }

    fn interval(&self) -> Duration {
        self.base.interval()
    }

    fn state(&self) -> ServiceState {
        self.base.state()
    }

    fn status(&self) -> ServiceStatus {
        self.base.status()
    }

    async fn configure(&self, ctx: &ServiceContext) -> Result<(), ServiceError> {
        self.base.configure(ctx)
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.base.mark_started().map(|_| ())
    }

    async fn suspend(&self) {
        self.base.mark_suspended();
    }

    async fn terminate(&self) {
        self.base.mark_terminated();
    }

    async fn execute(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        if !self.base.is_started() {
            return Ok(());
        }
        self.base.begin_execute();
        let result = self.refresh(ctx).await;
        self.base.end_execute(result.is_ok());
        result
    }

    async fn handle_request(
        &self,
        ctx: &ServiceContext,
        request: &str,
        _args: &Attributes,
        monitor: &dyn TaskMonitor,
    ) -> anyhow::Result<()> {
        if !self.base.is_started() || request != "refresh" {
            self.base.ignore_request(request);
            return Ok(());
        }
        monitor.update_progress("refreshing index", Some(0));
        self.execute(ctx).await?;
        monitor.update_progress("index refreshed", Some(100));
        Ok(())
    }

    fn wake(&self) {}

    async fn ping(&self) -> bool {
        self.base.is_started()
    }
}
