use std::time::Duration;

use async_trait::async_trait;
use servicer_core::{Attributes, WorkKind};
use tokio_util::sync::CancellationToken;

use super::{dispatch_pending, sweep_orphans, InFlight};
use crate::service::context::ServiceContext;
use crate::service::lifecycle::{
    ExecutionMode, Service, ServiceBase, ServiceError, ServiceState, ServiceStatus, TaskMonitor,
};

/// Periodic task scheduler.
///
/// Every run claims pending tasks for this host, up to the definition's
/// `maxConcurrent` attribute minus what is still running, and executes each
/// on its own tokio task under an executor registration.
#[derive(Debug)]
pub struct TaskService {
    base: ServiceBase,
    cancel: CancellationToken,
    in_flight: InFlight,
}

impl Default for TaskService {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskService {
    pub const KIND: &'static str = "TaskService";

    #[must_use]
    pub fn new() -> Self {
        Self {
            base: ServiceBase::new("Task", ExecutionMode::Periodic),
            cancel: CancellationToken::new(),
            in_flight: InFlight::default(),
        }
    }

    /// Tasks this service is currently running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.in_flight.running()
    }
}

#[async_trait]
impl Service for TaskService {
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
        self.base.check_startable()?;
        if let Some(ctx) = self.base.context() {
            sweep_orphans(&ctx, WorkKind::Task).await;
        }
        self.base.mark_started().map(|_| ())
    }

    async fn suspend(&self) {
        self.base.mark_suspended();
    }

    async fn terminate(&self) {
        if !self.base.mark_terminated() {
            return;
        }
        self.cancel.cancel();

        let timeout = self
            .base
            .context()
            .map_or(Duration::from_secs(10), |ctx| ctx.env.config.worker_stop_timeout);
        if !self.in_flight.drain(timeout).await {
            tracing::warn!(service = %self.base.name(), ?timeout, "tasks still running after terminate");
        }
    }

    async fn execute(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        if !self.base.is_started() {
            return Ok(());
        }
        self.base.begin_execute();
        let result =
            dispatch_pending(ctx, &ctx.definition, WorkKind::Task, &self.cancel, &self.in_flight)
                .await;
        self.base.end_execute(result.is_ok());
        result.map(|_| ())
    }

    async fn handle_request(
        &self,
        _ctx: &ServiceContext,
        request: &str,
        _args: &Attributes,
        _monitor: &dyn TaskMonitor,
    ) -> anyhow::Result<()> {
        self.base.ignore_request(request);
        Ok(())
    }

    fn wake(&self) {}

    async fn ping(&self) -> bool {
        self.base.is_started()
    }
}
