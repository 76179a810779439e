use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use servicer_core::{Attributes, WorkKind};
use tokio_util::sync::CancellationToken;

use super::{dispatch_pending, sweep_orphans, InFlight};
use crate::service::context::ServiceContext;
use crate::service::lifecycle::{
    ExecutionMode, Service, ServiceBase, ServiceError, ServiceState, ServiceStatus, TaskMonitor,
};
use crate::service::worker::{BackgroundRunnable, BackgroundWorker};

/// Request understood by [`RequestService::handle_request`].
pub const REFRESH_REQUEST: &str = "refresh";

/// Signal sent to the dispatcher worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchSignal {
    Wake,
}

// ---------------------------------------------------------------------------
// RequestDispatcher
// ---------------------------------------------------------------------------

/// Worker body: dispatches pending requests on every wake and tick while the
/// service is started.
struct RequestDispatcher {
    base: Arc<ServiceBase>,
    cancel: CancellationToken,
    in_flight: Arc<InFlight>,
}

impl RequestDispatcher {
    async fn dispatch(&self) {
        if !self.base.is_started() {
            return;
        }
        let (Some(ctx), Some(definition)) = (self.base.context(), self.base.definition()) else {
            return;
        };

        self.base.begin_execute();
        let result =
            dispatch_pending(&ctx, &definition, WorkKind::Request, &self.cancel, &self.in_flight)
                .await;
        self.base.end_execute(result.is_ok());
        if let Err(e) = result {
            tracing::warn!(service = %definition.name, error = %e, "request dispatch failed");
        }
    }
}

#[async_trait]
impl BackgroundRunnable for RequestDispatcher {
    type Task = DispatchSignal;

    async fn run(&mut self, _signal: DispatchSignal) {
        self.dispatch().await;
    }

    async fn on_tick(&mut self) {
        self.dispatch().await;
    }

    fn tick_interval(&self) -> Duration {
        self.base.interval()
    }
}

// ---------------------------------------------------------------------------
// RequestService
// ---------------------------------------------------------------------------

/// Continuous request processor.
///
/// Owns a background worker that wakes on its interval or on demand. The
/// coordinator never calls `execute` for this service.
pub struct RequestService {
    base: Arc<ServiceBase>,
    cancel: CancellationToken,
    in_flight: Arc<InFlight>,
    worker: Mutex<Option<Arc<BackgroundWorker<RequestDispatcher>>>>,
}

impl std::fmt::Debug for RequestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestService")
            .field("base", &self.base)
            .field("worker_running", &self.worker_running())
            .finish_non_exhaustive()
    }
}

impl Default for RequestService {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestService {
    pub const KIND: &'static str = "RequestService";

    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Arc::new(ServiceBase::new("Request", ExecutionMode::Continuous)),
            cancel: CancellationToken::new(),
            in_flight: Arc::new(InFlight::default()),
            worker: Mutex::new(None),
        }
    }

    fn worker(&self) -> Option<Arc<BackgroundWorker<RequestDispatcher>>> {
        self.worker.lock().clone()
    }

    async fn stop_worker(&self, timeout: Duration) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if !worker.stop(timeout).await {
                tracing::warn!(service = %self.base.name(), ?timeout, "request worker did not stop in time");
            }
        }
    }

    fn worker_running(&self) -> bool {
        self.worker().is_some_and(|worker| worker.is_running())
    }

    /// Requests this service is currently running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.in_flight.running()
    }
}

#[async_trait]
impl Service for RequestService {
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
        self.base.configure(ctx)?;
        // Pick up a changed interval right away.
        self.wake();
        Ok(())
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.base.check_startable()?;
        let ctx = self.base.context().ok_or_else(|| ServiceError::NotConfigured {
            name: self.base.name(),
        })?;
        sweep_orphans(&ctx, WorkKind::Request).await;

        if !self.worker_running() {
            let name = self.base.name();
            let dispatcher = RequestDispatcher {
                base: Arc::clone(&self.base),
                cancel: self.cancel.clone(),
                in_flight: Arc::clone(&self.in_flight),
            };
            let worker =
                BackgroundWorker::start(&name, dispatcher, ctx.env.config.worker_start_timeout)
                    .await
                    .map_err(|e| ServiceError::WorkerLaunch {
                        name: name.clone(),
                        reason: e.to_string(),
                    })?;
            *self.worker.lock() = Some(Arc::new(worker));
        }

        if let Err(e) = self.base.mark_started() {
            self.stop_worker(ctx.env.config.worker_stop_timeout).await;
            return Err(e);
        }
        self.wake();
        Ok(())
    }

    async fn suspend(&self) {
        self.base.mark_suspended();
    }

    async fn terminate(&self) {
        self.base.mark_terminated();
        self.cancel.cancel();

        let timeout = self
            .base
            .context()
            .map_or(Duration::from_secs(10), |ctx| ctx.env.config.worker_stop_timeout);
        self.stop_worker(timeout).await;
        if !self.in_flight.drain(timeout).await {
            tracing::warn!(service = %self.base.name(), ?timeout, "requests still running after terminate");
        }
    }

    async fn execute(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        self.wake();
        Ok(())
    }

    async fn handle_request(
        &self,
        _ctx: &ServiceContext,
        request: &str,
        _args: &Attributes,
        _monitor: &dyn TaskMonitor,
    ) -> anyhow::Result<()> {
        if self.base.is_started() && request == REFRESH_REQUEST {
            self.wake();
        } else {
            self.base.ignore_request(request);
        }
        Ok(())
    }

    fn wake(&self) {
        if let Some(worker) = self.worker() {
            // A full queue already holds a pending wake.
            let _ = worker.try_submit(DispatchSignal::Wake);
        }
    }

    async fn ping(&self) -> bool {
        match self.worker() {
            Some(worker) => self.base.is_started() && worker.is_running(),
            None => self.base.is_started(),
        }
    }
}

#[cfg(test)]
mod tests {
    use servicer_core::{ServiceDefinition, WorkState};

    use super::*;
    use crate::executor::LoggingRunner;
    use crate::service::domain::test_support::{Harness, WaitingRunner};
    use crate::service::lifecycle::NullMonitor;

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn started(harness: &Harness) -> (RequestService, ServiceContext) {
        let ctx = harness.ctx(ServiceDefinition::synthesized("Request"));
        let service = RequestService::new();
        service.configure(&ctx).await.unwrap();
        service.start().await.unwrap();
        (service, ctx)
    }

    #[tokio::test]
    async fn start_launches_worker_and_ping_reports_it() {
        let harness = Harness::new(Arc::new(LoggingRunner));
        let service = RequestService::new();
        assert!(!service.ping().await);

        service
            .configure(&harness.ctx(ServiceDefinition::synthesized("Request")))
            .await
            .unwrap();
        service.start().await.unwrap();
        assert!(service.is_started());
        assert!(service.ping().await);

        service.terminate().await;
        assert!(!service.ping().await);
        assert_eq!(service.state(), ServiceState::Terminated);
        assert!(matches!(service.start().await, Err(ServiceError::Terminated { .. })));
    }

    #[tokio::test]
    async fn refresh_request_wakes_the_worker() {
        let harness = Harness::new(Arc::new(LoggingRunner));
        let (service, ctx) = started(&harness).await;

        // The interval is 60s, so only a wake can dispatch this promptly.
        let id = harness.work.enqueue("report", WorkKind::Request);
        service
            .handle_request(&ctx, REFRESH_REQUEST, &Attributes::new(), &NullMonitor)
            .await
            .unwrap();

        let work = Arc::clone(&harness.work);
        wait_until(|| work.get(&id).is_some_and(|item| item.state == WorkState::Completed)).await;
        service.terminate().await;
    }

    #[tokio::test]
    async fn suspended_service_ignores_wakes() {
        let harness = Harness::new(Arc::new(LoggingRunner));
        let (service, ctx) = started(&harness).await;
        service.suspend().await;
        assert_eq!(service.state(), ServiceState::Suspended);
        // Worker stays up while suspended.
        assert!(service.worker_running());

        harness.work.enqueue("report", WorkKind::Request);
        service
            .handle_request(&ctx, REFRESH_REQUEST, &Attributes::new(), &NullMonitor)
            .await
            .unwrap();
        service.wake();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(harness.work.count_in_state(WorkState::Pending), 1);

        // Resume reuses the worker and picks the request up.
        service.start().await.unwrap();
        let work = Arc::clone(&harness.work);
        wait_until(|| work.count_in_state(WorkState::Completed) == 1).await;
        service.terminate().await;
    }

    #[tokio::test]
    async fn terminate_cancels_in_flight_requests() {
        let harness = Harness::new(Arc::new(WaitingRunner));
        let (service, _ctx) = started(&harness).await;

        harness.work.enqueue("long", WorkKind::Request);
        service.wake();
        wait_until(|| harness.env.executors.len() == 1).await;
        assert_eq!(service.running(), 1);

        service.terminate().await;
        assert!(harness.env.executors.is_empty());
        assert_eq!(harness.work.count_in_state(WorkState::Terminated), 1);
    }

    #[tokio::test]
    async fn worker_picks_up_shorter_interval() {
        let harness = Harness::new(Arc::new(LoggingRunner));
        let (service, _ctx) = started(&harness).await;

        let id = harness.work.enqueue("report", WorkKind::Request);
        service
            .configure(&harness.ctx(ServiceDefinition::new(
                "Request",
                RequestService::KIND,
                Some("global"),
                1,
            )))
            .await
            .unwrap();
        assert_eq!(service.interval(), Duration::from_secs(1));
        assert!(service.is_started());

        let work = Arc::clone(&harness.work);
        wait_until(|| work.get(&id).is_some_and(|item| item.state == WorkState::Completed)).await;
        service.terminate().await;
    }
}
