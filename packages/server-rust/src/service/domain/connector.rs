use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use servicer_core::{Attributes, ServiceDefinition};

use crate::service::context::ServiceContext;
use crate::service::lifecycle::{
    ExecutionMode, Service, ServiceBase, ServiceError, ServiceState, ServiceStatus, TaskMonitor,
};
use crate::service::worker::{BackgroundRunnable, BackgroundWorker};

// ---------------------------------------------------------------------------
// ListenerResource
// ---------------------------------------------------------------------------

/// External inbound channel a connector listens on (mail box, queue, socket).
///
/// Resources have no notion of suspension: once open they keep listening
/// until closed.
#[async_trait]
pub trait ListenerResource: Send {
    /// Acquires the resource. An error fails the service start.
    async fn open(&mut self, definition: &ServiceDefinition) -> anyhow::Result<()>;

    /// Handles whatever arrived since the last poll. Returns how many messages
    /// were processed.
    async fn poll(&mut self) -> anyhow::Result<usize>;

    async fn close(&mut self);
}

/// Resource that never receives anything.
#[derive(Debug, Default)]
pub struct IdleListener;

#[async_trait]
impl ListenerResource for IdleListener {
    async fn open(&mut self, definition: &ServiceDefinition) -> anyhow::Result<()> {
        tracing::debug!(service = %definition.name, "idle listener opened");
        Ok(())
    }

    async fn poll(&mut self) -> anyhow::Result<usize> {
        Ok(0)
    }

    async fn close(&mut self) {}
}

type ResourceFactory = Arc<dyn Fn() -> Box<dyn ListenerResource> + Send + Sync>;

// ---------------------------------------------------------------------------
// ListenerWorker
// ---------------------------------------------------------------------------

struct ListenerWorker {
    base: Arc<ServiceBase>,
    resource: Box<dyn ListenerResource>,
    polls: Arc<AtomicU64>,
}

impl ListenerWorker {
    async fn poll(&mut self) {
        match self.resource.poll().await {
            Ok(received) => {
                self.polls.fetch_add(1, Ordering::Relaxed);
                if received > 0 {
                    tracing::debug!(service = %self.base.name(), received, "connector messages handled");
                }
            }
            Err(e) => tracing::warn!(service = %self.base.name(), error = %e, "connector poll failed"),
        }
    }
}

#[async_trait]
impl BackgroundRunnable for ListenerWorker {
    type Task = ();

    async fn on_start(&mut self) -> anyhow::Result<()> {
        let definition = self
            .base
            .definition()
            .ok_or_else(|| anyhow::anyhow!("listener started without a definition"))?;
        self.resource.open(&definition).await
    }

    async fn run(&mut self, _signal: ()) {
        self.poll().await;
    }

    async fn on_tick(&mut self) {
        self.poll().await;
    }

    fn tick_interval(&self) -> Duration {
        self.base.interval()
    }

    async fn shutdown(&mut self) {
        self.resource.close().await;
    }
}

// ---------------------------------------------------------------------------
// ConnectorListenerService
// ---------------------------------------------------------------------------

/// Continuous service polling an inbound connector resource.
///
/// `suspend` only flips the service state; the resource keeps listening
/// until the service is terminated.
pub struct ConnectorListenerService {
    base: Arc<ServiceBase>,
    resources: ResourceFactory,
    polls: Arc<AtomicU64>,
    worker: Mutex<Option<Arc<BackgroundWorker<ListenerWorker>>>>,
}

impl std::fmt::Debug for ConnectorListenerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorListenerService")
            .field("base", &self.base)
            .field("polls", &self.poll_count())
            .finish_non_exhaustive()
    }
}

impl Default for ConnectorListenerService {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorListenerService {
    pub const KIND: &'static str = "ConnectorListenerService";

    /// Listener backed by [`IdleListener`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_resource(|| Box::new(IdleListener))
    }

    /// Listener whose resource is built by `resources` on every worker launch.
    pub fn with_resource<F>(resources: F) -> Self
    where
        F: Fn() -> Box<dyn ListenerResource> + Send + Sync + 'static,
    {
        Self {
            base: Arc::new(ServiceBase::new("ConnectorListener", ExecutionMode::Continuous)),
            resources: Arc::new(resources),
            polls: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
        }
    }

    /// Successful polls since construction.
    #[must_use]
    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    fn worker(&self) -> Option<Arc<BackgroundWorker<ListenerWorker>>> {
        self.worker.lock().clone()
    }

    async fn stop_worker(&self, timeout: Duration) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if !worker.stop(timeout).await {
                tracing::warn!(service = %self.base.name(), ?timeout, "listener worker did not stop in time");
            }
        }
    }
}

#[async_trait]
impl Service for ConnectorListenerService {
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
        self.wake();
        Ok(())
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.base.check_startable()?;
        let ctx = self.base.context().ok_or_else(|| ServiceError::NotConfigured {
            name: self.base.name(),
        })?;

        if !self.worker().is_some_and(|worker| worker.is_running()) {
            let name = self.base.name();
            let listener = ListenerWorker {
                base: Arc::clone(&self.base),
                resource: (self.resources)(),
                polls: Arc::clone(&self.polls),
            };
            let worker =
                BackgroundWorker::start(&name, listener, ctx.env.config.worker_start_timeout)
                    .await
                    .map_err(|e| ServiceError::WorkerLaunch {
                        name: name.clone(),
                        reason: format!("{e:#}"),
                    })?;
            *self.worker.lock() = Some(Arc::new(worker));
        }

        if let Err(e) = self.base.mark_started() {
            self.stop_worker(ctx.env.config.worker_stop_timeout).await;
            return Err(e);
        }
        Ok(())
    }

    async fn suspend(&self) {
        if self.base.mark_suspended() {
            tracing::debug!(service = %self.base.name(), "listener resource keeps running while suspended");
        }
    }

    async fn terminate(&self) {
        self.base.mark_terminated();
        let timeout = self
            .base
            .context()
            .map_or(Duration::from_secs(10), |ctx| ctx.env.config.worker_stop_timeout);
        self.stop_worker(timeout).await;
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
        self.base.ignore_request(request);
        Ok(())
    }

    fn wake(&self) {
        if let Some(worker) = self.worker() {
            let _ = worker.try_submit(());
        }
    }

    async fn ping(&self) -> bool {
        match self.worker() {
            Some(worker) => self.base.is_started() && worker.is_running(),
            None => self.base.is_started(),
        }
    }
}
