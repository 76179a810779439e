use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use parking_lot::Mutex;
use servicer_core::{Attributes, ServiceDefinition};

use super::context::ServiceContext;
use crate::executor::registry::now_millis;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// How the driving servicer runs a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// `execute()` is called by the coordinator on the service's interval.
    Periodic,
    /// The service runs its own worker; the coordinator never calls `execute()`.
    Continuous,
}

/// Lifecycle state of a service instance.
///
/// State machine: Unconfigured -> Stopped -> Started <-> Suspended, and any
/// state -> Terminated. Terminated is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Unconfigured,
    Stopped,
    Started,
    Suspended,
    Terminated,
}

impl ServiceState {
    #[must_use]
    pub fn is_started(self) -> bool {
        self == Self::Started
    }

    /// Status string shown to administrators.
    #[must_use]
    pub fn label(self) -> &'static str {
        if self.is_started() {
            "Started"
        } else {
            "Stopped"
        }
    }
}

/// Point-in-time view of a service for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
    pub interval: Duration,
    pub last_execute_ms: Option<u64>,
    pub last_end_ms: Option<u64>,
}

/// Errors returned by lifecycle transitions.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service {name} has not been configured")]
    NotConfigured { name: String },
    #[error("service {name} has been terminated")]
    Terminated { name: String },
    #[error("service {name} failed to launch its worker: {reason}")]
    WorkerLaunch { name: String, reason: String },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// TaskMonitor
// ---------------------------------------------------------------------------

/// Progress sink passed with out-of-band requests.
pub trait TaskMonitor: Send + Sync {
    fn update_progress(&self, message: &str, percent: Option<u8>);
}

/// Monitor that discards progress.
#[derive(Debug, Default)]
pub struct NullMonitor;

impl TaskMonitor for NullMonitor {
    fn update_progress(&self, _message: &str, _percent: Option<u8>) {}
}

// ---------------------------------------------------------------------------
// Service trait
// ---------------------------------------------------------------------------

/// Lifecycle contract implemented by every background subsystem.
///
/// The servicer guarantees `configure` runs before the first `start`, and
/// never calls `start` after `terminate`. `execute` and `handle_request` may
/// run for as long as the underlying unit of work does.
#[async_trait]
pub trait Service: Send + Sync {
    /// Definition name once configured, otherwise the built-in default.
    fn name(&self) -> String;

    fn mode(&self) -> ExecutionMode;

    /// Current interval between executions (or worker wake-ups).
    fn interval(&self) -> Duration;

    fn state(&self) -> ServiceState;

    fn status(&self) -> ServiceStatus;

    fn is_started(&self) -> bool {
        self.state().is_started()
    }

    /// Attach or refresh configuration. Never starts the service.
    async fn configure(&self, ctx: &ServiceContext) -> Result<(), ServiceError>;

    /// Activate the service. On error the service is left not started.
    async fn start(&self) -> Result<(), ServiceError>;

    /// Stop accepting new work; in-flight work runs to completion.
    async fn suspend(&self);

    /// Irreversible shutdown.
    async fn terminate(&self);

    /// One periodic unit of work.
    async fn execute(&self, ctx: &ServiceContext) -> anyhow::Result<()>;

    /// Out-of-band command. Must be a no-op when the service is not started.
    async fn handle_request(
        &self,
        ctx: &ServiceContext,
        request: &str,
        args: &Attributes,
        monitor: &dyn TaskMonitor,
    ) -> anyhow::Result<()>;

    /// Interrupt a continuous worker's wait so it re-checks for work now.
    fn wake(&self);

    /// Liveness probe. Must not block on the worker.
    async fn ping(&self) -> bool;
}

// ---------------------------------------------------------------------------
// ServiceBase
// ---------------------------------------------------------------------------

/// Shared bookkeeping that concrete services embed and delegate to.
///
/// Owns the state machine, the attached definition and context, the interval,
/// and execution timestamps, and supplies the safe defaults for operations a
/// service has nothing special to do in.
pub struct ServiceBase {
    default_name: &'static str,
    mode: ExecutionMode,
    definition: ArcSwapOption<ServiceDefinition>,
    context: ArcSwapOption<ServiceContext>,
    interval: Mutex<Duration>,
    state: Mutex<ServiceState>,
    last_execute_ms: AtomicU64,
    last_end_ms: AtomicU64,
}

impl fmt::Debug for ServiceBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBase")
            .field("name", &self.name())
            .field("mode", &self.mode)
            .field("state", &self.state())
            .field("interval", &self.interval())
            .finish_non_exhaustive()
    }
}

impl ServiceBase {
    #[must_use]
    pub fn new(default_name: &'static str, mode: ExecutionMode) -> Self {
        Self {
            default_name,
            mode,
            definition: ArcSwapOption::empty(),
            context: ArcSwapOption::empty(),
            interval: Mutex::new(Duration::ZERO),
            state: Mutex::new(ServiceState::Unconfigured),
            last_execute_ms: AtomicU64::new(0),
            last_end_ms: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.definition
            .load()
            .as_ref()
            .map_or_else(|| self.default_name.to_string(), |d| d.name.clone())
    }

    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    #[must_use]
    pub fn definition(&self) -> Option<Arc<ServiceDefinition>> {
        self.definition.load_full()
    }

    /// Context captured by the most recent `configure`.
    #[must_use]
    pub fn context(&self) -> Option<Arc<ServiceContext>> {
        self.context.load_full()
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        *self.interval.lock()
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state().is_started()
    }

    /// Attaches the context's definition and refreshes the interval.
    ///
    /// Moves Unconfigured to Stopped; any other live state is kept.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Terminated`] after `terminate`.
    pub fn configure(&self, ctx: &ServiceContext) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        if *state == ServiceState::Terminated {
            return Err(ServiceError::Terminated { name: self.name() });
        }

        let interval = ctx.env.config.effective_interval(ctx.definition.interval_secs);
        self.definition.store(Some(Arc::clone(&ctx.definition)));
        self.context.store(Some(Arc::new(ctx.clone())));
        *self.interval.lock() = interval;

        if *state == ServiceState::Unconfigured {
            *state = ServiceState::Stopped;
        }
        drop(state);

        tracing::info!(service = %ctx.definition.name, ?interval, "service configured");
        Ok(())
    }

    /// Checks that `start` is legal without changing state.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotConfigured`] before `configure`, [`ServiceError::Terminated`] after `terminate`.
    pub fn check_startable(&self) -> Result<ServiceState, ServiceError> {
        match self.state() {
            ServiceState::Unconfigured => Err(ServiceError::NotConfigured { name: self.name() }),
            ServiceState::Terminated => Err(ServiceError::Terminated { name: self.name() }),
            state => Ok(state),
        }
    }

    /// Moves to Started. Returns the previous state.
    ///
    /// # Errors
    ///
    /// Same as [`ServiceBase::check_startable`].
    pub fn mark_started(&self) -> Result<ServiceState, ServiceError> {
        let mut state = self.state.lock();
        let previous = *state;
        match previous {
            ServiceState::Unconfigured => Err(ServiceError::NotConfigured { name: self.name() }),
            ServiceState::Terminated => Err(ServiceError::Terminated { name: self.name() }),
            _ => {
                *state = ServiceState::Started;
                Ok(previous)
            }
        }
    }

    /// Moves Started to Suspended. Returns `false` if the service was not started.
    pub fn mark_suspended(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ServiceState::Started {
            *state = ServiceState::Suspended;
            true
        } else {
            false
        }
    }

    /// Moves to Terminated. Returns `false` if already terminated.
    pub fn mark_terminated(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ServiceState::Terminated {
            false
        } else {
            *state = ServiceState::Terminated;
            true
        }
    }

    /// Records the start of an execution.
    pub fn begin_execute(&self) {
        self.last_execute_ms.store(now_millis(), Ordering::Relaxed);
    }

    /// Records the end of an execution and its outcome.
    pub fn end_execute(&self, succeeded: bool) {
        self.last_end_ms.store(now_millis(), Ordering::Relaxed);
        let name = self.name();
        metrics::counter!("service_executions_total", "service" => name.clone()).increment(1);
        if !succeeded {
            metrics::counter!("service_execution_failures_total", "service" => name).increment(1);
        }
    }

    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            name: self.name(),
            state: self.state(),
            interval: self.interval(),
            last_execute_ms: non_zero(self.last_execute_ms.load(Ordering::Relaxed)),
            last_end_ms: non_zero(self.last_end_ms.load(Ordering::Relaxed)),
        }
    }

    /// Default `handle_request`: logs and ignores the request.
    pub fn ignore_request(&self, request: &str) {
        tracing::debug!(service = %self.name(), request, started = self.is_started(), "request ignored");
    }
}

fn non_zero(value: u64) -> Option<u64> {
    (value != 0).then_some(value)
}
