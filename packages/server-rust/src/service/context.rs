use std::fmt;
use std::sync::Arc;

use servicer_core::{DefinitionStore, ServiceDefinition, WorkItemStore};

use super::config::ServicerConfig;
use super::servicer::ServicerHandle;
use crate::cluster::reconcile::{ClusterReconciler, HostProbe, LocalProbe};
use crate::executor::{ExecutorRegistry, LoggingRunner, OrphanSweep, WorkRunner};
use crate::store::{MemoryDefinitionStore, MemoryWorkStore};

// ---------------------------------------------------------------------------
// ServicerEnv
// ---------------------------------------------------------------------------

/// Process-wide collaborators shared by every service.
///
/// The executor registry and orphan sweep live here rather than in globals,
/// so each `ServicerEnv` (and each test) owns an isolated set.
#[derive(Clone)]
pub struct ServicerEnv {
    pub config: Arc<ServicerConfig>,
    pub definitions: Arc<dyn DefinitionStore>,
    pub work: Arc<dyn WorkItemStore>,
    pub runner: Arc<dyn WorkRunner>,
    pub executors: Arc<ExecutorRegistry>,
    pub orphans: Arc<OrphanSweep>,
}

impl ServicerEnv {
    pub fn new(
        config: ServicerConfig,
        definitions: Arc<dyn DefinitionStore>,
        work: Arc<dyn WorkItemStore>,
        runner: Arc<dyn WorkRunner>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            definitions,
            work,
            runner,
            executors: Arc::new(ExecutorRegistry::new()),
            orphans: Arc::new(OrphanSweep::new()),
        }
    }

    /// Environment backed by empty in-memory stores and the logging runner.
    #[must_use]
    pub fn in_memory(config: ServicerConfig) -> Self {
        Self::new(
            config,
            Arc::new(MemoryDefinitionStore::new()),
            Arc::new(MemoryWorkStore::new()),
            Arc::new(LoggingRunner),
        )
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.config.host_name
    }

    /// Reconciler over this host's registry plus `peers`, each bounded by
    /// the configured reconcile timeout.
    #[must_use]
    pub fn reconciler(&self, peers: Vec<Arc<dyn HostProbe>>) -> ClusterReconciler {
        let local: Arc<dyn HostProbe> =
            Arc::new(LocalProbe::new(self.host(), Arc::clone(&self.executors)));
        let probes = std::iter::once(local).chain(peers).collect();
        ClusterReconciler::new(probes, self.config.reconcile_timeout)
    }
}

impl fmt::Debug for ServicerEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicerEnv")
            .field("config", &self.config)
            .field("executors", &self.executors)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ServiceContext
// ---------------------------------------------------------------------------

/// Context handed to a service on `configure`, `execute` and `handle_request`.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub env: ServicerEnv,
    /// The definition this service instance is bound to.
    pub definition: Arc<ServiceDefinition>,
    servicer: Option<ServicerHandle>,
}

impl ServiceContext {
    pub fn new(
        env: ServicerEnv,
        definition: Arc<ServiceDefinition>,
        servicer: Option<ServicerHandle>,
    ) -> Self {
        Self {
            env,
            definition,
            servicer,
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        self.env.host()
    }

    /// Asks the owning servicer to re-apply `definition` to this service.
    ///
    /// Used when a service discovers mid-execution that its effective
    /// configuration changed. Returns `false` when no servicer is attached or
    /// the servicer has shut down.
    pub fn reconfigure(&self, definition: ServiceDefinition) -> bool {
        match &self.servicer {
            Some(handle) => handle.reconfigure(definition),
            None => {
                tracing::debug!(service = %definition.name, "reconfigure requested without a servicer");
                false
            }
        }
    }
}
