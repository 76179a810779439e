//! Per-process service coordinator.
//!
//! The `Servicer` owns every service instance built from the stored
//! definitions, applies host affinity, drives periodic services on a single
//! coordinating task, and shuts everything down in reverse registration order.
//! Other tasks talk to a running servicer through a cloneable
//! [`ServicerHandle`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use servicer_core::ServiceDefinition;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::bootstrap;
use super::context::{ServiceContext, ServicerEnv};
use super::factory::ServiceFactory;
use super::lifecycle::{ExecutionMode, Service, ServiceState, ServiceStatus};
use crate::cluster::affinity;

// ---------------------------------------------------------------------------
// Commands and handle
// ---------------------------------------------------------------------------

/// Commands processed by the servicer loop.
#[derive(Debug, Clone)]
pub enum ServicerCommand {
    /// Cluster membership or a Server record changed; re-apply affinity.
    TopologyChanged,
    /// An administrator edited or created a definition.
    DefinitionChanged(ServiceDefinition),
    /// An administrator deleted a definition.
    DefinitionRemoved(String),
    /// A service asked for its own definition to be re-applied.
    Reconfigure(ServiceDefinition),
    Shutdown,
}

/// Cloneable sender for [`ServicerCommand`]s.
///
/// Every method returns `false` once the servicer has gone away.
#[derive(Debug, Clone)]
pub struct ServicerHandle {
    tx: mpsc::UnboundedSender<ServicerCommand>,
}

impl ServicerHandle {
    pub fn send(&self, command: ServicerCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn topology_changed(&self) -> bool {
        self.send(ServicerCommand::TopologyChanged)
    }

    pub fn definition_changed(&self, definition: ServiceDefinition) -> bool {
        self.send(ServicerCommand::DefinitionChanged(definition))
    }

    pub fn remove_definition(&self, name: impl Into<String>) -> bool {
        self.send(ServicerCommand::DefinitionRemoved(name.into()))
    }

    pub fn reconfigure(&self, definition: ServiceDefinition) -> bool {
        self.send(ServicerCommand::Reconfigure(definition))
    }

    pub fn shutdown(&self) -> bool {
        self.send(ServicerCommand::Shutdown)
    }

    /// Handle not attached to any servicer; commands land on the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<ServicerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

// ---------------------------------------------------------------------------
// Servicer
// ---------------------------------------------------------------------------

struct ServiceSlot {
    service: Arc<dyn Service>,
    definition: Arc<ServiceDefinition>,
    /// When `execute` last finished; `None` means due immediately.
    last_run: Option<Instant>,
}

/// Owns and drives the services of one process.
pub struct Servicer {
    env: ServicerEnv,
    factory: Arc<ServiceFactory>,
    /// Registration order; shutdown walks it backwards.
    slots: Mutex<Vec<ServiceSlot>>,
    tx: mpsc::UnboundedSender<ServicerCommand>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<ServicerCommand>>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for Servicer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Servicer")
            .field("host", &self.env.host())
            .field("services", &self.names())
            .finish_non_exhaustive()
    }
}

impl Servicer {
    #[must_use]
    pub fn new(env: ServicerEnv, factory: Arc<ServiceFactory>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            env,
            factory,
            slots: Mutex::new(Vec::new()),
            tx,
            rx: Mutex::new(Some(rx)),
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn env(&self) -> &ServicerEnv {
        &self.env
    }

    #[must_use]
    pub fn handle(&self) -> ServicerHandle {
        ServicerHandle {
            tx: self.tx.clone(),
        }
    }

    fn context_for(&self, definition: Arc<ServiceDefinition>) -> ServiceContext {
        ServiceContext::new(self.env.clone(), definition, Some(self.handle()))
    }

    /// Builds and configures a service for `definition`. Does not start it.
    async fn build(&self, definition: Arc<ServiceDefinition>) -> Option<ServiceSlot> {
        let service = match self.factory.create(&definition.executor) {
            Ok(service) => service,
            Err(e) => {
                tracing::warn!(service = %definition.name, error = %e, "skipping service");
                return None;
            }
        };

        let ctx = self.context_for(Arc::clone(&definition));
        if let Err(e) = service.configure(&ctx).await {
            tracing::error!(service = %definition.name, error = %e, "failed to configure service");
            return None;
        }

        Some(ServiceSlot {
            service,
            definition,
            last_run: None,
        })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.slots
            .lock()
            .iter()
            .position(|slot| slot.definition.name == name)
    }

    /// Reads every definition, builds and configures its service, then
    /// applies affinity. Returns the number of services loaded.
    pub async fn load(&self) -> usize {
        let definitions = bootstrap::get_definitions(self.env.definitions.as_ref()).await;
        let mut loaded = 0;

        for definition in definitions {
            if self.position(&definition.name).is_some() {
                tracing::warn!(service = %definition.name, "duplicate service definition ignored");
                continue;
            }
            if let Some(slot) = self.build(Arc::new(definition)).await {
                self.slots.lock().push(slot);
                loaded += 1;
            }
        }

        tracing::info!(host = %self.env.host(), loaded, "services loaded");
        self.apply_affinity().await;
        loaded
    }

    /// Starts allowed services that are not running and suspends disallowed
    /// ones that are. Terminated services are left alone.
    pub async fn apply_affinity(&self) {
        let host = self.env.host();
        let server = bootstrap::load_server(self.env.definitions.as_ref(), host).await;

        let snapshot: Vec<(Arc<dyn Service>, Arc<ServiceDefinition>)> = self
            .slots
            .lock()
            .iter()
            .map(|slot| (Arc::clone(&slot.service), Arc::clone(&slot.definition)))
            .collect();

        for (service, definition) in snapshot {
            let state = service.state();
            if state == ServiceState::Terminated {
                continue;
            }

            let allowed = affinity::resolve(&definition, server.as_ref(), host);
            if allowed && !state.is_started() {
                match service.start().await {
                    Ok(()) => tracing::info!(service = %definition.name, %host, "service started"),
                    Err(e) => {
                        tracing::error!(service = %definition.name, error = %e, "failed to start service");
                    }
                }
            } else if !allowed && state.is_started() {
                service.suspend().await;
                tracing::info!(service = %definition.name, %host, "service suspended on this host");
            }
        }
    }

    /// Runs every periodic, started service whose interval has elapsed since
    /// its last run. Services run one after another on the calling task.
    pub async fn tick(&self, now: Instant) {
        let due: Vec<(Arc<dyn Service>, Arc<ServiceDefinition>)> = self
            .slots
            .lock()
            .iter()
            .filter(|slot| {
                slot.service.mode() == ExecutionMode::Periodic
                    && slot.service.is_started()
                    && slot
                        .last_run
                        .map_or(true, |last| now >= last + slot.service.interval())
            })
            .map(|slot| (Arc::clone(&slot.service), Arc::clone(&slot.definition)))
            .collect();

        for (service, definition) in due {
            let ctx = self.context_for(Arc::clone(&definition));
            if let Err(e) = service.execute(&ctx).await {
                tracing::warn!(service = %definition.name, error = %e, "service execution failed");
            }

            let finished = Instant::now();
            if let Some(slot) = self
                .slots
                .lock()
                .iter_mut()
                .find(|slot| Arc::ptr_eq(&slot.service, &service))
            {
                slot.last_run = Some(finished);
            }
        }
    }

    /// Applies an edited (or new) definition.
    ///
    /// A running instance of the same kind is reconfigured in place. A kind
    /// change terminates the old instance and builds a new one. Affinity is
    /// re-applied afterwards.
    pub async fn definition_changed(&self, definition: ServiceDefinition) {
        let name = definition.name.clone();
        let definition = Arc::new(definition);

        let existing = self.slots.lock().iter().find(|s| s.definition.name == name).map(|s| {
            (Arc::clone(&s.service), s.definition.executor.clone())
        });

        match existing {
            Some((_, kind)) if kind == definition.executor => {
                self.configure_in_place(definition).await;
            }
            Some((old, kind)) => {
                tracing::info!(service = %name, from = %kind, to = %definition.executor, "service kind changed; rebuilding");
                old.terminate().await;
                match self.build(definition).await {
                    Some(slot) => {
                        let mut slots = self.slots.lock();
                        if let Some(index) = slots.iter().position(|s| s.definition.name == name) {
                            slots[index] = slot;
                        }
                    }
                    None => {
                        self.slots.lock().retain(|s| s.definition.name != name);
                    }
                }
            }
            None => {
                if let Some(slot) = self.build(definition).await {
                    self.slots.lock().push(slot);
                }
            }
        }

        self.apply_affinity().await;
    }

    /// Re-applies `definition` to the running instance with the same name,
    /// without restarting it. Returns `false` if no such instance exists or
    /// the kind differs (use [`Servicer::definition_changed`] for those).
    pub async fn reconfigure(&self, definition: ServiceDefinition) -> bool {
        let same_kind = self
            .slots
            .lock()
            .iter()
            .any(|s| s.definition.name == definition.name && s.definition.executor == definition.executor);
        if !same_kind {
            tracing::warn!(service = %definition.name, "reconfigure ignored: no matching service");
            return false;
        }
        if !self.configure_in_place(Arc::new(definition)).await {
            return false;
        }
        self.apply_affinity().await;
        true
    }

    async fn configure_in_place(&self, definition: Arc<ServiceDefinition>) -> bool {
        let Some(service) = self
            .slots
            .lock()
            .iter()
            .find(|s| s.definition.name == definition.name)
            .map(|s| Arc::clone(&s.service))
        else {
            return false;
        };

        let ctx = self.context_for(Arc::clone(&definition));
        if let Err(e) = service.configure(&ctx).await {
            tracing::warn!(service = %definition.name, error = %e, "failed to reconfigure service");
            return false;
        }

        if let Some(slot) = self
            .slots
            .lock()
            .iter_mut()
            .find(|s| Arc::ptr_eq(&s.service, &service))
        {
            slot.definition = definition;
        }
        true
    }

    /// Terminates and forgets the service named `name`.
    pub async fn definition_removed(&self, name: &str) -> bool {
        let removed = {
            let mut slots = self.slots.lock();
            slots
                .iter()
                .position(|s| s.definition.name == name)
                .map(|index| slots.remove(index))
        };
        match removed {
            Some(slot) => {
                slot.service.terminate().await;
                tracing::info!(service = %name, "service removed");
                true
            }
            None => false,
        }
    }

    /// Re-applies affinity after a cluster membership or Server change.
    pub async fn topology_changed(&self) {
        tracing::debug!(host = %self.env.host(), "topology changed");
        self.apply_affinity().await;
    }

    async fn dispatch(&self, command: ServicerCommand) {
        match command {
            ServicerCommand::TopologyChanged => self.topology_changed().await,
            ServicerCommand::DefinitionChanged(definition) => {
                self.definition_changed(definition).await;
            }
            ServicerCommand::DefinitionRemoved(name) => {
                self.definition_removed(&name).await;
            }
            ServicerCommand::Reconfigure(definition) => {
                self.reconfigure(definition).await;
            }
            ServicerCommand::Shutdown => self.shutdown.cancel(),
        }
    }

    /// Drives the servicer until shutdown: periodic ticks, commands, and the
    /// shutdown token. Terminates every service on exit.
    pub async fn run(self: Arc<Self>) {
        let Some(mut rx) = self.rx.lock().take() else {
            tracing::warn!("servicer loop already running");
            return;
        };

        let mut ticker = tokio::time::interval(self.env.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => self.dispatch(command).await,
                    None => break,
                },
                _ = ticker.tick() => self.tick(Instant::now()).await,
            }
        }

        self.shutdown().await;
        tracing::info!(host = %self.env.host(), "servicer stopped");
    }

    /// Spawns [`Servicer::run`] on the current runtime.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    /// Stops the loop and terminates every service in reverse registration
    /// order. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let slots = std::mem::take(&mut *self.slots.lock());
        for slot in slots.into_iter().rev() {
            slot.service.terminate().await;
            tracing::debug!(service = %slot.definition.name, "service terminated");
        }
    }

    /// `(name, "Started" | "Stopped")` for every service, in registration order.
    #[must_use]
    pub fn status(&self) -> Vec<(String, &'static str)> {
        self.slots
            .lock()
            .iter()
            .map(|slot| (slot.service.name(), slot.service.state().label()))
            .collect()
    }

    #[must_use]
    pub fn statuses(&self) -> Vec<ServiceStatus> {
        self.slots.lock().iter().map(|slot| slot.service.status()).collect()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.slots
            .lock()
            .iter()
            .find(|slot| slot.definition.name == name)
            .map(|slot| Arc::clone(&slot.service))
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.slots
            .lock()
            .iter()
            .map(|slot| slot.definition.name.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
